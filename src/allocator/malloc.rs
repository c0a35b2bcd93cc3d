use super::{Allocator, AllocatorType};
use crate::ptr::{AllocatorId, Pointer};
use std::alloc::{alloc, dealloc, realloc, Layout};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Single-process convenience allocator that passes straight through
/// to the process heap. `convert` treats the offset as an absolute
/// address rather than a displacement into a shared region, so this
/// allocator cannot be reconstructed from another process: it has no
/// backend-relative state to attach to by design.
pub struct MallocAllocator {
    id: AllocatorId,
    backend_id: u32,
    allocated: AtomicUsize,
    layouts: Mutex<HashMap<usize, Layout>>,
}

impl MallocAllocator {
    pub fn new(backend_id: u32, id: AllocatorId) -> Self {
        Self {
            id,
            backend_id,
            allocated: AtomicUsize::new(0),
            layouts: Mutex::new(HashMap::new()),
        }
    }
}

impl Allocator for MallocAllocator {
    fn id(&self) -> AllocatorId {
        self.id
    }

    fn backend_id(&self) -> u32 {
        self.backend_id
    }

    fn variant(&self) -> AllocatorType {
        AllocatorType::Malloc
    }

    /// There is no shared data region to base offsets from: offsets
    /// produced by this allocator already *are* absolute addresses.
    fn data_base(&self) -> *mut u8 {
        std::ptr::null_mut()
    }

    fn data_size(&self) -> usize {
        usize::MAX
    }

    /// Never reserves a custom header (`custom_header_offset` is
    /// always `None`), so this is never dereferenced.
    fn base(&self) -> *mut u8 {
        std::ptr::null_mut()
    }

    fn allocate(&self, size: usize, align: usize) -> Pointer {
        let align = align.max(1).next_power_of_two();
        let layout = match Layout::from_size_align(size, align) {
            Ok(l) => l,
            Err(_) => return Pointer::NULL,
        };
        let p = unsafe { alloc(layout) };
        if p.is_null() {
            return Pointer::NULL;
        }
        self.layouts.lock().unwrap().insert(p as usize, layout);
        self.allocated.fetch_add(size, Ordering::SeqCst);
        Pointer::new(self.id, p as u64)
    }

    fn reallocate(&self, p: Pointer, old_size: usize, new_size: usize) -> Pointer {
        if p.is_null() {
            return self.allocate(new_size, super::DEFAULT_ALIGN);
        }
        let addr = p.off.offset() as usize;
        let mut layouts = self.layouts.lock().unwrap();
        let old_layout = match layouts.remove(&addr) {
            Some(l) => l,
            None => panic!("MallocAllocator::reallocate on a foreign pointer"),
        };
        let new_ptr = unsafe { realloc(addr as *mut u8, old_layout, new_size) };
        if new_ptr.is_null() {
            layouts.insert(addr, old_layout);
            return Pointer::NULL;
        }
        let new_layout = Layout::from_size_align(new_size, old_layout.align()).unwrap();
        layouts.insert(new_ptr as usize, new_layout);
        drop(layouts);
        self.allocated
            .fetch_add(new_size.saturating_sub(old_size), Ordering::SeqCst);
        Pointer::new(self.id, new_ptr as u64)
    }

    fn free(&self, p: Pointer) {
        if p.is_null() {
            return;
        }
        let addr = p.off.offset() as usize;
        let layout = match self.layouts.lock().unwrap().remove(&addr) {
            Some(l) => l,
            None => panic!("double free or free of a foreign pointer in MallocAllocator"),
        };
        unsafe {
            dealloc(addr as *mut u8, layout);
        }
        self.allocated.fetch_sub(layout.size(), Ordering::SeqCst);
    }

    fn currently_allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    fn custom_header_offset(&self) -> Option<u64> {
        None
    }
}
