use super::{Allocator, AllocatorHeaderPrefix, AllocatorType, NO_CUSTOM_HEADER};
use crate::backend::Backend;
use crate::ptr::{AllocatorId, Pointer};
use parking_lot::Mutex;
use std::mem::size_of;

#[repr(C)]
struct Header {
    prefix: AllocatorHeaderPrefix,
    bump_offset: u64,
    last_offset: u64,
    last_size: u64,
    allocated: u64,
}

/// Bump-pointer allocator for short-lived scoped arenas. `free` is a
/// no-op except when freeing the single most recent allocation, which
/// rewinds the bump pointer.
pub struct StackAllocator {
    id: AllocatorId,
    backend_id: u32,
    header: *mut Header,
    data_base: *mut u8,
    data_size: usize,
    custom_header_offset: Option<u64>,
    lock: Mutex<()>,
}

unsafe impl Send for StackAllocator {}
unsafe impl Sync for StackAllocator {}

impl StackAllocator {
    /// Carves this allocator's own header (plus an optional
    /// `custom_header_size`-byte caller reservation) out of the front
    /// of `backend`'s data region; everything after that becomes the
    /// allocator's client-visible data region.
    pub fn create(
        backend: &dyn Backend,
        backend_id: u32,
        id: AllocatorId,
        custom_header_size: usize,
    ) -> Self {
        let base = backend.data();
        let hdr_size = size_of::<Header>();
        let header = base as *mut Header;
        let custom_header_offset = if custom_header_size > 0 {
            Some(hdr_size as u64)
        } else {
            None
        };
        let data_base = unsafe { base.add(hdr_size + custom_header_size) };
        let data_size = backend.data_size() - hdr_size - custom_header_size;
        unsafe {
            header.write(Header {
                prefix: AllocatorHeaderPrefix {
                    allocator_id: id,
                    variant: AllocatorType::Stack,
                    custom_header_offset: custom_header_offset.unwrap_or(NO_CUSTOM_HEADER),
                },
                bump_offset: 0,
                last_offset: u64::MAX,
                last_size: 0,
                allocated: 0,
            });
        }
        Self {
            id,
            backend_id,
            header,
            data_base,
            data_size,
            custom_header_offset,
            lock: Mutex::new(()),
        }
    }
}

fn align_up(off: u64, align: usize) -> u64 {
    let align = align as u64;
    (off + align - 1) & !(align - 1)
}

impl Allocator for StackAllocator {
    fn id(&self) -> AllocatorId {
        self.id
    }

    fn backend_id(&self) -> u32 {
        self.backend_id
    }

    fn variant(&self) -> AllocatorType {
        AllocatorType::Stack
    }

    fn data_base(&self) -> *mut u8 {
        self.data_base
    }

    fn data_size(&self) -> usize {
        self.data_size
    }

    fn base(&self) -> *mut u8 {
        self.header as *mut u8
    }

    fn allocate(&self, size: usize, align: usize) -> Pointer {
        let _guard = self.lock.lock();
        let hdr = unsafe { &mut *self.header };
        let aligned = align_up(hdr.bump_offset, align);
        let end = aligned + size as u64;
        if end > self.data_size as u64 {
            return Pointer::NULL;
        }
        hdr.last_offset = aligned;
        hdr.last_size = size as u64;
        hdr.bump_offset = end;
        hdr.allocated += size as u64;
        Pointer::new(self.id, aligned)
    }

    fn reallocate(&self, p: Pointer, old_size: usize, new_size: usize) -> Pointer {
        let _guard = self.lock.lock();
        let hdr = unsafe { &mut *self.header };
        if p.off.offset() == hdr.last_offset {
            let end = hdr.last_offset + new_size as u64;
            if end <= self.data_size as u64 {
                hdr.bump_offset = end;
                hdr.last_size = new_size as u64;
                hdr.allocated = hdr.allocated - old_size as u64 + new_size as u64;
                return p;
            }
        }
        drop(_guard);
        let new_p = self.allocate(new_size, super::DEFAULT_ALIGN);
        if !new_p.is_null() {
            unsafe {
                let src = self.data_base.add(p.off.offset() as usize);
                let dst = self.data_base.add(new_p.off.offset() as usize);
                std::ptr::copy_nonoverlapping(src, dst, old_size.min(new_size));
            }
            self.free(p);
        }
        new_p
    }

    fn free(&self, p: Pointer) {
        if p.is_null() {
            return;
        }
        let _guard = self.lock.lock();
        let hdr = unsafe { &mut *self.header };
        if p.off.offset() == hdr.last_offset {
            hdr.bump_offset = hdr.last_offset;
            hdr.allocated -= hdr.last_size;
            hdr.last_offset = u64::MAX;
            hdr.last_size = 0;
        }
        // Freeing anything but the most recent allocation is
        // intentionally a no-op: a stack allocator never reclaims
        // interior slots.
    }

    fn currently_allocated(&self) -> usize {
        let _guard = self.lock.lock();
        unsafe { (*self.header).allocated as usize }
    }

    fn custom_header_offset(&self) -> Option<u64> {
        self.custom_header_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeapBackend;
    use crate::backend::BackendInit;

    #[test]
    fn reuses_only_the_most_recent_slot() {
        let backend = HeapBackend::init(1024 * 1024, "").unwrap();
        let alloc = StackAllocator::create(&backend, 0, AllocatorId::new(0, 1), 0);
        let a = alloc.allocate(100, 8);
        let b = alloc.allocate(200, 8);
        assert!(!a.is_null() && !b.is_null());
        alloc.free(b);
        let c = alloc.allocate(200, 8);
        assert_eq!(c.off, b.off);
        let d = alloc.allocate(1024 * 1024, 8);
        assert!(d.is_null());
    }
}
