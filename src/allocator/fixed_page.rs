use super::{Allocator, AllocatorHeaderPrefix, AllocatorType, NO_CUSTOM_HEADER};
use crate::backend::Backend;
use crate::ptr::{AllocatorId, OffsetPointer, Pointer};
use parking_lot::Mutex;
use std::mem::size_of;

#[repr(C)]
struct Header {
    prefix: AllocatorHeaderPrefix,
    page_size: u64,
    free_list_head: OffsetPointer,
    bump_frontier: u64,
    allocated: u64,
}

/// Single size-class allocator: every allocation occupies one
/// `page_size`-byte slot drawn from a free list, or carved fresh from
/// the backend's bump frontier when the free list is empty. O(1)
/// alloc/free, no coalescing.
pub struct FixedPageAllocator {
    id: AllocatorId,
    backend_id: u32,
    header: *mut Header,
    data_base: *mut u8,
    data_size: usize,
    custom_header_offset: Option<u64>,
    lock: Mutex<()>,
}

unsafe impl Send for FixedPageAllocator {}
unsafe impl Sync for FixedPageAllocator {}

/// The OS's native page size, a reasonable default slot size for
/// callers that don't have a specific one in mind (e.g. fixed-size
/// buffer pools sized to avoid internal fragmentation against the
/// backend's own page-granular mappings).
pub fn os_page_size() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 {
        n as usize
    } else {
        4096
    }
}

impl FixedPageAllocator {
    pub fn create(
        backend: &dyn Backend,
        backend_id: u32,
        id: AllocatorId,
        page_size: usize,
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
                    variant: AllocatorType::FixedPage,
                    custom_header_offset: custom_header_offset.unwrap_or(NO_CUSTOM_HEADER),
                },
                page_size: page_size.max(size_of::<OffsetPointer>()) as u64,
                free_list_head: OffsetPointer::NULL,
                bump_frontier: 0,
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

impl Allocator for FixedPageAllocator {
    fn id(&self) -> AllocatorId {
        self.id
    }

    fn backend_id(&self) -> u32 {
        self.backend_id
    }

    fn variant(&self) -> AllocatorType {
        AllocatorType::FixedPage
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

    fn allocate(&self, size: usize, _align: usize) -> Pointer {
        let _guard = self.lock.lock();
        let hdr = unsafe { &mut *self.header };
        if size as u64 > hdr.page_size {
            return Pointer::NULL;
        }
        if !hdr.free_list_head.is_null() {
            let off = hdr.free_list_head;
            let node = unsafe { self.data_base.add(off.offset() as usize) } as *mut OffsetPointer;
            hdr.free_list_head = unsafe { node.read() };
            hdr.allocated += hdr.page_size;
            return Pointer::new(self.id, off.offset());
        }
        let end = hdr.bump_frontier + hdr.page_size;
        if end > self.data_size as u64 {
            return Pointer::NULL;
        }
        let off = hdr.bump_frontier;
        hdr.bump_frontier = end;
        hdr.allocated += hdr.page_size;
        Pointer::new(self.id, off)
    }

    fn reallocate(&self, p: Pointer, old_size: usize, new_size: usize) -> Pointer {
        let page_size = unsafe { (*self.header).page_size } as usize;
        if new_size <= page_size {
            return p;
        }
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
        let node = unsafe { self.data_base.add(p.off.offset() as usize) } as *mut OffsetPointer;
        unsafe {
            node.write(hdr.free_list_head);
        }
        hdr.free_list_head = p.off;
        hdr.allocated -= hdr.page_size;
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
    use crate::backend::{BackendInit, HeapBackend};

    #[test]
    fn freed_slots_are_reused_before_bumping() {
        let backend = HeapBackend::init(1024 * 1024, "").unwrap();
        let alloc = FixedPageAllocator::create(&backend, 0, AllocatorId::new(0, 1), 64, 0);
        let a = alloc.allocate(64, 8);
        let b = alloc.allocate(64, 8);
        assert_ne!(a.off, b.off);
        alloc.free(a);
        let c = alloc.allocate(64, 8);
        assert_eq!(c.off, a.off, "free list should hand back the freed slot");
        assert_eq!(alloc.currently_allocated(), 128);
    }

    #[test]
    fn oversized_request_fails_closed() {
        let backend = HeapBackend::init(1024 * 1024, "").unwrap();
        let alloc = FixedPageAllocator::create(&backend, 0, AllocatorId::new(0, 1), 64, 0);
        assert!(alloc.allocate(65, 8).is_null());
    }

    #[test]
    fn os_page_size_is_positive_and_sane() {
        let size = os_page_size();
        assert!(size >= 4096);
        assert_eq!(size % 4096, 0);
    }
}
