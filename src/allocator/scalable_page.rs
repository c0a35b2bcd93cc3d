use super::{Allocator, AllocatorHeaderPrefix, AllocatorType, NO_CUSTOM_HEADER};
use crate::backend::Backend;
use crate::ptr::{AllocatorId, OffsetPointer, Pointer};
use parking_lot::Mutex;
use std::mem::size_of;

/// Size classes, smallest class whose slot fits the request wins.
/// Requests above the last class fall through to the overflow pool.
const CLASSES: [u64; 9] = [16, 32, 64, 128, 256, 512, 1024, 2048, 4096];
const NUM_CLASSES: usize = CLASSES.len();
const THRESHOLD: u64 = CLASSES[NUM_CLASSES - 1];
const OVERFLOW_KIND: u64 = u64::MAX;

/// Header carved immediately before every returned payload, for both
/// size-class slots and overflow blocks. `total_size` is the slot size
/// for a class allocation or the whole boundary-tagged block size
/// (header + payload + footer) for an overflow allocation.
#[repr(C)]
#[derive(Clone, Copy)]
struct AllocHeader {
    kind: u64,
    total_size: u64,
    free: u64,
    requested_size: u64,
}

const HEADER_SIZE: usize = size_of::<AllocHeader>();
const FOOTER_SIZE: usize = size_of::<u64>();
const MIN_OVERFLOW_PAYLOAD: usize = size_of::<OffsetPointer>() * 2;

#[repr(C)]
struct Header {
    prefix: AllocatorHeaderPrefix,
    class_bump_frontier: u64,
    /// Lowest address at which the overflow region currently starts;
    /// the whole `[overflow_frontier, data_size)` span is a
    /// contiguous run of boundary-tagged blocks.
    overflow_frontier: u64,
    overflow_free_head: OffsetPointer,
    allocated: u64,
    class_heads: [OffsetPointer; NUM_CLASSES],
}

/// Tiered free lists by size class plus an overflow path with boundary
/// tags, aimed at amortized O(1) allocation with low fragmentation
/// under bursty small-object workloads.
pub struct ScalablePageAllocator {
    id: AllocatorId,
    backend_id: u32,
    header: *mut Header,
    data_base: *mut u8,
    data_size: usize,
    custom_header_offset: Option<u64>,
    lock: Mutex<()>,
}

unsafe impl Send for ScalablePageAllocator {}
unsafe impl Sync for ScalablePageAllocator {}

fn class_index(size: usize) -> Option<usize> {
    CLASSES.iter().position(|&c| c >= size as u64)
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

impl ScalablePageAllocator {
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
                    variant: AllocatorType::ScalablePage,
                    custom_header_offset: custom_header_offset.unwrap_or(NO_CUSTOM_HEADER),
                },
                class_bump_frontier: 0,
                overflow_frontier: data_size as u64,
                overflow_free_head: OffsetPointer::NULL,
                allocated: 0,
                class_heads: [OffsetPointer::NULL; NUM_CLASSES],
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

    unsafe fn header_at(&self, block_addr: u64) -> *mut AllocHeader {
        self.data_base.add(block_addr as usize) as *mut AllocHeader
    }

    unsafe fn footer_at(&self, block_addr: u64, total_size: u64) -> *mut u64 {
        self.data_base
            .add((block_addr + total_size) as usize - FOOTER_SIZE) as *mut u64
    }

    /// Reads the `{next, prev}` free-list links stored in a free
    /// block's payload.
    unsafe fn free_links(&self, payload_off: u64) -> *mut [OffsetPointer; 2] {
        self.data_base.add(payload_off as usize) as *mut [OffsetPointer; 2]
    }

    unsafe fn unlink_free(&self, hdr: &mut Header, block_addr: u64) {
        let payload_off = block_addr + HEADER_SIZE as u64;
        let links = *self.free_links(payload_off);
        let (next, prev) = (links[0], links[1]);
        if prev.is_null() {
            hdr.overflow_free_head = next;
        } else {
            let prev_links = self.free_links(prev.offset() + HEADER_SIZE as u64);
            (*prev_links)[0] = next;
        }
        if !next.is_null() {
            let next_links = self.free_links(next.offset() + HEADER_SIZE as u64);
            (*next_links)[1] = prev;
        }
    }

    unsafe fn push_free(&self, hdr: &mut Header, block_addr: u64) {
        let payload_off = block_addr + HEADER_SIZE as u64;
        let old_head = hdr.overflow_free_head;
        *self.free_links(payload_off) = [old_head, OffsetPointer::NULL];
        if !old_head.is_null() {
            let old_links = self.free_links(old_head.offset() + HEADER_SIZE as u64);
            (*old_links)[1] = OffsetPointer::new(block_addr);
        }
        hdr.overflow_free_head = OffsetPointer::new(block_addr);
    }

    fn allocate_class(&self, hdr: &mut Header, idx: usize, requested: usize) -> Pointer {
        let slot_payload = CLASSES[idx] as usize;
        let slot_total = (HEADER_SIZE + slot_payload) as u64;
        let block_addr = if !hdr.class_heads[idx].is_null() {
            let payload_off = hdr.class_heads[idx].offset();
            let addr = payload_off - HEADER_SIZE as u64;
            let next = unsafe { *(self.data_base.add(payload_off as usize) as *mut OffsetPointer) };
            hdr.class_heads[idx] = next;
            addr
        } else {
            let addr = hdr.class_bump_frontier;
            if addr + slot_total > hdr.overflow_frontier {
                return Pointer::NULL;
            }
            hdr.class_bump_frontier = addr + slot_total;
            addr
        };
        unsafe {
            self.header_at(block_addr).write(AllocHeader {
                kind: idx as u64,
                total_size: slot_total,
                free: 0,
                requested_size: requested as u64,
            });
        }
        hdr.allocated += requested as u64;
        Pointer::new(self.id, block_addr + HEADER_SIZE as u64)
    }

    fn free_class(&self, hdr: &mut Header, idx: usize, block_addr: u64, payload_off: u64, requested: u64) {
        unsafe {
            self.header_at(block_addr).write(AllocHeader {
                kind: idx as u64,
                total_size: (HEADER_SIZE + CLASSES[idx] as usize) as u64,
                free: 1,
                requested_size: 0,
            });
            (self.data_base.add(payload_off as usize) as *mut OffsetPointer)
                .write(hdr.class_heads[idx]);
        }
        hdr.class_heads[idx] = OffsetPointer::new(payload_off);
        hdr.allocated -= requested;
    }

    fn allocate_overflow(&self, hdr: &mut Header, requested: usize) -> Pointer {
        let want_payload = requested.max(MIN_OVERFLOW_PAYLOAD);
        let want_total = align8(HEADER_SIZE + want_payload + FOOTER_SIZE) as u64;

        // First-fit scan of the overflow free list.
        let mut cur = hdr.overflow_free_head;
        while !cur.is_null() {
            let block_addr = cur.offset();
            let block_hdr = unsafe { *self.header_at(block_addr) };
            if block_hdr.total_size >= want_total {
                unsafe { self.unlink_free(hdr, block_addr) };
                let remainder = block_hdr.total_size - want_total;
                let min_split = (HEADER_SIZE + MIN_OVERFLOW_PAYLOAD + FOOTER_SIZE) as u64;
                if remainder >= min_split {
                    unsafe {
                        self.header_at(block_addr).write(AllocHeader {
                            kind: OVERFLOW_KIND,
                            total_size: want_total,
                            free: 0,
                            requested_size: requested as u64,
                        });
                        self.footer_at(block_addr, want_total).write(want_total);
                        let rem_addr = block_addr + want_total;
                        self.header_at(rem_addr).write(AllocHeader {
                            kind: OVERFLOW_KIND,
                            total_size: remainder,
                            free: 1,
                            requested_size: 0,
                        });
                        self.footer_at(rem_addr, remainder).write(remainder);
                        self.push_free(hdr, rem_addr);
                    }
                } else {
                    unsafe {
                        self.header_at(block_addr).write(AllocHeader {
                            kind: OVERFLOW_KIND,
                            total_size: block_hdr.total_size,
                            free: 0,
                            requested_size: requested as u64,
                        });
                    }
                }
                hdr.allocated += requested as u64;
                return Pointer::new(self.id, block_addr + HEADER_SIZE as u64);
            }
            cur = unsafe { (*self.free_links(cur.offset() + HEADER_SIZE as u64))[0] };
        }

        // Nothing fits: carve a fresh block from the overflow frontier.
        if hdr.overflow_frontier < want_total || hdr.overflow_frontier - want_total < hdr.class_bump_frontier {
            return Pointer::NULL;
        }
        let block_addr = hdr.overflow_frontier - want_total;
        hdr.overflow_frontier = block_addr;
        unsafe {
            self.header_at(block_addr).write(AllocHeader {
                kind: OVERFLOW_KIND,
                total_size: want_total,
                free: 0,
                requested_size: requested as u64,
            });
            self.footer_at(block_addr, want_total).write(want_total);
        }
        hdr.allocated += requested as u64;
        Pointer::new(self.id, block_addr + HEADER_SIZE as u64)
    }

    fn free_overflow(&self, hdr: &mut Header, mut block_addr: u64, requested: u64) {
        let mut total_size = unsafe { (*self.header_at(block_addr)).total_size };

        // Coalesce forward.
        let next_addr = block_addr + total_size;
        if next_addr < self.data_size as u64 {
            let next_hdr = unsafe { *self.header_at(next_addr) };
            if next_hdr.free == 1 {
                unsafe { self.unlink_free(hdr, next_addr) };
                total_size += next_hdr.total_size;
            }
        }

        // Coalesce backward using the footer just before this block.
        if block_addr > hdr.overflow_frontier {
            let prev_total = unsafe { *(self.data_base.add(block_addr as usize - FOOTER_SIZE) as *mut u64) };
            let prev_addr = block_addr - prev_total;
            let prev_hdr = unsafe { *self.header_at(prev_addr) };
            if prev_hdr.free == 1 {
                unsafe { self.unlink_free(hdr, prev_addr) };
                total_size += prev_hdr.total_size;
                block_addr = prev_addr;
            }
        }

        unsafe {
            self.header_at(block_addr).write(AllocHeader {
                kind: OVERFLOW_KIND,
                total_size,
                free: 1,
                requested_size: 0,
            });
            self.footer_at(block_addr, total_size).write(total_size);
            self.push_free(hdr, block_addr);
        }
        hdr.allocated -= requested;
    }
}

impl Allocator for ScalablePageAllocator {
    fn id(&self) -> AllocatorId {
        self.id
    }

    fn backend_id(&self) -> u32 {
        self.backend_id
    }

    fn variant(&self) -> AllocatorType {
        AllocatorType::ScalablePage
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
        match class_index(size.max(align)) {
            Some(idx) => self.allocate_class(hdr, idx, size),
            None => self.allocate_overflow(hdr, size),
        }
    }

    fn reallocate(&self, p: Pointer, old_size: usize, new_size: usize) -> Pointer {
        if p.is_null() {
            return self.allocate(new_size, super::DEFAULT_ALIGN);
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
        let payload_off = p.off.offset();
        let block_addr = payload_off - HEADER_SIZE as u64;
        let block_hdr = unsafe { *self.header_at(block_addr) };
        #[cfg(feature = "check_double_free")]
        if block_hdr.free == 1 {
            panic!("double free detected in ScalablePageAllocator");
        }
        if block_hdr.kind == OVERFLOW_KIND {
            self.free_overflow(hdr, block_addr, block_hdr.requested_size);
        } else {
            self.free_class(hdr, block_hdr.kind as usize, block_addr, payload_off, block_hdr.requested_size);
        }
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
    fn scenario_s1_reuse_after_bulk_free() {
        let backend = HeapBackend::init(16 * 1024 * 1024, "").unwrap();
        let alloc = ScalablePageAllocator::create(&backend, 0, AllocatorId::new(0, 1), 0);
        let mut ptrs = Vec::new();
        for _ in 0..1024 {
            let p = alloc.allocate(64, 8);
            assert!(!p.is_null());
            ptrs.push(p);
        }
        for p in ptrs.drain(..) {
            alloc.free(p);
        }
        assert_eq!(alloc.currently_allocated(), 0);
        for _ in 0..1024 {
            let p = alloc.allocate(64, 8);
            assert!(!p.is_null());
            ptrs.push(p);
        }
        for p in ptrs {
            alloc.free(p);
        }
        assert_eq!(alloc.currently_allocated(), 0);
    }

    #[test]
    fn overflow_allocations_coalesce() {
        let backend = HeapBackend::init(1024 * 1024, "").unwrap();
        let alloc = ScalablePageAllocator::create(&backend, 0, AllocatorId::new(0, 1), 0);
        let a = alloc.allocate(8192, 8);
        let b = alloc.allocate(8192, 8);
        assert!(!a.is_null() && !b.is_null());
        alloc.free(a);
        alloc.free(b);
        assert_eq!(alloc.currently_allocated(), 0);
        let c = alloc.allocate(16000, 8);
        assert!(!c.is_null());
        alloc.free(c);
        assert_eq!(alloc.currently_allocated(), 0);
    }

    #[test]
    fn custom_header_is_readable_and_writable_and_does_not_alias_data() {
        let backend = HeapBackend::init(1024 * 1024, "").unwrap();
        let alloc = ScalablePageAllocator::create(&backend, 0, AllocatorId::new(0, 1), size_of::<u64>());
        let alloc: &dyn Allocator = &alloc;
        let hdr = alloc.custom_header::<u64>();
        assert!(!hdr.is_null());
        unsafe { hdr.write(0xfeed_face_u64) };

        let p = alloc.allocate(64, 8);
        assert!(!p.is_null());
        unsafe {
            assert_eq!(*alloc.custom_header::<u64>(), 0xfeed_face_u64, "data allocation must not overwrite the custom header");
        }
        alloc.free(p);
    }

    #[test]
    fn no_custom_header_reserved_is_a_null_pointer() {
        let backend = HeapBackend::init(1024 * 1024, "").unwrap();
        let alloc = ScalablePageAllocator::create(&backend, 0, AllocatorId::new(0, 1), 0);
        let alloc: &dyn Allocator = &alloc;
        assert!(alloc.custom_header::<u64>().is_null());
    }

    #[cfg(feature = "check_double_free")]
    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_aborts_when_checked() {
        let backend = HeapBackend::init(1024 * 1024, "").unwrap();
        let alloc = ScalablePageAllocator::create(&backend, 0, AllocatorId::new(0, 1), 0);
        let p = alloc.allocate(64, 8);
        alloc.free(p);
        alloc.free(p);
    }
}
