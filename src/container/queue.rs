//! Ring-buffer queue: the representative queue container used to
//! exercise the container runtime conventions, alongside [`SList`]
//! (the representative list).
//!
//! [`SpscQueue`] is the core, single-producer/single-consumer
//! container: a fixed-capacity ring over one contiguous allocation.
//! [`MpscQueue`] demonstrates the design note that thread safety is a
//! wrapper concern, not a property of the container itself: it is
//! nothing more than an `SpscQueue` behind a `parking_lot::Mutex`.

use super::{ShmContainer, ShmHeader};
use crate::allocator::Allocator;
use crate::ptr::{OffsetPointer, Pointer};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct QueueHeader {
    data_ptr: OffsetPointer,
    capacity: u64,
    head: u64,
    len: u64,
}
impl ShmHeader for QueueHeader {}

/// A fixed-capacity ring buffer. Not thread-safe; wrap in
/// [`MpscQueue`] (or any external lock) for concurrent producers.
pub struct SpscQueue<T> {
    header: *mut QueueHeader,
    alloc: Arc<dyn Allocator>,
    _marker: PhantomData<T>,
}

impl<T: 'static> ShmContainer for SpscQueue<T> {
    type Header = QueueHeader;

    fn from_raw(header: *mut QueueHeader, alloc: Arc<dyn Allocator>) -> Self {
        Self {
            header,
            alloc,
            _marker: PhantomData,
        }
    }

    fn header_ptr(&self) -> *mut QueueHeader {
        self.header
    }

    fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.alloc
    }

    fn shm_destroy_main(&mut self) {
        while self.pop().is_some() {}
        let hdr = unsafe { &*self.header };
        if !hdr.data_ptr.is_null() {
            self.alloc
                .free(Pointer::new(self.alloc.id(), hdr.data_ptr.offset()));
        }
    }
}

impl<T: 'static> Drop for SpscQueue<T> {
    fn drop(&mut self) {
        super::drop_container(self);
    }
}

/// The header pointer is just an offset into an already-`Send`
/// allocator's data region; ordinary single-threaded use is the
/// common case, but `MpscQueue` needs to move the whole queue (behind
/// its lock) into the scope of multiple producer threads.
unsafe impl<T: Send + 'static> Send for SpscQueue<T> {}

impl<T: 'static> SpscQueue<T> {
    pub fn new(alloc: Arc<dyn Allocator>, capacity: usize) -> Self {
        super::create::<Self>(alloc, |header, alloc| {
            let data_ptr = if capacity == 0 {
                Pointer::NULL
            } else {
                alloc.allocate(std::mem::size_of::<T>() * capacity, std::mem::align_of::<T>())
            };
            unsafe {
                header.write(QueueHeader {
                    data_ptr: data_ptr.off,
                    capacity: capacity as u64,
                    head: 0,
                    len: 0,
                });
            }
        })
    }

    fn slot(&self, index: u64) -> *mut T {
        let hdr = unsafe { &*self.header };
        let data = unsafe { self.alloc.convert::<T>(Pointer::new(self.alloc.id(), hdr.data_ptr.offset())) };
        unsafe { data.add(index as usize) }
    }

    pub fn capacity(&self) -> usize {
        unsafe { (*self.header).capacity as usize }
    }

    pub fn len(&self) -> usize {
        unsafe { (*self.header).len as usize }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Pushes to the tail. Returns the value back on a full queue, as
    /// an OOM-shaped failure that leaves the queue unmodified.
    pub fn emplace(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        let hdr = unsafe { &mut *self.header };
        let tail = (hdr.head + hdr.len) % hdr.capacity;
        unsafe {
            self.slot(tail).write(value);
        }
        hdr.len += 1;
        Ok(())
    }

    /// Pops from the head (FIFO order).
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let hdr = unsafe { &mut *self.header };
        let head = hdr.head;
        let value = unsafe { self.slot(head).read() };
        hdr.head = (hdr.head + 1) % hdr.capacity;
        hdr.len -= 1;
        Some(value)
    }

    /// Pops from the tail (LIFO on the most recent push).
    pub fn pop_back(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let hdr = unsafe { &mut *self.header };
        let tail = (hdr.head + hdr.len - 1) % hdr.capacity;
        let value = unsafe { self.slot(tail).read() };
        hdr.len -= 1;
        Some(value)
    }

    /// Borrows the element `offset` slots after the head without
    /// removing it.
    pub fn peek(&self, offset: usize) -> Option<&T> {
        if offset >= self.len() {
            return None;
        }
        let hdr = unsafe { &*self.header };
        let idx = (hdr.head + offset as u64) % hdr.capacity;
        Some(unsafe { &*self.slot(idx) })
    }
}

/// A multi-producer, single-consumer queue built by wrapping
/// [`SpscQueue`] in a lock: containers carry no hidden thread safety
/// by default, so concurrency is always composed in, never built in.
pub struct MpscQueue<T> {
    inner: Mutex<SpscQueue<T>>,
}

impl<T: 'static> MpscQueue<T> {
    pub fn new(alloc: Arc<dyn Allocator>, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SpscQueue::new(alloc, capacity)),
        }
    }

    pub fn emplace(&self, value: T) -> Result<(), T> {
        self.inner.lock().emplace(value)
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{Allocator as _, ScalablePageAllocator};
    use crate::backend::{BackendInit, HeapBackend};
    use crate::ptr::AllocatorId;
    use std::thread;

    fn fresh_alloc() -> Arc<dyn Allocator> {
        let backend = Box::leak(Box::new(HeapBackend::init(16 * 1024 * 1024, "").unwrap()));
        Arc::new(ScalablePageAllocator::create(backend, 0, AllocatorId::new(0, 1), 0))
    }

    #[test]
    fn scenario_s6_spsc_pop_back() {
        let alloc = fresh_alloc();
        let mut q = SpscQueue::<i32>::new(alloc.clone(), 8);
        q.emplace(1).unwrap();
        q.emplace(2).unwrap();
        q.emplace(3).unwrap();
        assert_eq!(q.pop_back(), Some(3));
        assert_eq!(q.pop_back(), Some(2));
        assert_eq!(q.pop_back(), Some(1));
        assert_eq!(q.pop_back(), None);
        drop(q);
        assert_eq!(alloc.currently_allocated(), 0);
    }

    #[test]
    fn scenario_s5_multi_producer_fifo_per_producer() {
        let alloc = fresh_alloc();
        let q = Arc::new(MpscQueue::<(usize, usize)>::new(alloc.clone(), 8 * 1024));
        let producers = 8;
        let per_producer = 1024;
        thread::scope(|scope| {
            for p in 0..producers {
                let q = Arc::clone(&q);
                scope.spawn(move || {
                    for i in 0..per_producer {
                        while q.emplace((p, i)).is_err() {
                            thread::yield_now();
                        }
                    }
                });
            }
        });
        let mut seen = vec![0usize; producers];
        let mut total = 0;
        while let Some((p, i)) = q.pop() {
            assert_eq!(seen[p], i, "producer {p} FIFO order violated");
            seen[p] += 1;
            total += 1;
        }
        assert_eq!(total, producers * per_producer);
        drop(q);
        assert_eq!(alloc.currently_allocated(), 0);
    }

    #[test]
    fn scenario_s7_offset_pointer_elements_leak_free() {
        let alloc = fresh_alloc();
        let mut q = SpscQueue::<OffsetPointer>::new(alloc.clone(), 4);
        q.emplace(OffsetPointer::new(5)).unwrap();
        assert_eq!(q.pop(), Some(OffsetPointer::new(5)));
        drop(q);
        assert_eq!(alloc.currently_allocated(), 0);
    }
}
