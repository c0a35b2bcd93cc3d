//! Container runtime conventions (C6).
//!
//! Every shared-memory container obeys the same shape: a POD
//! [`ShmContainer::Header`] that lives inside the allocator's data
//! region and holds only offsets and value-typed fields (no native
//! pointers, no destructor side-effects), plus a process-local handle
//! -- the container type itself -- that references the header through
//! an [`Allocator`]. The concrete containers in this crate ([`slist`]
//! and the [`queue`] family) are deliberately thin: they exist to
//! exercise this contract, not to be a complete container library.

pub mod queue;
pub mod slist;

use crate::allocator::Allocator;
use crate::ptr::Pointer;
use std::sync::Arc;

/// Marker for a header type fit to live inside shared memory: `Copy`
/// (so assignment is a plain memcpy, never a user-defined copy ctor
/// with side effects) and free of any native pointer fields by
/// convention (not mechanically enforced -- see module docs).
pub trait ShmHeader: Copy + 'static {}

/// The conventions every shared-memory container implements.
///
/// `shm_init_main`/`shm_destroy_main` mirror the constructive
/// interface from the spec: the header has already been allocated
/// (its bytes are live but logically uninitialized) when
/// `shm_init_main` runs, and `shm_destroy_main` must release every
/// child allocation the container made, leaving the header itself for
/// the caller to free.
pub trait ShmContainer: Sized {
    type Header: ShmHeader;

    /// Rehydrates a process-local handle from a header already
    /// sitting in `alloc`'s data region (and already initialized).
    /// Used internally by the owning/shared/weak handle wrappers; does
    /// not itself initialize or take ownership.
    fn from_raw(header: *mut Self::Header, alloc: Arc<dyn Allocator>) -> Self;

    fn header_ptr(&self) -> *mut Self::Header;

    fn allocator(&self) -> &Arc<dyn Allocator>;

    /// Releases every allocation the container owns (its elements),
    /// but not the header allocation itself.
    fn shm_destroy_main(&mut self);
}

/// Deep-duplicates a container into a (possibly different) allocator.
/// Iterating the copy yields the same sequence as the source;
/// destroying either side has no effect on the other.
pub trait ShmStrongCopy: ShmContainer {
    fn shm_strong_copy_main(header: *mut Self::Header, alloc: Arc<dyn Allocator>, other: &Self) -> Self;
}

/// Transfers a source container's header contents to a freshly
/// allocated header in the *same* allocator, leaving the source an
/// empty shell whose destruction is a no-op.
pub trait ShmWeakMove: ShmContainer {
    fn shm_weak_move_main(header: *mut Self::Header, alloc: Arc<dyn Allocator>, other: &mut Self) -> Self;
}

fn alloc_header<H: ShmHeader>(alloc: &Arc<dyn Allocator>) -> Option<(Pointer, *mut H)> {
    let p = alloc.allocate(std::mem::size_of::<H>(), std::mem::align_of::<H>());
    if p.is_null() {
        return None;
    }
    let native = unsafe { alloc.convert::<H>(p) };
    Some((p, native))
}

/// Allocates a header and runs `init` to initialize it in place,
/// returning the constructed container. Panics on allocator OOM: a
/// container cannot come into existence without its header, which
/// mirrors the spec's treatment of allocation failure as a condition
/// callers must check *before* committing to a container (callers
/// that need to handle OOM gracefully should probe
/// `alloc.currently_allocated()` capacity themselves first).
pub(crate) fn create<C: ShmContainer>(
    alloc: Arc<dyn Allocator>,
    init: impl FnOnce(*mut C::Header, &Arc<dyn Allocator>),
) -> C {
    let (_, native) = alloc_header::<C::Header>(&alloc).expect("out of memory allocating container header");
    init(native, &alloc);
    C::from_raw(native, alloc)
}

/// Strong-copies `other` into `alloc` (which may be the same allocator
/// `other` already lives in).
pub fn strong_copy<C: ShmStrongCopy>(alloc: Arc<dyn Allocator>, other: &C) -> C {
    let (_, native) = alloc_header::<C::Header>(&alloc).expect("out of memory allocating container header");
    C::shm_strong_copy_main(native, alloc, other)
}

/// Header-level transfer: `other` becomes an empty shell after this
/// call, and `other.shm_destroy_main()` becomes a no-op.
pub fn weak_move<C: ShmWeakMove>(alloc: Arc<dyn Allocator>, other: &mut C) -> C {
    let (_, native) = alloc_header::<C::Header>(&alloc).expect("out of memory allocating container header");
    C::shm_weak_move_main(native, alloc, other)
}

/// Runs `shm_destroy_main` then frees the header allocation itself.
/// Every concrete container is its own unique handle and calls this
/// from its `Drop` impl, so destruction is automatic and scoped the
/// usual Rust way; a [`Weak`](self) view simply never calls it.
pub(crate) fn drop_container<C: ShmContainer>(container: &mut C) {
    let alloc = container.allocator().clone();
    let header_ptr = container.header_ptr();
    container.shm_destroy_main();
    let off = alloc.convert_back(header_ptr as *const C::Header);
    alloc.free(off);
}

/// In-segment header for a [`Shared`] handle: a plain refcount in
/// front of the container's own header. Incrementing/decrementing it
/// is not atomic -- containers carry no hidden thread safety, so
/// `Shared` is no exception; serialize access externally if clones
/// cross threads.
#[repr(C)]
#[derive(Clone, Copy)]
struct SharedHeader<H: ShmHeader> {
    refcount: u64,
    inner: H,
}
impl<H: ShmHeader> ShmHeader for SharedHeader<H> {}

/// Reference-counted handle: the last clone dropped destroys the
/// container.
pub struct Shared<C: ShmContainer> {
    container: std::mem::ManuallyDrop<C>,
    refcount_header: *mut SharedHeader<C::Header>,
}

unsafe impl<C: ShmContainer + Send> Send for Shared<C> {}

impl<C: ShmContainer> Shared<C> {
    pub fn new(alloc: Arc<dyn Allocator>, init: impl FnOnce(*mut C::Header, &Arc<dyn Allocator>)) -> Self {
        let (_, shared_native) =
            alloc_header::<SharedHeader<C::Header>>(&alloc).expect("out of memory allocating container header");
        unsafe {
            (*shared_native).refcount = 1;
        }
        let inner_ptr = unsafe { &mut (*shared_native).inner as *mut C::Header };
        init(inner_ptr, &alloc);
        Self {
            container: std::mem::ManuallyDrop::new(C::from_raw(inner_ptr, alloc)),
            refcount_header: shared_native,
        }
    }

    pub fn get(&self) -> &C {
        &self.container
    }

    pub fn get_mut(&mut self) -> &mut C {
        &mut self.container
    }

    pub fn ref_count(&self) -> u64 {
        unsafe { (*self.refcount_header).refcount }
    }

    /// A non-owning view of the same header, for callers that want to
    /// observe the container without participating in its lifetime.
    pub fn downgrade(&self) -> Weak<C> {
        Weak {
            container: std::mem::ManuallyDrop::new(C::from_raw(
                self.container.header_ptr(),
                self.container.allocator().clone(),
            )),
        }
    }
}

impl<C: ShmContainer> Clone for Shared<C> {
    fn clone(&self) -> Self {
        unsafe {
            (*self.refcount_header).refcount += 1;
        }
        Self {
            container: std::mem::ManuallyDrop::new(C::from_raw(
                self.container.header_ptr(),
                self.container.allocator().clone(),
            )),
            refcount_header: self.refcount_header,
        }
    }
}

impl<C: ShmContainer> Drop for Shared<C> {
    fn drop(&mut self) {
        unsafe {
            (*self.refcount_header).refcount -= 1;
            if (*self.refcount_header).refcount == 0 {
                self.container.shm_destroy_main();
                let alloc = self.container.allocator().clone();
                let off = alloc.convert_back(self.refcount_header as *const SharedHeader<C::Header>);
                alloc.free(off);
            }
        }
    }
}

/// A non-owning, manual-lifetime view of a container's header: never
/// destroys anything on drop. Lifetime responsibility belongs to
/// whatever created the underlying header ([`Shared`] or the
/// container's own unique handle).
pub struct Weak<C: ShmContainer> {
    container: std::mem::ManuallyDrop<C>,
}

impl<C: ShmContainer> Weak<C> {
    /// # Safety
    /// `header` must currently be a live, initialized `C::Header`
    /// whose owning handle outlives this `Weak`.
    pub unsafe fn from_raw(header: *mut C::Header, alloc: Arc<dyn Allocator>) -> Self {
        Self {
            container: std::mem::ManuallyDrop::new(C::from_raw(header, alloc)),
        }
    }

    pub fn get(&self) -> &C {
        &self.container
    }

    pub fn get_mut(&mut self) -> &mut C {
        &mut self.container
    }
}

/// Generic thread-safety wrapper: any container gains a
/// `parking_lot::Mutex` around its unique handle, turning uncoordinated
/// concurrent access into serialized access without the container
/// itself knowing it is being shared. This is the general form of the
/// pattern [`queue::MpscQueue`] specializes for ring queues; reach for
/// `Locked` when the container itself (e.g. [`slist::SList`]) needs to
/// be shared across threads as-is.
pub struct Locked<C: ShmContainer> {
    inner: parking_lot::Mutex<C>,
}

unsafe impl<C: ShmContainer + Send> Sync for Locked<C> {}

impl<C: ShmContainer> Locked<C> {
    pub fn new(container: C) -> Self {
        Self {
            inner: parking_lot::Mutex::new(container),
        }
    }

    pub fn lock(&self) -> parking_lot::MutexGuard<'_, C> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{Allocator as _, ScalablePageAllocator};
    use crate::backend::{BackendInit, HeapBackend};
    use crate::container::slist::SList;
    use crate::ptr::AllocatorId;

    fn fresh_alloc() -> Arc<dyn Allocator> {
        let backend = Box::leak(Box::new(HeapBackend::init(16 * 1024 * 1024, "").unwrap()));
        Arc::new(ScalablePageAllocator::create(backend, 0, AllocatorId::new(0, 1), 0))
    }

    #[test]
    fn shared_handle_destroys_only_on_last_release() {
        let alloc = fresh_alloc();
        let mut shared = Shared::<SList<i32>>::new(alloc.clone(), |header, _alloc| unsafe {
            header.write(crate::container::slist::SListHeader::empty());
        });
        shared.get_mut().emplace_back(1);
        shared.get_mut().emplace_back(2);
        assert_eq!(shared.ref_count(), 1);

        let clone = shared.clone();
        assert_eq!(shared.ref_count(), 2);
        assert_eq!(clone.ref_count(), 2);

        drop(shared);
        // One reference still alive: the container must not be gone.
        assert_eq!(clone.get().size(), 2);
        assert_ne!(alloc.currently_allocated(), 0);

        drop(clone);
        assert_eq!(alloc.currently_allocated(), 0);
    }

    #[test]
    fn weak_view_never_destroys() {
        let alloc = fresh_alloc();
        let mut shared = Shared::<SList<i32>>::new(alloc.clone(), |header, _alloc| unsafe {
            header.write(crate::container::slist::SListHeader::empty());
        });
        shared.get_mut().emplace_back(42);
        let weak = shared.downgrade();
        assert_eq!(weak.get().size(), 1);
        drop(weak);
        assert_eq!(shared.ref_count(), 1);
        drop(shared);
        assert_eq!(alloc.currently_allocated(), 0);
    }
}
