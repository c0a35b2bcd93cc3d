//! Memory Manager facade (C7).
//!
//! [`MemoryManager`] is the single entry point most callers use: it
//! owns the backend and allocator registries and is responsible for
//! the bootstrap order the lower layers assume -- a backend must exist
//! and be registered before an allocator can be carved out of it.
//! Nothing here is strictly necessary (callers can drive
//! [`BackendRegistry`]/[`AllocatorRegistry`] directly), but every
//! multi-allocator program ends up rebuilding this bookkeeping anyway.

use crate::allocator::{
    Allocator, AllocatorRegistry, FixedPageAllocator, MallocAllocator, ScalablePageAllocator,
    StackAllocator,
};
use crate::backend::{Backend, BackendInit, BackendRegistry};
use crate::error::{Error, Result};
use crate::ptr::AllocatorId;
use log::warn;
use std::sync::Arc;

/// Default size used by callers that don't have a specific capacity
/// in mind yet, matched to `ScalablePageAllocator`'s largest size
/// class times a few hundred slots plus headroom for the overflow
/// pool.
const DEFAULT_BACKEND_SIZE: usize = 64 * 1024 * 1024;

/// Selects which allocator variant `create_allocator` carves out of a
/// backend, together with the one piece of variant-specific
/// configuration each needs beyond `(backend_id, id, custom_header_size)`.
pub enum AllocatorKind {
    Stack,
    FixedPage { page_size: usize },
    ScalablePage,
    Malloc,
}

/// Owns every live backend and allocator in the process and wires them
/// together. Safe to share across threads: both registries lock
/// internally only for the duration of a single table operation, never
/// across an `allocate`/`free` call.
pub struct MemoryManager {
    backends: BackendRegistry,
    allocators: AllocatorRegistry,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            backends: BackendRegistry::new(),
            allocators: AllocatorRegistry::new(),
        }
    }

    pub fn default_backend_size(&self) -> usize {
        DEFAULT_BACKEND_SIZE
    }

    /// Acquires a fresh backend of variant `B` and registers it under
    /// `backend_id`, replacing (and tearing down) whatever was
    /// previously registered there.
    pub fn create_backend<B: BackendInit + 'static>(
        &mut self,
        backend_id: u32,
        size: usize,
        url: &str,
    ) -> Result<()> {
        if self.backends.contains(backend_id) {
            warn!("backend id {backend_id} already registered; replacing it");
        }
        let backend = B::init(size, url)?;
        self.backends.register(backend_id, Box::new(backend));
        Ok(())
    }

    /// Attaches to an existing backend of variant `B` (owned by this or
    /// another process) and registers it under `backend_id`.
    pub fn attach_backend<B: BackendInit + 'static>(&mut self, backend_id: u32, url: &str) -> Result<()> {
        if self.backends.contains(backend_id) {
            warn!("backend id {backend_id} already registered; replacing it");
        }
        let backend = B::attach(url)?;
        self.backends.register(backend_id, Box::new(backend));
        Ok(())
    }

    pub fn unregister_backend(&mut self, backend_id: u32) {
        self.backends.unregister(backend_id);
    }

    pub fn get_backend(&self, backend_id: u32) -> Option<&dyn Backend> {
        self.backends.get(backend_id)
    }

    /// Carves a new allocator of `kind` out of the data region of
    /// `backend_id`, reserving `custom_header_size` bytes for the
    /// caller's own use ([`Allocator::custom_header`]) ahead of the
    /// client-visible region.
    pub fn create_allocator(
        &mut self,
        backend_id: u32,
        alloc_id: AllocatorId,
        kind: AllocatorKind,
        custom_header_size: usize,
    ) -> Result<Arc<dyn Allocator>> {
        if self.allocators.contains(alloc_id) {
            warn!("allocator {alloc_id} already registered; replacing it");
        }
        let backend = self
            .backends
            .get(backend_id)
            .ok_or(Error::UnknownBackend(backend_id))?;
        let allocator: Arc<dyn Allocator> = match kind {
            AllocatorKind::Stack => Arc::new(StackAllocator::create(
                backend,
                backend_id,
                alloc_id,
                custom_header_size,
            )),
            AllocatorKind::FixedPage { page_size } => Arc::new(FixedPageAllocator::create(
                backend,
                backend_id,
                alloc_id,
                page_size,
                custom_header_size,
            )),
            AllocatorKind::ScalablePage => Arc::new(ScalablePageAllocator::create(
                backend,
                backend_id,
                alloc_id,
                custom_header_size,
            )),
            AllocatorKind::Malloc => Arc::new(MallocAllocator::new(backend_id, alloc_id)),
        };
        self.allocators.register(allocator.clone());
        Ok(allocator)
    }

    pub fn get_allocator(&self, alloc_id: AllocatorId) -> Result<Arc<dyn Allocator>> {
        self.allocators.get(alloc_id).ok_or(Error::UnknownAllocator(alloc_id))
    }

    pub fn unregister_allocator(&mut self, alloc_id: AllocatorId) {
        self.allocators.unregister(alloc_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocatorType;
    use crate::backend::HeapBackend;

    #[test]
    fn create_backend_then_allocator_round_trips_through_registries() {
        let mut mgr = MemoryManager::new();
        mgr.create_backend::<HeapBackend>(0, 4 * 1024 * 1024, "").unwrap();
        let alloc = mgr
            .create_allocator(0, AllocatorId::new(0, 1), AllocatorKind::ScalablePage, 0)
            .unwrap();
        let p = alloc.allocate_default_align(64);
        assert!(!p.is_null());
        alloc.free(p);
        assert_eq!(alloc.currently_allocated(), 0);

        let fetched = mgr.get_allocator(AllocatorId::new(0, 1)).unwrap();
        assert_eq!(fetched.id(), alloc.id());
    }

    #[test]
    fn unknown_backend_is_an_error_not_a_panic() {
        let mut mgr = MemoryManager::new();
        let err = mgr.create_allocator(7, AllocatorId::new(0, 1), AllocatorKind::Malloc, 0);
        assert!(matches!(err, Err(Error::UnknownBackend(7))));
    }

    #[test]
    fn unregistering_a_backend_does_not_disturb_other_ids() {
        let mut mgr = MemoryManager::new();
        mgr.create_backend::<HeapBackend>(0, 1024 * 1024, "").unwrap();
        mgr.create_backend::<HeapBackend>(1, 1024 * 1024, "").unwrap();
        mgr.unregister_backend(0);
        assert!(mgr.get_backend(0).is_none());
        assert!(mgr.get_backend(1).is_some());
    }

    #[test]
    fn reregistering_a_backend_or_allocator_id_warns_and_replaces() {
        // `try_init` (not `init`): multiple tests in this binary may
        // reach this, and a second unconditional `init()` panics.
        let _ = env_logger::try_init();

        let mut mgr = MemoryManager::new();
        mgr.create_backend::<HeapBackend>(0, 1024 * 1024, "").unwrap();
        mgr.create_backend::<HeapBackend>(0, 2 * 1024 * 1024, "").unwrap();
        assert_eq!(mgr.get_backend(0).unwrap().data_size(), 2 * 1024 * 1024);

        let first = mgr
            .create_allocator(0, AllocatorId::new(0, 1), AllocatorKind::Malloc, 0)
            .unwrap();
        let second = mgr
            .create_allocator(0, AllocatorId::new(0, 1), AllocatorKind::ScalablePage, 0)
            .unwrap();
        assert_eq!(second.variant(), AllocatorType::ScalablePage);
        assert_eq!(
            mgr.get_allocator(AllocatorId::new(0, 1)).unwrap().variant(),
            AllocatorType::ScalablePage
        );
        drop(first);
    }
}
