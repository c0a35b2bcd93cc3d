use super::Allocator;
use crate::ptr::AllocatorId;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide table of live allocators keyed by [`AllocatorId`]
/// (C4). Stored as `Arc` rather than `Box` so container handles can
/// hold a clone and keep the allocator alive independent of the
/// registry's own lifetime.
#[derive(Default)]
pub struct AllocatorRegistry {
    table: HashMap<AllocatorId, Arc<dyn Allocator>>,
}

impl AllocatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, alloc: Arc<dyn Allocator>) {
        self.table.insert(alloc.id(), alloc);
    }

    pub fn get(&self, id: AllocatorId) -> Option<Arc<dyn Allocator>> {
        self.table.get(&id).cloned()
    }

    pub fn unregister(&mut self, id: AllocatorId) {
        self.table.remove(&id);
    }

    pub fn contains(&self, id: AllocatorId) -> bool {
        self.table.contains_key(&id)
    }
}
