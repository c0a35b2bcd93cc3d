use super::Backend;
use std::collections::HashMap;

/// Process-wide table of live backends keyed by a small numeric
/// backend id (C1). Re-registering an id first unregisters (detaches
/// or destroys, per ownership) the prior occupant.
#[derive(Default)]
pub struct BackendRegistry {
    table: HashMap<u32, Box<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `backend` under `id`, unregistering whatever previously
    /// occupied that slot.
    pub fn register(&mut self, id: u32, backend: Box<dyn Backend>) {
        self.unregister(id);
        self.table.insert(id, backend);
    }

    pub fn get(&self, id: u32) -> Option<&dyn Backend> {
        self.table.get(&id).map(|b| b.as_ref())
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut (dyn Backend + 'static)> {
        self.table.get_mut(&id).map(|b| b.as_mut())
    }

    /// Detaches non-owned backends, destroys owned ones, and drops the
    /// registry entry either way.
    pub fn unregister(&mut self, id: u32) {
        if let Some(mut backend) = self.table.remove(&id) {
            if backend.is_owned() {
                backend.destroy();
            } else {
                backend.detach();
            }
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.table.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendInit, HeapBackend};

    #[test]
    fn register_then_get_round_trips() {
        let mut registry = BackendRegistry::new();
        registry.register(0, Box::new(HeapBackend::init(4096, "").unwrap()));
        assert!(registry.contains(0));
        assert_eq!(registry.get(0).unwrap().data_size(), 4096);
    }

    #[test]
    fn reregistering_an_id_tears_down_the_prior_occupant() {
        let mut registry = BackendRegistry::new();
        registry.register(0, Box::new(HeapBackend::init(4096, "").unwrap()));
        registry.register(0, Box::new(HeapBackend::init(8192, "").unwrap()));
        assert_eq!(registry.get(0).unwrap().data_size(), 8192);
    }

    #[test]
    fn unregister_removes_only_the_requested_id() {
        let mut registry = BackendRegistry::new();
        registry.register(0, Box::new(HeapBackend::init(4096, "").unwrap()));
        registry.register(1, Box::new(HeapBackend::init(4096, "").unwrap()));
        registry.unregister(0);
        assert!(!registry.contains(0));
        assert!(registry.contains(1));
    }

    #[test]
    fn get_mut_allows_driving_backend_lifecycle_through_the_registry() {
        let mut registry = BackendRegistry::new();
        registry.register(0, Box::new(HeapBackend::init(4096, "").unwrap()));
        registry.get_mut(0).unwrap().detach();
        assert!(!registry.get(0).unwrap().is_owned());
    }
}
