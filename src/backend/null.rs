use super::{Backend, BackendType};

/// A backend with no region at all. Useful as a placeholder id or in
/// tests that only exercise the registry, never the data path.
#[derive(Default)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn data(&self) -> *mut u8 {
        std::ptr::null_mut()
    }

    fn data_size(&self) -> usize {
        0
    }

    fn variant(&self) -> BackendType {
        BackendType::Null
    }

    fn is_owned(&self) -> bool {
        false
    }

    fn is_initialized(&self) -> bool {
        false
    }

    fn detach(&mut self) {}

    fn destroy(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_empty_unowned_uninitialized() {
        let backend = NullBackend::default();
        assert!(backend.data().is_null());
        assert_eq!(backend.data_size(), 0);
        assert!(!backend.is_owned());
        assert!(!backend.is_initialized());
        assert_eq!(backend.variant() as u32, BackendType::Null as u32);
    }

    #[test]
    fn detach_and_destroy_are_harmless_no_ops() {
        let mut backend = NullBackend::default();
        backend.detach();
        backend.destroy();
        assert!(!backend.is_owned());
    }
}
