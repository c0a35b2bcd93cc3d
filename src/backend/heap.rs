use super::{Backend, BackendHeader, BackendInit, BackendType, BACKEND_INITIALIZED, BACKEND_OWNED};
use crate::error::{Error, Result};
use std::alloc::{alloc, dealloc, Layout};

/// Backend sourced from the process heap via the global allocator.
/// Single-process only: there is nothing to name, and `attach` always
/// fails.
pub struct HeapBackend {
    header: *mut BackendHeader,
    data: *mut u8,
    data_size: usize,
    owned: bool,
    layout: Layout,
}

unsafe impl Send for HeapBackend {}
unsafe impl Sync for HeapBackend {}

impl BackendInit for HeapBackend {
    fn init(size: usize, _url: &str) -> Result<Self> {
        let total = std::mem::size_of::<BackendHeader>() + size;
        let layout = Layout::from_size_align(total, std::mem::align_of::<BackendHeader>())
            .map_err(|e| Error::BackendAcquisition(e.to_string()))?;
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            return Err(Error::BackendAcquisition("heap allocation failed".into()));
        }
        let header = base as *mut BackendHeader;
        unsafe {
            header.write(BackendHeader {
                variant: BackendType::Heap,
                data_size: size as u64,
                flags: BACKEND_INITIALIZED | BACKEND_OWNED,
            });
        }
        let data = unsafe { base.add(std::mem::size_of::<BackendHeader>()) };
        Ok(Self {
            header,
            data,
            data_size: size,
            owned: true,
            layout,
        })
    }

    fn attach(_url: &str) -> Result<Self> {
        Err(Error::NotSupported(
            "HeapBackend is process-local and cannot be attached",
        ))
    }
}

impl Backend for HeapBackend {
    fn data(&self) -> *mut u8 {
        self.data
    }

    fn data_size(&self) -> usize {
        self.data_size
    }

    fn variant(&self) -> BackendType {
        BackendType::Heap
    }

    fn is_owned(&self) -> bool {
        self.owned
    }

    fn is_initialized(&self) -> bool {
        unsafe { (*self.header).is_initialized() }
    }

    fn detach(&mut self) {
        // No OS resource outlives this process; detach is a no-op for
        // a single-process backend other than forgetting ownership.
        self.owned = false;
    }

    fn destroy(&mut self) {
        if !self.owned || self.header.is_null() {
            return;
        }
        unsafe {
            dealloc(self.header as *mut u8, self.layout);
        }
        self.header = std::ptr::null_mut();
        self.data = std::ptr::null_mut();
        self.owned = false;
    }
}

impl Drop for HeapBackend {
    fn drop(&mut self) {
        if self.owned {
            self.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_reports_owned_and_initialized() {
        let backend = HeapBackend::init(4096, "").unwrap();
        assert!(backend.is_owned());
        assert!(backend.is_initialized());
        assert_eq!(backend.data_size(), 4096);
        assert!(!backend.data().is_null());
    }

    #[test]
    fn attach_is_never_supported() {
        let err = HeapBackend::attach("anything").unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[test]
    fn detach_relinquishes_ownership() {
        let mut backend = HeapBackend::init(4096, "").unwrap();
        backend.detach();
        assert!(!backend.is_owned());
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut backend = HeapBackend::init(4096, "").unwrap();
        backend.destroy();
        assert!(backend.data().is_null());
        // Second call must not double-free: `owned` is already false.
        backend.destroy();
    }

    #[test]
    fn data_region_is_writable_for_its_full_size() {
        let backend = HeapBackend::init(256, "").unwrap();
        unsafe {
            std::ptr::write_bytes(backend.data(), 0xab, backend.data_size());
            assert_eq!(*backend.data(), 0xab);
            assert_eq!(*backend.data().add(255), 0xab);
        }
    }
}
