use super::{Backend, BackendHeader, BackendType, BACKEND_INITIALIZED, BACKEND_OWNED};
use crate::error::{Error, Result};

/// Backend over a caller-supplied byte buffer. The caller owns the
/// buffer's lifetime; `ArrayBackend` only writes the header and hands
/// back slices into it. There is no OS resource to destroy.
///
/// Deliberately does not implement [`super::BackendInit`]: that trait's
/// `init(size, url)` acquires and owns its own region, which is the
/// opposite of this variant's whole point (the caller already owns the
/// buffer). `ArrayBackend` is constructed directly via [`Self::init_in`]
/// / [`Self::attach_in`] by callers holding the buffer, not through
/// [`crate::manager::MemoryManager::create_backend`].
pub struct ArrayBackend {
    header: *mut BackendHeader,
    data: *mut u8,
    data_size: usize,
    owned: bool,
}

unsafe impl Send for ArrayBackend {}
unsafe impl Sync for ArrayBackend {}

impl ArrayBackend {
    /// Initializes a backend inside `buf`, which must be at least
    /// `size_of::<BackendHeader>() + size` bytes, where `size` is
    /// `buf.len() - size_of::<BackendHeader>()`.
    pub fn init_in(buf: &mut [u8]) -> Result<Self> {
        let hdr_size = std::mem::size_of::<BackendHeader>();
        if buf.len() <= hdr_size {
            return Err(Error::BackendAcquisition(
                "buffer too small to hold a BackendHeader".into(),
            ));
        }
        let data_size = buf.len() - hdr_size;
        let header = buf.as_mut_ptr() as *mut BackendHeader;
        unsafe {
            header.write(BackendHeader {
                variant: BackendType::Array,
                data_size: data_size as u64,
                flags: BACKEND_INITIALIZED | BACKEND_OWNED,
            });
        }
        let data = unsafe { buf.as_mut_ptr().add(hdr_size) };
        Ok(Self {
            header,
            data,
            data_size,
            owned: true,
        })
    }

    /// Reattaches to a buffer previously initialized by `init_in`
    /// (possibly in another process sharing this array, e.g. a
    /// `mmap`-backed slice passed in by the caller).
    pub fn attach_in(buf: &mut [u8]) -> Result<Self> {
        let hdr_size = std::mem::size_of::<BackendHeader>();
        if buf.len() <= hdr_size {
            return Err(Error::AttachMismatch("buffer too small".into()));
        }
        let header = buf.as_mut_ptr() as *mut BackendHeader;
        let h = unsafe { &*header };
        if h.variant as u32 != BackendType::Array as u32 || !h.is_initialized() {
            return Err(Error::AttachMismatch("array backend tag mismatch".into()));
        }
        let data_size = h.data_size as usize;
        let data = unsafe { buf.as_mut_ptr().add(hdr_size) };
        Ok(Self {
            header,
            data,
            data_size,
            owned: false,
        })
    }
}

impl Backend for ArrayBackend {
    fn data(&self) -> *mut u8 {
        self.data
    }

    fn data_size(&self) -> usize {
        self.data_size
    }

    fn variant(&self) -> BackendType {
        BackendType::Array
    }

    fn is_owned(&self) -> bool {
        self.owned
    }

    fn is_initialized(&self) -> bool {
        unsafe { (*self.header).is_initialized() }
    }

    fn detach(&mut self) {
        self.owned = false;
    }

    fn destroy(&mut self) {
        // The buffer is caller-managed; there is nothing for the
        // owner to tear down beyond relinquishing ownership.
        self.owned = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_in_then_attach_in_see_the_same_bytes() {
        let mut buf = vec![0u8; 4096];
        {
            let backend = ArrayBackend::init_in(&mut buf).unwrap();
            assert!(backend.is_owned());
            unsafe { backend.data().write(0x99) };
        }
        let attached = ArrayBackend::attach_in(&mut buf).unwrap();
        assert!(!attached.is_owned());
        assert_eq!(attached.data_size(), 4096 - std::mem::size_of::<BackendHeader>());
        unsafe {
            assert_eq!(*attached.data(), 0x99);
        }
    }

    #[test]
    fn init_in_rejects_a_too_small_buffer() {
        let mut buf = vec![0u8; 1];
        let err = ArrayBackend::init_in(&mut buf).unwrap_err();
        assert!(matches!(err, Error::BackendAcquisition(_)));
    }

    #[test]
    fn attach_in_rejects_an_uninitialized_buffer() {
        let mut buf = vec![0u8; 4096];
        let err = ArrayBackend::attach_in(&mut buf).unwrap_err();
        assert!(matches!(err, Error::AttachMismatch(_)));
    }
}
