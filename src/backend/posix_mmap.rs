use super::{Backend, BackendHeader, BackendInit, BackendType, BACKEND_INITIALIZED, BACKEND_OWNED};
use crate::error::{Error, Result};
use memmap::{MmapMut, MmapOptions};
use std::fs::OpenOptions;

/// `mmap` over a file descriptor (`url` names the file) or, when `url`
/// is empty, an anonymous private mapping. File-backed mappings are
/// shareable across processes that open the same path; anonymous ones
/// are not.
pub struct PosixMmapBackend {
    mmap: MmapMut,
    data: *mut u8,
    data_size: usize,
    owned: bool,
    file_backed: bool,
}

unsafe impl Send for PosixMmapBackend {}
unsafe impl Sync for PosixMmapBackend {}

impl BackendInit for PosixMmapBackend {
    fn init(size: usize, url: &str) -> Result<Self> {
        let hdr_size = std::mem::size_of::<BackendHeader>();
        let total = hdr_size + size;
        let file_backed = !url.is_empty();
        let mut mmap = if file_backed {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(url)
                .map_err(|e| Error::BackendAcquisition(e.to_string()))?;
            file.set_len(total as u64)
                .map_err(|e| Error::BackendAcquisition(e.to_string()))?;
            unsafe { MmapOptions::new().len(total).map_mut(&file) }
                .map_err(|e| Error::BackendAcquisition(e.to_string()))?
        } else {
            MmapMut::map_anon(total).map_err(|e| Error::BackendAcquisition(e.to_string()))?
        };

        let base = mmap.as_mut_ptr();
        let header = base as *mut BackendHeader;
        unsafe {
            header.write(BackendHeader {
                variant: BackendType::PosixMmap,
                data_size: size as u64,
                flags: BACKEND_INITIALIZED | BACKEND_OWNED,
            });
        }
        let data = unsafe { base.add(hdr_size) };
        Ok(Self {
            mmap,
            data,
            data_size: size,
            owned: true,
            file_backed,
        })
    }

    fn attach(url: &str) -> Result<Self> {
        if url.is_empty() {
            return Err(Error::AttachMismatch(
                "anonymous mappings cannot be attached".into(),
            ));
        }
        let hdr_size = std::mem::size_of::<BackendHeader>();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(url)
            .map_err(|e| Error::AttachMismatch(e.to_string()))?;
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file) }
            .map_err(|e| Error::AttachMismatch(e.to_string()))?;
        let base = mmap.as_mut_ptr();
        let header = base as *mut BackendHeader;
        let h = unsafe { &*header };
        if h.variant as u32 != BackendType::PosixMmap as u32 || !h.is_initialized() {
            return Err(Error::AttachMismatch("posix mmap tag mismatch".into()));
        }
        let data_size = h.data_size as usize;
        let data = unsafe { base.add(hdr_size) };
        Ok(Self {
            mmap,
            data,
            data_size,
            owned: false,
            file_backed: true,
        })
    }
}

impl Backend for PosixMmapBackend {
    fn data(&self) -> *mut u8 {
        self.data
    }

    fn data_size(&self) -> usize {
        self.data_size
    }

    fn variant(&self) -> BackendType {
        BackendType::PosixMmap
    }

    fn is_owned(&self) -> bool {
        self.owned
    }

    fn is_initialized(&self) -> bool {
        !self.data.is_null()
    }

    fn detach(&mut self) {
        self.owned = false;
    }

    fn destroy(&mut self) {
        if !self.owned {
            return;
        }
        self.owned = false;
        // Dropping `mmap` unmaps the region; a file-backed mapping's
        // contents persist on disk until the caller removes the file.
        let _ = self.file_backed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn anonymous_mapping_is_writable_and_owned() {
        let mut backend = PosixMmapBackend::init(4096, "").unwrap();
        assert!(backend.is_owned());
        assert!(!backend.file_backed);
        unsafe {
            std::ptr::write_bytes(backend.data(), 0x42, backend.data_size());
            assert_eq!(*backend.data(), 0x42);
        }
        backend.destroy();
    }

    #[test]
    fn anonymous_mapping_cannot_be_attached() {
        let err = PosixMmapBackend::attach("").unwrap_err();
        assert!(matches!(err, Error::AttachMismatch(_)));
    }

    #[test]
    fn file_backed_init_then_attach_sees_the_same_bytes() {
        let path = std::env::temp_dir().join(format!("hshm_test_posix_mmap_roundtrip_{}.bin", std::process::id()));
        let path_str = path.to_str().unwrap();

        {
            let mut owner = PosixMmapBackend::init(4096, path_str).unwrap();
            assert!(owner.file_backed);
            unsafe { owner.data().write(0x7a) };
        }

        let attacher = PosixMmapBackend::attach(path_str).unwrap();
        assert!(!attacher.is_owned());
        assert_eq!(attacher.data_size(), 4096);
        unsafe {
            assert_eq!(*attacher.data(), 0x7a);
        }

        let _ = fs::remove_file(&path);
    }
}
