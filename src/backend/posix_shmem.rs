use super::{Backend, BackendHeader, BackendInit, BackendType, BACKEND_INITIALIZED, BACKEND_OWNED};
use crate::error::{Error, Result};
use shared_memory::{Shmem, ShmemConf};

/// POSIX named shared memory (`shm_open` + `ftruncate` + `mmap`, via
/// the `shared_memory` crate). `url` is the OS id; the region survives
/// until the owner unlinks it, even across process exit.
pub struct PosixShmMmapBackend {
    shmem: Option<Shmem>,
    data: *mut u8,
    data_size: usize,
    owned: bool,
}

unsafe impl Send for PosixShmMmapBackend {}
unsafe impl Sync for PosixShmMmapBackend {}

impl BackendInit for PosixShmMmapBackend {
    fn init(size: usize, url: &str) -> Result<Self> {
        let hdr_size = std::mem::size_of::<BackendHeader>();
        let total = hdr_size + size;
        let shmem = ShmemConf::new()
            .size(total)
            .os_id(url)
            .create()
            .map_err(|e| Error::BackendAcquisition(e.to_string()))?;

        let base = shmem.as_ptr();
        let header = base as *mut BackendHeader;
        unsafe {
            header.write(BackendHeader {
                variant: BackendType::PosixShmMmap,
                data_size: size as u64,
                flags: BACKEND_INITIALIZED | BACKEND_OWNED,
            });
        }
        let data = unsafe { base.add(hdr_size) };
        Ok(Self {
            shmem: Some(shmem),
            data,
            data_size: size,
            owned: true,
        })
    }

    fn attach(url: &str) -> Result<Self> {
        let hdr_size = std::mem::size_of::<BackendHeader>();
        let shmem = ShmemConf::new()
            .os_id(url)
            .open()
            .map_err(|e| Error::AttachMismatch(e.to_string()))?;
        let base = shmem.as_ptr();
        let header = base as *mut BackendHeader;
        let h = unsafe { &*header };
        if h.variant as u32 != BackendType::PosixShmMmap as u32 || !h.is_initialized() {
            return Err(Error::AttachMismatch("posix shm tag mismatch".into()));
        }
        let data_size = h.data_size as usize;
        let data = unsafe { base.add(hdr_size) };
        Ok(Self {
            shmem: Some(shmem),
            data,
            data_size,
            owned: false,
        })
    }
}

impl Backend for PosixShmMmapBackend {
    fn data(&self) -> *mut u8 {
        self.data
    }

    fn data_size(&self) -> usize {
        self.data_size
    }

    fn variant(&self) -> BackendType {
        BackendType::PosixShmMmap
    }

    fn is_owned(&self) -> bool {
        self.owned
    }

    fn is_initialized(&self) -> bool {
        self.shmem.is_some()
    }

    fn detach(&mut self) {
        // Dropping a non-owner `Shmem` just unmaps; it never unlinks.
        self.shmem = None;
        self.owned = false;
    }

    fn destroy(&mut self) {
        if !self.owned {
            return;
        }
        // `Shmem::drop` calls `shm_unlink` for the owner.
        self.shmem = None;
        self.owned = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_attach_from_another_handle_sees_the_same_bytes() {
        let os_id = format!("hshm_test_shmem_roundtrip_{}", std::process::id());
        let mut owner = PosixShmMmapBackend::init(4096, &os_id).unwrap();
        assert!(owner.is_owned());
        unsafe { owner.data().write(0x5a) };

        let attacher = PosixShmMmapBackend::attach(&os_id).unwrap();
        assert!(!attacher.is_owned());
        assert_eq!(attacher.data_size(), 4096);
        unsafe {
            assert_eq!(*attacher.data(), 0x5a);
        }

        drop(attacher);
        owner.destroy();
    }

    #[test]
    fn attach_to_a_missing_region_is_an_error() {
        let err = PosixShmMmapBackend::attach("hshm_test_shmem_never_created").unwrap_err();
        assert!(matches!(err, Error::AttachMismatch(_)));
    }
}
