//! Memory Backend layer (C1, C2).
//!
//! A backend acquires a contiguous byte region from some OS or process
//! facility and exposes it uniformly to the allocator layer. The
//! in-segment [`BackendHeader`] is the only state an attaching process
//! can rely on before it has reconstructed anything else; every
//! variant must write it first.

mod array;
mod heap;
mod null;
mod posix_mmap;
#[cfg(feature = "posix_shmem")]
mod posix_shmem;
mod registry;

pub use array::ArrayBackend;
pub use heap::HeapBackend;
pub use null::NullBackend;
pub use posix_mmap::PosixMmapBackend;
#[cfg(feature = "posix_shmem")]
pub use posix_shmem::PosixShmMmapBackend;
pub use registry::BackendRegistry;

use crate::error::Result;

/// Discriminant written into [`BackendHeader`] so an attacher can
/// confirm it is opening the variant it expects.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    PosixShmMmap = 0,
    PosixMmap = 1,
    Heap = 2,
    Array = 3,
    Null = 4,
}

pub const BACKEND_INITIALIZED: u32 = 0x1;
pub const BACKEND_OWNED: u32 = 0x2;

/// In-segment header. Exact field order is part of the wire contract:
/// an attacher skips exactly `size_of::<BackendHeader>()` bytes to
/// reach the data region.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BackendHeader {
    pub variant: BackendType,
    pub data_size: u64,
    pub flags: u32,
}

impl BackendHeader {
    pub fn is_initialized(&self) -> bool {
        self.flags & BACKEND_INITIALIZED != 0
    }

    pub fn is_owned(&self) -> bool {
        self.flags & BACKEND_OWNED != 0
    }
}

/// Object-safe surface shared by every backend variant, used by the
/// registry once a variant has already been acquired or attached.
pub trait Backend: Send + Sync {
    /// Native, process-local base address of the data region (after
    /// the header). Recomputed by every process on `attach`.
    fn data(&self) -> *mut u8;

    fn data_size(&self) -> usize;

    fn variant(&self) -> BackendType;

    fn is_owned(&self) -> bool;

    fn is_initialized(&self) -> bool;

    /// Release process-local mappings without affecting the region.
    /// Valid on both owner and non-owner.
    fn detach(&mut self);

    /// Tear down OS resources. Only meaningful for the owner; a
    /// no-op when called on a non-owner.
    fn destroy(&mut self);
}

/// Per-variant acquisition contract. Kept separate from [`Backend`]
/// because `init`/`attach` are associated (`Self`-returning)
/// functions and can't be part of an object-safe trait.
pub trait BackendInit: Backend + Sized {
    /// Owner-side acquisition of `size` bytes plus a header, named by
    /// `url` (ignored by backends with no external namespace, e.g.
    /// heap/array). Zero-initialization of the data region is *not*
    /// guaranteed; callers that need it must zero explicitly.
    fn init(size: usize, url: &str) -> Result<Self>;

    /// Non-owning: open an existing named region and reconstruct
    /// `data`/`data_size` from its in-segment header.
    fn attach(url: &str) -> Result<Self>;
}
