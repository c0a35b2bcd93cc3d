//! Error types returned by the core layers.
//!
//! Per the contract in the specification, only acquisition-time failures
//! (OS calls, attach mismatches, id collisions surfaced as warnings) are
//! represented as `Result::Err`. Out-of-memory and double-free are *not*
//! represented here: OOM is a null [`crate::ptr::Pointer`] and double-free
//! is a programming error that aborts the process (see
//! [`crate::allocator`] module docs).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to acquire backend region: {0}")]
    BackendAcquisition(String),

    #[error("backend `{0}` does not exist or its header tag does not match the requested variant")]
    AttachMismatch(String),

    #[error("backend id {0} is not registered")]
    UnknownBackend(u32),

    #[error("allocator {0:?} is not registered")]
    UnknownAllocator(crate::ptr::AllocatorId),

    #[error("operation is not supported by this backend/allocator variant: {0}")]
    NotSupported(&'static str),

    #[error("requested size {0} exceeds the backend's remaining capacity")]
    OutOfSpace(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
