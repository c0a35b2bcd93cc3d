//! Shared-memory-resident data structures and allocators for
//! single-node, multi-process IPC.
//!
//! The crate is organized as three layers plus a facade:
//!
//! - [`backend`]: acquires a contiguous byte region (POSIX shared
//!   memory, an mmap'd file, the process heap, a caller-supplied
//!   buffer, or nothing at all) and exposes it uniformly.
//! - [`allocator`]: sub-divides a backend's region into client
//!   allocations, addressed by [`ptr::Pointer`] rather than a native
//!   pointer so the same allocation means the same thing across
//!   processes that mapped the backend at different addresses.
//! - [`container`]: data structures built entirely out of
//!   allocator-relative offsets, so a container's in-segment
//!   representation is valid regardless of which process is looking
//!   at it.
//! - [`manager`]: the `MemoryManager` facade tying the above three
//!   together for the common case of "create a backend, carve an
//!   allocator out of it, hand out containers."
//!
//! None of these layers are thread-safe by default beyond what's
//! explicitly documented (allocators serialize their own internal
//! bookkeeping; containers do not serialize access to their contents
//! at all). Concurrency beyond a single thread is always a wrapper
//! concern, composed in by the caller -- see
//! [`container::queue::MpscQueue`] for the ring-queue-specific form
//! and [`container::Locked`] for the generic one, usable over any
//! [`container::ShmContainer`].

pub mod allocator;
pub mod backend;
pub mod container;
pub mod error;
pub mod manager;
pub mod ptr;

pub use error::{Error, Result};
pub use manager::{AllocatorKind, MemoryManager};
