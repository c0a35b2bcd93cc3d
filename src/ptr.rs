//! Offset-pointer model (C3).
//!
//! Every reference into a shared-memory region is expressed as an
//! (allocator id, byte offset) pair rather than a native pointer, since
//! the backend may be mapped at a different virtual address in every
//! attached process. [`OffsetPointer`] carries only the offset and is
//! used inside a container whose own allocator is already known from
//! context; [`Pointer`] additionally carries the [`AllocatorId`] and is
//! the form that crosses allocator boundaries; [`TypedPointer`] tags a
//! `Pointer` with an element type for compile-time discipline without
//! changing its bit layout.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

const NULL_OFFSET: u64 = u64::MAX;

/// A 2-part allocator id: `major` is a user-chosen namespace (often a
/// service id), `minor` distinguishes sibling allocators on that
/// namespace. `(u32::MAX, u32::MAX)` is the null sentinel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocatorId {
    pub major: u32,
    pub minor: u32,
}

impl AllocatorId {
    pub const NULL: AllocatorId = AllocatorId {
        major: u32::MAX,
        minor: u32::MAX,
    };

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub const fn is_null(&self) -> bool {
        self.major == u32::MAX && self.minor == u32::MAX
    }
}

impl Default for AllocatorId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.major, self.minor)
    }
}

/// An offset into an allocator's data region. Used wherever the owning
/// allocator is already implied by context (e.g. inside a container
/// entry, which is always allocated from the container's own
/// allocator).
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OffsetPointer(u64);

impl OffsetPointer {
    pub const NULL: OffsetPointer = OffsetPointer(NULL_OFFSET);

    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub const fn is_null(&self) -> bool {
        self.0 == NULL_OFFSET
    }

    pub const fn offset(&self) -> u64 {
        self.0
    }

    pub fn set_null(&mut self) {
        self.0 = NULL_OFFSET;
    }
}

impl Default for OffsetPointer {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for OffsetPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "OffsetPointer(null)")
        } else {
            write!(f, "OffsetPointer({})", self.0)
        }
    }
}

impl Hash for OffsetPointer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// A full, allocator-qualified offset pointer: `(allocator_id, offset)`.
/// Wire form is 16 bytes: `{ u32 major, u32 minor, u64 offset }`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub allocator_id: AllocatorId,
    pub off: OffsetPointer,
}

impl Pointer {
    pub const NULL: Pointer = Pointer {
        allocator_id: AllocatorId::NULL,
        off: OffsetPointer::NULL,
    };

    pub const fn new(allocator_id: AllocatorId, offset: u64) -> Self {
        Self {
            allocator_id,
            off: OffsetPointer::new(offset),
        }
    }

    pub const fn is_null(&self) -> bool {
        self.off.is_null()
    }
}

impl Default for Pointer {
    fn default() -> Self {
        Self::NULL
    }
}

/// A [`Pointer`] tagged with element type `T`, identical bit layout to
/// its untyped form. The tag exists purely for compile-time discipline
/// at call sites (e.g. `Allocator::convert`); it is never serialized.
#[repr(transparent)]
pub struct TypedPointer<T> {
    ptr: Pointer,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedPointer<T> {
    pub const fn from_untyped(ptr: Pointer) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    pub const fn null() -> Self {
        Self::from_untyped(Pointer::NULL)
    }

    pub const fn untyped(&self) -> Pointer {
        self.ptr
    }

    pub const fn is_null(&self) -> bool {
        self.ptr.is_null()
    }
}

impl<T> Clone for TypedPointer<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for TypedPointer<T> {}

impl<T> PartialEq for TypedPointer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}
impl<T> Eq for TypedPointer<T> {}

impl<T> fmt::Debug for TypedPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P<{}>({:?})", std::any::type_name::<T>(), self.ptr)
    }
}

impl<T> Default for TypedPointer<T> {
    fn default() -> Self {
        Self::null()
    }
}

/// Shorthand alias matching the spec's `P<T>` notation.
pub type P<T> = TypedPointer<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_roundtrip() {
        assert!(Pointer::NULL.is_null());
        assert!(OffsetPointer::NULL.is_null());
        assert!(AllocatorId::NULL.is_null());
        let p: P<u32> = P::null();
        assert!(p.is_null());
    }

    #[test]
    fn allocator_id_identity_independent_of_backend() {
        let a = AllocatorId::new(3, 1);
        let b = AllocatorId::new(3, 1);
        assert_eq!(a, b);
        use std::collections::hash_map::DefaultHasher;
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn wire_size_is_16_bytes() {
        assert_eq!(std::mem::size_of::<Pointer>(), 16);
    }
}
