//! Native addresses.

use std::fmt;

/// A raw native address.
///
/// An `Address` is plain data: it carries no lifetime and no bounds. It is
/// what a pointer-typed slot holds and what native code receives. Turning it
/// back into accessible memory goes through [`Segment::from_raw`], which is
/// `unsafe` for exactly that reason.
///
/// [`Segment::from_raw`]: crate::Segment::from_raw
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(usize);

impl Address {
    /// The null address.
    pub const NULL: Address = Address(0);

    /// Wraps a numeric address.
    #[must_use]
    pub const fn new(addr: usize) -> Self {
        Address(addr)
    }

    /// Numeric value of the address.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Whether this is the null address.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Captures the address of `ptr`, exposing its provenance so the address
    /// can later be turned back into a usable pointer.
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr.expose_provenance())
    }

    /// Reconstructs a pointer from this address.
    #[must_use]
    pub fn as_ptr<T>(self) -> *mut T {
        std::ptr::with_exposed_provenance_mut(self.0)
    }

    /// Address `offset` bytes past this one, or `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, offset: usize) -> Option<Address> {
        match self.0.checked_add(offset) {
            Some(addr) => Some(Address(addr)),
            None => None,
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for Address {
    fn from(addr: usize) -> Self {
        Address(addr)
    }
}
