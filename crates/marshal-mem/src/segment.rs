//! Segments: bounded capabilities over native memory.
//!
//! A [`Segment`] is an address, a length, and (usually) the arena that
//! governs the bytes. Every safe accessor checks bounds and asks the arena
//! whether the access is still legal, so reads after `close()` fail with
//! [`MemError::UseAfterClose`] rather than touching freed memory.
//!
//! Segments built from raw addresses ([`Segment::from_raw`]) have no arena:
//! they are views over memory somebody else owns, and only the caller knows
//! how long it stays valid.
//!
//! # Safety
//!
//! All reads and writes use `read_unaligned`/`write_unaligned`, because
//! packed layouts place fields at arbitrary offsets.

use std::fmt;
use std::sync::Arc;

use marshal_log::debug;

use crate::address::Address;
use crate::arena::{Arena, ArenaInner, CleanupFn};
use crate::error::{MemError, Result};

mod sealed {
    pub trait Sealed {}
}

/// Plain machine values that can be loaded from and stored to a segment.
pub trait Scalar: Copy + sealed::Sealed {
    /// Width in bytes.
    const SIZE: usize = std::mem::size_of::<Self>();
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Scalar for $ty {}
        )*
    };
}

impl_scalar!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64, Address);

/// A contiguous range of native memory.
#[derive(Clone)]
pub struct Segment {
    address: Address,
    len: usize,
    scope: Option<Arc<ArenaInner>>,
    cleanup: Option<u64>,
}

impl Segment {
    pub(crate) fn governed(
        address: Address,
        len: usize,
        scope: Arc<ArenaInner>,
        cleanup: Option<u64>,
    ) -> Self {
        Segment {
            address,
            len,
            scope: Some(scope),
            cleanup,
        }
    }

    /// Creates an unowned view of `len` bytes at `address`.
    ///
    /// # Safety
    ///
    /// `address..address + len` must be valid for reads and writes for as
    /// long as the segment (or anything derived from it) is used.
    #[must_use]
    pub unsafe fn from_raw(address: Address, len: usize) -> Self {
        Segment {
            address,
            len,
            scope: None,
            cleanup: None,
        }
    }

    /// The zero-length segment at the null address.
    #[must_use]
    pub fn null() -> Self {
        Segment {
            address: Address::NULL,
            len: 0,
            scope: None,
            cleanup: None,
        }
    }

    /// Base address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the segment has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the base address is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.address.is_null()
    }

    /// The governing arena, if any.
    #[must_use]
    pub fn arena(&self) -> Option<Arena> {
        self.scope.as_ref().map(|s| Arena::from_inner(Arc::clone(s)))
    }

    /// Whether a cleanup action is attached to this segment.
    #[must_use]
    pub fn has_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }

    /// Whether the governing arena is still open. Unowned views always are.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.scope.as_ref().is_none_or(|s| !s.is_closed())
    }

    /// Checks that the segment may be accessed from this thread right now.
    ///
    /// # Errors
    ///
    /// [`MemError::UseAfterClose`] or [`MemError::WrongThread`].
    pub fn check_access(&self) -> Result<()> {
        match &self.scope {
            Some(scope) => scope.check_access(),
            None => Ok(()),
        }
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(MemError::OutOfBounds {
                offset,
                len,
                size: self.len,
            }),
        }
    }

    /// Validates an access and returns the pointer to its first byte.
    fn checked_ptr(&self, offset: usize, len: usize) -> Result<*mut u8> {
        self.check_access()?;
        self.check_bounds(offset, len)?;
        if len > 0 && self.address.is_null() {
            return Err(MemError::NullAddress);
        }
        Ok(self.address.as_ptr::<u8>().wrapping_add(offset))
    }

    /// Sub-segment of `len` bytes at `offset`, governed by the same arena.
    ///
    /// # Errors
    ///
    /// [`MemError::OutOfBounds`] if the range does not fit.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Segment> {
        self.check_bounds(offset, len)?;
        Ok(Segment {
            address: Address::new(self.address.get() + offset),
            len,
            scope: self.scope.clone(),
            cleanup: None,
        })
    }

    /// Loads a scalar at `offset`.
    ///
    /// # Errors
    ///
    /// Bounds, liveness and thread checks.
    pub fn read<T: Scalar>(&self, offset: usize) -> Result<T> {
        let ptr = self.checked_ptr(offset, T::SIZE)?;
        // SAFETY: in bounds of a live segment; unaligned reads are allowed.
        Ok(unsafe { ptr.cast::<T>().read_unaligned() })
    }

    /// Stores a scalar at `offset`.
    ///
    /// # Errors
    ///
    /// Bounds, liveness and thread checks.
    pub fn write<T: Scalar>(&self, offset: usize, value: T) -> Result<()> {
        let ptr = self.checked_ptr(offset, T::SIZE)?;
        // SAFETY: in bounds of a live segment; unaligned writes are allowed.
        unsafe { ptr.cast::<T>().write_unaligned(value) };
        Ok(())
    }

    /// Copies `bytes` into the segment starting at `offset`.
    ///
    /// # Errors
    ///
    /// Bounds, liveness and thread checks.
    pub fn copy_from_slice(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let ptr = self.checked_ptr(offset, bytes.len())?;
        // SAFETY: destination range validated above; `bytes` cannot alias
        // native memory we hand out as `&[u8]` only through `to_vec`.
        unsafe { std::ptr::copy(bytes.as_ptr(), ptr, bytes.len()) };
        Ok(())
    }

    /// Copies all of `source` to the start of this segment.
    ///
    /// Overlapping ranges are handled like `memmove`.
    ///
    /// # Errors
    ///
    /// Checks on both segments; `source` must fit.
    pub fn copy_from(&self, source: &Segment) -> Result<()> {
        let src = source.checked_ptr(0, source.len)?;
        let dst = self.checked_ptr(0, source.len)?;
        // SAFETY: both ranges validated; `copy` tolerates overlap.
        unsafe { std::ptr::copy(src, dst, source.len) };
        Ok(())
    }

    /// Sets every byte to `byte`.
    ///
    /// # Errors
    ///
    /// Liveness and thread checks.
    pub fn fill(&self, byte: u8) -> Result<()> {
        let ptr = self.checked_ptr(0, self.len)?;
        // SAFETY: the whole segment was validated.
        unsafe { std::ptr::write_bytes(ptr, byte, self.len) };
        Ok(())
    }

    /// Copies the contents into a `Vec`.
    ///
    /// # Errors
    ///
    /// Liveness and thread checks.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let ptr = self.checked_ptr(0, self.len)?;
        if self.len == 0 {
            return Ok(Vec::new());
        }
        // SAFETY: the whole segment was validated and is non-null.
        Ok(unsafe { std::slice::from_raw_parts(ptr, self.len) }.to_vec())
    }

    /// Position of the first zero byte, scanning at most the segment length.
    ///
    /// # Errors
    ///
    /// Liveness and thread checks.
    pub fn find_nul(&self) -> Result<Option<usize>> {
        Ok(self.to_vec()?.iter().position(|&b| b == 0))
    }

    /// Same memory and arena with a different length.
    ///
    /// # Safety
    ///
    /// The first `len` bytes at the base address must be valid memory for as
    /// long as the governing arena is open.
    #[must_use]
    pub unsafe fn reinterpret(&self, len: usize) -> Segment {
        Segment {
            address: self.address,
            len,
            scope: self.scope.clone(),
            cleanup: self.cleanup,
        }
    }

    /// Same memory with a new length, governed by `arena`, optionally with
    /// an action to run when `arena` releases it.
    ///
    /// A cleanup already attached to this segment moves to `arena` (it runs
    /// once, before `cleanup`, at the new release point) and is detached
    /// from the previous arena.
    ///
    /// # Safety
    ///
    /// The first `len` bytes at the base address must stay valid until
    /// `arena` is released.
    ///
    /// # Errors
    ///
    /// Fails if `arena` cannot be used from this thread or is closed.
    pub unsafe fn reinterpret_in(
        &self,
        len: usize,
        arena: &Arena,
        cleanup: Option<CleanupFn>,
    ) -> Result<Segment> {
        let target = arena.governing_scope()?;

        let moved = match (&self.scope, self.cleanup) {
            (Some(old), Some(id)) => old.take_cleanup(id),
            _ => None,
        };
        if moved.is_some() {
            debug!(
                "cleanup for {} moves to arena {}",
                self.address,
                target.id()
            );
        }

        let action: Option<CleanupFn> = match (moved, cleanup) {
            (None, None) => None,
            (Some((_, first)), None) => Some(first),
            (None, Some(second)) => Some(second),
            (Some((moved_address, first)), Some(second)) => Some(Box::new(move |address| {
                first(moved_address);
                second(address);
            })),
        };

        let id = action.map(|a| target.register_cleanup(self.address, a));
        Ok(Segment::governed(self.address, len, target, id))
    }

    /// Whether this segment is governed by `arena`.
    #[must_use]
    pub fn is_governed_by(&self, arena: &Arena) -> bool {
        self.scope.as_ref().is_some_and(|s| arena.same_arena(s))
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.len == other.len
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("address", &self.address)
            .field("len", &self.len)
            .field("arena", &self.scope.as_ref().map(|s| s.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_scalar_round_trip_at_unaligned_offsets() {
        let arena = Arena::auto();
        let seg = arena.alloc(32, 8).unwrap();
        seg.write::<i32>(1, -7).unwrap();
        seg.write::<f64>(5, 2.5).unwrap();
        seg.write::<Address>(13, Address::new(0xdead)).unwrap();
        assert_eq!(seg.read::<i32>(1).unwrap(), -7);
        assert_eq!(seg.read::<f64>(5).unwrap(), 2.5);
        assert_eq!(seg.read::<Address>(13).unwrap(), Address::new(0xdead));
    }

    #[test]
    fn test_bounds() {
        let arena = Arena::auto();
        let seg = arena.alloc(4, 4).unwrap();
        assert_eq!(
            seg.read::<u64>(0),
            Err(MemError::OutOfBounds { offset: 0, len: 8, size: 4 })
        );
        assert!(seg.slice(2, 3).is_err());
        assert!(seg.slice(4, 0).is_ok());
    }

    #[test]
    fn test_slice_shares_memory() {
        let arena = Arena::auto();
        let seg = arena.alloc(8, 4).unwrap();
        let tail = seg.slice(4, 4).unwrap();
        tail.write::<u32>(0, 9).unwrap();
        assert_eq!(seg.read::<u32>(4).unwrap(), 9);
        assert_eq!(tail.address().get(), seg.address().get() + 4);
    }

    #[test]
    fn test_null_segment_rejects_reads() {
        let seg = Segment::null();
        assert!(seg.is_null());
        assert!(seg.read::<u8>(0).is_err());
        assert_eq!(seg.to_vec().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_copy_fill_and_to_vec() {
        let arena = Arena::auto();
        let a = arena.alloc_bytes(&[1, 2, 3, 4], 1).unwrap();
        let b = arena.alloc(4, 1).unwrap();
        b.copy_from(&a).unwrap();
        assert_eq!(b.to_vec().unwrap(), vec![1, 2, 3, 4]);
        b.fill(0xff).unwrap();
        assert_eq!(b.to_vec().unwrap(), vec![0xff; 4]);
        assert_eq!(a.find_nul().unwrap(), None);
    }

    #[test]
    fn test_adopt_raw_memory_with_cleanup() {
        let mut backing = Box::new([0u8; 16]);
        let address = Address::from_ptr(backing.as_mut_ptr());
        let freed = Arc::new(Mutex::new(None));

        let arena = Arena::confined();
        let raw = unsafe { Segment::from_raw(address, 0) };
        let freed_in = Arc::clone(&freed);
        let adopted = unsafe {
            raw.reinterpret_in(
                16,
                &arena,
                Some(Box::new(move |a| *freed_in.lock().unwrap() = Some(a))),
            )
        }
        .unwrap();
        adopted.write::<u32>(12, 77).unwrap();
        assert!(adopted.is_governed_by(&arena));
        assert!(adopted.has_cleanup());

        arena.close().unwrap();
        assert_eq!(*freed.lock().unwrap(), Some(address));
        assert_eq!(backing[12], 77);
    }

    #[test]
    fn test_cleanup_moves_with_ownership() {
        let runs = Arc::new(AtomicUsize::new(0));
        let first = Arena::shared();
        let second = Arena::shared();

        let seg = first.alloc(8, 8).unwrap();
        let counter = Arc::clone(&runs);
        let owned = unsafe {
            seg.reinterpret_in(
                8,
                &first,
                Some(Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
        }
        .unwrap();

        let moved = unsafe { owned.reinterpret_in(8, &second, None) }.unwrap();
        assert!(moved.has_cleanup());

        first.close().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        // A second transfer from the same (now detached) source moves nothing.
        let third = Arena::shared();
        let again = unsafe { owned.reinterpret_in(8, &third, None) };
        assert!(again.is_err() || !again.unwrap().has_cleanup());

        second.close().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        third.close().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
