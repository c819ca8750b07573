//! Bump-allocated chunks of native memory.
//!
//! A [`Chunk`] is one zeroed block from the system allocator with a bump
//! pointer. Arenas own lists of chunks and free them all at once when they
//! are released; individual allocations are never returned.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{MemError, Result};

/// Base alignment of every chunk.
///
/// Requests with a larger alignment are still honoured by aligning the bump
/// pointer, which may skip up to `align - CHUNK_ALIGNMENT` bytes.
pub const CHUNK_ALIGNMENT: usize = 16;

/// A zeroed block of native memory with a bump pointer.
///
/// # Safety
///
/// - Memory stays valid and never moves until the chunk is dropped
/// - Every pointer handed out lies inside `[start, end)`
/// - The bump pointer only advances
pub(crate) struct Chunk {
    start: NonNull<u8>,
    ptr: *mut u8,
    end: *mut u8,
    capacity: usize,
}

// SAFETY: a chunk exclusively owns its block; the raw pointers are never
// shared outside the arena mutex that guards the chunk list.
unsafe impl Send for Chunk {}

impl Chunk {
    /// Allocates a zeroed chunk of at least `capacity` bytes.
    pub(crate) fn new(capacity: usize) -> Result<Self> {
        let capacity = capacity.max(CHUNK_ALIGNMENT);
        let layout = Layout::from_size_align(capacity, CHUNK_ALIGNMENT)
            .map_err(|_| MemError::OutOfMemory { size: capacity })?;

        // SAFETY: `layout` has a non-zero size.
        let start = unsafe { alloc::alloc_zeroed(layout) };
        let start = NonNull::new(start).ok_or(MemError::OutOfMemory { size: capacity })?;

        // SAFETY: one-past-the-end of the block we just allocated.
        let end = unsafe { start.as_ptr().add(capacity) };

        Ok(Chunk {
            start,
            ptr: start.as_ptr(),
            end,
            capacity,
        })
    }

    /// Capacity that guarantees a single `size`/`align` request fits.
    pub(crate) fn capacity_for(size: usize, align: usize) -> usize {
        if align > CHUNK_ALIGNMENT {
            size.saturating_add(align)
        } else {
            size
        }
    }

    /// Bump-allocates `size` bytes aligned to `align`.
    ///
    /// `align` must be a power of two. Returns `None` when the chunk is full.
    #[inline]
    pub(crate) fn try_alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let current = self.ptr.addr();
        let aligned_start = current.checked_add(align - 1)? & !(align - 1);
        let new_addr = aligned_start.checked_add(size)?;

        if new_addr > self.end.addr() {
            return None;
        }

        self.ptr = self.ptr.with_addr(new_addr);

        // SAFETY: `aligned_start` lies within the block and the block
        // start is non-null.
        Some(unsafe { NonNull::new_unchecked(self.ptr.with_addr(aligned_start)) })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn used(&self) -> usize {
        self.ptr.addr() - self.start.as_ptr().addr()
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: same size and alignment the block was allocated with.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.capacity, CHUNK_ALIGNMENT);
            alloc::dealloc(self.start.as_ptr(), layout);
        }
    }
}
