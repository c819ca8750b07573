//! Error types for native memory operations.

use std::fmt;

use crate::arena::ArenaKind;

/// Errors raised by arenas and segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// The system allocator could not satisfy a request.
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
    },

    /// An alignment that is zero or not a power of two.
    InvalidAlignment {
        /// The rejected alignment.
        alignment: usize,
    },

    /// An access outside the bounds of a segment.
    OutOfBounds {
        /// Start offset of the access.
        offset: usize,
        /// Length of the access in bytes.
        len: usize,
        /// Length of the segment.
        size: usize,
    },

    /// A segment was used after its governing arena closed.
    UseAfterClose {
        /// Id of the closed arena.
        arena: u64,
    },

    /// A confined arena or one of its segments was touched from a thread
    /// other than its owner.
    WrongThread {
        /// Id of the confined arena.
        arena: u64,
    },

    /// `close` was called on an arena that is already closed.
    AlreadyClosed {
        /// Id of the arena.
        arena: u64,
    },

    /// `close` was called on an arena whose release is collection-driven.
    NotClosable {
        /// Kind of the arena.
        kind: ArenaKind,
    },

    /// A null address where a live one is required.
    NullAddress,
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemError::OutOfMemory { size } => {
                write!(f, "out of memory allocating {size} bytes")
            }
            MemError::InvalidAlignment { alignment } => {
                write!(f, "invalid alignment: {alignment} is not a power of two")
            }
            MemError::OutOfBounds { offset, len, size } => {
                write!(
                    f,
                    "access of {len} bytes at offset {offset} exceeds segment of {size} bytes"
                )
            }
            MemError::UseAfterClose { arena } => {
                write!(f, "segment used after arena {arena} was closed")
            }
            MemError::WrongThread { arena } => {
                write!(f, "confined arena {arena} accessed from a non-owning thread")
            }
            MemError::AlreadyClosed { arena } => {
                write!(f, "arena {arena} is already closed")
            }
            MemError::NotClosable { kind } => {
                write!(f, "{kind} arenas cannot be closed explicitly")
            }
            MemError::NullAddress => write!(f, "null address"),
        }
    }
}

impl std::error::Error for MemError {}

/// Result type for memory operations.
pub type Result<T> = std::result::Result<T, MemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            MemError::OutOfBounds { offset: 4, len: 8, size: 10 }.to_string(),
            "access of 8 bytes at offset 4 exceeds segment of 10 bytes"
        );
        assert_eq!(
            MemError::NotClosable { kind: ArenaKind::Auto }.to_string(),
            "auto arenas cannot be closed explicitly"
        );
    }
}
