//! # marshal-mem
//!
//! Native memory for the marshal engine.
//!
//! This crate owns raw memory and nothing else. It knows nothing about
//! types or values; the `marshal` crate builds layouts and codecs on top.
//!
//! ## Components
//!
//! - [`Arena`]: lifetime owner for native memory, with five release policies
//!   ([`ArenaKind`])
//! - [`Segment`]: bounds- and liveness-checked view of a range of memory
//! - [`Address`]: plain numeric native address
//! - [`ArenaConfig`]: chunk sizing for batching arenas
//!
//! Allocations are zero-filled and bump-allocated out of chunks, so
//! freshly allocated segments read as zeros.

pub mod address;
pub mod arena;
mod chunk;
pub mod config;
pub mod error;
pub mod segment;

pub use address::Address;
pub use arena::{Arena, ArenaKind, ArenaStats, CleanupFn, WeakArena};
pub use chunk::CHUNK_ALIGNMENT;
pub use config::ArenaConfig;
pub use error::{MemError, Result};
pub use segment::{Scalar, Segment};
