//! `marshal`: declarative marshaling between host values and native memory
//!
//! Types are described as data ([`Type`]) and interpreted by strategies
//! registered in a [`Registry`]. The registry computes C-ABI layouts and
//! serializes dynamically-typed [`Value`]s into arena-owned native memory
//! and back. It provides:
//!
//! - **Type Registry** mapping identifiers and aliases to strategies
//! - **Layout Calculator** with a per-descriptor layout cache
//! - **Dispatch** deriving the slot path from the value path and back, so
//!   every strategy implements only the half it naturally has
//! - **Composite Types** (struct, union, array, pointer, tagged union,
//!   padding, c-string, functions) built on the same public extension
//!   points a user type gets
//! - **Callbacks** wrapping host functions as native entry points through
//!   a pluggable [`NativeLinker`]
//!
//! Memory ownership lives in `marshal-mem`; its types are re-exported here.
//!
//! # Example
//!
//! ```rust
//! use marshal::{Arena, Registry, Type, Value};
//!
//! let registry = Registry::new();
//! let point = Type::structure([("x", Type::float()), ("y", Type::float())]);
//!
//! let arena = Arena::confined();
//! let value = Value::map([("x", Value::Float(1.0)), ("y", Value::Float(2.0))]);
//! let segment = registry.serialize_to_segment(&value, &point, &arena).unwrap();
//!
//! assert_eq!(segment.len(), 8);
//! assert_eq!(segment.read::<f32>(4).unwrap(), 2.0);
//! assert_eq!(registry.deserialize_from(&segment, &point).unwrap(), value);
//! arena.close().unwrap();
//! ```

pub mod builtin;
pub mod callback;
pub mod dispatch;
pub mod error;
pub mod layout;
pub mod primitive;
pub mod registry;
pub mod static_var;
pub mod symbol;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use callback::{
    ArgClass, CallDescriptor, HostFn, NativeFn, NativeLinker, Trampoline, TrampolineState,
};
pub use dispatch::Serialized;
pub use error::{Error, Result};
pub use layout::{FieldLayout, Layout, checked_round_up, round_up};
pub use primitive::{Primitive, PrimitiveKind};
pub use registry::{CompositeStrategy, PrimitiveStrategy, Registry, SerializeStrategy, Strategy};
pub use static_var::StaticVariable;
pub use symbol::Symbol;
pub use types::{DispatchFn, ExtractFn, Type, TypeArg, names};
pub use value::Value;

pub use marshal_mem::{
    Address, Arena, ArenaConfig, ArenaKind, ArenaStats, CleanupFn, MemError, Segment, WeakArena,
};
