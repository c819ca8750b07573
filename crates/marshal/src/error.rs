//! Error types for the marshal engine.
//!
//! Type, layout and value errors are raised by the registry and the built-in
//! strategies; lifetime errors come from `marshal-mem` and are wrapped in
//! [`Error::Memory`].

use std::fmt;

use marshal_mem::MemError;

use crate::primitive::PrimitiveKind;
use crate::symbol::Symbol;

/// Errors that can occur while describing, laying out or marshaling values.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// No strategy is registered for a type identifier.
    UnknownType {
        /// The unregistered identifier.
        id: Symbol,
    },

    /// Alias resolution looped back on itself.
    AliasCycle {
        /// Identifier where resolution gave up.
        id: Symbol,
    },

    /// A descriptor whose arguments do not fit its type.
    InvalidDescriptor {
        /// Type identifier.
        id: Symbol,
        /// What is wrong with it.
        reason: String,
    },

    /// A layout that cannot be computed (negative count, overflow).
    InvalidLayout {
        /// What is wrong with it.
        reason: String,
    },

    /// Union serialization without a dispatch function.
    MissingDispatch {
        /// Type identifier of the union.
        id: Symbol,
    },

    /// Deserialization of a serialize-only type.
    NotDeserializable {
        /// Type identifier.
        id: Symbol,
    },

    /// A host value of the wrong shape for the type.
    TypeMismatch {
        /// Expected type, as written.
        expected: String,
        /// Kind of host value received.
        got: &'static str,
    },

    /// A host value that does not fit the native slot.
    ValueOutOfRange {
        /// Target slot kind.
        kind: PrimitiveKind,
        /// The offending value, as written.
        value: String,
    },

    /// A struct value without one of the declared fields.
    MissingField {
        /// Name of the missing field.
        field: Symbol,
    },

    /// A sequence whose length does not match the declared count.
    LengthMismatch {
        /// Declared length.
        expected: usize,
        /// Actual length.
        got: usize,
    },

    /// A tagged-union tag that is not declared, or an ordinal out of range.
    InvalidTag {
        /// The tag or ordinal, as written.
        tag: String,
    },

    /// A native call or upcall without an installed linker.
    NoLinker,

    /// A type without a primitive representation where one is required.
    NotPrimitive {
        /// Type identifier.
        id: Symbol,
    },

    /// A failure reported by host code.
    Host {
        /// Message from the host.
        message: String,
    },

    /// A memory error from an arena or segment.
    Memory(MemError),
}

impl Error {
    /// Shorthand for [`Error::Host`].
    pub fn host(message: impl Into<String>) -> Self {
        Error::Host {
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownType { id } => write!(f, "no strategy registered for type {id}"),
            Error::AliasCycle { id } => write!(f, "alias cycle through {id}"),
            Error::InvalidDescriptor { id, reason } => {
                write!(f, "invalid {id} descriptor: {reason}")
            }
            Error::InvalidLayout { reason } => write!(f, "invalid layout: {reason}"),
            Error::MissingDispatch { id } => {
                write!(f, "{id} serialization requires a dispatch function")
            }
            Error::NotDeserializable { id } => write!(f, "{id} values cannot be deserialized"),
            Error::TypeMismatch { expected, got } => {
                write!(f, "type mismatch: expected {expected}, got {got}")
            }
            Error::ValueOutOfRange { kind, value } => {
                write!(f, "value {value} does not fit in {kind}")
            }
            Error::MissingField { field } => write!(f, "missing struct field {field}"),
            Error::LengthMismatch { expected, got } => {
                write!(f, "length mismatch: expected {expected}, got {got}")
            }
            Error::InvalidTag { tag } => write!(f, "invalid tag {tag}"),
            Error::NoLinker => write!(f, "no native linker installed"),
            Error::NotPrimitive { id } => write!(f, "{id} has no primitive representation"),
            Error::Host { message } => write!(f, "host error: {message}"),
            Error::Memory(err) => write!(f, "memory error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Memory(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MemError> for Error {
    fn from(err: MemError) -> Self {
        Error::Memory(err)
    }
}

/// Result type for marshal operations.
pub type Result<T> = std::result::Result<T, Error>;
