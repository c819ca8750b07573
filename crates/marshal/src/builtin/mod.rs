//! Built-in type strategies.
//!
//! Every built-in type is an ordinary registry entry; none of them is known
//! to the dispatch code. Users can register replacements under the same
//! identifiers or reuse these strategies under new ones.

mod array;
mod cstring;
mod function;
mod padding;
mod pointer;
mod scalar;
mod structure;
mod tagged;
mod union;

pub use array::ArrayStrategy;
pub use cstring::CStringStrategy;
pub use function::FunctionStrategy;
pub use padding::PaddingStrategy;
pub use pointer::PointerStrategy;
pub use scalar::ScalarStrategy;
pub use structure::StructStrategy;
pub use tagged::TaggedUnionStrategy;
pub use union::UnionStrategy;

use crate::error::{Error, Result};
use crate::primitive::PrimitiveKind;
use crate::registry::Registry;
use crate::types::{Type, names};
use crate::value::Value;

pub(crate) fn install(registry: &Registry) {
    for kind in [
        PrimitiveKind::Byte,
        PrimitiveKind::Short,
        PrimitiveKind::Int,
        PrimitiveKind::Long,
        PrimitiveKind::Char,
        PrimitiveKind::Float,
        PrimitiveKind::Double,
        PrimitiveKind::Void,
    ] {
        registry.register_primitive(kind.as_str(), ScalarStrategy::new(kind));
    }
    registry.register_primitive(names::POINTER, PointerStrategy);
    registry.register_primitive(names::C_STRING, CStringStrategy);
    registry.register_composite(names::STRUCT, StructStrategy);
    registry.register_composite(names::ARRAY, ArrayStrategy);
    registry.register_serialize_only(names::UNION, UnionStrategy);
    registry.register_composite(names::TAGGED_UNION, TaggedUnionStrategy);
    registry.register_composite(names::PADDING, PaddingStrategy);
    registry.register_primitive(names::FN, FunctionStrategy::marshaling());
    registry.register_primitive(names::RAW_FN, FunctionStrategy::raw());
}

fn mismatch(ty: &Type, value: &Value) -> Error {
    Error::TypeMismatch {
        expected: ty.to_string(),
        got: value.type_name(),
    }
}

fn invalid(ty: &Type, reason: impl Into<String>) -> Error {
    Error::InvalidDescriptor {
        id: ty.id(),
        reason: reason.into(),
    }
}

/// The single nested descriptor of `ty`.
fn element_type(ty: &Type) -> Result<&Type> {
    ty.type_args()
        .next()
        .ok_or_else(|| invalid(ty, "missing element type"))
}
