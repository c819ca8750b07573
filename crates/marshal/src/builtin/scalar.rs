use marshal_mem::Arena;

use crate::error::Result;
use crate::primitive::{Primitive, PrimitiveKind};
use crate::registry::{PrimitiveStrategy, Registry};
use crate::types::Type;
use crate::value::Value;

/// Identity strategy for fixed-width scalars and `void`.
#[derive(Debug, Clone, Copy)]
pub struct ScalarStrategy {
    kind: PrimitiveKind,
}

impl ScalarStrategy {
    #[must_use]
    pub const fn new(kind: PrimitiveKind) -> Self {
        ScalarStrategy { kind }
    }
}

impl PrimitiveStrategy for ScalarStrategy {
    fn primitive_kind(&self, _ty: &Type) -> PrimitiveKind {
        self.kind
    }

    fn serialize(
        &self,
        value: &Value,
        _ty: &Type,
        _arena: &Arena,
        _registry: &Registry,
    ) -> Result<Primitive> {
        Primitive::coerce(self.kind, value)
    }

    fn deserialize(&self, primitive: Primitive, _ty: &Type, _registry: &Registry) -> Result<Value> {
        Ok(Primitive::coerce(self.kind, &primitive.to_value())?.to_value())
    }
}
