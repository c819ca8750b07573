use marshal_mem::{Arena, Segment};

use crate::error::Result;
use crate::layout::Layout;
use crate::registry::{CompositeStrategy, Registry, SerializeStrategy};
use crate::types::Type;
use crate::value::Value;

/// `[padding n]`: `n` zero bytes with alignment 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaddingStrategy;

impl SerializeStrategy for PaddingStrategy {
    fn layout(&self, ty: &Type, _registry: &Registry) -> Result<Layout> {
        let width = ty
            .count()
            .ok_or_else(|| super::invalid(ty, "missing width"))?;
        Layout::repeated(&Layout::scalar(1, 1), width)
    }

    fn serialize_into(
        &self,
        _value: &Value,
        _ty: &Type,
        segment: &Segment,
        _arena: &Arena,
        _registry: &Registry,
    ) -> Result<()> {
        Ok(segment.fill(0)?)
    }
}

impl CompositeStrategy for PaddingStrategy {
    fn deserialize_from(&self, _segment: &Segment, _ty: &Type, _registry: &Registry) -> Result<Value> {
        Ok(Value::Nil)
    }
}
