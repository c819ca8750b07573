//! Function types: `[fn [params...] ret]` and `[raw-fn [params...] ret]`.
//!
//! A function value is a native code address. Host functions serialize to
//! the address of a new trampoline from the registry's linker, governed by
//! the call's arena; native addresses deserialize to callable
//! [`NativeFn`]s.

use std::sync::Arc;

use marshal_log::debug;
use marshal_mem::Arena;

use crate::callback::{NativeFn, Trampoline};
use crate::error::Result;
use crate::primitive::{Primitive, PrimitiveKind};
use crate::registry::{PrimitiveStrategy, Registry};
use crate::types::Type;
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
pub struct FunctionStrategy {
    raw: bool,
}

impl FunctionStrategy {
    /// Arguments and results go through the registry.
    #[must_use]
    pub fn marshaling() -> Self {
        FunctionStrategy { raw: false }
    }

    /// Arguments and results are machine values only.
    #[must_use]
    pub fn raw() -> Self {
        FunctionStrategy { raw: true }
    }

    #[must_use]
    pub fn is_raw(&self) -> bool {
        self.raw
    }
}

impl PrimitiveStrategy for FunctionStrategy {
    fn primitive_kind(&self, _ty: &Type) -> PrimitiveKind {
        PrimitiveKind::Pointer
    }

    fn serialize(
        &self,
        value: &Value,
        ty: &Type,
        arena: &Arena,
        registry: &Registry,
    ) -> Result<Primitive> {
        match value {
            Value::Fn(host) => {
                let desc = registry.call_descriptor(ty)?;
                let trampoline = Trampoline::new(host.clone(), desc, registry.clone(), arena);
                let address = registry.linker()?.upcall(Arc::new(trampoline), arena)?;
                debug!("created {} callback at {}", ty, address);
                Ok(Primitive::Pointer(address))
            }
            Value::Nil | Value::Address(_) | Value::Segment(_) | Value::Native(_) => {
                Primitive::coerce(PrimitiveKind::Pointer, value)
            }
            _ => Err(super::mismatch(ty, value)),
        }
    }

    fn deserialize(&self, primitive: Primitive, ty: &Type, registry: &Registry) -> Result<Value> {
        let address = primitive.as_address()?;
        if address.is_null() {
            return Ok(Value::Nil);
        }
        // SAFETY: a function-typed slot holds a function of that type, under
        // the same trust as pointer deserialization.
        let native = unsafe { NativeFn::new(address, ty.clone(), registry.clone()) };
        Ok(Value::Native(native))
    }
}
