//! Null-terminated strings.
//!
//! A `c-string` is a pointer. Serializing a string copies its UTF-8 bytes
//! plus a terminating `NUL` into the call's arena. Deserializing scans the
//! pointed-to memory for the terminator, so an unterminated buffer reads
//! past its end: callers must only deserialize addresses of terminated
//! strings.

use std::ffi::CStr;

use marshal_mem::Arena;

use crate::error::{Error, Result};
use crate::primitive::{Primitive, PrimitiveKind};
use crate::registry::{PrimitiveStrategy, Registry};
use crate::types::Type;
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct CStringStrategy;

impl PrimitiveStrategy for CStringStrategy {
    fn primitive_kind(&self, _ty: &Type) -> PrimitiveKind {
        PrimitiveKind::Pointer
    }

    fn serialize(
        &self,
        value: &Value,
        ty: &Type,
        arena: &Arena,
        _registry: &Registry,
    ) -> Result<Primitive> {
        match value {
            Value::Str(s) => {
                if s.as_bytes().contains(&0) {
                    return Err(Error::ValueOutOfRange {
                        kind: PrimitiveKind::Pointer,
                        value: format!("{s:?} (interior NUL)"),
                    });
                }
                let segment = arena.alloc(s.len() + 1, 1)?;
                segment.copy_from_slice(0, s.as_bytes())?;
                Ok(Primitive::Pointer(segment.address()))
            }
            Value::Nil | Value::Address(_) | Value::Segment(_) => {
                Primitive::coerce(PrimitiveKind::Pointer, value)
            }
            other => Err(super::mismatch(ty, other)),
        }
    }

    fn deserialize(&self, primitive: Primitive, _ty: &Type, _registry: &Registry) -> Result<Value> {
        let address = primitive.as_address()?;
        if address.is_null() {
            return Ok(Value::Nil);
        }
        // SAFETY: the address points at a NUL-terminated string; see the
        // module docs.
        let text = unsafe { CStr::from_ptr(address.as_ptr::<std::ffi::c_char>()) };
        Ok(Value::Str(text.to_string_lossy().into_owned()))
    }
}
