//! Pointers, bare and with a pointee type.
//!
//! A bare `pointer` is an address in, address out. `[pointer T]` also
//! accepts a host value of `T`: it is serialized into a new allocation from
//! the call's arena and the allocation's address is the pointer's value.
//! Deserializing `[pointer T]` reads `T` through an unowned view of the
//! address; the pointee is not copied into any arena.
//!
//! Deserialization dereferences whatever address the slot holds. Native
//! code is trusted to hand back addresses that are valid for the pointee's
//! layout.

use marshal_mem::{Arena, Segment};

use crate::error::Result;
use crate::primitive::{Primitive, PrimitiveKind};
use crate::registry::{PrimitiveStrategy, Registry};
use crate::types::{Type, names};
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct PointerStrategy;

/// Pointee of `ty`, or `None` for bare and `void` pointers.
fn target(ty: &Type, registry: &Registry) -> Result<Option<Type>> {
    match ty.type_args().next() {
        None => Ok(None),
        Some(t) => {
            let resolved = registry.resolve(t)?;
            Ok((!resolved.is(names::VOID)).then_some(resolved))
        }
    }
}

impl PrimitiveStrategy for PointerStrategy {
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
        match (value, target(ty, registry)?) {
            (Value::Nil | Value::Address(_) | Value::Segment(_) | Value::Native(_), _) => {
                Primitive::coerce(PrimitiveKind::Pointer, value)
            }
            (_, Some(pointee)) => {
                let segment = registry.serialize_to_segment(value, &pointee, arena)?;
                Ok(Primitive::Pointer(segment.address()))
            }
            (_, None) => Err(super::mismatch(ty, value)),
        }
    }

    fn deserialize(&self, primitive: Primitive, ty: &Type, registry: &Registry) -> Result<Value> {
        let address = primitive.as_address()?;
        match target(ty, registry)? {
            None => Ok(Value::Address(address)),
            Some(_) if address.is_null() => Ok(Value::Nil),
            Some(pointee) => {
                let size = registry.layout_of(&pointee)?.size;
                // SAFETY: native code hands out addresses valid for the
                // pointee's layout; see the module docs.
                let view = unsafe { Segment::from_raw(address, size) };
                registry.deserialize_from(&view, &pointee)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Serialized;
    use marshal_mem::Address;

    #[test]
    fn test_bare_pointer_is_identity() {
        let registry = Registry::new();
        let arena = Arena::auto();
        let address = Value::Address(Address::new(0x1000));
        let serialized = registry.serialize(&address, &Type::pointer(), &arena).unwrap();
        assert_eq!(serialized, Serialized::Primitive(Primitive::Pointer(Address::new(0x1000))));
        assert_eq!(registry.deserialize(&serialized, &Type::pointer()).unwrap(), address);
    }

    #[test]
    fn test_pointer_to_struct_is_single_indirection() {
        let registry = Registry::new();
        let arena = Arena::confined();
        let point = Type::structure([("x", Type::int()), ("y", Type::int())]);
        let ty = Type::pointer_to(point);
        let value = Value::map([("x", Value::Int(3)), ("y", Value::Int(4))]);

        let serialized = registry.serialize(&value, &ty, &arena).unwrap();
        let address = serialized.as_primitive().unwrap().as_address().unwrap();
        // The pointer holds the pointee's own address.
        let view = unsafe { Segment::from_raw(address, 8) };
        assert_eq!(view.read::<i32>(0).unwrap(), 3);
        assert_eq!(view.read::<i32>(4).unwrap(), 4);

        assert_eq!(registry.deserialize(&serialized, &ty).unwrap(), value);
        arena.close().unwrap();
    }

    #[test]
    fn test_pointer_slot_in_struct() {
        let registry = Registry::new();
        let arena = Arena::confined();
        let node = Type::structure([("value", Type::int()), ("next", Type::pointer_to(Type::long()))]);
        let value = Value::map([("value", Value::Int(1)), ("next", Value::Int(99))]);

        let segment = registry.serialize_to_segment(&value, &node, &arena).unwrap();
        assert_ne!(segment.read::<Address>(4).unwrap(), Address::NULL);
        assert_eq!(registry.deserialize_from(&segment, &node).unwrap(), value);
    }

    #[test]
    fn test_null_and_void_targets() {
        let registry = Registry::new();
        let int_ptr = Type::pointer_to(Type::int());
        assert_eq!(
            registry
                .deserialize(&Primitive::Pointer(Address::NULL).into(), &int_ptr)
                .unwrap(),
            Value::Nil
        );

        let void_ptr = Type::pointer_to(Type::void());
        let arena = Arena::auto();
        assert!(registry.serialize(&Value::Int(1), &void_ptr, &arena).is_err());
        assert_eq!(
            registry
                .deserialize(&Primitive::Pointer(Address::new(8)).into(), &void_ptr)
                .unwrap(),
            Value::Address(Address::new(8))
        );
    }
}
