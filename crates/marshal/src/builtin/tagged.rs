//! Tagged unions: an `int` tag followed by a union of member payloads.
//!
//! The layout is that of `[struct [tag int] [value [union ...members]]]`.
//! The tag holds the ordinal of the value's tag in declaration order, and
//! only the selected member's bytes are written or read.

use marshal_mem::{Arena, Segment};

use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::registry::{CompositeStrategy, Registry, SerializeStrategy};
use crate::symbol::Symbol;
use crate::types::Type;
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedUnionStrategy;

const TAG_FIELD: &str = "tag";
const VALUE_FIELD: &str = "value";

/// The `[struct [tag int] [value union]]` the layout reduces to.
fn equivalent_struct(ty: &Type) -> Type {
    let members = ty.fields().map(|(_, member)| member.clone());
    Type::structure([(TAG_FIELD, Type::int()), (VALUE_FIELD, Type::union(members))])
}

fn member_for(ty: &Type, tag: Symbol) -> Option<Type> {
    ty.fields()
        .find(|(name, _)| *name == tag)
        .map(|(_, member)| member.clone())
}

fn value_offset(ty: &Type, registry: &Registry) -> Result<usize> {
    let layout = registry.layout_of(ty)?;
    layout
        .field(Symbol::intern(VALUE_FIELD))
        .map(|f| f.offset)
        .ok_or_else(|| super::invalid(ty, "missing value field"))
}

impl SerializeStrategy for TaggedUnionStrategy {
    fn layout(&self, ty: &Type, registry: &Registry) -> Result<Layout> {
        for (tag, _) in ty.fields() {
            if !ty.symbols().any(|t| t == tag) {
                return Err(super::invalid(ty, format!("member for undeclared tag {tag}")));
            }
        }
        registry.layout_of(&equivalent_struct(ty))
    }

    fn serialize_into(
        &self,
        value: &Value,
        ty: &Type,
        segment: &Segment,
        arena: &Arena,
        registry: &Registry,
    ) -> Result<()> {
        let (tag, payload) = value.as_tagged()?;
        let ordinal = ty
            .symbols()
            .position(|t| t == tag)
            .ok_or_else(|| Error::InvalidTag {
                tag: format!(":{tag}"),
            })?;
        let ordinal = i32::try_from(ordinal).map_err(|_| Error::InvalidTag {
            tag: ordinal.to_string(),
        })?;
        segment.write::<i32>(0, ordinal)?;

        if let Some(member) = member_for(ty, tag) {
            let offset = value_offset(ty, registry)?;
            let size = registry.layout_of(&member)?.size;
            registry.serialize_into(payload, &member, &segment.slice(offset, size)?, arena)?;
        }
        Ok(())
    }
}

impl CompositeStrategy for TaggedUnionStrategy {
    fn deserialize_from(&self, segment: &Segment, ty: &Type, registry: &Registry) -> Result<Value> {
        let ordinal = segment.read::<i32>(0)?;
        let tag = usize::try_from(ordinal)
            .ok()
            .and_then(|i| ty.symbols().nth(i))
            .ok_or_else(|| Error::InvalidTag {
                tag: ordinal.to_string(),
            })?;

        let Some(member) = member_for(ty, tag) else {
            return Ok(Value::Keyword(tag));
        };
        let offset = value_offset(ty, registry)?;
        let size = registry.layout_of(&member)?.size;
        let payload = registry.deserialize_from(&segment.slice(offset, size)?, &member)?;
        Ok(Value::tagged(tag, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_type() -> Type {
        Type::tagged_union(
            ["ok", "err"],
            [("ok", Type::int()), ("err", Type::c_string())],
        )
    }

    #[test]
    fn test_layout_reduces_to_struct() {
        let registry = Registry::new();
        let layout = registry.layout_of(&result_type()).unwrap();
        assert_eq!(layout.size, 4 + size_of::<usize>());
        assert_eq!(value_offset(&result_type(), &registry).unwrap(), 4);
    }

    #[test]
    fn test_round_trip_both_branches() {
        let registry = Registry::new();
        let arena = Arena::confined();
        let ty = result_type();

        let ok = Value::tagged("ok", Value::Int(5));
        let segment = registry.serialize_to_segment(&ok, &ty, &arena).unwrap();
        assert_eq!(segment.read::<i32>(0).unwrap(), 0);
        assert_eq!(registry.deserialize_from(&segment, &ty).unwrap(), ok);

        let err = Value::tagged("err", Value::from("boom"));
        let segment = registry.serialize_to_segment(&err, &ty, &arena).unwrap();
        assert_eq!(segment.read::<i32>(0).unwrap(), 1);
        assert_eq!(registry.deserialize_from(&segment, &ty).unwrap(), err);
    }

    #[test]
    fn test_only_selected_member_bytes_are_read() {
        let registry = Registry::new();
        let arena = Arena::auto();
        let ty = result_type();
        let segment = registry
            .serialize_to_segment(&Value::tagged("ok", Value::Int(5)), &ty, &arena)
            .unwrap();
        // Garbage past the `int` member stays unread.
        segment.write::<u32>(8, 0xdead_beef).unwrap();
        assert_eq!(
            registry.deserialize_from(&segment, &ty).unwrap(),
            Value::tagged("ok", Value::Int(5))
        );
    }

    #[test]
    fn test_invalid_tags() {
        let registry = Registry::new();
        let arena = Arena::auto();
        let ty = result_type();
        assert_eq!(
            registry
                .serialize_to_segment(&Value::tagged("maybe", Value::Nil), &ty, &arena)
                .unwrap_err(),
            Error::InvalidTag {
                tag: ":maybe".into()
            }
        );

        let segment = registry.alloc_instance(&ty, &arena).unwrap();
        segment.write::<i32>(0, 7).unwrap();
        assert_eq!(
            registry.deserialize_from(&segment, &ty).unwrap_err(),
            Error::InvalidTag { tag: "7".into() }
        );
    }

    #[test]
    fn test_payloadless_tag() {
        let registry = Registry::new();
        let arena = Arena::auto();
        let ty = Type::tagged_union(["none", "some"], [("some", Type::double())]);
        let segment = registry
            .serialize_to_segment(&Value::keyword("none"), &ty, &arena)
            .unwrap();
        assert_eq!(
            registry.deserialize_from(&segment, &ty).unwrap(),
            Value::keyword("none")
        );
    }
}
