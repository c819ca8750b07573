//! Structs: named fields laid out back to back.

use indexmap::IndexMap;
use marshal_mem::{Arena, Segment};

use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::registry::{CompositeStrategy, Registry, SerializeStrategy};
use crate::types::{Type, names};
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct StructStrategy;

impl SerializeStrategy for StructStrategy {
    fn layout(&self, ty: &Type, registry: &Registry) -> Result<Layout> {
        let mut seen = Vec::new();
        let mut fields = Vec::new();
        for (name, field_ty) in ty.fields() {
            if seen.contains(&name) {
                return Err(super::invalid(ty, format!("duplicate field {name}")));
            }
            seen.push(name);
            fields.push((name, field_ty.clone(), registry.layout_of(field_ty)?));
        }
        Layout::sequential(fields)
    }

    fn serialize_into(
        &self,
        value: &Value,
        ty: &Type,
        segment: &Segment,
        arena: &Arena,
        registry: &Registry,
    ) -> Result<()> {
        let map = value.as_map().ok_or_else(|| super::mismatch(ty, value))?;
        let layout = registry.layout_of(ty)?;
        for field in layout.fields.as_deref().unwrap_or_default() {
            let slot = segment.slice(field.offset, field.layout.size)?;
            if is_padding(&field.ty, registry)? {
                slot.fill(0)?;
                continue;
            }
            let Some(name) = field.name else { continue };
            let field_value = map.get(&name).ok_or(Error::MissingField { field: name })?;
            registry.serialize_into(field_value, &field.ty, &slot, arena)?;
        }
        Ok(())
    }
}

impl CompositeStrategy for StructStrategy {
    fn deserialize_from(&self, segment: &Segment, ty: &Type, registry: &Registry) -> Result<Value> {
        let layout = registry.layout_of(ty)?;
        let mut map = IndexMap::new();
        for field in layout.fields.as_deref().unwrap_or_default() {
            let Some(name) = field.name else { continue };
            if is_padding(&field.ty, registry)? {
                continue;
            }
            let slot = segment.slice(field.offset, field.layout.size)?;
            map.insert(name, registry.deserialize_from(&slot, &field.ty)?);
        }
        Ok(Value::Map(map))
    }
}

fn is_padding(ty: &Type, registry: &Registry) -> Result<bool> {
    Ok(registry.resolve(ty)?.is(names::PADDING))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbol;

    fn point() -> Type {
        Type::structure([("x", Type::float()), ("y", Type::float())])
    }

    #[test]
    fn test_point_layout() {
        let registry = Registry::new();
        let layout = registry.layout_of(&point()).unwrap();
        assert_eq!((layout.size, layout.align), (8, 4));
        let offsets: Vec<_> = layout.fields.unwrap().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, [0, 4]);
    }

    #[test]
    fn test_nested_struct_round_trip() {
        let registry = Registry::new();
        let arena = Arena::confined();
        let rect = Type::structure([("origin", point()), ("w", Type::int()), ("h", Type::int())]);
        let value = Value::map([
            (
                "origin",
                Value::map([("x", Value::Float(1.5)), ("y", Value::Float(-2.0))]),
            ),
            ("w", Value::Int(10)),
            ("h", Value::Int(20)),
        ]);
        let segment = registry.serialize_to_segment(&value, &rect, &arena).unwrap();
        assert_eq!(segment.len(), 16);
        assert_eq!(segment.read::<f32>(4).unwrap(), -2.0);
        assert_eq!(segment.read::<i32>(8).unwrap(), 10);
        assert_eq!(registry.deserialize_from(&segment, &rect).unwrap(), value);
    }

    #[test]
    fn test_missing_field() {
        let registry = Registry::new();
        let arena = Arena::auto();
        let value = Value::map([("x", Value::Float(1.0))]);
        assert_eq!(
            registry.serialize_to_segment(&value, &point(), &arena).unwrap_err(),
            Error::MissingField {
                field: Symbol::intern("y")
            }
        );
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let registry = Registry::new();
        let ty = Type::structure([("x", Type::int()), ("x", Type::int())]);
        assert!(matches!(
            registry.layout_of(&ty),
            Err(Error::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_padding_fields_are_skipped() {
        let registry = Registry::new();
        let arena = Arena::auto();
        let ty = registry
            .with_c_layout(&Type::structure([("a", Type::byte()), ("x", Type::float())]))
            .unwrap();
        let value = Value::map([("a", Value::Int(1)), ("x", Value::Float(2.0))]);
        let segment = registry.serialize_to_segment(&value, &ty, &arena).unwrap();
        assert_eq!(segment.to_vec().unwrap()[1..4], [0, 0, 0]);
        assert_eq!(registry.deserialize_from(&segment, &ty).unwrap(), value);
    }
}
