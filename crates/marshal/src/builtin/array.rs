//! Fixed-length arrays.

use marshal_mem::{Arena, Segment};

use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::registry::{CompositeStrategy, Registry, SerializeStrategy};
use crate::types::Type;
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayStrategy;

fn element_and_count(ty: &Type) -> Result<(&Type, i64)> {
    let element = super::element_type(ty)?;
    let count = ty
        .count()
        .ok_or_else(|| super::invalid(ty, "missing length"))?;
    Ok((element, count))
}

impl SerializeStrategy for ArrayStrategy {
    fn layout(&self, ty: &Type, registry: &Registry) -> Result<Layout> {
        let (element, count) = element_and_count(ty)?;
        Layout::repeated(&registry.layout_of(element)?, count)
    }

    fn serialize_into(
        &self,
        value: &Value,
        ty: &Type,
        segment: &Segment,
        arena: &Arena,
        registry: &Registry,
    ) -> Result<()> {
        let items = value.as_vector().ok_or_else(|| super::mismatch(ty, value))?;
        let (element, count) = element_and_count(ty)?;
        let count = usize::try_from(count).map_err(|_| Error::InvalidLayout {
            reason: format!("array length {count} is negative"),
        })?;
        if items.len() != count {
            return Err(Error::LengthMismatch {
                expected: count,
                got: items.len(),
            });
        }

        let element_layout = registry.layout_of(element)?;
        let stride = element_layout.stride()?;
        for (i, item) in items.iter().enumerate() {
            let slot = segment.slice(i * stride, element_layout.size)?;
            registry.serialize_into(item, element, &slot, arena)?;
        }
        Ok(())
    }
}

impl CompositeStrategy for ArrayStrategy {
    fn deserialize_from(&self, segment: &Segment, ty: &Type, registry: &Registry) -> Result<Value> {
        let (element, count) = element_and_count(ty)?;
        let count = usize::try_from(count).map_err(|_| Error::InvalidLayout {
            reason: format!("array length {count} is negative"),
        })?;
        Ok(Value::Vector(registry.seq_of(element, segment, count)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_layouts() {
        let registry = Registry::new();
        let three = registry.layout_of(&Type::array(Type::int(), 3)).unwrap();
        assert_eq!((three.size, three.align), (12, 4));
        assert_eq!(registry.layout_of(&Type::array(Type::int(), 0)).unwrap().size, 0);
        assert!(matches!(
            registry.layout_of(&Type::array(Type::int(), -2)),
            Err(Error::InvalidLayout { .. })
        ));
    }

    #[test]
    fn test_array_of_structs() {
        let registry = Registry::new();
        let arena = Arena::confined();
        let pair = Type::structure([("a", Type::short()), ("b", Type::byte())]);
        let ty = Type::array(pair, 2);
        assert_eq!(registry.layout_of(&ty).unwrap().size, 8);

        let value = Value::Vector(vec![
            Value::map([("a", Value::Int(1)), ("b", Value::Int(2))]),
            Value::map([("a", Value::Int(3)), ("b", Value::Int(4))]),
        ]);
        let segment = registry.serialize_to_segment(&value, &ty, &arena).unwrap();
        assert_eq!(segment.read::<i16>(4).unwrap(), 3);
        assert_eq!(registry.deserialize_from(&segment, &ty).unwrap(), value);
    }

    #[test]
    fn test_length_must_match() {
        let registry = Registry::new();
        let arena = Arena::auto();
        let ty = Type::array(Type::double(), 2);
        assert_eq!(
            registry
                .serialize_to_segment(&Value::Vector(vec![Value::Float(1.0)]), &ty, &arena)
                .unwrap_err(),
            Error::LengthMismatch {
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn test_nested_arrays() {
        let registry = Registry::new();
        let arena = Arena::auto();
        let grid = Type::array(Type::array(Type::byte(), 2), 2);
        let value = Value::Vector(vec![
            Value::Vector(vec![Value::Int(1), Value::Int(2)]),
            Value::Vector(vec![Value::Int(3), Value::Int(4)]),
        ]);
        let segment = registry.serialize_to_segment(&value, &grid, &arena).unwrap();
        assert_eq!(segment.to_vec().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(registry.deserialize_from(&segment, &grid).unwrap(), value);
    }
}
