// Native calls and callbacks through a test linker
//
// Native functions here are real `extern "C"` functions; the linker only
// unpacks marshaled arguments for them (see common/mod.rs).

mod common;

use common::{add_address, apply_address, c_len_address, linked_registry, scale_address};
use marshal::{
    Address, Arena, ArgClass, CompositeStrategy, HostFn, Layout, Primitive, PrimitiveKind,
    PrimitiveStrategy, Registry, Result, Segment, SerializeStrategy, Serialized, Type, Value,
};

fn native(registry: &Registry, address: Address, ty: &Type) -> Value {
    registry
        .deserialize(&Primitive::Pointer(address).into(), ty)
        .unwrap()
}

fn call(f: &Value, args: &[Value], arena: &Arena) -> Result<Value> {
    match f {
        Value::Native(f) => f.call(args, arena),
        other => panic!("not a native function: {other:?}"),
    }
}

#[test]
fn test_raw_and_marshaling_calls_agree() {
    let (registry, _linker) = linked_registry();
    let arena = Arena::auto();
    let marshaling = native(
        &registry,
        add_address(),
        &Type::function([Type::int(), Type::int()], Type::int()),
    );
    let raw = native(
        &registry,
        add_address(),
        &Type::raw_function([Type::int(), Type::int()], Type::int()),
    );

    let args = [Value::Int(2), Value::Int(3)];
    assert_eq!(call(&marshaling, &args, &arena).unwrap(), Value::Int(5));
    assert_eq!(call(&raw, &args, &arena).unwrap(), Value::Int(5));
}

#[test]
fn test_struct_by_value() {
    let (registry, _linker) = linked_registry();
    let point = Type::structure([("x", Type::double()), ("y", Type::double())]);
    registry.alias("point", point).unwrap();
    let ty = Type::function([Type::named("point"), Type::double()], Type::named("point"));
    let scale = native(&registry, scale_address(), &ty);

    let result = Arena::with_confined(|arena| {
        call(
            &scale,
            &[
                Value::map([("x", Value::Float(1.0)), ("y", Value::Float(-2.0))]),
                Value::Float(3.0),
            ],
            arena,
        )
    })
    .unwrap()
    .unwrap();
    assert_eq!(
        result,
        Value::map([("x", Value::Float(3.0)), ("y", Value::Float(-6.0))])
    );
}

#[test]
fn test_string_argument() {
    let (registry, _linker) = linked_registry();
    let len = native(
        &registry,
        c_len_address(),
        &Type::function([Type::c_string()], Type::long()),
    );
    let arena = Arena::confined();
    assert_eq!(
        call(&len, &[Value::from("hello")], &arena).unwrap(),
        Value::Int(5)
    );
    arena.close().unwrap();
}

#[test]
fn test_wrong_arity() {
    let (registry, _linker) = linked_registry();
    let add = native(
        &registry,
        add_address(),
        &Type::function([Type::int(), Type::int()], Type::int()),
    );
    assert!(matches!(
        call(&add, &[Value::Int(1)], &Arena::auto()),
        Err(marshal::Error::LengthMismatch {
            expected: 2,
            got: 1
        })
    ));
}

#[test]
fn test_host_callback_round_trip() {
    let (registry, linker) = linked_registry();
    let callback = Type::function([Type::int()], Type::int());
    let ty = Type::function([callback.clone(), Type::int()], Type::int());
    let apply = native(&registry, apply_address(), &ty);
    let double = Value::Fn(HostFn::new(|args| {
        Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))
    }));

    let arena = Arena::confined();
    assert_eq!(
        call(&apply, &[double.clone(), Value::Int(21)], &arena).unwrap(),
        Value::Int(42)
    );
    assert_eq!(linker.upcall_count(), 1);

    // The entry point is released with its arena.
    let address = registry
        .serialize(&double, &callback, &arena)
        .unwrap()
        .as_primitive()
        .and_then(|p| p.as_address().ok())
        .unwrap();
    assert_eq!(linker.upcall_count(), 2);
    arena.close().unwrap();
    assert_eq!(linker.upcall_count(), 0);
    assert!(linker.invoke_upcall(address, &[Primitive::Int(1).into()]).is_err());
}

#[test]
fn test_callback_lives_with_collected_arenas() {
    let (registry, linker) = linked_registry();
    let callback = Type::function([Type::int()], Type::int());
    let negate = Value::Fn(HostFn::new(|args| {
        Ok(Value::Int(-args[0].as_int().unwrap_or(0)))
    }));

    for arena in [Arena::implicit(), Arena::auto()] {
        let address = registry
            .serialize(&negate, &callback, &arena)
            .unwrap()
            .as_primitive()
            .and_then(|p| p.as_address().ok())
            .unwrap();
        assert_eq!(linker.upcall_count(), 1);
        let ret = linker
            .invoke_upcall(address, &[Primitive::Int(7).into()])
            .unwrap();
        assert_eq!(ret.as_primitive(), Some(Primitive::Int(-7)));

        drop(arena);
        assert_eq!(linker.upcall_count(), 0);
    }
}

#[test]
fn test_raw_host_callback() {
    let (registry, linker) = linked_registry();
    let callback = Type::raw_function([Type::int()], Type::int());
    let host = Value::Fn(HostFn::new(|args| {
        Ok(Value::Int(args[0].as_int().unwrap_or(0) + 1))
    }));
    let arena = Arena::shared();
    let address = registry
        .serialize(&host, &callback, &arena)
        .unwrap()
        .as_primitive()
        .and_then(|p| p.as_address().ok())
        .unwrap();
    let ret = linker
        .invoke_upcall(address, &[Primitive::Int(9).into()])
        .unwrap();
    assert_eq!(ret.as_primitive(), Some(Primitive::Int(10)));
    arena.close().unwrap();
}

#[test]
fn test_no_linker() {
    let registry = Registry::new();
    let host = Value::Fn(HostFn::new(|_| Ok(Value::Nil)));
    assert!(matches!(
        registry.serialize(&host, &Type::function([], Type::void()), &Arena::auto()),
        Err(marshal::Error::NoLinker)
    ));
}

/// Fixed-point 16.16 numbers stored in an `int`.
struct Fixed;

const FIXED_ONE: f64 = 65536.0;

impl SerializeStrategy for Fixed {
    fn layout(&self, _ty: &Type, _registry: &Registry) -> Result<Layout> {
        Ok(Layout::scalar(4, 4))
    }

    fn primitive_kind(&self, _ty: &Type) -> Option<PrimitiveKind> {
        Some(PrimitiveKind::Int)
    }

    fn serialize_into(
        &self,
        value: &Value,
        _ty: &Type,
        segment: &Segment,
        _arena: &Arena,
        _registry: &Registry,
    ) -> Result<()> {
        let f = value.as_float().unwrap_or(0.0);
        Ok(segment.write::<i32>(0, (f * FIXED_ONE) as i32)?)
    }
}

impl CompositeStrategy for Fixed {
    fn deserialize_from(&self, segment: &Segment, _ty: &Type, _registry: &Registry) -> Result<Value> {
        Ok(Value::Float(f64::from(segment.read::<i32>(0)?) / FIXED_ONE))
    }
}

#[test]
fn test_user_composite_is_primitive_shaped() {
    let registry = Registry::new();
    registry.register_composite("fixed", Fixed);
    let fixed = Type::named("fixed");
    let arena = Arena::auto();

    let serialized = registry.serialize(&Value::Float(1.5), &fixed, &arena).unwrap();
    assert_eq!(serialized, Serialized::Primitive(Primitive::Int(98304)));
    assert_eq!(registry.deserialize(&serialized, &fixed).unwrap(), Value::Float(1.5));

    let desc = registry
        .call_descriptor(&Type::function([fixed.clone()], fixed.clone()))
        .unwrap();
    assert_eq!(desc.args, vec![ArgClass::Primitive(PrimitiveKind::Int)]);

    let sample = Type::structure([("tag", Type::char()), ("gain", fixed)]);
    let value = Value::map([("tag", Value::Char('g')), ("gain", Value::Float(0.25))]);
    let segment = registry.serialize_to_segment(&value, &sample, &arena).unwrap();
    assert_eq!(segment.len(), 8);
    assert_eq!(segment.read::<i32>(4).unwrap(), 16384);
    assert_eq!(registry.deserialize_from(&segment, &sample).unwrap(), value);
}

/// Booleans stored as one byte.
struct Flag;

impl PrimitiveStrategy for Flag {
    fn primitive_kind(&self, _ty: &Type) -> PrimitiveKind {
        PrimitiveKind::Byte
    }

    fn serialize(
        &self,
        value: &Value,
        _ty: &Type,
        _arena: &Arena,
        _registry: &Registry,
    ) -> Result<Primitive> {
        Ok(Primitive::Byte(i8::from(!value.is_nil() && *value != Value::Bool(false))))
    }

    fn deserialize(&self, primitive: Primitive, _ty: &Type, _registry: &Registry) -> Result<Value> {
        Ok(Value::Bool(primitive != Primitive::Byte(0)))
    }
}

#[test]
fn test_user_primitive_in_slots() {
    let registry = Registry::new();
    registry.register_primitive("flag", Flag);
    let flags = Type::array(Type::named("flag"), 3);
    let arena = Arena::auto();

    let value = Value::Vector(vec![Value::Bool(true), Value::Nil, Value::Int(7)]);
    let segment = registry.serialize_to_segment(&value, &flags, &arena).unwrap();
    assert_eq!(segment.to_vec().unwrap(), vec![1, 0, 1]);
    assert_eq!(
        registry.deserialize_from(&segment, &flags).unwrap(),
        Value::Vector(vec![Value::Bool(true), Value::Bool(false), Value::Bool(true)])
    );
}
