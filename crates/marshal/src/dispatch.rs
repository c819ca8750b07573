//! Serialization dispatch.
//!
//! Every entry point resolves the descriptor once, looks up its strategy,
//! and then either calls the path the strategy implements or derives the
//! missing one:
//!
//! - slot path for a primitive type: serialize to a machine value and store
//!   it at offset 0 of the slot (or load and deserialize)
//! - primitive path for a composite type: serialize into a fresh
//!   single-value allocation and load the machine value back when the type
//!   is primitive-shaped (or store and deserialize from a scratch slot)
//!
//! Composites also accept a [`Value::Segment`] of exactly their size, which
//! is copied verbatim.

use marshal_log::trace;
use marshal_mem::{Arena, Segment};

use crate::callback::{ArgClass, CallDescriptor};
use crate::error::{Error, Result};
use crate::layout::{Layout, checked_round_up, overflow};
use crate::primitive::{Primitive, PrimitiveKind};
use crate::registry::{Registry, SerializeStrategy, Strategy};
use crate::symbol::Symbol;
use crate::types::{Type, TypeArg, names};
use crate::value::Value;

/// Result of serializing a value on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum Serialized {
    /// A machine value, for types with a primitive representation.
    Primitive(Primitive),
    /// Native memory holding the value, for other composites.
    Segment(Segment),
}

impl Serialized {
    /// The machine value, if this is one.
    #[must_use]
    pub fn as_primitive(&self) -> Option<Primitive> {
        match self {
            Serialized::Primitive(p) => Some(*p),
            Serialized::Segment(_) => None,
        }
    }

    /// The segment, if this is one.
    #[must_use]
    pub fn as_segment(&self) -> Option<&Segment> {
        match self {
            Serialized::Segment(s) => Some(s),
            Serialized::Primitive(_) => None,
        }
    }
}

impl From<Primitive> for Serialized {
    fn from(p: Primitive) -> Self {
        Serialized::Primitive(p)
    }
}

impl Registry {
    /// Size, alignment and field table of `ty`.
    ///
    /// Layouts are memoized per descriptor until the next registration.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownType`] for unregistered identifiers and
    /// [`Error::InvalidLayout`]/[`Error::InvalidDescriptor`] for malformed
    /// descriptors.
    pub fn layout_of(&self, ty: &Type) -> Result<Layout> {
        if let Some(layout) = self.cached_layout(ty) {
            return Ok(layout);
        }
        let (resolved, strategy) = self.strategy_for(ty)?;
        let layout = match &strategy {
            Strategy::Primitive(p) => p.primitive_kind(&resolved).layout(),
            Strategy::Composite(c) => c.layout(&resolved, self)?,
            Strategy::SerializeOnly(s) => s.layout(&resolved, self)?,
        };
        self.cache_layout(ty.clone(), layout.clone());
        Ok(layout)
    }

    /// The primitive slot `ty` reduces to, or `None` for composites that
    /// are not primitive-shaped.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownType`] for unregistered identifiers.
    pub fn primitive_kind_of(&self, ty: &Type) -> Result<Option<PrimitiveKind>> {
        let (resolved, strategy) = self.strategy_for(ty)?;
        Ok(match &strategy {
            Strategy::Primitive(p) => Some(p.primitive_kind(&resolved)),
            Strategy::Composite(c) => c.primitive_kind(&resolved),
            Strategy::SerializeOnly(s) => s.primitive_kind(&resolved),
        })
    }

    /// Serializes `value` on its own.
    ///
    /// Primitive and primitive-shaped types give a machine value; other
    /// composites give a segment allocated from `arena`.
    ///
    /// # Errors
    ///
    /// Type, layout, value and memory errors from the strategies involved.
    pub fn serialize(&self, value: &Value, ty: &Type, arena: &Arena) -> Result<Serialized> {
        let (resolved, strategy) = self.strategy_for(ty)?;
        match &strategy {
            Strategy::Primitive(p) => Ok(Serialized::Primitive(
                p.serialize(value, &resolved, arena, self)?,
            )),
            Strategy::Composite(c) => self.serialize_fresh(&**c, value, &resolved, arena),
            Strategy::SerializeOnly(s) => self.serialize_fresh(&**s, value, &resolved, arena),
        }
    }

    fn serialize_fresh(
        &self,
        strategy: &dyn SerializeStrategy,
        value: &Value,
        ty: &Type,
        arena: &Arena,
    ) -> Result<Serialized> {
        let layout = self.layout_of(ty)?;
        let segment = arena.alloc(layout.size, layout.align)?;
        self.write_composite(strategy, value, ty, &segment, arena, &layout)?;
        match strategy.primitive_kind(ty) {
            Some(kind) if kind.size() <= segment.len() => {
                Ok(Serialized::Primitive(kind.read(&segment, 0)?))
            }
            _ => Ok(Serialized::Segment(segment)),
        }
    }

    /// Deserializes a value produced by [`serialize`](Self::serialize) or
    /// received from native code.
    ///
    /// # Trust boundary
    ///
    /// Addresses are trusted. Under `[pointer T]`, `c-string` and function
    /// types a non-null [`Primitive::Pointer`] is dereferenced (or wrapped as
    /// callable) as-is, so an address that does not point at a live value of
    /// the described type is undefined behavior despite this being a safe
    /// function. Only pass addresses that came from [`serialize`] or from
    /// native code honoring the descriptor.
    ///
    /// [`serialize`]: Self::serialize
    ///
    /// # Errors
    ///
    /// [`Error::NotDeserializable`] for serialize-only types, plus the
    /// strategies' own errors.
    pub fn deserialize(&self, serialized: &Serialized, ty: &Type) -> Result<Value> {
        let (resolved, strategy) = self.strategy_for(ty)?;
        match (serialized, &strategy) {
            (Serialized::Segment(segment), _) => self.deserialize_from(segment, &resolved),
            (Serialized::Primitive(p), Strategy::Primitive(s)) => s.deserialize(*p, &resolved, self),
            (Serialized::Primitive(p), Strategy::Composite(c)) => {
                let layout = self.layout_of(&resolved)?;
                let scratch =
                    Arena::auto().alloc(layout.size.max(p.kind().size()), layout.align)?;
                p.write(&scratch, 0)?;
                c.deserialize_from(&scratch.slice(0, layout.size)?, &resolved, self)
            }
            (Serialized::Primitive(_), Strategy::SerializeOnly(_)) => {
                Err(Error::NotDeserializable { id: resolved.id() })
            }
        }
    }

    /// Writes `value` into the first `layout_of(ty).size` bytes of
    /// `segment`.
    ///
    /// # Errors
    ///
    /// Memory errors if `segment` is too small or no longer accessible,
    /// plus the strategies' own errors.
    pub fn serialize_into(
        &self,
        value: &Value,
        ty: &Type,
        segment: &Segment,
        arena: &Arena,
    ) -> Result<()> {
        let (resolved, strategy) = self.strategy_for(ty)?;
        match &strategy {
            Strategy::Primitive(p) => {
                let primitive = p.serialize(value, &resolved, arena, self)?;
                primitive.write(segment, 0)
            }
            Strategy::Composite(c) => {
                let layout = self.layout_of(&resolved)?;
                let slot = segment.slice(0, layout.size)?;
                self.write_composite(&**c, value, &resolved, &slot, arena, &layout)
            }
            Strategy::SerializeOnly(s) => {
                let layout = self.layout_of(&resolved)?;
                let slot = segment.slice(0, layout.size)?;
                self.write_composite(&**s, value, &resolved, &slot, arena, &layout)
            }
        }
    }

    fn write_composite(
        &self,
        strategy: &dyn SerializeStrategy,
        value: &Value,
        ty: &Type,
        slot: &Segment,
        arena: &Arena,
        layout: &Layout,
    ) -> Result<()> {
        if let Value::Segment(source) = value {
            if source.len() != layout.size {
                return Err(Error::LengthMismatch {
                    expected: layout.size,
                    got: source.len(),
                });
            }
            trace!("copying {} raw bytes into {}", layout.size, ty);
            slot.copy_from(source)?;
            return Ok(());
        }
        strategy.serialize_into(value, ty, slot, arena, self)
    }

    /// Reads a value of `ty` from the start of `segment`.
    ///
    /// The segment itself is bounds- and liveness-checked, but addresses
    /// stored inside it are trusted as described on
    /// [`deserialize`](Self::deserialize).
    ///
    /// # Errors
    ///
    /// [`Error::NotDeserializable`] for serialize-only types, plus memory
    /// and strategy errors.
    pub fn deserialize_from(&self, segment: &Segment, ty: &Type) -> Result<Value> {
        let (resolved, strategy) = self.strategy_for(ty)?;
        match &strategy {
            Strategy::Primitive(p) => {
                let kind = p.primitive_kind(&resolved);
                let primitive = kind.read(segment, 0)?;
                p.deserialize(primitive, &resolved, self)
            }
            Strategy::Composite(c) => {
                let layout = self.layout_of(&resolved)?;
                c.deserialize_from(&segment.slice(0, layout.size)?, &resolved, self)
            }
            Strategy::SerializeOnly(_) => Err(Error::NotDeserializable { id: resolved.id() }),
        }
    }

    /// Reads `count` consecutive values of `ty` from `segment`.
    ///
    /// # Errors
    ///
    /// Memory errors if the segment is shorter than `count` elements.
    pub fn seq_of(&self, ty: &Type, segment: &Segment, count: usize) -> Result<Vec<Value>> {
        let layout = self.layout_of(ty)?;
        let stride = layout.stride()?;
        (0..count)
            .map(|i| {
                let offset = i
                    .checked_mul(stride)
                    .ok_or_else(|| overflow("sequence offset"))?;
                let element = segment.slice(offset, layout.size)?;
                self.deserialize_from(&element, ty)
            })
            .collect()
    }

    /// Allocates a zeroed segment sized and aligned for `ty`.
    ///
    /// # Errors
    ///
    /// Layout and memory errors.
    pub fn alloc_instance(&self, ty: &Type, arena: &Arena) -> Result<Segment> {
        let layout = self.layout_of(ty)?;
        Ok(arena.alloc(layout.size, layout.align)?)
    }

    /// Serializes `value` into a fresh allocation of `ty` from `arena`.
    ///
    /// # Errors
    ///
    /// See [`serialize_into`](Self::serialize_into).
    pub fn serialize_to_segment(&self, value: &Value, ty: &Type, arena: &Arena) -> Result<Segment> {
        let segment = self.alloc_instance(ty, arena)?;
        self.serialize_into(value, ty, &segment, arena)?;
        Ok(segment)
    }

    /// Calling-convention descriptor of a function type.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDescriptor`] if `ty` is not a function type.
    pub fn call_descriptor(&self, ty: &Type) -> Result<CallDescriptor> {
        let resolved = self.resolve(ty)?;
        let raw = resolved.is(names::RAW_FN);
        if !raw && !resolved.is(names::FN) {
            return Err(Error::InvalidDescriptor {
                id: resolved.id(),
                reason: "not a function type".into(),
            });
        }
        let params = resolved.list().ok_or_else(|| Error::InvalidDescriptor {
            id: resolved.id(),
            reason: "missing parameter list".into(),
        })?;
        let ret = resolved.type_args().next().cloned().unwrap_or_else(Type::void);

        let args = params
            .iter()
            .map(|p| self.arg_class(p, raw))
            .collect::<Result<Vec<_>>>()?;
        let ret_class = self.arg_class(&ret, raw)?;

        Ok(CallDescriptor {
            args,
            ret: ret_class,
            param_types: params.to_vec(),
            return_type: ret,
            raw,
        })
    }

    fn arg_class(&self, ty: &Type, raw: bool) -> Result<ArgClass> {
        match self.primitive_kind_of(ty)? {
            Some(PrimitiveKind::Void) => Ok(ArgClass::Void),
            Some(kind) => Ok(ArgClass::Primitive(kind)),
            None if raw => Err(Error::NotPrimitive { id: ty.id() }),
            None => {
                let layout = self.layout_of(ty)?;
                Ok(ArgClass::Aggregate {
                    size: layout.size,
                    align: layout.align,
                })
            }
        }
    }

    /// Rewrites a struct or union descriptor with explicit ABI padding.
    ///
    /// Structs get `padding` fields before misaligned fields and at the end;
    /// unions get a trailing `padding` member when their size is not a
    /// multiple of their alignment. Only the outermost descriptor changes.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDescriptor`] for other types, plus layout errors.
    pub fn with_c_layout(&self, ty: &Type) -> Result<Type> {
        let resolved = self.resolve(ty)?;
        if resolved.is(names::STRUCT) {
            let mut fields = Vec::new();
            let mut offset = 0usize;
            let mut align = 1usize;
            let mut pads = 0usize;
            let mut pad_to = |fields: &mut Vec<(Symbol, Type)>, offset: &mut usize, target: usize| {
                if target > *offset {
                    let name = Symbol::intern(&format!("padding-{pads}"));
                    pads += 1;
                    fields.push((name, Type::padding(pad_width(target - *offset)?)));
                    *offset = target;
                }
                Ok::<(), Error>(())
            };

            for (name, field_ty) in resolved.fields() {
                let layout = self.layout_of(field_ty)?;
                let target =
                    checked_round_up(offset, layout.align).ok_or_else(|| overflow("padded struct"))?;
                pad_to(&mut fields, &mut offset, target)?;
                fields.push((name, field_ty.clone()));
                offset = offset
                    .checked_add(layout.size)
                    .ok_or_else(|| overflow("padded struct"))?;
                align = align.max(layout.align);
            }
            let target = checked_round_up(offset, align).ok_or_else(|| overflow("padded struct"))?;
            pad_to(&mut fields, &mut offset, target)?;
            return Ok(Type::structure(fields));
        }

        if resolved.is(names::UNION) {
            let layout = self.layout_of(&resolved)?;
            let padded =
                checked_round_up(layout.size, layout.align).ok_or_else(|| overflow("padded union"))?;
            if padded == layout.size {
                return Ok(resolved);
            }
            let mut members: Vec<Type> = resolved.type_args().cloned().collect();
            members.push(Type::padding(pad_width(padded)?));
            let mut args: Vec<_> = members.into_iter().map(TypeArg::Type).collect();
            args.extend(
                resolved
                    .args()
                    .iter()
                    .filter(|a| !matches!(a, TypeArg::Type(_)))
                    .cloned(),
            );
            return Ok(Type::new(names::UNION, args));
        }

        Err(Error::InvalidDescriptor {
            id: resolved.id(),
            reason: "ABI padding applies to structs and unions".into(),
        })
    }
}

fn pad_width(n: usize) -> Result<i64> {
    i64::try_from(n).map_err(|_| Error::InvalidLayout {
        reason: format!("padding of {n} bytes overflows"),
    })
}
