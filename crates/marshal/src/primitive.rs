//! Primitive slot kinds and machine values.
//!
//! A [`PrimitiveKind`] is the raw slot a type reduces to: a fixed size, a
//! fixed alignment, and a way to load and store one machine word. The
//! table matches the LP64 C ABI:
//!
//! | kind      | size | align |
//! |-----------|------|-------|
//! | `byte`    | 1    | 1     |
//! | `short`   | 2    | 2     |
//! | `int`     | 4    | 4     |
//! | `long`    | 8    | 8     |
//! | `char`    | 1    | 1     |
//! | `float`   | 4    | 4     |
//! | `double`  | 8    | 8     |
//! | `pointer` | word | word  |
//! | `void`    | 0    | 1     |

use std::fmt;

use marshal_mem::{Address, Segment};

use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::value::Value;

const POINTER_SIZE: usize = size_of::<usize>();

/// Kind of native slot a type reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Byte,
    Short,
    Int,
    Long,
    Char,
    Float,
    Double,
    Pointer,
    Void,
}

impl PrimitiveKind {
    /// Size in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            PrimitiveKind::Byte | PrimitiveKind::Char => 1,
            PrimitiveKind::Short => 2,
            PrimitiveKind::Int | PrimitiveKind::Float => 4,
            PrimitiveKind::Long | PrimitiveKind::Double => 8,
            PrimitiveKind::Pointer => POINTER_SIZE,
            PrimitiveKind::Void => 0,
        }
    }

    /// Alignment in bytes.
    #[must_use]
    pub const fn align(self) -> usize {
        match self {
            PrimitiveKind::Void => 1,
            other => other.size(),
        }
    }

    /// Layout of a single slot.
    #[must_use]
    pub fn layout(self) -> Layout {
        Layout::scalar(self.size(), self.align())
    }

    /// Name of the kind, as written in type descriptors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
            PrimitiveKind::Pointer => "pointer",
            PrimitiveKind::Void => "void",
        }
    }

    /// Loads a slot of this kind at `offset`.
    ///
    /// # Errors
    ///
    /// Segment bounds, liveness and thread checks.
    pub fn read(self, segment: &Segment, offset: usize) -> Result<Primitive> {
        Ok(match self {
            PrimitiveKind::Byte => Primitive::Byte(segment.read::<i8>(offset)?),
            PrimitiveKind::Short => Primitive::Short(segment.read::<i16>(offset)?),
            PrimitiveKind::Int => Primitive::Int(segment.read::<i32>(offset)?),
            PrimitiveKind::Long => Primitive::Long(segment.read::<i64>(offset)?),
            PrimitiveKind::Char => Primitive::Char(segment.read::<u8>(offset)?),
            PrimitiveKind::Float => Primitive::Float(segment.read::<f32>(offset)?),
            PrimitiveKind::Double => Primitive::Double(segment.read::<f64>(offset)?),
            PrimitiveKind::Pointer => Primitive::Pointer(segment.read::<Address>(offset)?),
            PrimitiveKind::Void => Primitive::Void,
        })
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One machine value, as passed in a register or stored in a slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Char(u8),
    Float(f32),
    Double(f64),
    Pointer(Address),
    Void,
}

impl Primitive {
    /// Kind of slot this value occupies.
    #[must_use]
    pub const fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Byte(_) => PrimitiveKind::Byte,
            Primitive::Short(_) => PrimitiveKind::Short,
            Primitive::Int(_) => PrimitiveKind::Int,
            Primitive::Long(_) => PrimitiveKind::Long,
            Primitive::Char(_) => PrimitiveKind::Char,
            Primitive::Float(_) => PrimitiveKind::Float,
            Primitive::Double(_) => PrimitiveKind::Double,
            Primitive::Pointer(_) => PrimitiveKind::Pointer,
            Primitive::Void => PrimitiveKind::Void,
        }
    }

    /// Stores the value at `offset`.
    ///
    /// # Errors
    ///
    /// Segment bounds, liveness and thread checks.
    pub fn write(self, segment: &Segment, offset: usize) -> Result<()> {
        match self {
            Primitive::Byte(v) => segment.write(offset, v)?,
            Primitive::Short(v) => segment.write(offset, v)?,
            Primitive::Int(v) => segment.write(offset, v)?,
            Primitive::Long(v) => segment.write(offset, v)?,
            Primitive::Char(v) => segment.write(offset, v)?,
            Primitive::Float(v) => segment.write(offset, v)?,
            Primitive::Double(v) => segment.write(offset, v)?,
            Primitive::Pointer(v) => segment.write(offset, v)?,
            Primitive::Void => {}
        }
        Ok(())
    }

    /// Coerces a host value into a slot of `kind`.
    ///
    /// Integer kinds take `Int` (range-checked) and `Bool`; float kinds take
    /// `Float` and `Int`; `char` takes `Char` or `Int` in `0..=255`;
    /// `pointer` takes `Nil`, `Address`, `Segment` and `Native`; `void`
    /// takes `Nil`.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] for the wrong kind of value,
    /// [`Error::ValueOutOfRange`] when it does not fit.
    pub fn coerce(kind: PrimitiveKind, value: &Value) -> Result<Primitive> {
        let mismatch = || Error::TypeMismatch {
            expected: kind.to_string(),
            got: value.type_name(),
        };
        let out_of_range = |v: &dyn fmt::Display| Error::ValueOutOfRange {
            kind,
            value: v.to_string(),
        };

        match kind {
            PrimitiveKind::Byte
            | PrimitiveKind::Short
            | PrimitiveKind::Int
            | PrimitiveKind::Long => {
                let n = match value {
                    Value::Int(n) => *n,
                    Value::Bool(b) => i64::from(*b),
                    _ => return Err(mismatch()),
                };
                Ok(match kind {
                    PrimitiveKind::Byte => {
                        Primitive::Byte(i8::try_from(n).map_err(|_| out_of_range(&n))?)
                    }
                    PrimitiveKind::Short => {
                        Primitive::Short(i16::try_from(n).map_err(|_| out_of_range(&n))?)
                    }
                    PrimitiveKind::Int => {
                        Primitive::Int(i32::try_from(n).map_err(|_| out_of_range(&n))?)
                    }
                    _ => Primitive::Long(n),
                })
            }
            PrimitiveKind::Char => match value {
                Value::Char(c) => u8::try_from(u32::from(*c))
                    .map(Primitive::Char)
                    .map_err(|_| out_of_range(c)),
                Value::Int(n) => u8::try_from(*n)
                    .map(Primitive::Char)
                    .map_err(|_| out_of_range(n)),
                _ => Err(mismatch()),
            },
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            PrimitiveKind::Float | PrimitiveKind::Double => {
                let f = match value {
                    Value::Float(f) => *f,
                    Value::Int(n) => *n as f64,
                    _ => return Err(mismatch()),
                };
                Ok(if kind == PrimitiveKind::Float {
                    Primitive::Float(f as f32)
                } else {
                    Primitive::Double(f)
                })
            }
            PrimitiveKind::Pointer => match value {
                Value::Nil => Ok(Primitive::Pointer(Address::NULL)),
                Value::Address(a) => Ok(Primitive::Pointer(*a)),
                Value::Segment(s) => Ok(Primitive::Pointer(s.address())),
                Value::Native(f) => Ok(Primitive::Pointer(f.address())),
                _ => Err(mismatch()),
            },
            PrimitiveKind::Void => match value {
                Value::Nil => Ok(Primitive::Void),
                _ => Err(mismatch()),
            },
        }
    }

    /// The host value this machine value denotes.
    ///
    /// Integers widen to `Int`, floats to `Float`, `char` to `Char`,
    /// pointers to `Address`, and `void` to `Nil`.
    #[must_use]
    pub fn to_value(self) -> Value {
        match self {
            Primitive::Byte(v) => Value::Int(i64::from(v)),
            Primitive::Short(v) => Value::Int(i64::from(v)),
            Primitive::Int(v) => Value::Int(i64::from(v)),
            Primitive::Long(v) => Value::Int(v),
            Primitive::Char(v) => Value::Char(char::from(v)),
            Primitive::Float(v) => Value::Float(f64::from(v)),
            Primitive::Double(v) => Value::Float(v),
            Primitive::Pointer(a) => Value::Address(a),
            Primitive::Void => Value::Nil,
        }
    }

    /// The address held by a pointer value.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] for any other kind.
    pub fn as_address(self) -> Result<Address> {
        match self {
            Primitive::Pointer(a) => Ok(a),
            other => Err(Error::TypeMismatch {
                expected: PrimitiveKind::Pointer.to_string(),
                got: other.kind().as_str(),
            }),
        }
    }
}
