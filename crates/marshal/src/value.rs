//! Host values.
//!
//! [`Value`] is the dynamically-typed side of the boundary. Structs are
//! maps keyed by field name, arrays are vectors, and tagged-union values are
//! two-element vectors of a tag keyword and a payload.

use std::fmt;

use indexmap::IndexMap;
use marshal_mem::{Address, Segment};

use crate::callback::{HostFn, NativeFn};
use crate::error::{Error, Result};
use crate::symbol::Symbol;

/// A host value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Keyword(Symbol),
    Vector(Vec<Value>),
    /// Insertion-ordered map, the host shape of a struct.
    Map(IndexMap<Symbol, Value>),
    /// A raw native address.
    Address(Address),
    /// Native memory, copied verbatim into composites.
    Segment(Segment),
    /// A host function, serializable as a callback.
    Fn(HostFn),
    /// A callable native function.
    Native(NativeFn),
}

impl Value {
    /// Builds a map from `(field, value)` pairs.
    pub fn map<K: Into<Symbol>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds a tagged-union value `[tag value]`.
    pub fn tagged(tag: impl Into<Symbol>, value: Value) -> Self {
        Value::Vector(vec![Value::Keyword(tag.into()), value])
    }

    pub fn keyword(name: impl Into<Symbol>) -> Self {
        Value::Keyword(name.into())
    }

    /// Name of the value's kind, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Address(_) => "address",
            Value::Segment(_) => "segment",
            Value::Fn(_) => "fn",
            Value::Native(_) => "native-fn",
        }
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_keyword(&self) -> Option<Symbol> {
        match self {
            Value::Keyword(k) => Some(*k),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_vector(&self) -> Option<&[Value]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&IndexMap<Symbol, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Field `name` of a map value.
    #[must_use]
    pub fn get(&self, name: impl Into<Symbol>) -> Option<&Value> {
        self.as_map()?.get(&name.into())
    }

    /// Splits a tagged-union value into tag and payload.
    ///
    /// A bare keyword is a tag without payload.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] for any other shape.
    pub fn as_tagged(&self) -> Result<(Symbol, &Value)> {
        const NIL: &Value = &Value::Nil;
        match self {
            Value::Keyword(tag) => Ok((*tag, NIL)),
            Value::Vector(items) => match items.as_slice() {
                [Value::Keyword(tag), payload] => Ok((*tag, payload)),
                _ => Err(Error::TypeMismatch {
                    expected: "[tag value]".into(),
                    got: "vector",
                }),
            },
            other => Err(Error::TypeMismatch {
                expected: "[tag value]".into(),
                got: other.type_name(),
            }),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Address> for Value {
    fn from(a: Address) -> Self {
        Value::Address(a)
    }
}

impl From<Segment> for Value {
    fn from(s: Segment) -> Self {
        Value::Segment(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Vector(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Char(c) => write!(f, "\\{c}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Keyword(k) => write!(f, ":{k}"),
            Value::Vector(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, ":{k} {v}")?;
                }
                f.write_str("}")
            }
            Value::Address(a) => write!(f, "#address {a}"),
            Value::Segment(s) => write!(f, "#segment {} [{}]", s.address(), s.len()),
            Value::Fn(_) => f.write_str("#fn"),
            Value::Native(n) => write!(f, "#native {}", n.address()),
        }
    }
}
