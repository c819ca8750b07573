//! Type descriptors.
//!
//! A [`Type`] is an identifier plus arguments. Bare identifiers name
//! primitives and user types (`int`, `pointer`, `point`); parametric types
//! carry their arguments (`[array int 3]`, `[struct [x float] [y float]]`).
//! Descriptors are immutable, cheap to clone and compare structurally, so
//! they double as layout-cache keys.
//!
//! Descriptors never own native memory. The meaning of the arguments is up
//! to the strategy registered for the identifier; the constructors below
//! build the shapes the built-in strategies expect.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::symbol::Symbol;
use crate::value::Value;

/// Identifiers of the built-in types.
pub mod names {
    pub const BYTE: &str = "byte";
    pub const SHORT: &str = "short";
    pub const INT: &str = "int";
    pub const LONG: &str = "long";
    pub const CHAR: &str = "char";
    pub const FLOAT: &str = "float";
    pub const DOUBLE: &str = "double";
    pub const POINTER: &str = "pointer";
    pub const VOID: &str = "void";
    pub const C_STRING: &str = "c-string";
    pub const STRUCT: &str = "struct";
    pub const UNION: &str = "union";
    pub const ARRAY: &str = "array";
    pub const TAGGED_UNION: &str = "tagged-union";
    pub const PADDING: &str = "padding";
    pub const FN: &str = "fn";
    pub const RAW_FN: &str = "raw-fn";
}

/// Chooses the member type a union value is serialized as.
#[derive(Clone)]
pub struct DispatchFn(Arc<dyn Fn(&Value) -> Option<Type> + Send + Sync>);

impl DispatchFn {
    pub fn new(f: impl Fn(&Value) -> Option<Type> + Send + Sync + 'static) -> Self {
        DispatchFn(Arc::new(f))
    }

    #[must_use]
    pub fn call(&self, value: &Value) -> Option<Type> {
        (self.0)(value)
    }
}

/// Extracts the member value from a union value.
#[derive(Clone)]
pub struct ExtractFn(Arc<dyn Fn(&Value) -> Value + Send + Sync>);

impl ExtractFn {
    pub fn new(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        ExtractFn(Arc::new(f))
    }

    #[must_use]
    pub fn call(&self, value: &Value) -> Value {
        (self.0)(value)
    }
}

macro_rules! impl_fn_identity {
    ($($name:ident),*) => {
        $(
            impl PartialEq for $name {
                fn eq(&self, other: &Self) -> bool {
                    Arc::ptr_eq(&self.0, &other.0)
                }
            }

            impl Eq for $name {}

            impl Hash for $name {
                fn hash<H: Hasher>(&self, state: &mut H) {
                    Arc::as_ptr(&self.0).cast::<()>().hash(state);
                }
            }

            impl fmt::Debug for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({:p})", stringify!($name), Arc::as_ptr(&self.0).cast::<()>())
                }
            }
        )*
    };
}

impl_fn_identity!(DispatchFn, ExtractFn);

/// One argument of a parametric descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeArg {
    /// A nested descriptor (element, member, target or return type).
    Type(Type),
    /// A count (array length, padding width).
    Count(i64),
    /// A named field.
    Field(Symbol, Type),
    /// An ordered list of descriptors (function parameters).
    List(Arc<[Type]>),
    /// A bare symbol (tagged-union tag).
    Symbol(Symbol),
    /// Union dispatch function.
    Dispatch(DispatchFn),
    /// Union extraction function.
    Extract(ExtractFn),
}

/// A type descriptor.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Type {
    id: Symbol,
    args: Arc<[TypeArg]>,
}

impl Type {
    /// A bare identifier.
    pub fn named(id: impl Into<Symbol>) -> Self {
        Type {
            id: id.into(),
            args: Arc::from([]),
        }
    }

    /// An identifier with arguments.
    pub fn new(id: impl Into<Symbol>, args: impl IntoIterator<Item = TypeArg>) -> Self {
        Type {
            id: id.into(),
            args: args.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn byte() -> Self {
        Self::named(names::BYTE)
    }

    #[must_use]
    pub fn short() -> Self {
        Self::named(names::SHORT)
    }

    #[must_use]
    pub fn int() -> Self {
        Self::named(names::INT)
    }

    #[must_use]
    pub fn long() -> Self {
        Self::named(names::LONG)
    }

    #[must_use]
    pub fn char() -> Self {
        Self::named(names::CHAR)
    }

    #[must_use]
    pub fn float() -> Self {
        Self::named(names::FLOAT)
    }

    #[must_use]
    pub fn double() -> Self {
        Self::named(names::DOUBLE)
    }

    /// Bare pointer: an address with no pointee type.
    #[must_use]
    pub fn pointer() -> Self {
        Self::named(names::POINTER)
    }

    #[must_use]
    pub fn void() -> Self {
        Self::named(names::VOID)
    }

    /// Null-terminated string, passed as a pointer.
    #[must_use]
    pub fn c_string() -> Self {
        Self::named(names::C_STRING)
    }

    /// Pointer that serializes its pointee out of line.
    #[must_use]
    pub fn pointer_to(target: Type) -> Self {
        Self::new(names::POINTER, [TypeArg::Type(target)])
    }

    /// `count` consecutive elements.
    #[must_use]
    pub fn array(element: Type, count: i64) -> Self {
        Self::new(names::ARRAY, [TypeArg::Type(element), TypeArg::Count(count)])
    }

    /// Fields laid out back to back in the given order.
    pub fn structure<N: Into<Symbol>>(fields: impl IntoIterator<Item = (N, Type)>) -> Self {
        Self::new(
            names::STRUCT,
            fields
                .into_iter()
                .map(|(name, ty)| TypeArg::Field(name.into(), ty)),
        )
    }

    /// Members overlapping at offset 0. Serializing needs
    /// [`with_dispatch`](Self::with_dispatch).
    pub fn union(members: impl IntoIterator<Item = Type>) -> Self {
        Self::new(names::UNION, members.into_iter().map(TypeArg::Type))
    }

    /// `tags` in ordinal order, with the member type for each tag.
    ///
    /// Tags without a member carry no payload.
    pub fn tagged_union<T: Into<Symbol>, M: Into<Symbol>>(
        tags: impl IntoIterator<Item = T>,
        members: impl IntoIterator<Item = (M, Type)>,
    ) -> Self {
        let tags = tags.into_iter().map(|t| TypeArg::Symbol(t.into()));
        let members = members
            .into_iter()
            .map(|(tag, ty)| TypeArg::Field(tag.into(), ty));
        Self::new(names::TAGGED_UNION, tags.chain(members).collect::<Vec<_>>())
    }

    /// `n` filler bytes.
    #[must_use]
    pub fn padding(n: i64) -> Self {
        Self::new(names::PADDING, [TypeArg::Count(n)])
    }

    /// A native function that marshals its arguments and return value.
    pub fn function(params: impl IntoIterator<Item = Type>, ret: Type) -> Self {
        Self::new(
            names::FN,
            [TypeArg::List(params.into_iter().collect()), TypeArg::Type(ret)],
        )
    }

    /// A native function that exchanges primitive values only.
    pub fn raw_function(params: impl IntoIterator<Item = Type>, ret: Type) -> Self {
        Self::new(
            names::RAW_FN,
            [TypeArg::List(params.into_iter().collect()), TypeArg::Type(ret)],
        )
    }

    /// Adds a union dispatch function.
    #[must_use]
    pub fn with_dispatch(self, f: impl Fn(&Value) -> Option<Type> + Send + Sync + 'static) -> Self {
        self.with_arg(TypeArg::Dispatch(DispatchFn::new(f)))
    }

    /// Adds a union extraction function.
    #[must_use]
    pub fn with_extract(self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.with_arg(TypeArg::Extract(ExtractFn::new(f)))
    }

    fn with_arg(self, arg: TypeArg) -> Self {
        let mut args = self.args.to_vec();
        args.push(arg);
        Type {
            id: self.id,
            args: args.into(),
        }
    }

    /// The identifier.
    #[must_use]
    pub fn id(&self) -> Symbol {
        self.id
    }

    /// All arguments, in order.
    #[must_use]
    pub fn args(&self) -> &[TypeArg] {
        &self.args
    }

    /// Whether the descriptor has no arguments.
    #[must_use]
    pub fn is_bare(&self) -> bool {
        self.args.is_empty()
    }

    /// Whether the descriptor or any nested one holds a dispatch or
    /// extract function.
    #[must_use]
    pub fn has_functions(&self) -> bool {
        self.args.iter().any(|arg| match arg {
            TypeArg::Dispatch(_) | TypeArg::Extract(_) => true,
            TypeArg::Type(ty) | TypeArg::Field(_, ty) => ty.has_functions(),
            TypeArg::List(types) => types.iter().any(Type::has_functions),
            TypeArg::Count(_) | TypeArg::Symbol(_) => false,
        })
    }

    /// Whether the descriptor is `id` (bare or not).
    #[must_use]
    pub fn is(&self, id: &str) -> bool {
        self.id.as_str() == id
    }

    /// Nested descriptors, in order.
    pub fn type_args(&self) -> impl Iterator<Item = &Type> {
        self.args.iter().filter_map(|a| match a {
            TypeArg::Type(t) => Some(t),
            _ => None,
        })
    }

    /// The first count argument.
    #[must_use]
    pub fn count(&self) -> Option<i64> {
        self.args.iter().find_map(|a| match a {
            TypeArg::Count(n) => Some(*n),
            _ => None,
        })
    }

    /// Named fields, in order.
    pub fn fields(&self) -> impl Iterator<Item = (Symbol, &Type)> {
        self.args.iter().filter_map(|a| match a {
            TypeArg::Field(name, ty) => Some((*name, ty)),
            _ => None,
        })
    }

    /// Bare symbol arguments, in order.
    pub fn symbols(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.args.iter().filter_map(|a| match a {
            TypeArg::Symbol(s) => Some(*s),
            _ => None,
        })
    }

    /// The first list argument.
    #[must_use]
    pub fn list(&self) -> Option<&[Type]> {
        self.args.iter().find_map(|a| match a {
            TypeArg::List(l) => Some(&**l),
            _ => None,
        })
    }

    #[must_use]
    pub fn dispatch(&self) -> Option<&DispatchFn> {
        self.args.iter().find_map(|a| match a {
            TypeArg::Dispatch(f) => Some(f),
            _ => None,
        })
    }

    #[must_use]
    pub fn extract(&self) -> Option<&ExtractFn> {
        self.args.iter().find_map(|a| match a {
            TypeArg::Extract(f) => Some(f),
            _ => None,
        })
    }
}

impl From<&str> for Type {
    fn from(id: &str) -> Self {
        Type::named(id)
    }
}

impl From<Symbol> for Type {
    fn from(id: Symbol) -> Self {
        Type::named(id)
    }
}

impl fmt::Display for TypeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeArg::Type(t) => write!(f, "{t}"),
            TypeArg::Count(n) => write!(f, "{n}"),
            TypeArg::Field(name, t) => write!(f, "[{name} {t}]"),
            TypeArg::List(types) => {
                f.write_str("[")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{t}")?;
                }
                f.write_str("]")
            }
            TypeArg::Symbol(s) => write!(f, ":{s}"),
            TypeArg::Dispatch(_) => f.write_str(":dispatch"),
            TypeArg::Extract(_) => f.write_str(":extract"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bare() {
            return write!(f, "{}", self.id);
        }
        write!(f, "[{}", self.id)?;
        for arg in self.args.iter() {
            write!(f, " {arg}")?;
        }
        f.write_str("]")
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({self})")
    }
}
