//! The type registry.
//!
//! A [`Registry`] maps type identifiers to [`Strategy`]s and aliases to the
//! descriptors they stand for. It also caches computed layouts and holds the
//! [`NativeLinker`] used for native calls and upcalls.
//!
//! Every identifier has exactly one strategy, chosen by how its values are
//! marshaled:
//!
//! - [`Strategy::Primitive`]: the type reduces to one machine value and
//!   implements the value-level pair ([`PrimitiveStrategy`])
//! - [`Strategy::Composite`]: the type writes into and reads from segments
//!   ([`CompositeStrategy`])
//! - [`Strategy::SerializeOnly`]: like a composite, but values cannot be read
//!   back without outside information ([`SerializeStrategy`] only)
//!
//! The registry supplies whichever path a strategy does not implement; see
//! the `dispatch` methods on [`Registry`].
//!
//! # Thread Safety
//!
//! Lookups take read locks. Registration is expected during setup and takes
//! write locks; it replaces any previous strategy and clears the layout
//! cache. Nothing is ever removed.

use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use fxhash::FxHashMap;
use marshal_log::{debug, trace};
use marshal_mem::{Arena, Segment};

use crate::builtin;
use crate::callback::NativeLinker;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::primitive::{Primitive, PrimitiveKind};
use crate::symbol::Symbol;
use crate::types::Type;
use crate::value::Value;

/// Maximum alias chain followed before reporting a cycle.
const MAX_ALIAS_DEPTH: usize = 32;

/// Marshaling of a type that reduces to one machine value.
pub trait PrimitiveStrategy: Send + Sync {
    /// The slot the type reduces to.
    fn primitive_kind(&self, ty: &Type) -> PrimitiveKind;

    /// Converts a host value into a machine value.
    ///
    /// Out-of-line storage (pointees, strings) is allocated from `arena`.
    fn serialize(
        &self,
        value: &Value,
        ty: &Type,
        arena: &Arena,
        registry: &Registry,
    ) -> Result<Primitive>;

    /// Converts a machine value back into a host value.
    fn deserialize(&self, primitive: Primitive, ty: &Type, registry: &Registry) -> Result<Value>;
}

/// Slot-level serialization of a composite type.
pub trait SerializeStrategy: Send + Sync {
    /// Layout of `ty`, in terms of the registry's layouts for its parts.
    fn layout(&self, ty: &Type, registry: &Registry) -> Result<Layout>;

    /// The slot a value of `ty` fits in, if it is primitive-shaped.
    ///
    /// Primitive-shaped composites are returned from
    /// [`Registry::serialize`] as a [`Primitive`] and passed to native
    /// calls in a register.
    fn primitive_kind(&self, _ty: &Type) -> Option<PrimitiveKind> {
        None
    }

    /// Writes `value` into `segment`, which is exactly the layout size.
    fn serialize_into(
        &self,
        value: &Value,
        ty: &Type,
        segment: &Segment,
        arena: &Arena,
        registry: &Registry,
    ) -> Result<()>;
}

/// Slot-level serialization and deserialization of a composite type.
pub trait CompositeStrategy: SerializeStrategy {
    /// Reads a value of `ty` out of `segment`.
    fn deserialize_from(&self, segment: &Segment, ty: &Type, registry: &Registry) -> Result<Value>;
}

/// How values of one type identifier are marshaled.
#[derive(Clone)]
pub enum Strategy {
    Primitive(Arc<dyn PrimitiveStrategy>),
    Composite(Arc<dyn CompositeStrategy>),
    SerializeOnly(Arc<dyn SerializeStrategy>),
}

impl Strategy {
    fn kind_name(&self) -> &'static str {
        match self {
            Strategy::Primitive(_) => "primitive",
            Strategy::Composite(_) => "composite",
            Strategy::SerializeOnly(_) => "serialize-only",
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Strategy::{}", self.kind_name())
    }
}

struct RegistryInner {
    strategies: RwLock<FxHashMap<Symbol, Strategy>>,
    aliases: RwLock<FxHashMap<Symbol, Type>>,
    layouts: RwLock<FxHashMap<Type, Layout>>,
    linker: RwLock<Option<Arc<dyn NativeLinker>>>,
}

/// Type registry, layout cache and dispatch.
///
/// Handles are cheap to clone; clones share all state.
///
/// # Example
///
/// ```
/// use marshal::{Registry, Type};
///
/// let registry = Registry::new();
/// let point = Type::structure([("x", Type::float()), ("y", Type::float())]);
/// registry.alias("point", point).unwrap();
///
/// let layout = registry.layout_of(&Type::named("point")).unwrap();
/// assert_eq!((layout.size, layout.align), (8, 4));
/// ```
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// A registry with every built-in type registered.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::empty();
        builtin::install(&registry);
        registry
    }

    /// A registry with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Registry {
            inner: Arc::new(RegistryInner {
                strategies: RwLock::new(FxHashMap::default()),
                aliases: RwLock::new(FxHashMap::default()),
                layouts: RwLock::new(FxHashMap::default()),
                linker: RwLock::new(None),
            }),
        }
    }

    /// The process-wide registry with the built-in types.
    #[must_use]
    pub fn global() -> Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new).clone()
    }

    /// Registers `strategy` for `id`, replacing any previous one.
    pub fn register(&self, id: impl Into<Symbol>, strategy: Strategy) {
        let id = id.into();
        debug!("registering {} strategy for {}", strategy.kind_name(), id);
        self.inner
            .strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, strategy);
        self.clear_layouts();
    }

    pub fn register_primitive(
        &self,
        id: impl Into<Symbol>,
        strategy: impl PrimitiveStrategy + 'static,
    ) {
        self.register(id, Strategy::Primitive(Arc::new(strategy)));
    }

    pub fn register_composite(
        &self,
        id: impl Into<Symbol>,
        strategy: impl CompositeStrategy + 'static,
    ) {
        self.register(id, Strategy::Composite(Arc::new(strategy)));
    }

    pub fn register_serialize_only(
        &self,
        id: impl Into<Symbol>,
        strategy: impl SerializeStrategy + 'static,
    ) {
        self.register(id, Strategy::SerializeOnly(Arc::new(strategy)));
    }

    /// Makes the bare identifier `id` stand for `target`.
    ///
    /// # Errors
    ///
    /// [`Error::AliasCycle`] if `target` resolves back to `id`.
    pub fn alias(&self, id: impl Into<Symbol>, target: Type) -> Result<()> {
        let id = id.into();
        debug!("aliasing {} to {}", id, target);
        let previous = self
            .inner
            .aliases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, target);

        if let Err(err) = self.resolve(&Type::named(id)) {
            let mut aliases = self.inner.aliases.write().unwrap_or_else(PoisonError::into_inner);
            match previous {
                Some(previous) => aliases.insert(id, previous),
                None => aliases.remove(&id),
            };
            return Err(err);
        }
        self.clear_layouts();
        Ok(())
    }

    /// Follows aliases until `ty` names a registered strategy or is
    /// parametric.
    ///
    /// # Errors
    ///
    /// [`Error::AliasCycle`] for chains longer than the alias depth limit.
    pub fn resolve(&self, ty: &Type) -> Result<Type> {
        if !ty.is_bare() {
            return Ok(ty.clone());
        }
        let aliases = self
            .inner
            .aliases
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut current = ty;
        for _ in 0..MAX_ALIAS_DEPTH {
            match aliases.get(&current.id()) {
                Some(target) if current.is_bare() => current = target,
                _ => return Ok(current.clone()),
            }
        }
        Err(Error::AliasCycle { id: ty.id() })
    }

    /// The strategy registered for `id`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownType`] if nothing is registered.
    pub fn lookup(&self, id: Symbol) -> Result<Strategy> {
        self.inner
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownType { id })
    }

    /// Resolves `ty` and looks up its strategy.
    pub(crate) fn strategy_for(&self, ty: &Type) -> Result<(Type, Strategy)> {
        let resolved = self.resolve(ty)?;
        let strategy = self.lookup(resolved.id())?;
        Ok((resolved, strategy))
    }

    /// Whether `id` has a strategy or an alias.
    #[must_use]
    pub fn is_registered(&self, id: impl Into<Symbol>) -> bool {
        let id = id.into();
        self.inner
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
            || self
                .inner
                .aliases
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&id)
    }

    /// Installs the linker used for native calls and upcalls.
    pub fn set_linker(&self, linker: Arc<dyn NativeLinker>) {
        *self
            .inner
            .linker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(linker);
    }

    /// The installed linker.
    ///
    /// # Errors
    ///
    /// [`Error::NoLinker`] if none is installed.
    pub fn linker(&self) -> Result<Arc<dyn NativeLinker>> {
        self.inner
            .linker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NoLinker)
    }

    pub(crate) fn cached_layout(&self, ty: &Type) -> Option<Layout> {
        let layout = self
            .inner
            .layouts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ty)
            .cloned();
        trace!(
            "layout cache {} for {}",
            if layout.is_some() { "hit" } else { "miss" },
            ty
        );
        layout
    }

    /// Descriptors holding functions are never memoized.
    pub(crate) fn cache_layout(&self, ty: Type, layout: Layout) {
        if ty.has_functions() {
            return;
        }
        self.inner
            .layouts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ty, layout);
    }

    fn clear_layouts(&self) {
        self.inner
            .layouts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategies = self
            .inner
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let aliases = self
            .inner
            .aliases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Registry")
            .field("strategies", &strategies)
            .field("aliases", &aliases)
            .finish_non_exhaustive()
    }
}
