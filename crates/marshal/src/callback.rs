//! Native calls and host callbacks.
//!
//! Crossing the boundary in either direction is split in two:
//!
//! - marshaling, done here: host values are serialized per the function
//!   type's parameter types and native results are deserialized per its
//!   return type (or, for raw function types, coerced to and from machine
//!   values directly)
//! - the call itself, done by a [`NativeLinker`] installed on the
//!   [`Registry`]: it jumps to native code with a [`CallDescriptor`] and
//!   hands out native entry points for [`Trampoline`]s
//!
//! # Failure Policy
//!
//! A host function invoked from native code has no way to report an error
//! through the native call frame. If it fails or panics, the trampoline logs
//! the failure and aborts the process. Host functions that want to return a
//! native-safe default on failure must catch the failure themselves.
//!
//! # Example
//!
//! ```
//! use marshal::{Arena, HostFn, Primitive, Registry, Trampoline, Type, Value};
//!
//! let registry = Registry::new();
//! let add = HostFn::new(|args| {
//!     let a = args[0].as_int().unwrap_or(0);
//!     let b = args[1].as_int().unwrap_or(0);
//!     Ok(Value::Int(a + b))
//! });
//! let ty = Type::function([Type::int(), Type::int()], Type::int());
//! let desc = registry.call_descriptor(&ty).unwrap();
//! let arena = Arena::auto();
//! let trampoline = Trampoline::new(add, desc, registry, &arena);
//!
//! let ret = trampoline
//!     .try_invoke(&[Primitive::Int(2).into(), Primitive::Int(3).into()])
//!     .unwrap();
//! assert_eq!(ret.as_primitive(), Some(Primitive::Int(5)));
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use marshal_log::{error, trace};
use marshal_mem::{Address, Arena, MemError, WeakArena};

use crate::dispatch::Serialized;
use crate::error::{Error, Result};
use crate::primitive::{Primitive, PrimitiveKind};
use crate::registry::Registry;
use crate::types::Type;
use crate::value::Value;

/// A host function callable from native code.
#[derive(Clone)]
pub struct HostFn(Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>);

impl HostFn {
    pub fn new(f: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static) -> Self {
        HostFn(Arc::new(f))
    }

    /// Calls the function directly, without marshaling.
    ///
    /// # Errors
    ///
    /// Whatever the function returns.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.0)(args)
    }
}

impl PartialEq for HostFn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFn({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// How one argument or return value is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgClass {
    /// No value.
    Void,
    /// A single machine value in a register or stack slot.
    Primitive(PrimitiveKind),
    /// An aggregate passed by value, carried as a segment.
    Aggregate { size: usize, align: usize },
}

/// Calling convention of a function type, as seen by a linker.
#[derive(Debug, Clone, PartialEq)]
pub struct CallDescriptor {
    pub args: Vec<ArgClass>,
    pub ret: ArgClass,
    /// Declared parameter types, in order.
    pub param_types: Vec<Type>,
    pub return_type: Type,
    /// Raw function types exchange only machine values.
    pub raw: bool,
}

impl CallDescriptor {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

/// Platform call machinery.
///
/// The marshal engine does not generate machine code. A linker performs
/// calls into native code and produces native entry points for host
/// callbacks.
pub trait NativeLinker: Send + Sync {
    /// Calls the native function at `address`.
    ///
    /// Arguments arrive as [`Serialized::Primitive`] for
    /// [`ArgClass::Primitive`] and [`Serialized::Segment`] for
    /// [`ArgClass::Aggregate`]; the result must follow the same convention
    /// for `desc.ret`. Aggregate results are allocated from `arena`.
    ///
    /// # Safety
    ///
    /// `address` must be a native function whose signature matches `desc`.
    unsafe fn downcall(
        &self,
        address: Address,
        desc: &CallDescriptor,
        args: &[Serialized],
        arena: &Arena,
    ) -> Result<Serialized>;

    /// Returns a native entry point that calls
    /// [`Trampoline::invoke`] with the native arguments.
    ///
    /// The entry point must stay valid until `arena` is released.
    fn upcall(&self, trampoline: Arc<Trampoline>, arena: &Arena) -> Result<Address>;
}

/// Where a trampoline is in its most recent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrampolineState {
    Idle = 0,
    Invoking = 1,
    Returned = 2,
    Aborted = 3,
}

impl TrampolineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => TrampolineState::Invoking,
            2 => TrampolineState::Returned,
            3 => TrampolineState::Aborted,
            _ => TrampolineState::Idle,
        }
    }
}

/// A host function wrapped for invocation from native code.
///
/// Out-of-line storage for return values (strings, pointees) is allocated
/// from the trampoline's arena. The trampoline only holds the arena weakly:
/// a linker typically keeps the trampoline until that arena is released.
pub struct Trampoline {
    target: HostFn,
    descriptor: CallDescriptor,
    registry: Registry,
    arena: WeakArena,
    state: AtomicU8,
}

impl Trampoline {
    #[must_use]
    pub fn new(
        target: HostFn,
        descriptor: CallDescriptor,
        registry: Registry,
        arena: &Arena,
    ) -> Self {
        Trampoline {
            target,
            descriptor,
            registry,
            arena: arena.downgrade(),
            state: AtomicU8::new(TrampolineState::Idle as u8),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &CallDescriptor {
        &self.descriptor
    }

    /// The arena return values are allocated from, unless released.
    #[must_use]
    pub fn arena(&self) -> Option<Arena> {
        self.arena.upgrade()
    }

    #[must_use]
    pub fn state(&self) -> TrampolineState {
        TrampolineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TrampolineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Entry point for native callers.
    ///
    /// Aborts the process if the host function fails or panics, or if its
    /// arguments or result cannot be marshaled.
    pub fn invoke(&self, args: &[Serialized]) -> Serialized {
        self.set_state(TrampolineState::Invoking);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.marshal_call(args)));
        match outcome {
            Ok(Ok(ret)) => {
                self.set_state(TrampolineState::Returned);
                ret
            }
            Ok(Err(err)) => self.abort(&err.to_string()),
            Err(payload) => self.abort(&panic_message(payload.as_ref())),
        }
    }

    /// Marshals and calls the host function, reporting failures instead
    /// of aborting.
    ///
    /// # Errors
    ///
    /// Marshaling errors and errors returned by the host function.
    pub fn try_invoke(&self, args: &[Serialized]) -> Result<Serialized> {
        self.set_state(TrampolineState::Invoking);
        let ret = self.marshal_call(args);
        self.set_state(if ret.is_ok() {
            TrampolineState::Returned
        } else {
            TrampolineState::Aborted
        });
        ret
    }

    fn marshal_call(&self, args: &[Serialized]) -> Result<Serialized> {
        let desc = &self.descriptor;
        if args.len() != desc.arity() {
            return Err(Error::LengthMismatch {
                expected: desc.arity(),
                got: args.len(),
            });
        }
        trace!("invoking trampoline for {} argument(s)", args.len());

        if desc.raw {
            let values = args
                .iter()
                .map(|a| {
                    a.as_primitive()
                        .map(Primitive::to_value)
                        .ok_or_else(|| Error::TypeMismatch {
                            expected: "primitive".into(),
                            got: "segment",
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            let ret = self.target.call(&values)?;
            return Ok(Serialized::Primitive(match desc.ret {
                ArgClass::Primitive(kind) => Primitive::coerce(kind, &ret)?,
                ArgClass::Void | ArgClass::Aggregate { .. } => Primitive::Void,
            }));
        }

        let values = args
            .iter()
            .zip(&desc.param_types)
            .map(|(arg, ty)| self.registry.deserialize(arg, ty))
            .collect::<Result<Vec<_>>>()?;
        let ret = self.target.call(&values)?;
        if desc.ret == ArgClass::Void {
            return Ok(Serialized::Primitive(Primitive::Void));
        }
        let arena = self.arena.upgrade().ok_or(MemError::UseAfterClose {
            arena: self.arena.id(),
        })?;
        self.registry.serialize(&ret, &desc.return_type, &arena)
    }

    fn abort(&self, reason: &str) -> ! {
        self.set_state(TrampolineState::Aborted);
        error!("host callback failed, aborting: {}", reason);
        std::process::abort()
    }
}

impl fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trampoline")
            .field("target", &self.target)
            .field("descriptor", &self.descriptor)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// A native function, callable with host values.
#[derive(Clone)]
pub struct NativeFn {
    address: Address,
    ty: Type,
    registry: Registry,
}

impl NativeFn {
    /// Wraps the native function at `address`.
    ///
    /// # Safety
    ///
    /// `address` must be a native function whose signature matches `ty`,
    /// and it must stay callable as long as the returned value is used.
    #[must_use]
    pub unsafe fn new(address: Address, ty: Type, registry: Registry) -> Self {
        NativeFn {
            address,
            ty,
            registry,
        }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn function_type(&self) -> &Type {
        &self.ty
    }

    /// Calls the function through the registry's linker.
    ///
    /// Arguments and aggregate results are allocated from `arena`.
    ///
    /// # Errors
    ///
    /// [`Error::NoLinker`] without a linker, [`Error::LengthMismatch`] for
    /// the wrong number of arguments, and marshaling errors.
    pub fn call(&self, args: &[Value], arena: &Arena) -> Result<Value> {
        let desc = self.registry.call_descriptor(&self.ty)?;
        if args.len() != desc.arity() {
            return Err(Error::LengthMismatch {
                expected: desc.arity(),
                got: args.len(),
            });
        }
        let linker = self.registry.linker()?;

        let serialized = if desc.raw {
            args.iter()
                .zip(&desc.args)
                .map(|(value, class)| match class {
                    ArgClass::Primitive(kind) => Ok(Primitive::coerce(*kind, value)?.into()),
                    ArgClass::Void => Ok(Primitive::Void.into()),
                    ArgClass::Aggregate { .. } => Err(Error::NotPrimitive { id: self.ty.id() }),
                })
                .collect::<Result<Vec<Serialized>>>()?
        } else {
            args.iter()
                .zip(&desc.param_types)
                .map(|(value, ty)| self.registry.serialize(value, ty, arena))
                .collect::<Result<Vec<_>>>()?
        };

        trace!("calling native function at {}", self.address);
        // SAFETY: `new` requires the address to be a function of this type.
        let ret = unsafe { linker.downcall(self.address, &desc, &serialized, arena)? };

        if desc.raw {
            return ret
                .as_primitive()
                .map(Primitive::to_value)
                .ok_or(Error::NotPrimitive {
                    id: desc.return_type.id(),
                });
        }
        self.registry.deserialize(&ret, &desc.return_type)
    }
}

impl PartialEq for NativeFn {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.ty == other.ty
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({} {})", self.address, self.ty)
    }
}
