//! Typed views of native global variables.

use marshal_mem::{Address, Arena, Segment};

use crate::error::Result;
use crate::registry::Registry;
use crate::types::Type;
use crate::value::Value;

/// A native variable at a fixed address.
///
/// Loads and stores are plain memory accesses. A value concurrently
/// written by native code or another thread may be observed torn.
#[derive(Debug, Clone)]
pub struct StaticVariable {
    segment: Segment,
    ty: Type,
    registry: Registry,
}

impl StaticVariable {
    /// Views the memory at `address` as a variable of `ty`.
    ///
    /// # Safety
    ///
    /// `address` must be valid for reads and writes of `ty`'s layout for as
    /// long as the variable is used.
    ///
    /// # Errors
    ///
    /// Layout errors for `ty`.
    pub unsafe fn new(address: Address, ty: Type, registry: Registry) -> Result<Self> {
        let size = registry.layout_of(&ty)?.size;
        // SAFETY: guaranteed by the caller.
        let segment = unsafe { Segment::from_raw(address, size) };
        Ok(StaticVariable {
            segment,
            ty,
            registry,
        })
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.segment.address()
    }

    #[must_use]
    pub fn var_type(&self) -> &Type {
        &self.ty
    }

    #[must_use]
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Reads the current value.
    ///
    /// # Errors
    ///
    /// Deserialization errors for the variable's type.
    pub fn get(&self) -> Result<Value> {
        self.registry.deserialize_from(&self.segment, &self.ty)
    }

    /// Stores `value`.
    ///
    /// Out-of-line storage the value needs is allocated from the global
    /// arena and never released.
    ///
    /// # Errors
    ///
    /// Serialization errors for the variable's type.
    pub fn set(&self, value: &Value) -> Result<()> {
        self.registry
            .serialize_into(value, &self.ty, &self.segment, &Arena::global())
    }

    /// Stores `value` and returns the value it replaced.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get) and [`set`](Self::set). Nothing is stored if
    /// reading the old value fails.
    pub fn swap(&self, value: &Value) -> Result<Value> {
        let old = self.get()?;
        self.set(value)?;
        Ok(old)
    }
}
