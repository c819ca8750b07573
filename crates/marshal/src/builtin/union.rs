//! Untagged unions.
//!
//! A union value carries no record of which member it holds, so unions are
//! serialize-only. The descriptor's dispatch function picks the member type
//! for each value, and the optional extract function pulls the member value
//! out of it. To read a union back, deserialize its bytes as whichever
//! member is known to be live.

use marshal_log::trace;
use marshal_mem::{Arena, Segment};

use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::registry::{Registry, SerializeStrategy};
use crate::types::Type;
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct UnionStrategy;

impl SerializeStrategy for UnionStrategy {
    fn layout(&self, ty: &Type, registry: &Registry) -> Result<Layout> {
        let members = ty
            .type_args()
            .map(|m| Ok((m.clone(), registry.layout_of(m)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Layout::overlapping(members))
    }

    fn serialize_into(
        &self,
        value: &Value,
        ty: &Type,
        segment: &Segment,
        arena: &Arena,
        registry: &Registry,
    ) -> Result<()> {
        let dispatch = ty.dispatch().ok_or(Error::MissingDispatch { id: ty.id() })?;
        let member = dispatch
            .call(value)
            .ok_or_else(|| super::mismatch(ty, value))?;
        if !ty.type_args().any(|m| *m == member) {
            return Err(super::invalid(ty, format!("{member} is not a member")));
        }

        let extracted;
        let payload = match ty.extract() {
            Some(extract) => {
                extracted = extract.call(value);
                &extracted
            }
            None => value,
        };

        trace!("serializing union value as {}", member);
        segment.fill(0)?;
        let size = registry.layout_of(&member)?.size;
        registry.serialize_into(payload, &member, &segment.slice(0, size)?, arena)
    }
}
