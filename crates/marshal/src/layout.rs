//! Native layouts: size, alignment and field tables.
//!
//! Layouts are computed by the [`Registry`](crate::Registry) and cached per
//! descriptor. The helpers here implement the combination rules:
//!
//! - **sequential** (structs): fields are placed back to back in declared
//!   order with no implicit padding. The size is the end of the last field
//!   and the alignment is the largest field alignment (1 when empty).
//! - **overlapping** (unions): every member starts at offset 0; size and
//!   alignment are the maxima over the members.
//! - **repeated** (arrays): `n` elements at a stride of the element size
//!   rounded up to the element alignment.
//!
//! ABI padding is never inserted here. [`Registry::with_c_layout`] rewrites
//! a descriptor with explicit padding fields instead.
//!
//! [`Registry::with_c_layout`]: crate::Registry::with_c_layout

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::symbol::Symbol;
use crate::types::Type;

/// Rounds `n` up to a multiple of `align` (a power of two).
///
/// Panics on overflow; see [`checked_round_up`].
#[inline]
#[must_use]
pub const fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Like [`round_up`], or `None` if the result does not fit in `usize`.
#[inline]
#[must_use]
pub const fn checked_round_up(n: usize, align: usize) -> Option<usize> {
    match n.checked_add(align - 1) {
        Some(m) => Some(m & !(align - 1)),
        None => None,
    }
}

pub(crate) fn overflow(what: &str) -> Error {
    Error::InvalidLayout {
        reason: format!("{what} overflows the address space"),
    }
}

/// One entry of a composite's field table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    /// Field name; `None` for union members.
    pub name: Option<Symbol>,
    /// Offset from the start of the composite.
    pub offset: usize,
    /// Layout of the field itself.
    pub layout: Layout,
    /// Descriptor of the field.
    pub ty: Type,
}

impl FieldLayout {
    /// One past the last byte of the field.
    ///
    /// Never overflows for layouts built by [`Layout::sequential`] and
    /// [`Layout::overlapping`].
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.layout.size
    }
}

/// Size, alignment and (for composites) field table of a type.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    /// Size in bytes.
    pub size: usize,
    /// Alignment in bytes, always a power of two.
    pub align: usize,
    /// Field table of structs and unions.
    pub fields: Option<Arc<[FieldLayout]>>,
}

impl Layout {
    /// Layout without a field table.
    #[must_use]
    pub fn scalar(size: usize, align: usize) -> Self {
        Layout {
            size,
            align,
            fields: None,
        }
    }

    /// Distance between consecutive elements of an array of this layout.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidLayout`] if rounding the size up overflows.
    pub fn stride(&self) -> Result<usize> {
        checked_round_up(self.size, self.align).ok_or_else(|| overflow("element stride"))
    }

    /// Field table entry named `name`.
    #[must_use]
    pub fn field(&self, name: Symbol) -> Option<&FieldLayout> {
        self.fields
            .as_deref()?
            .iter()
            .find(|f| f.name == Some(name))
    }

    /// Struct layout: fields back to back in declared order.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidLayout`] if the fields do not fit in the address
    /// space together.
    pub fn sequential(fields: impl IntoIterator<Item = (Symbol, Type, Layout)>) -> Result<Self> {
        let mut offset = 0usize;
        let mut align = 1;
        let table = fields
            .into_iter()
            .map(|(name, ty, layout)| {
                let field = FieldLayout {
                    name: Some(name),
                    offset,
                    layout,
                    ty,
                };
                offset = offset
                    .checked_add(field.layout.size)
                    .ok_or_else(|| overflow(&format!("struct field {name}")))?;
                align = align.max(field.layout.align);
                Ok(field)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Layout {
            size: offset,
            align,
            fields: Some(table.into()),
        })
    }

    /// Union layout: all members at offset 0.
    #[must_use]
    pub fn overlapping(members: impl IntoIterator<Item = (Type, Layout)>) -> Self {
        let mut size = 0;
        let mut align = 1;
        let table: Vec<FieldLayout> = members
            .into_iter()
            .map(|(ty, layout)| {
                size = size.max(layout.size);
                align = align.max(layout.align);
                FieldLayout {
                    name: None,
                    offset: 0,
                    layout,
                    ty,
                }
            })
            .collect();

        Layout {
            size,
            align,
            fields: Some(table.into()),
        }
    }

    /// Array layout: `count` elements of `element`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidLayout`] for a negative count or a size overflow.
    pub fn repeated(element: &Layout, count: i64) -> Result<Self> {
        let n = usize::try_from(count).map_err(|_| Error::InvalidLayout {
            reason: format!("array length {count} is negative"),
        })?;
        let size = element
            .stride()?
            .checked_mul(n)
            .ok_or_else(|| Error::InvalidLayout {
                reason: format!("array of {n} elements overflows"),
            })?;
        Ok(Layout::scalar(size, element.align))
    }
}
