//! Index arithmetic for the three memory layouts of a grid buffer.
//!
//! All layouts are row-major with the last axis fastest. They differ only in the
//! stride of the last axis:
//!
//! ```text
//! Real:      n2                 (logical samples, no gaps)
//! Padded:    2 * (n2 / 2 + 1)   (room for an in-place real-to-complex transform)
//! Hermitian: n2 / 2 + 1         (complex pairs, non-redundant half spectrum)
//! ```

use super::GridError;

/// Memory layout of a grid buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Layout {
    /// Logical real-space ordering.
    Real = 0,
    /// Real-space ordering with trailing padding on the last axis.
    Padded = 1,
    /// Complex half spectrum (indexes complex pairs, not floats).
    Hermitian = 2,
}

impl TryFrom<u8> for Layout {
    type Error = GridError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Layout::Real),
            1 => Ok(Layout::Padded),
            2 => Ok(Layout::Hermitian),
            _ => Err(GridError::InvalidLayout(tag)),
        }
    }
}

impl Layout {
    /// Length of one row of the last axis in this layout.
    #[inline]
    pub fn row_stride(self, n2: usize) -> usize {
        match self {
            Layout::Real => n2,
            Layout::Padded => 2 * (n2 / 2 + 1),
            Layout::Hermitian => n2 / 2 + 1,
        }
    }
}

/// Linear buffer offset of cell `(i, j, k)` in a grid of `shape` stored in `layout`.
#[inline]
pub fn offset(i: usize, j: usize, k: usize, layout: Layout, shape: [usize; 3]) -> usize {
    k + layout.row_stride(shape[2]) * (j + shape[1] * i)
}

/// Same as [`offset`] for a raw layout tag. Unknown tags are an error.
pub fn offset_tagged(
    i: usize,
    j: usize,
    k: usize,
    tag: u8,
    shape: [usize; 3],
) -> Result<usize, GridError> {
    Ok(offset(i, j, k, Layout::try_from(tag)?, shape))
}

/// Number of logical cells.
#[inline]
pub fn logical_count(shape: [usize; 3]) -> usize {
    shape[0] * shape[1] * shape[2]
}

/// Number of f32 elements in the padded layout.
#[inline]
pub fn padded_count(shape: [usize; 3]) -> usize {
    shape[0] * shape[1] * Layout::Padded.row_stride(shape[2])
}

/// Number of complex coefficients in the Hermitian half spectrum.
#[inline]
pub fn complex_count(shape: [usize; 3]) -> usize {
    shape[0] * shape[1] * Layout::Hermitian.row_stride(shape[2])
}
