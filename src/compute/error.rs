//! Error type for the grid engine.

use super::Layout;

/// Errors raised by grid construction, layout conversion, filtering and decimation.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("Grid dimensions must be non-zero, got {0:?}")]
    InvalidDimensions([usize; 3]),
    #[error("Box size must be positive and finite, got {0:?}")]
    InvalidBoxSize([f64; 3]),
    #[error("Unrecognised layout tag {0}")]
    InvalidLayout(u8),
    #[error("Operation requires {expected:?} layout but grid is {found:?}")]
    WrongLayout { expected: Layout, found: Layout },
    #[error("Axis {axis}: {old} cells cannot be decimated to {new}")]
    NonIntegerDecimation { axis: usize, old: usize, new: usize },
    #[error("Grid needs {required} elements but the allocation holds {capacity}")]
    CapacityExceeded { required: usize, capacity: usize },
    #[error("Index {index:?} is outside a grid of {dims:?}")]
    IndexOutOfBounds { index: [usize; 3], dims: [usize; 3] },
    #[error("Expected {expected} samples, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("Filter type {0} is undefined")]
    UnknownFilter(String),
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
