//! Compute module - the grid engine: layouts, transforms, filters and decimation.

mod error;
mod fft3d;
mod filter;
mod grid;
mod layout;
mod spectrum;

pub use error::*;
pub use fft3d::*;
pub use filter::*;
pub use grid::*;
pub use layout::*;
pub use spectrum::*;
