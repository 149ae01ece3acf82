//! Regrider - smooth and subsample 3D density and velocity grids.
//!
//! Grids are read from halo-finder archives, smoothed in Fourier space with a
//! spherically symmetric low-pass filter and decimated by an integer stride
//! along each axis.
//!
//! # Architecture
//!
//! - `compute`: the grid engine (storage layouts, 3D real FFT, filters, decimation)
//! - `schema`: configuration of a regridding run
//! - `archive`: the gbpTrees and VELOCIraptor archive formats
//!
//! # Example
//!
//! ```rust,no_run
//! use regrider::compute::{FilterType, Grid};
//!
//! let samples = vec![1.0f32; 64 * 64 * 64];
//! let grid = Grid::from_real([64, 64, 64], [100.0; 3], &samples)?;
//!
//! // Smooth over half a target cell, then keep every 4th sample
//! let mut grid = grid.filter(FilterType::RealTopHat, 100.0 / 16.0 * 0.5);
//! grid.decimate([16, 16, 16])?;
//!
//! println!("Total after regridding: {}", grid.sum()?);
//! # Ok::<(), regrider::compute::GridError>(())
//! ```

pub mod archive;
pub mod compute;
pub mod schema;

pub use archive::{ArchiveError, regrid_gbptrees, regrid_velociraptor};
pub use compute::{FilterType, Grid, GridError, Spectrum};
pub use schema::{ConfigError, RegridConfig};
