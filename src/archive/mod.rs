//! Archive formats holding named 3D grids, and the per-grid regridding pipeline.
//!
//! Two formats are supported:
//!
//! - `gbptrees`: flat little-endian binary file of named f32 grids behind a
//!   shared header.
//! - `velociraptor`: hierarchical container with the grids stored as datasets.
//!   Access goes through the [`GridStore`] trait; an HDF5 backed store is
//!   available with the `hdf5` feature.

mod gbptrees;
mod velociraptor;

pub use gbptrees::*;
pub use velociraptor::*;

use std::io;

use crate::compute::{Grid, GridError, decimation_strides};
use crate::schema::RegridConfig;

/// Errors raised while reading or writing an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Grid {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

/// Smooth a freshly loaded grid and decimate it to the configured dimensions.
///
/// The filter scale is derived from the first box axis. The target shape is
/// checked before the grid is touched.
pub fn smooth_and_decimate(grid: Grid, config: &RegridConfig) -> Result<Grid, GridError> {
    decimation_strides(grid.dims(), config.new_dims())?;
    let radius = config.radius(grid.box_size()[0]);
    let mut grid = grid.filter(config.filter, radius);
    grid.decimate(config.new_dims())?;
    Ok(grid)
}
