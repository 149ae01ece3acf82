//! The 3D scalar grid: one padded allocation plus the transform engine bound to it.

use std::sync::Arc;

use rayon::prelude::*;

use super::fft3d::{PlanProvider, PlannerProvider, TransformEngine};
use super::layout::{Layout, complex_count, logical_count, offset, padded_count};
use super::{GridError, Spectrum};

/// A real-valued 3D grid.
///
/// The buffer is sized for the padded layout of the dimensions the grid was
/// created with and is never reallocated. Shrinking the grid (see
/// [`Grid::decimate`]) reuses the same storage.
///
/// A `Grid` is always in real space, either in [`Layout::Real`] or
/// [`Layout::Padded`]. Taking it to k-space with [`Grid::forward`] consumes it
/// and returns a [`Spectrum`].
pub struct Grid {
    pub(crate) dims: [usize; 3],
    pub(crate) box_size: [f64; 3],
    pub(crate) layout: Layout,
    pub(crate) data: Vec<f32>,
    pub(crate) engine: TransformEngine,
}

impl Grid {
    /// Create a zero-filled grid using all hardware threads.
    pub fn new(dims: [usize; 3], box_size: [f64; 3]) -> Result<Self, GridError> {
        Self::with_threads(dims, box_size, None)
    }

    /// Create a zero-filled grid whose transforms run on `threads` workers.
    pub fn with_threads(
        dims: [usize; 3],
        box_size: [f64; 3],
        threads: Option<usize>,
    ) -> Result<Self, GridError> {
        Self::with_provider(dims, box_size, threads, Arc::new(PlannerProvider))
    }

    /// Create a zero-filled grid taking its FFT plans from `provider`.
    pub fn with_provider(
        dims: [usize; 3],
        box_size: [f64; 3],
        threads: Option<usize>,
        provider: Arc<dyn PlanProvider>,
    ) -> Result<Self, GridError> {
        validate_dims(dims)?;
        if box_size.iter().any(|&l| !(l.is_finite() && l > 0.0)) {
            return Err(GridError::InvalidBoxSize(box_size));
        }

        let engine = TransformEngine::new(dims, threads, provider)?;

        Ok(Self {
            dims,
            box_size,
            layout: Layout::Real,
            data: vec![0.0; padded_count(dims)],
            engine,
        })
    }

    /// Create a grid from samples in real-layout order.
    pub fn from_real(
        dims: [usize; 3],
        box_size: [f64; 3],
        samples: &[f32],
    ) -> Result<Self, GridError> {
        let mut grid = Self::new(dims, box_size)?;
        grid.load(samples)?;
        Ok(grid)
    }

    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[inline]
    pub fn box_size(&self) -> [f64; 3] {
        self.box_size
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    pub fn logical_count(&self) -> usize {
        logical_count(self.dims)
    }

    #[inline]
    pub fn padded_count(&self) -> usize {
        padded_count(self.dims)
    }

    #[inline]
    pub fn complex_count(&self) -> usize {
        complex_count(self.dims)
    }

    /// Number of f32 elements in the underlying allocation.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.engine.threads()
    }

    /// Dimensions the current FFT plans were built for.
    #[inline]
    pub fn plan_dims(&self) -> [usize; 3] {
        self.engine.key().dims
    }

    /// Real-space samples. Fails unless the grid is in real layout.
    pub fn real(&self) -> Result<&[f32], GridError> {
        self.require(Layout::Real)?;
        Ok(&self.data[..self.logical_count()])
    }

    /// Mutable real-space samples. Fails unless the grid is in real layout.
    pub fn real_mut(&mut self) -> Result<&mut [f32], GridError> {
        self.require(Layout::Real)?;
        let n = self.logical_count();
        Ok(&mut self.data[..n])
    }

    /// Overwrite the grid with `samples` in real-layout order.
    pub fn load(&mut self, samples: &[f32]) -> Result<(), GridError> {
        let n = self.logical_count();
        if samples.len() != n {
            return Err(GridError::LengthMismatch {
                expected: n,
                found: samples.len(),
            });
        }
        self.data[..n].copy_from_slice(samples);
        self.layout = Layout::Real;
        Ok(())
    }

    /// Sample at `(i, j, k)`.
    pub fn get(&self, i: usize, j: usize, k: usize) -> Result<f32, GridError> {
        let idx = self.real_offset([i, j, k])?;
        Ok(self.real()?[idx])
    }

    /// Set the sample at `(i, j, k)`.
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f32) -> Result<(), GridError> {
        let idx = self.real_offset([i, j, k])?;
        self.real_mut()?[idx] = value;
        Ok(())
    }

    fn real_offset(&self, index: [usize; 3]) -> Result<usize, GridError> {
        if index.iter().zip(self.dims.iter()).any(|(&n, &dim)| n >= dim) {
            return Err(GridError::IndexOutOfBounds {
                index,
                dims: self.dims,
            });
        }
        Ok(offset(index[0], index[1], index[2], Layout::Real, self.dims))
    }

    /// Sum of all samples, accumulated in f64.
    pub fn sum(&self) -> Result<f64, GridError> {
        let samples = self.real()?;
        Ok(self
            .engine
            .install(|| samples.par_iter().map(|&v| v as f64).sum::<f64>()))
    }

    /// Repurpose the allocation for a grid of `dims`.
    ///
    /// The allocation is not resized, so `dims` must fit in it. FFT plans are
    /// rebuilt whenever the dimensions differ from the ones they were made for.
    /// Sample contents are left as they are and read in real layout.
    pub fn update_properties(&mut self, dims: [usize; 3]) -> Result<(), GridError> {
        validate_dims(dims)?;
        let required = padded_count(dims);
        if required > self.data.len() {
            return Err(GridError::CapacityExceeded {
                required,
                capacity: self.data.len(),
            });
        }

        self.dims = dims;
        self.layout = Layout::Real;
        self.engine.rebuild(dims);
        Ok(())
    }

    /// Reorder samples from real to padded layout in place.
    ///
    /// Every padded offset is at least the matching real offset, so walking from
    /// the last cell to the first never overwrites a sample that is still to be
    /// read.
    pub fn expand_to_padded(&mut self) {
        if self.layout == Layout::Padded {
            return;
        }
        let dims = self.dims;
        for i in (0..dims[0]).rev() {
            for j in (0..dims[1]).rev() {
                for k in (0..dims[2]).rev() {
                    let to = offset(i, j, k, Layout::Padded, dims);
                    let from = offset(i, j, k, Layout::Real, dims);
                    self.data[to] = self.data[from];
                }
            }
        }
        self.layout = Layout::Padded;
    }

    /// Reorder samples from padded to real layout in place, first cell to last.
    pub fn compact_to_real(&mut self) {
        if self.layout == Layout::Real {
            return;
        }
        let dims = self.dims;
        for i in 0..dims[0] {
            for j in 0..dims[1] {
                for k in 0..dims[2] {
                    let to = offset(i, j, k, Layout::Real, dims);
                    let from = offset(i, j, k, Layout::Padded, dims);
                    self.data[to] = self.data[from];
                }
            }
        }
        self.layout = Layout::Real;
    }

    /// Forward transform to k-space.
    ///
    /// Coefficients are divided by the number of logical cells, so that the
    /// unnormalized inverse in [`Spectrum::reverse`] restores the original
    /// amplitudes. The box volume factor is not applied.
    pub fn forward(mut self) -> Spectrum {
        self.expand_to_padded();
        self.engine.forward(&mut self.data);

        let n_complex = self.complex_count();
        let n_logical = self.logical_count() as f32;
        let spectrum: &mut [num_complex::Complex<f32>] =
            bytemuck::cast_slice_mut(&mut self.data[..2 * n_complex]);
        self.engine
            .install(|| spectrum.par_iter_mut().for_each(|c| *c /= n_logical));

        Spectrum::from_grid(self)
    }

    /// Point-decimate to `new_dims`, keeping every `old / new`-th sample on each axis.
    ///
    /// Each new dimension must divide the old one exactly; nothing is modified
    /// otherwise. Plans are rebuilt for the new dimensions.
    pub fn decimate(&mut self, new_dims: [usize; 3]) -> Result<(), GridError> {
        self.require(Layout::Real)?;
        let old = self.dims;
        let every = decimation_strides(old, new_dims)?;

        log::debug!("Subsampling grid {:?} --> {:?}", old, new_dims);

        // Destination offsets run 0, 1, 2, ... and never pass their source.
        for i in 0..new_dims[0] {
            for j in 0..new_dims[1] {
                for k in 0..new_dims[2] {
                    let from = offset(
                        i * every[0],
                        j * every[1],
                        k * every[2],
                        Layout::Real,
                        old,
                    );
                    let to = offset(i, j, k, Layout::Real, new_dims);
                    self.data[to] = self.data[from];
                }
            }
        }

        self.update_properties(new_dims)
    }

    fn require(&self, expected: Layout) -> Result<(), GridError> {
        if self.layout != expected {
            return Err(GridError::WrongLayout {
                expected,
                found: self.layout,
            });
        }
        Ok(())
    }
}

impl Clone for Grid {
    /// Deep copy of the samples with a fresh set of FFT plans.
    fn clone(&self) -> Self {
        Self {
            dims: self.dims,
            box_size: self.box_size,
            layout: self.layout,
            data: self.data.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl std::fmt::Debug for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grid")
            .field("dims", &self.dims)
            .field("box_size", &self.box_size)
            .field("layout", &self.layout)
            .field("capacity", &self.data.len())
            .field("threads", &self.engine.threads())
            .finish()
    }
}

/// Per-axis strides for decimating `old` to `new` dimensions.
///
/// Every new dimension must be non-zero and divide the old one exactly.
pub fn decimation_strides(old: [usize; 3], new: [usize; 3]) -> Result<[usize; 3], GridError> {
    validate_dims(new)?;
    let mut every = [1; 3];
    for axis in 0..3 {
        if new[axis] > old[axis] || old[axis] % new[axis] != 0 {
            return Err(GridError::NonIntegerDecimation {
                axis,
                old: old[axis],
                new: new[axis],
            });
        }
        every[axis] = old[axis] / new[axis];
    }
    Ok(every)
}

fn validate_dims(dims: [usize; 3]) -> Result<(), GridError> {
    if dims.contains(&0) {
        return Err(GridError::InvalidDimensions(dims));
    }
    Ok(())
}
