//! In-place 3D real-to-complex transforms over a padded grid buffer.
//!
//! Uses rustfft for the 1D transforms and realfft for the last axis. The 3D
//! transform is performed via separable 1D FFTs: a real-to-complex pass along
//! the last (contiguous) axis that writes the half spectrum over the padded row
//! it was read from, then complex passes along the two outer axes.
//!
//! Neither direction normalizes; scaling is left to the caller.

use std::sync::Arc;

use num_complex::Complex;
use rayon::prelude::*;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{Fft, FftDirection, FftPlanner};

use super::layout::{Layout, padded_count};
use super::GridError;

/// Identifies the grid shape and thread count a set of plans was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanKey {
    pub dims: [usize; 3],
    pub threads: usize,
}

/// 1D plans: complex plans for axes 0 and 1, real plans for the last axis.
#[derive(Clone)]
pub struct AxisPlans {
    pub forward: [Arc<dyn Fft<f32>>; 2],
    pub inverse: [Arc<dyn Fft<f32>>; 2],
    pub r2c: Arc<dyn RealToComplex<f32>>,
    pub c2r: Arc<dyn ComplexToReal<f32>>,
}

/// Source of FFT plans.
///
/// Swap this out to cache or precompute plans; the engine only asks for a fresh
/// set whenever its [`PlanKey`] changes.
pub trait PlanProvider: Send + Sync {
    fn build(&self, key: &PlanKey) -> AxisPlans;
}

/// Default provider backed by a fresh [`FftPlanner`] and [`RealFftPlanner`] per build.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlannerProvider;

impl PlanProvider for PlannerProvider {
    fn build(&self, key: &PlanKey) -> AxisPlans {
        let mut planner = FftPlanner::new();
        let mut real_planner = RealFftPlanner::<f32>::new();
        let [n0, n1, n2] = key.dims;
        AxisPlans {
            forward: [
                planner.plan_fft(n0, FftDirection::Forward),
                planner.plan_fft(n1, FftDirection::Forward),
            ],
            inverse: [
                planner.plan_fft(n0, FftDirection::Inverse),
                planner.plan_fft(n1, FftDirection::Inverse),
            ],
            r2c: real_planner.plan_fft_forward(n2),
            c2r: real_planner.plan_fft_inverse(n2),
        }
    }
}

/// Number of hardware threads, falling back to 1 if unknown.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Executes forward/inverse transforms for one grid.
///
/// Plans are bound to the dimensions in [`TransformEngine::key`]; call
/// [`TransformEngine::rebuild`] whenever those change.
pub struct TransformEngine {
    key: PlanKey,
    plans: AxisPlans,
    pool: Arc<rayon::ThreadPool>,
    provider: Arc<dyn PlanProvider>,
}

impl TransformEngine {
    /// Create an engine for `dims` running on `threads` workers (default: all hardware threads).
    pub fn new(
        dims: [usize; 3],
        threads: Option<usize>,
        provider: Arc<dyn PlanProvider>,
    ) -> Result<Self, GridError> {
        let threads = threads.unwrap_or_else(default_threads).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?;
        let key = PlanKey { dims, threads };
        let plans = provider.build(&key);

        Ok(Self {
            key,
            plans,
            pool: Arc::new(pool),
            provider,
        })
    }

    #[inline]
    pub fn key(&self) -> PlanKey {
        self.key
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.key.threads
    }

    /// Rebind plans to `dims`. Returns true if new plans were built.
    pub fn rebuild(&mut self, dims: [usize; 3]) -> bool {
        let key = PlanKey {
            dims,
            threads: self.key.threads,
        };
        if key == self.key {
            return false;
        }
        log::debug!("Rebuilding FFT plans for {:?} ({} threads)", dims, key.threads);
        self.plans = self.provider.build(&key);
        self.key = key;
        true
    }

    /// Run `op` inside this engine's thread pool.
    #[inline]
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }

    /// Forward transform of a buffer in padded layout.
    ///
    /// On return the first `complex_count` complex pairs of `buffer` hold the
    /// Hermitian half spectrum.
    pub fn forward(&self, buffer: &mut [f32]) {
        let dims = self.key.dims;
        let [_, _, n2] = dims;
        let half = Layout::Hermitian.row_stride(n2);
        let data = &mut buffer[..padded_count(dims)];
        let r2c = &self.plans.r2c;

        self.pool.install(|| {
            data.par_chunks_mut(Layout::Padded.row_stride(n2)).for_each_init(
                || (r2c.make_input_vec(), r2c.make_output_vec(), r2c.make_scratch_vec()),
                |(input, output, scratch), row| {
                    input.copy_from_slice(&row[..n2]);
                    // Buffers come from the plan, so lengths always match.
                    if let Err(e) = r2c.process_with_scratch(input, output, scratch) {
                        log::warn!("real-to-complex row transform: {}", e);
                    }
                    let out: &mut [Complex<f32>] = bytemuck::cast_slice_mut(row);
                    out.copy_from_slice(&output[..half]);
                },
            );

            let spectrum: &mut [Complex<f32>] = bytemuck::cast_slice_mut(data);
            transform_middle_axis(spectrum, dims, &self.plans.forward[1]);
            transform_outer_axis(spectrum, dims, &self.plans.forward[0]);
        });
    }

    /// Inverse transform of a half spectrum, leaving real samples in padded layout.
    pub fn inverse(&self, buffer: &mut [f32]) {
        let dims = self.key.dims;
        let [_, _, n2] = dims;
        let half = Layout::Hermitian.row_stride(n2);
        let data = &mut buffer[..padded_count(dims)];
        let c2r = &self.plans.c2r;

        self.pool.install(|| {
            {
                let spectrum: &mut [Complex<f32>] = bytemuck::cast_slice_mut(&mut *data);
                transform_outer_axis(spectrum, dims, &self.plans.inverse[0]);
                transform_middle_axis(spectrum, dims, &self.plans.inverse[1]);
            }

            data.par_chunks_mut(Layout::Padded.row_stride(n2)).for_each_init(
                || (c2r.make_input_vec(), c2r.make_output_vec(), c2r.make_scratch_vec()),
                |(input, output, scratch), row| {
                    {
                        let coeffs: &[Complex<f32>] = bytemuck::cast_slice(&*row);
                        input.copy_from_slice(&coeffs[..half]);
                    }
                    // DC and Nyquist bins of a real row carry no imaginary part.
                    input[0].im = 0.0;
                    if n2 % 2 == 0 {
                        input[half - 1].im = 0.0;
                    }
                    if let Err(e) = c2r.process_with_scratch(input, output, scratch) {
                        log::warn!("complex-to-real row transform: {}", e);
                    }
                    row[..n2].copy_from_slice(output);
                },
            );
        });
    }
}

impl Clone for TransformEngine {
    /// Shares the thread pool but builds independent plans.
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            plans: self.provider.build(&self.key),
            pool: Arc::clone(&self.pool),
            provider: Arc::clone(&self.provider),
        }
    }
}

fn line_buffers(len: usize, fft: &Arc<dyn Fft<f32>>) -> (Vec<Complex<f32>>, Vec<Complex<f32>>) {
    (
        vec![Complex::new(0.0, 0.0); len],
        vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()],
    )
}

/// Transform along axis 1 of a half spectrum, one `i` slab per task.
fn transform_middle_axis(spectrum: &mut [Complex<f32>], dims: [usize; 3], fft: &Arc<dyn Fft<f32>>) {
    let [_, n1, n2] = dims;
    let half = Layout::Hermitian.row_stride(n2);

    spectrum
        .par_chunks_mut(n1 * half)
        .for_each_init(
            || line_buffers(n1, fft),
            |(line, scratch), slab| {
                for k in 0..half {
                    for j in 0..n1 {
                        line[j] = slab[j * half + k];
                    }
                    fft.process_with_scratch(line, scratch);
                    for j in 0..n1 {
                        slab[j * half + k] = line[j];
                    }
                }
            },
        );
}

/// Transform along axis 0 of a half spectrum.
///
/// Columns are gathered one `j` row at a time into a block buffer so the
/// scratch space stays at `n0 * half` elements.
fn transform_outer_axis(spectrum: &mut [Complex<f32>], dims: [usize; 3], fft: &Arc<dyn Fft<f32>>) {
    let [n0, n1, n2] = dims;
    let half = Layout::Hermitian.row_stride(n2);
    let plane = n1 * half;
    let mut block = vec![Complex::new(0.0, 0.0); half * n0];

    for j in 0..n1 {
        let base = j * half;
        {
            let source = &*spectrum;
            block.par_chunks_mut(n0).enumerate().for_each_init(
                || vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()],
                |scratch, (k, column)| {
                    for (i, c) in column.iter_mut().enumerate() {
                        *c = source[i * plane + base + k];
                    }
                    fft.process_with_scratch(column, scratch);
                },
            );
        }

        spectrum
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(i, slab)| {
                for k in 0..half {
                    slab[base + k] = block[k * n0 + i];
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::layout::offset;

    fn engine(dims: [usize; 3]) -> TransformEngine {
        TransformEngine::new(dims, Some(2), Arc::new(PlannerProvider)).unwrap()
    }

    /// Naive 3D DFT of a real-layout grid at one wavevector.
    fn dft(samples: &[f32], dims: [usize; 3], m: [usize; 3]) -> Complex<f64> {
        let mut acc = Complex::new(0.0, 0.0);
        for i in 0..dims[0] {
            for j in 0..dims[1] {
                for k in 0..dims[2] {
                    let phase = -2.0
                        * std::f64::consts::PI
                        * ((m[0] * i) as f64 / dims[0] as f64
                            + (m[1] * j) as f64 / dims[1] as f64
                            + (m[2] * k) as f64 / dims[2] as f64);
                    let x = samples[offset(i, j, k, Layout::Real, dims)] as f64;
                    acc += Complex::new(phase.cos(), phase.sin()) * x;
                }
            }
        }
        acc
    }

    fn padded_from_real(samples: &[f32], dims: [usize; 3]) -> Vec<f32> {
        let mut buffer = vec![0.0f32; padded_count(dims)];
        for i in 0..dims[0] {
            for j in 0..dims[1] {
                for k in 0..dims[2] {
                    buffer[offset(i, j, k, Layout::Padded, dims)] =
                        samples[offset(i, j, k, Layout::Real, dims)];
                }
            }
        }
        buffer
    }

    #[test]
    fn test_forward_matches_naive_dft() {
        // Odd and even last axes take different real-transform paths.
        for dims in [[3, 4, 5], [2, 3, 6]] {
            let n: usize = dims.iter().product();
            let samples: Vec<f32> = (0..n).map(|i| ((i * 7) % 11) as f32 - 5.0).collect();
            let mut buffer = padded_from_real(&samples, dims);

            engine(dims).forward(&mut buffer);
            let spectrum: &[Complex<f32>] = bytemuck::cast_slice(&buffer);

            for i in 0..dims[0] {
                for j in 0..dims[1] {
                    for k in 0..=dims[2] / 2 {
                        let expected = dft(&samples, dims, [i, j, k]);
                        let got = spectrum[offset(i, j, k, Layout::Hermitian, dims)];
                        assert!(
                            (got.re as f64 - expected.re).abs() < 1e-2
                                && (got.im as f64 - expected.im).abs() < 1e-2,
                            "{:?} ({}, {}, {}): {} vs {}",
                            dims,
                            i,
                            j,
                            k,
                            got,
                            expected
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_inverse_is_unnormalized() {
        let dims = [4, 4, 4];
        let samples: Vec<f32> = (0..64).map(|i| (i % 10) as f32).collect();
        let mut buffer = padded_from_real(&samples, dims);

        let engine = engine(dims);
        engine.forward(&mut buffer);
        engine.inverse(&mut buffer);

        let n = 64.0f32;
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    let orig = samples[offset(i, j, k, Layout::Real, dims)];
                    let rec = buffer[offset(i, j, k, Layout::Padded, dims)] / n;
                    assert!((orig - rec).abs() < 1e-4, "Mismatch: {} vs {}", orig, rec);
                }
            }
        }
    }

    #[test]
    fn test_rebuild_only_on_change() {
        let mut engine = engine([4, 4, 4]);
        assert!(!engine.rebuild([4, 4, 4]));
        assert!(engine.rebuild([2, 2, 2]));
        assert_eq!(engine.key().dims, [2, 2, 2]);
        assert_eq!(engine.plans.forward[0].len(), 2);
        assert_eq!(engine.plans.r2c.len(), 2);
        assert_eq!(engine.plans.c2r.len(), 2);
        assert_eq!(engine.threads(), 2);
    }

    #[test]
    fn test_clone_builds_new_plans() {
        let engine = engine([4, 4, 4]);
        let copy = engine.clone();
        assert_eq!(copy.key(), engine.key());
        assert!(!Arc::ptr_eq(&copy.plans.forward[0], &engine.plans.forward[0]));
    }
}
