//! k-space view of a grid.

use std::f64::consts::PI;

use num_complex::Complex;

use super::Grid;
use super::layout::{Layout, complex_count, offset};

/// A grid after its forward transform.
///
/// Holds the Hermitian half spectrum in the grid's own allocation. The only
/// way back to real samples is [`Spectrum::reverse`].
pub struct Spectrum {
    grid: Grid,
}

impl Spectrum {
    pub(crate) fn from_grid(grid: Grid) -> Self {
        Self { grid }
    }

    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.grid.dims
    }

    #[inline]
    pub fn box_size(&self) -> [f64; 3] {
        self.grid.box_size
    }

    #[inline]
    pub fn complex_count(&self) -> usize {
        complex_count(self.grid.dims)
    }

    /// Half-spectrum coefficients in Hermitian layout.
    pub fn coefficients(&self) -> &[Complex<f32>] {
        let n = 2 * self.complex_count();
        bytemuck::cast_slice(&self.grid.data[..n])
    }

    pub fn coefficients_mut(&mut self) -> &mut [Complex<f32>] {
        let n = 2 * self.complex_count();
        bytemuck::cast_slice_mut(&mut self.grid.data[..n])
    }

    /// Coefficient at `(i, j, k)` with `k <= dims[2] / 2`.
    pub fn get(&self, i: usize, j: usize, k: usize) -> Complex<f32> {
        self.coefficients()[offset(i, j, k, Layout::Hermitian, self.grid.dims)]
    }

    /// Physical wavevector of coefficient `(i, j, k)`.
    ///
    /// Indices past the midpoint of the first two axes fold back to negative
    /// frequencies. The last axis only stores non-negative frequencies.
    pub fn wavevector(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        let delta_k = self.delta_k();
        [
            signed_frequency(i, self.grid.dims[0]) * delta_k[0],
            signed_frequency(j, self.grid.dims[1]) * delta_k[1],
            k as f64 * delta_k[2],
        ]
    }

    /// Fundamental wavenumber `2 pi / L` per axis.
    pub fn delta_k(&self) -> [f64; 3] {
        self.grid.box_size.map(|l| 2.0 * PI / l)
    }

    /// Inverse transform back to real space.
    pub fn reverse(self) -> Grid {
        let mut grid = self.grid;
        grid.engine.inverse(&mut grid.data);
        grid.layout = Layout::Padded;
        grid.compact_to_real();
        grid
    }

    pub(crate) fn parts_mut(&mut self) -> (&super::fft3d::TransformEngine, &mut [Complex<f32>]) {
        let n = 2 * self.complex_count();
        (
            &self.grid.engine,
            bytemuck::cast_slice_mut(&mut self.grid.data[..n]),
        )
    }
}

/// Index `n` on an axis of length `dim` as a signed frequency.
#[inline]
pub(crate) fn signed_frequency(n: usize, dim: usize) -> f64 {
    if n > dim / 2 {
        n as f64 - dim as f64
    } else {
        n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_frequency_folding() {
        let folded: Vec<f64> = (0..8).map(|n| signed_frequency(n, 8)).collect();
        assert_eq!(folded, vec![0.0, 1.0, 2.0, 3.0, 4.0, -3.0, -2.0, -1.0]);
        let folded: Vec<f64> = (0..5).map(|n| signed_frequency(n, 5)).collect();
        assert_eq!(folded, vec![0.0, 1.0, 2.0, -2.0, -1.0]);
    }

    #[test]
    fn test_dc_is_mean() {
        let samples: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let grid = Grid::from_real([4, 4, 4], [2.0; 3], &samples).unwrap();
        let spectrum = grid.forward();
        let dc = spectrum.get(0, 0, 0);
        assert!((dc.re - 31.5).abs() < 1e-4);
        assert!(dc.im.abs() < 1e-4);
        assert_eq!(spectrum.coefficients().len(), 4 * 4 * 3);
    }

    #[test]
    fn test_wavevector() {
        let grid = Grid::new([4, 4, 4], [2.0 * PI, PI, 4.0 * PI]).unwrap();
        let spectrum = grid.forward();
        let k = spectrum.wavevector(3, 1, 2);
        assert!((k[0] + 1.0).abs() < 1e-12);
        assert!((k[1] - 2.0).abs() < 1e-12);
        assert!((k[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zeroing_a_mode_removes_it() {
        let dims = [8, 8, 8];
        let mut grid = Grid::new(dims, [1.0; 3]).unwrap();
        for i in 0..8 {
            for j in 0..8 {
                for k in 0..8 {
                    let phase = 2.0 * PI * (k as f64 * 2.0) / 8.0;
                    grid.set(i, j, k, 1.0 + phase.cos() as f32).unwrap();
                }
            }
        }

        let mut spectrum = grid.forward();
        let idx = offset(0, 0, 2, Layout::Hermitian, dims);
        spectrum.coefficients_mut()[idx] = Complex::new(0.0, 0.0);

        let grid = spectrum.reverse();
        for &v in grid.real().unwrap() {
            assert!((v - 1.0).abs() < 1e-5, "{}", v);
        }
    }

    #[test]
    fn test_plane_wave_lands_in_one_coefficient() {
        let dims = [8, 8, 8];
        let mut grid = Grid::new(dims, [1.0; 3]).unwrap();
        for i in 0..8 {
            for j in 0..8 {
                for k in 0..8 {
                    let phase = 2.0 * PI * (k as f64 * 2.0) / 8.0;
                    grid.set(i, j, k, phase.cos() as f32).unwrap();
                }
            }
        }

        let spectrum = grid.forward();
        for i in 0..8 {
            for j in 0..8 {
                for k in 0..=4 {
                    let c = spectrum.get(i, j, k);
                    let expected = if (i, j, k) == (0, 0, 2) { 0.5 } else { 0.0 };
                    assert!((c.re - expected).abs() < 1e-5, "({},{},{}): {}", i, j, k, c);
                    assert!(c.im.abs() < 1e-5);
                }
            }
        }
    }
}
