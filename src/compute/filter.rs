//! Spherically symmetric low-pass filters applied in k-space.
//!
//! Each filter is a plain function of `kR`, the wavenumber magnitude times the
//! filter scale, returning the factor a coefficient is multiplied by. The
//! function is picked once per [`Spectrum::apply_filter`] call.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::spectrum::signed_frequency;
use super::{Grid, GridError, Spectrum};

/// Below this `kR` the real-space top-hat leaves coefficients untouched.
pub const REAL_TOP_HAT_MIN_KR: f64 = 1e-4;

/// Scales `kR` so the k-space top-hat encloses the same real-space volume as
/// the real-space top-hat: `(9 pi / 2)^(-1/3)`.
pub const K_TOP_HAT_SCALE: f64 = 0.413566994;

/// Scales `kR` so the Gaussian encloses the same volume as the real-space top-hat.
pub const GAUSSIAN_SCALE: f64 = 0.643;

/// Response of a filter as a function of `kR`.
pub type KernelFn = fn(f64) -> f64;

/// Available smoothing filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterType {
    /// Fourier transform of a uniform ball of radius R.
    #[default]
    RealTopHat,
    /// Sharp cut-off in k-space.
    KTopHat,
    Gaussian,
}

impl FilterType {
    pub const ALL: [FilterType; 3] = [
        FilterType::RealTopHat,
        FilterType::KTopHat,
        FilterType::Gaussian,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FilterType::RealTopHat => "real-top-hat",
            FilterType::KTopHat => "k-top-hat",
            FilterType::Gaussian => "gaussian",
        }
    }

    pub fn kernel(self) -> KernelFn {
        match self {
            FilterType::RealTopHat => real_top_hat,
            FilterType::KTopHat => k_top_hat,
            FilterType::Gaussian => gaussian,
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterType {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterType::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| unknown_filter(s.to_string()))
    }
}

impl TryFrom<i32> for FilterType {
    type Error = GridError;

    fn try_from(tag: i32) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(FilterType::RealTopHat),
            1 => Ok(FilterType::KTopHat),
            2 => Ok(FilterType::Gaussian),
            _ => Err(unknown_filter(tag.to_string())),
        }
    }
}

fn unknown_filter(name: String) -> GridError {
    log::error!("Filter type {} is undefined", name);
    GridError::UnknownFilter(name)
}

/// Real-space top-hat: `3 (sin kR - kR cos kR) / kR^3`.
#[inline]
pub fn real_top_hat(kr: f64) -> f64 {
    if kr > REAL_TOP_HAT_MIN_KR {
        3.0 * (kr.sin() / kr.powi(3) - kr.cos() / kr.powi(2))
    } else {
        1.0
    }
}

/// k-space top-hat: zero above the volume-matched cut-off, untouched below.
#[inline]
pub fn k_top_hat(kr: f64) -> f64 {
    if kr * K_TOP_HAT_SCALE > 1.0 { 0.0 } else { 1.0 }
}

/// Gaussian: `exp(-(0.643 kR)^2 / 2)`.
#[inline]
pub fn gaussian(kr: f64) -> f64 {
    let kr = kr * GAUSSIAN_SCALE;
    (-kr * kr / 2.0).exp()
}

impl Spectrum {
    /// Multiply every coefficient by `filter` evaluated at `|k| * radius`.
    pub fn apply_filter(&mut self, filter: FilterType, radius: f64) {
        self.apply_kernel(filter.kernel(), radius);
    }

    /// Multiply every coefficient by `kernel(|k| * radius)`.
    ///
    /// Rows of the last axis are independent and processed in parallel.
    pub fn apply_kernel(&mut self, kernel: KernelFn, radius: f64) {
        let dims = self.dims();
        let delta_k = self.delta_k();
        let (engine, coefficients) = self.parts_mut();

        engine.install(|| {
            coefficients
                .par_chunks_mut(dims[2] / 2 + 1)
                .enumerate()
                .for_each(|(row, line)| {
                    let k_x = signed_frequency(row / dims[1], dims[0]) * delta_k[0];
                    let k_y = signed_frequency(row % dims[1], dims[1]) * delta_k[1];

                    for (n_z, c) in line.iter_mut().enumerate() {
                        let k_z = n_z as f64 * delta_k[2];
                        let k_mag = (k_x * k_x + k_y * k_y + k_z * k_z).sqrt();
                        let w = kernel(k_mag * radius);
                        if w != 1.0 {
                            *c *= w as f32;
                        }
                    }
                });
        });
    }
}

impl Grid {
    /// Smooth the grid with `filter` at scale `radius`: forward transform,
    /// per-coefficient multiply, inverse transform.
    pub fn filter(self, filter: FilterType, radius: f64) -> Grid {
        log::info!("Filtering grid ({}, R = {})", filter, radius);
        log::debug!("doing forward fft");
        let mut spectrum = self.forward();
        log::debug!("applying convolution");
        spectrum.apply_filter(filter, radius);
        log::debug!("doing inverse fft");
        spectrum.reverse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(dims: [usize; 3], at: [usize; 3], value: f32) -> Grid {
        let mut grid = Grid::new(dims, [10.0; 3]).unwrap();
        grid.set(at[0], at[1], at[2], value).unwrap();
        grid
    }

    #[test]
    fn test_kernel_limits() {
        assert_eq!(real_top_hat(0.0), 1.0);
        assert_eq!(real_top_hat(REAL_TOP_HAT_MIN_KR), 1.0);
        assert!((real_top_hat(1e-2) - 1.0).abs() < 1e-4);
        // First zero of the top-hat window: tan x = x near 4.4934
        assert!(real_top_hat(4.493409).abs() < 1e-5);

        assert_eq!(k_top_hat(1.0 / K_TOP_HAT_SCALE - 1e-9), 1.0);
        assert_eq!(k_top_hat(1.0 / K_TOP_HAT_SCALE + 1e-9), 0.0);

        assert_eq!(gaussian(0.0), 1.0);
        let kr = 1.0 / GAUSSIAN_SCALE;
        assert!((gaussian(kr) - (-0.5f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_filter_names() {
        for filter in FilterType::ALL {
            assert_eq!(filter.name().parse::<FilterType>().unwrap(), filter);
        }
        assert_eq!(FilterType::try_from(1).unwrap(), FilterType::KTopHat);
        assert!(matches!(
            "boxcar".parse::<FilterType>(),
            Err(GridError::UnknownFilter(name)) if name == "boxcar"
        ));
        assert!(FilterType::try_from(3).is_err());
        assert_eq!(
            serde_json::to_string(&FilterType::RealTopHat).unwrap(),
            "\"real-top-hat\""
        );
    }

    #[test]
    fn test_real_top_hat_impulse() {
        let grid = impulse([8, 8, 8], [4, 4, 4], 10.0);
        let grid = grid.filter(FilterType::RealTopHat, 2.0);

        let peak = grid.get(4, 4, 4).unwrap();
        assert!(peak < 10.0, "Peak should drop, got {}", peak);
        assert!(peak > 0.0);

        let total = grid.sum().unwrap();
        assert!((total - 10.0).abs() < 0.5, "Sum not conserved: {}", total);

        let far = grid.get(0, 0, 0).unwrap();
        assert!(far != 0.0, "Smoothing should reach the far corner");
        assert!(far.abs() < peak, "Far cell {} vs peak {}", far, peak);
    }

    #[test]
    fn test_tiny_radius_is_identity() {
        let dims = [6, 6, 6];
        let samples: Vec<f32> = (0..216).map(|i| ((i * 37) % 17) as f32).collect();
        let grid = Grid::from_real(dims, [10.0; 3], &samples).unwrap();

        let grid = grid.filter(FilterType::RealTopHat, 1e-9);
        for (orig, rec) in samples.iter().zip(grid.real().unwrap()) {
            assert!((orig - rec).abs() < 1e-4 * 17.0, "{} vs {}", orig, rec);
        }
    }

    #[test]
    fn test_k_top_hat_zeroes_high_modes() {
        let dims = [8, 8, 8];
        let samples: Vec<f32> = (0..512).map(|i| ((i * 13) % 7) as f32 - 3.0).collect();
        let grid = Grid::from_real(dims, [10.0; 3], &samples).unwrap();
        let radius = 3.0;

        let mut spectrum = grid.forward();
        spectrum.apply_filter(FilterType::KTopHat, radius);

        let mut zeroed = 0;
        let mut kept = 0;
        for i in 0..8 {
            for j in 0..8 {
                for k in 0..=4 {
                    let [kx, ky, kz] = spectrum.wavevector(i, j, k);
                    let k_mag = (kx * kx + ky * ky + kz * kz).sqrt();
                    if k_mag * radius * K_TOP_HAT_SCALE > 1.0 {
                        let c = spectrum.get(i, j, k);
                        assert_eq!(c.re, 0.0);
                        assert_eq!(c.im, 0.0);
                        zeroed += 1;
                    } else {
                        kept += 1;
                    }
                }
            }
        }
        assert!(zeroed > 0 && kept > 0);
    }

    #[test]
    fn test_gaussian_smooths_and_conserves() {
        let grid = impulse([8, 8, 8], [2, 2, 2], 4.0);
        let grid = grid.filter(FilterType::Gaussian, 1.5);

        let peak = grid.get(2, 2, 2).unwrap();
        assert!(peak < 4.0 && peak > 0.0);
        assert!(grid.get(3, 2, 2).unwrap() > 0.0);
        assert!((grid.sum().unwrap() - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_uniform_field_survives_filter_and_decimate() {
        let grid = Grid::from_real([8, 8, 8], [10.0; 3], &[3.0; 512]).unwrap();

        for filter in FilterType::ALL {
            let mut grid = grid.clone().filter(filter, 10.0 / 4.0 * 0.5);
            grid.decimate([4, 4, 4]).unwrap();
            assert_eq!(grid.logical_count(), 64);
            for &v in grid.real().unwrap() {
                assert!((v - 3.0).abs() < 1e-4, "{}: {}", filter, v);
            }
        }
    }
}
