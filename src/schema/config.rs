//! Configuration types for a regridding run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compute::FilterType;

fn default_radius_factor() -> f64 {
    0.5
}

/// Parameters shared by every archive format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegridConfig {
    /// Target cells per axis (output grids are cubic).
    pub new_dim: usize,
    /// Smoothing filter applied before decimation.
    #[serde(default)]
    pub filter: FilterType,
    /// Filter scale in units of the new cell width.
    #[serde(default = "default_radius_factor")]
    pub radius_factor: f64,
    /// Worker threads for transforms and filtering. None uses every hardware thread.
    #[serde(default)]
    pub threads: Option<usize>,
}

impl Default for RegridConfig {
    fn default() -> Self {
        Self {
            new_dim: 128,
            filter: FilterType::RealTopHat,
            radius_factor: default_radius_factor(),
            threads: None,
        }
    }
}

impl RegridConfig {
    /// Target dimensions as a cubic shape.
    #[inline]
    pub fn new_dims(&self) -> [usize; 3] {
        [self.new_dim; 3]
    }

    /// Filter scale for a box of side `box_size`: `radius_factor` new cell widths.
    #[inline]
    pub fn radius(&self, box_size: f64) -> f64 {
        box_size / self.new_dim as f64 * self.radius_factor
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.new_dim == 0 || i32::try_from(self.new_dim).is_err() {
            return Err(ConfigError::InvalidDimension(self.new_dim));
        }
        if !(self.radius_factor.is_finite() && self.radius_factor >= 0.0) {
            return Err(ConfigError::InvalidRadiusFactor(self.radius_factor));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::InvalidThreads);
        }
        Ok(())
    }
}

/// The archive a run reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    GbpTrees(PathBuf),
    Velociraptor(PathBuf),
}

impl InputSource {
    /// Pick the input from the two mutually exclusive selectors.
    pub fn select(
        gbptrees: Option<PathBuf>,
        velociraptor: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        match (gbptrees, velociraptor) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingInputs),
            (Some(path), None) => Ok(InputSource::GbpTrees(path)),
            (None, Some(path)) => Ok(InputSource::Velociraptor(path)),
            (None, None) => Err(ConfigError::MissingInput),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Grid dimension must be a positive 32-bit integer, got {0}")]
    InvalidDimension(usize),
    #[error("Radius factor must be finite and non-negative, got {0}")]
    InvalidRadiusFactor(f64),
    #[error("Thread count must be non-zero")]
    InvalidThreads,
    #[error("Must specify either gbpTrees or VELOCIraptor file. Not both...")]
    ConflictingInputs,
    #[error("Must specify a gbpTrees or VELOCIraptor input file")]
    MissingInput,
    #[error("Must specify new grid dimension...")]
    MissingDimension,
    #[error("Must specify an output file")]
    MissingOutput,
    #[error("VELOCIraptor support requires building with the `hdf5` feature")]
    Hdf5Disabled,
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RegridConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.new_dims(), [128, 128, 128]);
    }

    #[test]
    fn test_radius_is_half_new_cell() {
        let config = RegridConfig {
            new_dim: 64,
            ..Default::default()
        };
        assert!((config.radius(100.0) - 100.0 / 64.0 * 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects() {
        let bad_dim = RegridConfig {
            new_dim: 0,
            ..Default::default()
        };
        assert!(matches!(
            bad_dim.validate(),
            Err(ConfigError::InvalidDimension(0))
        ));

        let bad_radius = RegridConfig {
            radius_factor: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            bad_radius.validate(),
            Err(ConfigError::InvalidRadiusFactor(_))
        ));

        let bad_threads = RegridConfig {
            threads: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            bad_threads.validate(),
            Err(ConfigError::InvalidThreads)
        ));
    }

    #[test]
    fn test_input_selection() {
        let g = Some(PathBuf::from("grids.dat"));
        let v = Some(PathBuf::from("grids.hdf5"));
        assert_eq!(
            InputSource::select(g.clone(), None).unwrap(),
            InputSource::GbpTrees(PathBuf::from("grids.dat"))
        );
        assert_eq!(
            InputSource::select(None, v.clone()).unwrap(),
            InputSource::Velociraptor(PathBuf::from("grids.hdf5"))
        );
        assert!(matches!(
            InputSource::select(g, v),
            Err(ConfigError::ConflictingInputs)
        ));
        assert!(matches!(
            InputSource::select(None, None),
            Err(ConfigError::MissingInput)
        ));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regrid.json");
        fs::write(&path, r#"{"new_dim": 8, "filter": "gaussian", "radius_factor": 1.0}"#).unwrap();

        let config = RegridConfig::from_json_file(&path).unwrap();
        assert_eq!(config.new_dim, 8);
        assert_eq!(config.filter, FilterType::Gaussian);

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            RegridConfig::from_json_file(&path),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            RegridConfig::from_json_file(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_json_defaults() {
        let config: RegridConfig = serde_json::from_str(r#"{"new_dim": 32}"#).unwrap();
        assert_eq!(config.new_dim, 32);
        assert_eq!(config.filter, FilterType::RealTopHat);
        assert_eq!(config.radius_factor, 0.5);
        assert_eq!(config.threads, None);

        let config: RegridConfig =
            serde_json::from_str(r#"{"new_dim": 16, "filter": "k-top-hat", "threads": 4}"#)
                .unwrap();
        assert_eq!(config.filter, FilterType::KTopHat);
        assert_eq!(config.threads, Some(4));
    }
}
