//! Schema module - Configuration types for regridding runs.

mod config;

pub use config::*;
