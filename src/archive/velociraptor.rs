//! VELOCIraptor grid files.
//!
//! Layout of the hierarchical container:
//!
//! ```text
//! /Parameters        attribute "DensityGrids:grid_dim" (text holding an integer)
//!                    attribute "Snapshots:grid_dim"
//! /Header            attribute "BoxSize" (3 x f64)
//! /PartType1/Grids   datasets Vx, Vy, Vz, Density (n_cell^3 x f32 each)
//! ```

use std::collections::HashMap;

use super::{ArchiveError, smooth_and_decimate};
use crate::compute::{Grid, decimation_strides};
use crate::schema::RegridConfig;

pub const PARAMETERS_GROUP: &str = "/Parameters";
pub const HEADER_GROUP: &str = "/Header";
pub const GRIDS_GROUP: &str = "/PartType1/Grids";

pub const GRID_DIM_ATTR: &str = "DensityGrids:grid_dim";
pub const SNAPSHOT_GRID_DIM_ATTR: &str = "Snapshots:grid_dim";
pub const BOX_SIZE_ATTR: &str = "BoxSize";

/// Datasets regridded, in processing order.
pub const GRID_DATASETS: [&str; 4] = ["Vx", "Vy", "Vz", "Density"];

/// Access to a hierarchical container of attributes and f32 datasets.
///
/// Groups and objects are addressed by absolute group path plus name.
pub trait GridStore {
    /// Attribute rendered as text (numeric attributes are formatted).
    fn read_text_attr(&self, group: &str, name: &str) -> Result<String, ArchiveError>;

    /// Attribute holding a list of f64 values.
    fn read_f64_attr(&self, group: &str, name: &str) -> Result<Vec<f64>, ArchiveError>;

    /// Shape of a dataset.
    fn dataset_shape(&self, group: &str, name: &str) -> Result<Vec<usize>, ArchiveError>;

    /// Read a whole dataset into `out`, whose length must match the dataset.
    fn read_dataset(&self, group: &str, name: &str, out: &mut [f32]) -> Result<(), ArchiveError>;

    /// Create or replace a dataset.
    fn write_dataset(
        &mut self,
        group: &str,
        name: &str,
        shape: [usize; 3],
        data: &[f32],
    ) -> Result<(), ArchiveError>;

    /// Create or replace an integer attribute.
    fn write_int_attr(&mut self, group: &str, name: &str, value: i64) -> Result<(), ArchiveError>;
}

/// Parse a grid dimension stored as text, ignoring whitespace and NUL padding.
pub fn parse_grid_dim(text: &str) -> Result<usize, ArchiveError> {
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    match trimmed.parse::<usize>() {
        Ok(dim) if dim > 0 => Ok(dim),
        _ => Err(ArchiveError::InvalidHeader(format!(
            "{} = {:?}",
            GRID_DIM_ATTR, text
        ))),
    }
}

/// Shape and extent of the grids held by a VELOCIraptor source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceGrids {
    pub n_cell: [usize; 3],
    pub box_size: [f64; 3],
}

/// Check that `src` holds every grid dataset and that they can be decimated
/// to the configured dimensions. Reads only metadata.
pub fn inspect_velociraptor<S>(src: &S, config: &RegridConfig) -> Result<SourceGrids, ArchiveError>
where
    S: GridStore + ?Sized,
{
    let dim = parse_grid_dim(&src.read_text_attr(PARAMETERS_GROUP, GRID_DIM_ATTR)?)?;
    let box_size = read_box_size(src)?;
    let n_cell = [dim; 3];
    decimation_strides(n_cell, config.new_dims())?;

    for name in GRID_DATASETS {
        let shape = src.dataset_shape(GRIDS_GROUP, name)?;
        if shape != n_cell {
            return Err(ArchiveError::InvalidHeader(format!(
                "dataset {} has shape {:?}, expected {:?}",
                name, shape, n_cell
            )));
        }
    }

    Ok(SourceGrids { n_cell, box_size })
}

/// Regrid the velocity and density grids of `src` into `dst`.
///
/// Every dataset is checked with [`inspect_velociraptor`] before anything is
/// written to `dst`.
pub fn regrid_velociraptor<S, D>(
    src: &S,
    dst: &mut D,
    config: &RegridConfig,
) -> Result<(), ArchiveError>
where
    S: GridStore + ?Sized,
    D: GridStore + ?Sized,
{
    let SourceGrids { n_cell, box_size } = inspect_velociraptor(src, config)?;
    let new_dims = config.new_dims();

    log::info!("n_cell = {:?} --> {:?}", n_cell, new_dims);
    log::info!("box_size = {:.2?}", box_size);

    let mut grid = Grid::with_threads(n_cell, box_size, config.threads)?;

    for name in GRID_DATASETS {
        // The grid may have been decimated by the previous dataset.
        grid.update_properties(n_cell)?;

        log::info!("Reading grid {}", name);
        src.read_dataset(GRIDS_GROUP, name, grid.real_mut()?)?;

        grid = smooth_and_decimate(grid, config)?;

        log::info!("Writing subsampled grid {}", name);
        dst.write_dataset(GRIDS_GROUP, name, new_dims, grid.real()?)?;
    }

    let new_dim = config.new_dim as i64;
    dst.write_int_attr(PARAMETERS_GROUP, GRID_DIM_ATTR, new_dim)?;
    dst.write_int_attr(PARAMETERS_GROUP, SNAPSHOT_GRID_DIM_ATTR, new_dim)?;
    Ok(())
}

fn read_box_size<S: GridStore + ?Sized>(src: &S) -> Result<[f64; 3], ArchiveError> {
    let values = src.read_f64_attr(HEADER_GROUP, BOX_SIZE_ATTR)?;
    match values[..] {
        [l] => Ok([l; 3]),
        [x, y, z] => Ok([x, y, z]),
        _ => Err(ArchiveError::InvalidHeader(format!(
            "{} = {:?}",
            BOX_SIZE_ATTR, values
        ))),
    }
}

/// Attribute value held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Int(i64),
    Floats(Vec<f64>),
}

/// In-memory [`GridStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    attrs: HashMap<(String, String), AttrValue>,
    datasets: HashMap<(String, String), (Vec<usize>, Vec<f32>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_attr(&mut self, group: &str, name: &str, value: AttrValue) {
        self.attrs.insert(key(group, name), value);
    }

    pub fn attr(&self, group: &str, name: &str) -> Option<&AttrValue> {
        self.attrs.get(&key(group, name))
    }

    pub fn set_dataset(&mut self, group: &str, name: &str, shape: Vec<usize>, data: Vec<f32>) {
        self.datasets.insert(key(group, name), (shape, data));
    }

    pub fn dataset(&self, group: &str, name: &str) -> Option<(&[usize], &[f32])> {
        self.datasets
            .get(&key(group, name))
            .map(|(shape, data)| (shape.as_slice(), data.as_slice()))
    }

    fn get_attr(&self, group: &str, name: &str) -> Result<&AttrValue, ArchiveError> {
        self.attr(group, name)
            .ok_or_else(|| ArchiveError::NotFound(format!("{}/{}", group, name)))
    }

    fn get_dataset(&self, group: &str, name: &str) -> Result<&(Vec<usize>, Vec<f32>), ArchiveError> {
        self.datasets
            .get(&key(group, name))
            .ok_or_else(|| ArchiveError::NotFound(format!("{}/{}", group, name)))
    }
}

fn key(group: &str, name: &str) -> (String, String) {
    (group.to_string(), name.to_string())
}

impl GridStore for MemoryStore {
    fn read_text_attr(&self, group: &str, name: &str) -> Result<String, ArchiveError> {
        Ok(match self.get_attr(group, name)? {
            AttrValue::Text(s) => s.clone(),
            AttrValue::Int(v) => v.to_string(),
            AttrValue::Floats(v) => v
                .iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        })
    }

    fn read_f64_attr(&self, group: &str, name: &str) -> Result<Vec<f64>, ArchiveError> {
        match self.get_attr(group, name)? {
            AttrValue::Floats(v) => Ok(v.clone()),
            AttrValue::Int(v) => Ok(vec![*v as f64]),
            AttrValue::Text(s) => Err(ArchiveError::InvalidHeader(format!(
                "{}/{} holds text {:?}",
                group, name, s
            ))),
        }
    }

    fn dataset_shape(&self, group: &str, name: &str) -> Result<Vec<usize>, ArchiveError> {
        Ok(self.get_dataset(group, name)?.0.clone())
    }

    fn read_dataset(&self, group: &str, name: &str, out: &mut [f32]) -> Result<(), ArchiveError> {
        let (_, data) = self.get_dataset(group, name)?;
        if data.len() != out.len() {
            return Err(ArchiveError::InvalidHeader(format!(
                "dataset {} holds {} values, expected {}",
                name,
                data.len(),
                out.len()
            )));
        }
        out.copy_from_slice(data);
        Ok(())
    }

    fn write_dataset(
        &mut self,
        group: &str,
        name: &str,
        shape: [usize; 3],
        data: &[f32],
    ) -> Result<(), ArchiveError> {
        self.set_dataset(group, name, shape.to_vec(), data.to_vec());
        Ok(())
    }

    fn write_int_attr(&mut self, group: &str, name: &str, value: i64) -> Result<(), ArchiveError> {
        self.set_attr(group, name, AttrValue::Int(value));
        Ok(())
    }
}

#[cfg(feature = "hdf5")]
pub use self::hdf5_store::Hdf5Store;

#[cfg(feature = "hdf5")]
mod hdf5_store {
    use std::path::Path;

    use hdf5::types::{FixedAscii, VarLenAscii, VarLenUnicode};

    use super::{ArchiveError, GridStore};

    /// [`GridStore`] over an HDF5 file.
    pub struct Hdf5Store {
        file: hdf5::File,
    }

    impl Hdf5Store {
        /// Open an existing file read-only.
        pub fn open(path: &Path) -> Result<Self, ArchiveError> {
            Ok(Self {
                file: hdf5::File::open(path)?,
            })
        }

        /// Open a file read/write, creating it if needed.
        pub fn append(path: &Path) -> Result<Self, ArchiveError> {
            Ok(Self {
                file: hdf5::File::append(path)?,
            })
        }

        fn group(&self, path: &str) -> Result<hdf5::Group, ArchiveError> {
            if !self.file.link_exists(path) {
                return Err(ArchiveError::NotFound(path.to_string()));
            }
            Ok(self.file.group(path)?)
        }

        /// Open `path`, creating it and any missing parents.
        fn ensure_group(&self, path: &str) -> Result<hdf5::Group, ArchiveError> {
            let mut current = String::new();
            for part in path.split('/').filter(|p| !p.is_empty()) {
                current.push('/');
                current.push_str(part);
                if !self.file.link_exists(&current) {
                    self.file.create_group(&current)?;
                }
            }
            Ok(self.file.group(path)?)
        }

        fn attr(&self, group: &str, name: &str) -> Result<hdf5::Attribute, ArchiveError> {
            let group = self.group(group)?;
            if !group.attr_names()?.iter().any(|n| n == name) {
                return Err(ArchiveError::NotFound(name.to_string()));
            }
            Ok(group.attr(name)?)
        }

        fn dataset(&self, group: &str, name: &str) -> Result<hdf5::Dataset, ArchiveError> {
            let group = self.group(group)?;
            if !group.link_exists(name) {
                return Err(ArchiveError::NotFound(name.to_string()));
            }
            Ok(group.dataset(name)?)
        }
    }

    impl GridStore for Hdf5Store {
        fn read_text_attr(&self, group: &str, name: &str) -> Result<String, ArchiveError> {
            let attr = self.attr(group, name)?;
            if let Ok(s) = attr.read_scalar::<VarLenUnicode>() {
                return Ok(s.as_str().to_string());
            }
            if let Ok(s) = attr.read_scalar::<VarLenAscii>() {
                return Ok(s.as_str().to_string());
            }
            if let Ok(s) = attr.read_scalar::<FixedAscii<64>>() {
                return Ok(s.as_str().to_string());
            }
            Ok(attr.read_scalar::<i64>()?.to_string())
        }

        fn read_f64_attr(&self, group: &str, name: &str) -> Result<Vec<f64>, ArchiveError> {
            Ok(self.attr(group, name)?.read_raw::<f64>()?)
        }

        fn dataset_shape(&self, group: &str, name: &str) -> Result<Vec<usize>, ArchiveError> {
            Ok(self.dataset(group, name)?.shape())
        }

        fn read_dataset(
            &self,
            group: &str,
            name: &str,
            out: &mut [f32],
        ) -> Result<(), ArchiveError> {
            let data = self.dataset(group, name)?.read_raw::<f32>()?;
            if data.len() != out.len() {
                return Err(ArchiveError::InvalidHeader(format!(
                    "dataset {} holds {} values, expected {}",
                    name,
                    data.len(),
                    out.len()
                )));
            }
            out.copy_from_slice(&data);
            Ok(())
        }

        fn write_dataset(
            &mut self,
            group: &str,
            name: &str,
            shape: [usize; 3],
            data: &[f32],
        ) -> Result<(), ArchiveError> {
            let group = self.ensure_group(group)?;
            if group.link_exists(name) {
                group.unlink(name)?;
            }
            let dataset = group.new_dataset::<f32>().shape(shape).create(name)?;
            dataset.write_raw(data)?;
            Ok(())
        }

        fn write_int_attr(
            &mut self,
            group: &str,
            name: &str,
            value: i64,
        ) -> Result<(), ArchiveError> {
            let group = self.ensure_group(group)?;
            if group.attr_names()?.iter().any(|n| n == name) {
                group.delete_attr(name)?;
            }
            let attr = group.new_attr::<i64>().shape(()).create(name)?;
            attr.write_scalar(&value)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::FilterType;

    fn source(dim: usize) -> MemoryStore {
        let mut store = MemoryStore::new();
        store.set_attr(
            PARAMETERS_GROUP,
            GRID_DIM_ATTR,
            AttrValue::Text(format!("{}\0\0", dim)),
        );
        store.set_attr(
            HEADER_GROUP,
            BOX_SIZE_ATTR,
            AttrValue::Floats(vec![100.0, 100.0, 100.0]),
        );
        let n = dim * dim * dim;
        for (idx, name) in GRID_DATASETS.iter().enumerate() {
            store.set_dataset(GRIDS_GROUP, name, vec![dim; 3], vec![idx as f32 + 1.0; n]);
        }
        store
    }

    fn config(new_dim: usize) -> RegridConfig {
        RegridConfig {
            new_dim,
            filter: FilterType::RealTopHat,
            threads: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_grid_dim() {
        assert_eq!(parse_grid_dim("128").unwrap(), 128);
        assert_eq!(parse_grid_dim(" 64 \0\0").unwrap(), 64);
        assert!(parse_grid_dim("abc").is_err());
        assert!(parse_grid_dim("0").is_err());
    }

    #[test]
    fn test_regrid_writes_all_datasets_and_attrs() {
        let src = source(8);
        let mut dst = MemoryStore::new();

        regrid_velociraptor(&src, &mut dst, &config(4)).unwrap();

        for (idx, name) in GRID_DATASETS.iter().enumerate() {
            let (shape, data) = dst.dataset(GRIDS_GROUP, name).unwrap();
            assert_eq!(shape, &[4, 4, 4]);
            assert_eq!(data.len(), 64);
            let expected = idx as f32 + 1.0;
            assert!(data.iter().all(|v| (v - expected).abs() < 1e-4));
        }
        assert_eq!(
            dst.attr(PARAMETERS_GROUP, GRID_DIM_ATTR),
            Some(&AttrValue::Int(4))
        );
        assert_eq!(
            dst.attr(PARAMETERS_GROUP, SNAPSHOT_GRID_DIM_ATTR),
            Some(&AttrValue::Int(4))
        );
    }

    #[test]
    fn test_missing_dataset_writes_nothing() {
        let mut src = source(4);
        src.datasets.remove(&key(GRIDS_GROUP, "Vz"));
        let mut dst = MemoryStore::new();

        let err = regrid_velociraptor(&src, &mut dst, &config(2)).unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
        assert!(dst.dataset(GRIDS_GROUP, "Vx").is_none());
        assert!(dst.attr(PARAMETERS_GROUP, GRID_DIM_ATTR).is_none());
    }

    #[test]
    fn test_inspect_reads_metadata_only() {
        let src = source(8);
        let grids = inspect_velociraptor(&src, &config(4)).unwrap();
        assert_eq!(grids.n_cell, [8, 8, 8]);
        assert_eq!(grids.box_size, [100.0; 3]);

        let mut src = source(8);
        src.attrs.remove(&key(PARAMETERS_GROUP, GRID_DIM_ATTR));
        assert!(matches!(
            inspect_velociraptor(&src, &config(4)),
            Err(ArchiveError::NotFound(_))
        ));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut src = source(4);
        src.set_dataset(GRIDS_GROUP, "Density", vec![4, 4, 2], vec![0.0; 32]);
        let mut dst = MemoryStore::new();

        assert!(matches!(
            regrid_velociraptor(&src, &mut dst, &config(2)),
            Err(ArchiveError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_non_divisor_rejected() {
        let src = source(6);
        let mut dst = MemoryStore::new();
        assert!(matches!(
            regrid_velociraptor(&src, &mut dst, &config(4)),
            Err(ArchiveError::Grid(_))
        ));
    }

    #[test]
    fn test_scalar_box_size() {
        let mut src = source(4);
        src.set_attr(HEADER_GROUP, BOX_SIZE_ATTR, AttrValue::Floats(vec![50.0]));
        assert_eq!(read_box_size(&src).unwrap(), [50.0; 3]);

        src.set_attr(HEADER_GROUP, BOX_SIZE_ATTR, AttrValue::Floats(vec![1.0, 2.0]));
        assert!(read_box_size(&src).is_err());
    }
}
