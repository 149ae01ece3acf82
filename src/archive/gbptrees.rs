//! gbpTrees grid files.
//!
//! ```text
//! Header (44 bytes, little-endian):
//!   n_cell: 3 x i32
//!   box_size: 3 x f64
//!   n_grids: i32
//!   ma_scheme: i32
//!
//! Records (n_grids times):
//!   identifier: 32 bytes, ASCII, NUL padded
//!   payload: n_cell[0] * n_cell[1] * n_cell[2] x f32, real layout
//! ```

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::{ArchiveError, smooth_and_decimate};
use crate::compute::{Grid, decimation_strides};
use crate::schema::RegridConfig;

/// Length of a record identifier in bytes.
pub const IDENT_LEN: usize = 32;

/// Bytes read or written per payload chunk.
const CHUNK_SAMPLES: usize = 1 << 16;

/// File header shared by all grids in a gbpTrees file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GbpHeader {
    pub n_cell: [i32; 3],
    pub box_size: [f64; 3],
    pub n_grids: i32,
    pub ma_scheme: i32,
}

impl GbpHeader {
    /// Size of header in bytes.
    pub const SIZE: usize = 44;

    /// Grid dimensions, rejecting non-positive cell counts.
    pub fn dims(&self) -> Result<[usize; 3], ArchiveError> {
        let mut dims = [0; 3];
        for (d, &n) in dims.iter_mut().zip(self.n_cell.iter()) {
            if n <= 0 {
                return Err(ArchiveError::InvalidHeader(format!(
                    "n_cell = {:?}",
                    self.n_cell
                )));
            }
            *d = n as usize;
        }
        Ok(dims)
    }

    /// Number of records, rejecting negative counts.
    pub fn grid_count(&self) -> Result<usize, ArchiveError> {
        usize::try_from(self.n_grids)
            .map_err(|_| ArchiveError::InvalidHeader(format!("n_grids = {}", self.n_grids)))
    }

    /// Write header to output.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for n in self.n_cell {
            w.write_all(&n.to_le_bytes())?;
        }
        for l in self.box_size {
            w.write_all(&l.to_le_bytes())?;
        }
        w.write_all(&self.n_grids.to_le_bytes())?;
        w.write_all(&self.ma_scheme.to_le_bytes())?;
        Ok(())
    }

    /// Read header from input.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf4 = [0u8; 4];
        let mut buf8 = [0u8; 8];

        let mut n_cell = [0i32; 3];
        for n in n_cell.iter_mut() {
            r.read_exact(&mut buf4)?;
            *n = i32::from_le_bytes(buf4);
        }

        let mut box_size = [0f64; 3];
        for l in box_size.iter_mut() {
            r.read_exact(&mut buf8)?;
            *l = f64::from_le_bytes(buf8);
        }

        r.read_exact(&mut buf4)?;
        let n_grids = i32::from_le_bytes(buf4);

        r.read_exact(&mut buf4)?;
        let ma_scheme = i32::from_le_bytes(buf4);

        Ok(Self {
            n_cell,
            box_size,
            n_grids,
            ma_scheme,
        })
    }
}

/// NUL-padded record identifier, kept byte-for-byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridIdent(pub [u8; IDENT_LEN]);

impl GridIdent {
    /// Identifier for `name`. Fails if the name does not fit in 31 bytes.
    pub fn from_name(name: &str) -> Result<Self, ArchiveError> {
        let bytes = name.as_bytes();
        if bytes.len() >= IDENT_LEN || bytes.contains(&0) {
            return Err(ArchiveError::InvalidHeader(format!(
                "grid name {:?} does not fit in {} bytes",
                name, IDENT_LEN
            )));
        }
        let mut ident = [0u8; IDENT_LEN];
        ident[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(ident))
    }

    /// Name up to the first NUL.
    pub fn name(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(IDENT_LEN);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut ident = [0u8; IDENT_LEN];
        r.read_exact(&mut ident)?;
        Ok(Self(ident))
    }
}

/// Read `out.len()` little-endian f32 values.
pub fn read_payload<R: Read>(r: &mut R, out: &mut [f32]) -> io::Result<()> {
    let mut bytes = vec![0u8; CHUNK_SAMPLES.min(out.len()) * 4];
    for chunk in out.chunks_mut(CHUNK_SAMPLES) {
        let bytes = &mut bytes[..chunk.len() * 4];
        r.read_exact(bytes)?;
        for (v, b) in chunk.iter_mut().zip(bytes.chunks_exact(4)) {
            *v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        }
    }
    Ok(())
}

/// Write f32 values little-endian.
pub fn write_payload<W: Write>(w: &mut W, data: &[f32]) -> io::Result<()> {
    let mut bytes = Vec::with_capacity(CHUNK_SAMPLES.min(data.len()) * 4);
    for chunk in data.chunks(CHUNK_SAMPLES) {
        bytes.clear();
        for v in chunk {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        w.write_all(&bytes)?;
    }
    Ok(())
}

/// Write a complete gbpTrees file from named real-layout grids.
pub fn write_gbptrees(
    path: &Path,
    n_cell: [i32; 3],
    box_size: [f64; 3],
    ma_scheme: i32,
    grids: &[(&str, &[f32])],
) -> Result<(), ArchiveError> {
    let header = GbpHeader {
        n_cell,
        box_size,
        n_grids: i32::try_from(grids.len())
            .map_err(|_| ArchiveError::InvalidHeader("too many grids".to_string()))?,
        ma_scheme,
    };
    let n_logical = header.dims()?.iter().product::<usize>();

    let mut writer = BufWriter::new(File::create(path)?);
    header.write_to(&mut writer)?;
    for (name, data) in grids {
        if data.len() != n_logical {
            return Err(ArchiveError::InvalidHeader(format!(
                "grid {} holds {} samples, expected {}",
                name,
                data.len(),
                n_logical
            )));
        }
        GridIdent::from_name(name)?.write_to(&mut writer)?;
        write_payload(&mut writer, data)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read the header of a gbpTrees file.
pub fn read_header(path: &Path) -> Result<GbpHeader, ArchiveError> {
    let mut reader = BufReader::new(File::open(path)?);
    Ok(GbpHeader::read_from(&mut reader)?)
}

/// Load the grid named `name`. Fails with [`ArchiveError::NotFound`] if absent.
pub fn read_grid(path: &Path, name: &str, threads: Option<usize>) -> Result<Grid, ArchiveError> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = GbpHeader::read_from(&mut reader)?;
    let dims = header.dims()?;
    let payload_bytes = dims.iter().product::<usize>() as u64 * 4;

    for _ in 0..header.grid_count()? {
        let ident = GridIdent::read_from(&mut reader)?;
        if ident.name() == name {
            let mut grid = Grid::with_threads(dims, header.box_size, threads)?;
            read_payload(&mut reader, grid.real_mut()?)?;
            return Ok(grid);
        }
        let skipped = io::copy(&mut (&mut reader).take(payload_bytes), &mut io::sink())?;
        if skipped != payload_bytes {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
    }

    Err(ArchiveError::NotFound(name.to_string()))
}

/// Regrid every record of `input` into a new file at `output`.
///
/// The output is assembled next to `output` and only moved into place once
/// every record has been written, so a failure never leaves a partial file.
/// Returns the header written to the output.
pub fn regrid_gbptrees(
    input: &Path,
    output: &Path,
    config: &RegridConfig,
) -> Result<GbpHeader, ArchiveError> {
    log::info!("Regridding gbpTrees file {}", input.display());

    let mut reader = BufReader::new(File::open(input)?);
    let header = GbpHeader::read_from(&mut reader)?;
    let n_cell = header.dims()?;
    let n_grids = header.grid_count()?;
    let new_dims = config.new_dims();
    decimation_strides(n_cell, new_dims)?;

    log::info!("n_cell = {:?} --> {:?}", n_cell, new_dims);
    log::info!("box_size = {:?}", header.box_size);
    log::info!("n_grids = {}", header.n_grids);
    log::info!("ma_scheme = {}", header.ma_scheme);

    let new_dim = i32::try_from(config.new_dim)
        .map_err(|_| ArchiveError::InvalidHeader(format!("n_cell = {}", config.new_dim)))?;
    let out_header = GbpHeader {
        n_cell: [new_dim; 3],
        ..header
    };

    let partial = partial_path(output);
    let result = write_regridded(&mut reader, &partial, &out_header, n_cell, n_grids, config);
    match result {
        Ok(()) => {
            fs::rename(&partial, output)?;
            Ok(out_header)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn write_regridded<R: Read>(
    reader: &mut R,
    path: &Path,
    header: &GbpHeader,
    n_cell: [usize; 3],
    n_grids: usize,
    config: &RegridConfig,
) -> Result<(), ArchiveError> {
    let mut writer = BufWriter::new(File::create(path)?);
    header.write_to(&mut writer)?;

    let mut grid = Grid::with_threads(n_cell, header.box_size, config.threads)?;

    for _ in 0..n_grids {
        let ident = GridIdent::read_from(reader)?;
        ident.write_to(&mut writer)?;
        log::info!("Grid {}", ident.name());

        // The grid may have been decimated by the previous record.
        grid.update_properties(n_cell)?;

        log::debug!("Reading grid");
        read_payload(reader, grid.real_mut()?)?;

        grid = smooth_and_decimate(grid, config)?;

        log::debug!("Writing subsampled grid");
        write_payload(&mut writer, grid.real()?)?;
    }

    writer.flush()?;
    Ok(())
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    output.with_file_name(name)
}
