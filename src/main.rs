//! Regrider CLI - smooth and subsample the grids of a halo-finder archive.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use log::LevelFilter;

use regrider::{
    archive::ArchiveError,
    compute::{FilterType, GridError},
    schema::{ConfigError, InputSource, RegridConfig},
};

#[derive(Parser, Debug)]
#[command(
    about = "Smooth and subsample the 3D grids of a gbpTrees or VELOCIraptor archive."
)]
struct Cli {
    /// gbpTrees grid file to read
    #[arg(short = 'g', long, value_name = "PATH")]
    gbptrees: Option<PathBuf>,

    /// VELOCIraptor grid file to read (requires the `hdf5` feature)
    #[arg(short = 'V', long, value_name = "PATH")]
    velociraptor: Option<PathBuf>,

    /// New grid dimension (cells per axis)
    #[arg(short = 'd', long = "dim", value_name = "N")]
    new_dim: Option<usize>,

    /// Output file
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Smoothing filter: real-top-hat, k-top-hat or gaussian
    #[arg(long, value_name = "NAME")]
    filter: Option<String>,

    /// Filter scale in units of the new cell width
    #[arg(long, value_name = "F")]
    radius_factor: Option<f64>,

    /// Worker threads. Defaults to the number of available logical cores.
    #[arg(short = 'j', long, value_name = "NUM")]
    threads: Option<usize>,

    /// JSON run configuration; command-line flags override it
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the default JSON configuration and exit
    #[arg(long)]
    example_config: bool,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Grid(#[from] GridError),
}

fn main() -> ExitCode {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    if cli.example_config {
        print_example_config();
        return ExitCode::SUCCESS;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(cli: Cli) -> Result<(), AppError> {
    let input = InputSource::select(cli.gbptrees, cli.velociraptor)?;

    let mut config = match &cli.config {
        Some(path) => RegridConfig::from_json_file(path)?,
        None => {
            let new_dim = cli.new_dim.ok_or(ConfigError::MissingDimension)?;
            RegridConfig {
                new_dim,
                ..Default::default()
            }
        }
    };
    if let Some(new_dim) = cli.new_dim {
        config.new_dim = new_dim;
    }
    if let Some(name) = &cli.filter {
        config.filter = name.parse::<FilterType>()?;
    }
    if let Some(factor) = cli.radius_factor {
        config.radius_factor = factor;
    }
    if cli.threads.is_some() {
        config.threads = cli.threads;
    }
    config.validate()?;

    let output = cli.output.ok_or(ConfigError::MissingOutput)?;
    log::debug!("Run configuration: {:?}", config);

    let start = Instant::now();
    match input {
        InputSource::GbpTrees(path) => {
            let header = regrider::regrid_gbptrees(&path, &output, &config)?;
            log::info!(
                "Wrote {} grids of {}^3 to {}",
                header.n_grids,
                config.new_dim,
                output.display()
            );
        }
        InputSource::Velociraptor(path) => regrid_velociraptor_file(&path, &output, &config)?,
    }
    log::info!("Done in {:.2}s", start.elapsed().as_secs_f32());
    Ok(())
}

#[cfg(feature = "hdf5")]
fn regrid_velociraptor_file(
    input: &Path,
    output: &Path,
    config: &RegridConfig,
) -> Result<(), AppError> {
    use regrider::archive::{Hdf5Store, inspect_velociraptor};

    log::info!("Regridding VELOCIraptor file {}", input.display());
    let src = Hdf5Store::open(input)?;
    inspect_velociraptor(&src, config)?;

    // The output is only created once the source is known to be usable.
    let existed = output.exists();
    let result = Hdf5Store::append(output)
        .and_then(|mut dst| regrider::regrid_velociraptor(&src, &mut dst, config));
    if result.is_err() && !existed {
        let _ = std::fs::remove_file(output);
    }
    result?;
    Ok(())
}

#[cfg(not(feature = "hdf5"))]
fn regrid_velociraptor_file(
    input: &Path,
    _output: &Path,
    _config: &RegridConfig,
) -> Result<(), AppError> {
    log::debug!("Cannot open {} without HDF5 support", input.display());
    Err(ConfigError::Hdf5Disabled.into())
}

fn print_example_config() {
    match serde_json::to_string_pretty(&RegridConfig::default()) {
        Ok(json) => {
            println!("Example configuration (regrid.json):");
            println!("{}", json);
        }
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
}
