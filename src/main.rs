use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use dicom_grid::{
    ConversionError, ConversionEvent, ConversionRequest, Converter, IntensityRange, Interpolation,
    LoadOptions, SeriesCatalog, TargetGeometry,
    rescale::RescaleError,
    resampler::ResampleError,
};
use serde_json::json;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("Invalid intensity range: {0}")]
    Range(#[from] RescaleError),

    #[error("Invalid target geometry: {0}")]
    Geometry(#[from] ResampleError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convert DICOM series into sparse voxel grids.
#[derive(Parser)]
#[command(name = "dicom-grid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the series found in a directory
    Series {
        /// Directory holding the DICOM slices
        source: PathBuf,
    },

    /// Print intensity range, voxel counts and spacing of every series
    Info {
        /// Directory holding the DICOM slices
        source: PathBuf,

        /// Use the row x column normal as slice axis
        #[arg(long)]
        force_orthogonal: bool,
    },

    /// Convert every series of a directory into a grid file
    Convert {
        /// Directory holding the DICOM slices
        source: PathBuf,

        /// Output directory (default: next to the source directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Lower bound of the output intensity band
        #[arg(long, requires = "max", allow_negative_numbers = true)]
        min: Option<f32>,

        /// Upper bound of the output intensity band
        #[arg(long, requires = "min", allow_negative_numbers = true)]
        max: Option<f32>,

        /// Output voxel counts
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], requires = "spacing")]
        size: Option<Vec<usize>>,

        /// Output voxel spacing
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], requires = "size")]
        spacing: Option<Vec<f64>>,

        /// Only convert this series
        #[arg(long)]
        series: Option<String>,

        /// Resampling kernel
        #[arg(long, value_enum, default_value = "trilinear")]
        interpolation: Interpolation,

        /// Use the row x column normal as slice axis
        #[arg(long)]
        force_orthogonal: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Print one event as a JSON line.
fn print_event(event: ConversionEvent) {
    let line = json!({ "state": event.state(), "event": event });
    println!("{line}");
}

async fn run(command: Commands) -> Result<bool, CliError> {
    match command {
        Commands::Series { source } => {
            let series = SeriesCatalog::default()
                .list_series(&source)
                .map_err(ConversionError::from)?;
            for descriptor in &series {
                let line = json!({
                    "id": descriptor.id,
                    "description": descriptor.description,
                    "slices": descriptor.files.len(),
                });
                println!("{line}");
            }
            Ok(true)
        }
        Commands::Info {
            source,
            force_orthogonal,
        } => {
            let converter = Converter::default().with_load_options(LoadOptions {
                force_orthogonal_direction: force_orthogonal,
                ..LoadOptions::default()
            });
            let report = converter
                .spawn_meta_info(source, print_event)?
                .await
                .map_err(ConversionError::from)?;
            Ok(report.is_success())
        }
        Commands::Convert {
            source,
            output,
            min,
            max,
            size,
            spacing,
            series,
            interpolation,
            force_orthogonal,
        } => {
            let mut request = ConversionRequest::new(source);
            if let Some(output) = output {
                request = request.with_destination(output);
            }
            if let (Some(min), Some(max)) = (min, max) {
                request = request.with_range(IntensityRange::new(min, max)?);
            }
            if let (Some(size), Some(spacing)) = (size, spacing) {
                let geometry = TargetGeometry::new(
                    [size[0], size[1], size[2]],
                    [spacing[0], spacing[1], spacing[2]],
                )?;
                request = request.with_geometry(geometry);
            }
            if let Some(series) = series {
                request = request.with_series(series);
            }

            let converter = Converter::default()
                .with_interpolation(interpolation)
                .with_load_options(LoadOptions {
                    force_orthogonal_direction: force_orthogonal,
                    ..LoadOptions::default()
                });
            let report = converter
                .spawn_convert(request, print_event)?
                .await
                .map_err(ConversionError::from)?;
            println!("{}", serde_json::to_string(&report)?);
            Ok(report.is_success())
        }
    }
}
