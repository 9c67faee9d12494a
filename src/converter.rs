//! Request orchestration: series discovery, the per-series pipeline and
//! event reporting.
//!
//! A metadata query runs `Discovering -> (Loading -> Summarizing)*`, a
//! conversion runs `Discovering -> (Loading -> Rescaling -> Resampling ->
//! Packing -> Writing)*`. Every series is handled on its own: a failure is
//! reported as an [`ConversionEvent::Error`] for that series and the run
//! continues with the next one. Files already written are kept.

use crate::{
    catalog::{CatalogError, SeriesCatalog, SeriesDescriptor},
    enums::Interpolation,
    event::{ConversionEvent, EventSink},
    grid::{DENSITY_GRID_NAME, GRID_FILE_EXTENSION, GridError, GridFile, GridWriter, pack},
    metadata::summarize,
    rescale::{IntensityRange, RescaleError, rescale},
    resampler::{ResampleError, TargetGeometry, resample},
    task::{RunReport, TaskError, TaskHandle},
    volume_loader::{LoadOptions, VolumeLoader, VolumeLoaderError},
};

use std::{
    any::Any,
    borrow::Cow,
    fmt,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use web_time::Instant;

/// Progress milestone: series started.
pub const PROGRESS_START: u8 = 0;
/// Progress milestone: volume loaded.
pub const PROGRESS_LOADED: u8 = 25;
/// Progress milestone: volume resampled.
pub const PROGRESS_RESAMPLED: u8 = 50;
/// Progress milestone: grid packed, about to be written.
pub const PROGRESS_PRE_WRITE: u8 = 90;

/// Where a request currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Discovering,
    Loading,
    Summarizing,
    Rescaling,
    Resampling,
    Packing,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Discovering => "discovering",
            Stage::Loading => "loading",
            Stage::Summarizing => "summarizing",
            Stage::Rescaling => "rescaling",
            Stage::Resampling => "resampling",
            Stage::Packing => "packing",
            Stage::Writing => "writing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Error classes a UI host distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EmptySeriesSet,
    Decode,
    Write,
    InvalidRequest,
    /// The worker itself failed, independent of the input.
    Internal,
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("No DICOM series found in {0}")]
    EmptySeriesSet(PathBuf),

    #[error("Series {0} not found")]
    UnknownSeries(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Decode(#[from] VolumeLoaderError),

    #[error(transparent)]
    Rescale(#[from] RescaleError),

    #[error(transparent)]
    Resample(#[from] ResampleError),

    #[error(transparent)]
    Write(#[from] GridError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Series processing panicked: {0}")]
    Panicked(String),
}

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptySeriesSet(_) => ErrorKind::EmptySeriesSet,
            Self::Catalog(_) | Self::Decode(_) => ErrorKind::Decode,
            Self::Write(_) => ErrorKind::Write,
            Self::Task(_) | Self::Panicked(_) => ErrorKind::Internal,
            Self::UnknownSeries(_) | Self::Rescale(_) | Self::Resample(_) => {
                ErrorKind::InvalidRequest
            }
        }
    }
}

/// One conversion, as issued by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub source: PathBuf,
    /// Directory receiving the grid files. `None` writes
    /// `<source>.sgrid` next to the source directory.
    pub destination: Option<PathBuf>,
    /// Output intensity band. `None` keeps the decoded values.
    pub range: Option<IntensityRange>,
    /// Output lattice. `None` uses unit spacing over the scanned extent.
    pub geometry: Option<TargetGeometry>,
    /// Restrict the run to one series id.
    pub series: Option<String>,
}

impl ConversionRequest {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: None,
            range: None,
            geometry: None,
            series: None,
        }
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    #[must_use]
    pub fn with_range(mut self, range: IntensityRange) -> Self {
        self.range = Some(range);
        self
    }

    #[must_use]
    pub fn with_geometry(mut self, geometry: TargetGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    #[must_use]
    pub fn with_series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }

    /// Output file for series `index` (0-based) out of `total`.
    ///
    /// The file is named after the source directory; with several series
    /// the 1-based index is appended so each series gets its own file.
    /// A source without a final name component (`.`, `..`) is resolved
    /// against the file system first.
    pub fn output_path(&self, index: usize, total: usize) -> PathBuf {
        let source = self.resolved_source();
        let name = source
            .file_name()
            .map_or_else(|| "volume".into(), |name| name.to_string_lossy().into_owned());
        let file_name = if total > 1 {
            format!("{name}_{}.{GRID_FILE_EXTENSION}", index + 1)
        } else {
            format!("{name}.{GRID_FILE_EXTENSION}")
        };

        match &self.destination {
            Some(destination) => destination.join(file_name),
            None => source
                .parent()
                .map_or_else(|| PathBuf::from(&file_name), |parent| parent.join(&file_name)),
        }
    }

    fn resolved_source(&self) -> Cow<'_, Path> {
        if self.source.file_name().is_some() {
            return Cow::Borrowed(&self.source);
        }
        match self.source.canonicalize() {
            Ok(source) => Cow::Owned(source),
            Err(err) => {
                warn!(source = %self.source.display(), error = %err, "cannot resolve source");
                Cow::Borrowed(&self.source)
            }
        }
    }
}

/// Runs metadata queries and conversions.
#[derive(Clone)]
pub struct Converter {
    catalog: SeriesCatalog,
    load_options: LoadOptions,
    interpolation: Interpolation,
    writer: Arc<dyn GridWriter>,
}

impl Default for Converter {
    fn default() -> Self {
        Self {
            catalog: SeriesCatalog::default(),
            load_options: LoadOptions::default(),
            interpolation: Interpolation::default(),
            writer: Arc::new(GridFile),
        }
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("catalog", &self.catalog)
            .field("load_options", &self.load_options)
            .field("interpolation", &self.interpolation)
            .finish_non_exhaustive()
    }
}

impl Converter {
    #[must_use]
    pub fn with_catalog(mut self, catalog: SeriesCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn with_load_options(mut self, load_options: LoadOptions) -> Self {
        self.load_options = load_options;
        self
    }

    #[must_use]
    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    #[must_use]
    pub fn with_writer(mut self, writer: Arc<dyn GridWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Emit one metadata event per series of `source`, on this thread.
    pub fn meta_info(&self, source: &Path, sink: &dyn EventSink) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::default();
        debug!(stage = %Stage::Idle, source = %source.display(), "metadata requested");

        let Some(series) = self.discover(source, None, sink, &mut report) else {
            report.elapsed = started.elapsed();
            return report;
        };
        report.series_total = series.len();

        for descriptor in &series {
            let _span = info_span!("series", id = %descriptor.id).entered();
            let result = isolate(|| self.summarize_series(descriptor));
            self.finish_series(descriptor, result, sink, &mut report);
        }

        report.elapsed = started.elapsed();
        report
    }

    /// Convert every series of the request, on this thread.
    pub fn convert(&self, request: &ConversionRequest, sink: &dyn EventSink) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::default();
        debug!(stage = %Stage::Idle);
        info!(source = %request.source.display(), "conversion requested");

        let only = request.series.as_deref();
        let Some(series) = self.discover(&request.source, only, sink, &mut report) else {
            report.elapsed = started.elapsed();
            return report;
        };
        report.series_total = series.len();

        for (index, descriptor) in series.iter().enumerate() {
            let _span = info_span!("series", id = %descriptor.id).entered();
            let output = request.output_path(index, series.len());
            let result = isolate(|| self.convert_series(descriptor, request, &output, sink))
                .map(|()| ConversionEvent::Success {
                    series: descriptor.id.clone(),
                    output: output.clone(),
                });
            if result.is_ok() {
                report.outputs.push(output);
            }
            self.finish_series(descriptor, result, sink, &mut report);
        }

        report.elapsed = started.elapsed();
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis(),
            "conversion finished"
        );
        report
    }

    /// Run [`Converter::meta_info`] on a worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be started.
    pub fn spawn_meta_info(
        &self,
        source: impl Into<PathBuf>,
        sink: impl EventSink,
    ) -> Result<TaskHandle, ConversionError> {
        let converter = self.clone();
        let source = source.into();
        Ok(TaskHandle::spawn("dicom-grid-meta", move || {
            converter.meta_info(&source, &sink)
        })?)
    }

    /// Run [`Converter::convert`] on a worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be started.
    pub fn spawn_convert(
        &self,
        request: ConversionRequest,
        sink: impl EventSink,
    ) -> Result<TaskHandle, ConversionError> {
        let converter = self.clone();
        Ok(TaskHandle::spawn("dicom-grid-convert", move || {
            converter.convert(&request, &sink)
        })?)
    }

    /// List the series to process. Emits the run's only event and returns
    /// `None` when there is nothing to do.
    fn discover(
        &self,
        source: &Path,
        only: Option<&str>,
        sink: &dyn EventSink,
        report: &mut RunReport,
    ) -> Option<Vec<SeriesDescriptor>> {
        debug!(stage = %Stage::Discovering, source = %source.display());
        let series = match self.catalog.list_series(source) {
            Ok(series) => series,
            Err(err) => {
                warn!(stage = %Stage::Failed, error = %err, "series discovery failed");
                report.failed += 1;
                sink.emit(ConversionEvent::Error {
                    series: None,
                    message: ConversionError::from(err).to_string(),
                });
                return None;
            }
        };

        if series.is_empty() {
            let empty = ConversionError::EmptySeriesSet(source.to_path_buf());
            info!(kind = ?empty.kind(), "{empty}");
            sink.emit(ConversionEvent::Empty);
            return None;
        }

        let Some(only) = only else {
            return Some(series);
        };
        let selected: Vec<_> = series.into_iter().filter(|s| s.id == only).collect();
        if selected.is_empty() {
            report.failed += 1;
            sink.emit(ConversionEvent::Error {
                series: Some(only.to_string()),
                message: ConversionError::UnknownSeries(only.to_string()).to_string(),
            });
            return None;
        }
        Some(selected)
    }

    fn summarize_series(
        &self,
        descriptor: &SeriesDescriptor,
    ) -> Result<ConversionEvent, ConversionError> {
        debug!(stage = %Stage::Loading);
        let volume = VolumeLoader::load_series(descriptor, &self.load_options)?;
        debug!(stage = %Stage::Summarizing);
        Ok(ConversionEvent::Metadata {
            series: descriptor.id.clone(),
            summary: summarize(&volume),
        })
    }

    fn convert_series(
        &self,
        descriptor: &SeriesDescriptor,
        request: &ConversionRequest,
        output: &Path,
        sink: &dyn EventSink,
    ) -> Result<(), ConversionError> {
        let progress = |percent| {
            sink.emit(ConversionEvent::Progress {
                series: descriptor.id.clone(),
                percent,
            });
        };

        progress(PROGRESS_START);
        debug!(stage = %Stage::Loading);
        let volume = VolumeLoader::load_series(descriptor, &self.load_options)?;
        progress(PROGRESS_LOADED);

        debug!(stage = %Stage::Rescaling);
        let volume = match request.range {
            Some(range) => rescale(volume, range)?,
            None => volume,
        };

        debug!(stage = %Stage::Resampling);
        let geometry = request
            .geometry
            .unwrap_or_else(|| TargetGeometry::isotropic_for(&volume));
        let volume = resample(volume, &geometry, self.interpolation)?;
        progress(PROGRESS_RESAMPLED);

        debug!(stage = %Stage::Packing);
        let grid = pack(&volume, DENSITY_GRID_NAME)?;
        drop(volume);
        progress(PROGRESS_PRE_WRITE);

        debug!(stage = %Stage::Writing, output = %output.display());
        self.writer.write(output, std::slice::from_ref(&grid))?;
        Ok(())
    }

    fn finish_series(
        &self,
        descriptor: &SeriesDescriptor,
        result: Result<ConversionEvent, ConversionError>,
        sink: &dyn EventSink,
        report: &mut RunReport,
    ) {
        match result {
            Ok(event) => {
                debug!(stage = %Stage::Done);
                report.succeeded += 1;
                sink.emit(event);
            }
            Err(err) => {
                warn!(stage = %Stage::Failed, kind = ?err.kind(), error = %err, "series failed");
                report.failed += 1;
                sink.emit(ConversionEvent::Error {
                    series: Some(descriptor.id.clone()),
                    message: err.to_string(),
                });
            }
        }
    }
}

/// Run one series pass, turning a panic into an error for that series.
fn isolate<T>(
    pass: impl FnOnce() -> Result<T, ConversionError>,
) -> Result<T, ConversionError> {
    panic::catch_unwind(AssertUnwindSafe(pass))
        .unwrap_or_else(|payload| Err(ConversionError::Panicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Start a metadata query for `source` with default settings.
///
/// # Errors
///
/// Returns an error if the worker thread cannot be started.
pub fn get_meta_info(
    source: impl Into<PathBuf>,
    sink: impl EventSink,
) -> Result<TaskHandle, ConversionError> {
    Converter::default().spawn_meta_info(source, sink)
}

/// Start a conversion with default settings.
///
/// # Errors
///
/// Returns an error if the worker thread cannot be started.
pub fn convert_dicom(
    request: ConversionRequest,
    sink: impl EventSink,
) -> Result<TaskHandle, ConversionError> {
    Converter::default().spawn_convert(request, sink)
}
