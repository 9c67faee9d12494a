//! # DICOM-grid library
//!
//! This crate converts directories of DICOM slices into sparse,
//! background-pruned voxel grids for rendering and analysis.
//!
//! The library builds on the dicom-rs ecosystem. A directory is split into
//! its acquisition series, each series is stacked into a [`Volume`] with
//! its physical spacing, origin and direction cosines, and the volume goes
//! through the conversion pipeline:
//!  - Intensity rescaling onto a caller-chosen band
//!  - Resampling onto a new voxel lattice (unit spacing by default)
//!  - Packing of all non-zero voxels into a [`SparseGrid`] named "density"
//!  - Writing the grid through a [`GridWriter`]
//!
//! Decoding and resampling run in parallel using rayon. Requests run on a
//! worker thread and report progress through [`ConversionEvent`]s; the
//! returned [`TaskHandle`] can be awaited or waited on for the final
//! [`RunReport`]. DICOM files are assumed to have the following
//! attributes:
//!   - Single-sample (grayscale) pixel data
//!   - No multiframe (always the first frame is used)
//!   - Images of one series share Series Instance UID and Series Date
//!
//! Gantry-tilted acquisitions are read without orthogonal correction, so a
//! volume's slice axis may be sheared. Resampling keeps the direction
//! cosines unchanged.
//!
//! # Examples
//!
//! ## Inspecting a directory
//!
//! ```no_run
//! # use dicom_grid::{ConversionEvent, get_meta_info};
//! let handle = get_meta_info("dicom", |event: ConversionEvent| {
//!     if let ConversionEvent::Metadata { summary, .. } = event {
//!         println!("{} .. {} at {:?}", summary.min, summary.max, summary.spacing);
//!     }
//! })
//! .expect("should have started the query");
//! handle.wait().expect("worker should have finished");
//! ```
//!
//! ## Converting a series
//!
//! Rescale to a soft-tissue band and resample to unit spacing, writing
//! `out/dicom.sgrid`:
//!
//! ```no_run
//! # use dicom_grid::{ConversionEvent, ConversionRequest, IntensityRange, convert_dicom};
//! let request = ConversionRequest::new("dicom")
//!     .with_destination("out")
//!     .with_range(IntensityRange::new(0.0, 1.0).expect("valid range"));
//! let report = convert_dicom(request, |event: ConversionEvent| println!("{event:?}"))
//!     .expect("should have started the conversion")
//!     .wait()
//!     .expect("worker should have finished");
//! assert!(report.is_success());
//! ```

pub mod catalog;
pub mod converter;
pub mod decoder;
pub mod enums;
pub mod event;
pub mod grid;
mod interpolator;
pub mod metadata;
pub mod resampler;
pub mod rescale;
pub mod task;
pub mod volume;
pub mod volume_loader;

pub use catalog::{SeriesCatalog, SeriesDescriptor};
pub use converter::{ConversionError, ConversionRequest, Converter, convert_dicom, get_meta_info};
pub use enums::{Interpolation, SortBy};
pub use event::{ConversionEvent, EventSink, EventState};
pub use grid::{GridFile, GridWriter, SparseGrid};
pub use metadata::{VolumeSummary, summarize};
pub use resampler::{TargetGeometry, resample};
pub use rescale::{IntensityRange, rescale};
pub use task::{RunReport, TaskHandle};
pub use volume::Volume;
pub use volume_loader::{LoadOptions, VolumeLoader};
