use crate::{
    catalog::{CatalogError, SeriesCatalog, SeriesDescriptor},
    enums::SortBy,
    volume::{Direction, IDENTITY_DIRECTION, Volume, VolumeError},
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const EPSILON: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions: expected {expected:?}, found {found:?}")]
    InconsistentDimensions {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Only single-sample (scalar) images are supported, found {0} samples per pixel")]
    UnsupportedSamplesPerPixel(u16),

    #[error("Invalid volume geometry: {0}")]
    Geometry(#[from] VolumeError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Pixel data error: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),
}

/// How a slice set is turned into a volume.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadOptions {
    pub sort_by: SortBy,
    /// Replace the slice axis by the row x column normal. Off by default so
    /// that gantry-tilted acquisitions keep their sheared slice axis.
    pub force_orthogonal_direction: bool,
}

/// Geometry attributes of one slice.
#[derive(Debug, Default, Clone, Copy)]
struct SliceHeader {
    position: Option<[f64; 3]>,
    orientation: Option<([f64; 3], [f64; 3])>,
    pixel_spacing: Option<[f64; 2]>,
    slice_thickness: Option<f64>,
    spacing_between_slices: Option<f64>,
}

impl SliceHeader {
    fn read(dicom_object: &FileDicomObject<InMemDicomObject>) -> Self {
        let position = read_floats(dicom_object, tags::IMAGE_POSITION_PATIENT)
            .and_then(|values| Some([*values.first()?, *values.get(1)?, *values.get(2)?]));
        let orientation =
            read_floats(dicom_object, tags::IMAGE_ORIENTATION_PATIENT).and_then(|values| {
                if values.len() < 6 {
                    return None;
                }
                Some((
                    [values[0], values[1], values[2]],
                    [values[3], values[4], values[5]],
                ))
            });
        let pixel_spacing = read_floats(dicom_object, tags::PIXEL_SPACING)
            .and_then(|values| Some([*values.first()?, *values.get(1)?]));

        Self {
            position,
            orientation,
            pixel_spacing,
            slice_thickness: read_float(dicom_object, tags::SLICE_THICKNESS),
            spacing_between_slices: read_float(dicom_object, tags::SPACING_BETWEEN_SLICES),
        }
    }

    fn normal(&self) -> Option<[f64; 3]> {
        let (row, column) = self.orientation?;
        normalize(cross(row, column))
    }
}

struct Slice {
    order: Option<f64>,
    header: SliceHeader,
    image: Array2<f32>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load the volume of one catalogued series.
    ///
    /// # Errors
    ///
    /// Returns an error if a slice cannot be decoded or the slices do not
    /// form a consistent volume.
    pub fn load_series(
        series: &SeriesDescriptor,
        options: &LoadOptions,
    ) -> Result<Volume, VolumeLoaderError> {
        debug!(series = %series.id, slices = series.files.len(), "loading series");
        Self::load_from_file_paths(&series.files, options)
    }

    /// Load a volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `options` - Slice ordering and direction handling
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        options: &LoadOptions,
    ) -> Result<Volume, VolumeLoaderError> {
        if dicom_objects.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        let mut slices = dicom_objects
            .par_iter()
            .map(|dicom_object| Self::extract_slice(dicom_object, options.sort_by))
            .collect::<Result<Vec<_>, _>>()?;

        Self::sort_slices(&mut slices, options.sort_by);
        Self::validate_dimensions(&slices)?;

        let headers: Vec<_> = slices.iter().map(|slice| slice.header).collect();
        let (spacing, origin, direction) =
            Self::get_geometry(&headers, options.force_orthogonal_direction);
        let volume_array = Self::build_volume_array(&slices);

        Ok(Volume::new(volume_array, spacing)?
            .with_origin(origin)
            .with_direction(direction))
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
        options: &LoadOptions,
    ) -> Result<Volume, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> = paths
            .par_iter()
            .map(|path| open_file(path.as_ref()))
            .collect();

        Self::load_from_dicom_objects(&objects?, options)
    }

    /// Load the first series found in a directory
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        options: &LoadOptions,
    ) -> Result<Volume, VolumeLoaderError> {
        let catalog = SeriesCatalog::default().with_sort_by(options.sort_by);
        let series = catalog
            .list_series(path)?
            .into_iter()
            .next()
            .ok_or(VolumeLoaderError::NoValidImages)?;

        Self::load_series(&series, options)
    }

    fn extract_slice(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: SortBy,
    ) -> Result<Slice, VolumeLoaderError> {
        Ok(Slice {
            order: sort_key(dicom_object, sort_by),
            header: SliceHeader::read(dicom_object),
            image: Self::decode_image(dicom_object)?,
        })
    }

    fn decode_image(
        dicom_object: &FileDicomObject<InMemDicomObject>,
    ) -> Result<Array2<f32>, VolumeLoaderError> {
        let pixel_data = dicom_object.decode_pixel_data()?;
        let samples_per_pixel = pixel_data.samples_per_pixel();
        if samples_per_pixel != 1 {
            return Err(VolumeLoaderError::UnsupportedSamplesPerPixel(
                samples_per_pixel,
            ));
        }

        // Modality values (e.g. Hounsfield units), no windowing.
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::Default)
            .with_voi_lut(VoiLutOption::Identity);
        let frames = pixel_data.to_ndarray_with_options::<f32>(&options)?;
        Ok(frames.slice_move(s![0, .., .., 0]))
    }

    fn sort_slices(slices: &mut [Slice], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| {
                a.order
                    .partial_cmp(&b.order)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    fn validate_dimensions(slices: &[Slice]) -> Result<(), VolumeLoaderError> {
        let expected = slices[0].image.dim();
        match slices.iter().find(|slice| slice.image.dim() != expected) {
            Some(slice) => Err(VolumeLoaderError::InconsistentDimensions {
                expected,
                found: slice.image.dim(),
            }),
            None => Ok(()),
        }
    }

    fn build_volume_array(slices: &[Slice]) -> Array3<f32> {
        let (height, width) = slices[0].image.dim();
        let depth = slices.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.image);
        }

        volume
    }

    /// Spacing, origin and direction of the stacked slices.
    fn get_geometry(
        headers: &[SliceHeader],
        force_orthogonal_direction: bool,
    ) -> ([f64; 3], [f64; 3], Direction) {
        let first = headers[0];
        let last = headers[headers.len() - 1];

        let pixel_spacing = headers
            .iter()
            .find_map(|header| header.pixel_spacing)
            .unwrap_or_else(|| {
                warn!("Pixel Spacing missing, assuming 1.0");
                [1.0, 1.0]
            });
        let fallback_spacing = headers
            .iter()
            .find_map(|header| header.spacing_between_slices.or(header.slice_thickness))
            .unwrap_or(1.0);

        let Some((row, column)) = first.orientation else {
            return (
                [pixel_spacing[1], pixel_spacing[0], fallback_spacing],
                first.position.unwrap_or_default(),
                IDENTITY_DIRECTION,
            );
        };
        let normal = first.normal().unwrap_or([0.0, 0.0, 1.0]);

        let (slice_axis, slice_spacing) = match (first.position, last.position) {
            (Some(start), Some(end)) if headers.len() > 1 => {
                let delta = sub(end, start);
                let steps = (headers.len() - 1) as f64;
                if force_orthogonal_direction {
                    (normal, dot(delta, normal).abs() / steps)
                } else {
                    match normalize(delta) {
                        Some(axis) => (axis, length(delta) / steps),
                        None => (normal, 0.0),
                    }
                }
            }
            _ => (normal, fallback_spacing),
        };
        let slice_spacing = if slice_spacing > EPSILON {
            slice_spacing
        } else {
            fallback_spacing
        };

        let direction = std::array::from_fn(|r| [row[r], column[r], slice_axis[r]]);
        (
            [pixel_spacing[1], pixel_spacing[0], slice_spacing],
            first.position.unwrap_or_default(),
            direction,
        )
    }
}

/// Value the slices of a series are ordered by.
pub(crate) fn sort_key(
    dicom_object: &FileDicomObject<InMemDicomObject>,
    sort_by: SortBy,
) -> Option<f64> {
    match sort_by {
        SortBy::ImagePositionPatient => {
            let header = SliceHeader::read(dicom_object);
            let position = header.position?;
            match header.normal() {
                Some(normal) => Some(dot(position, normal)),
                None => Some(position[2]),
            }
        }
        SortBy::TablePosition => read_float(dicom_object, tags::TABLE_POSITION),
        SortBy::InstanceNumber => dicom_object
            .element(tags::INSTANCE_NUMBER)
            .ok()?
            .to_int::<i32>()
            .ok()
            .map(f64::from),
        SortBy::None => Some(0.0),
    }
}

fn read_floats(
    dicom_object: &FileDicomObject<InMemDicomObject>,
    tag: dicom::core::Tag,
) -> Option<Vec<f64>> {
    dicom_object.element(tag).ok()?.to_multi_float64().ok()
}

fn read_float(
    dicom_object: &FileDicomObject<InMemDicomObject>,
    tag: dicom::core::Tag,
) -> Option<f64> {
    dicom_object.element(tag).ok()?.to_float64().ok()
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn length(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

fn normalize(a: [f64; 3]) -> Option<[f64; 3]> {
    let len = length(a);
    (len > EPSILON).then(|| [a[0] / len, a[1] / len, a[2] / len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn header(position: [f64; 3]) -> SliceHeader {
        SliceHeader {
            position: Some(position),
            orientation: Some(([1.0, 0.0, 0.0], [0.0, 1.0, 0.0])),
            pixel_spacing: Some([0.7, 0.5]),
            slice_thickness: Some(3.0),
            spacing_between_slices: None,
        }
    }

    #[test]
    fn axial_stack_geometry() {
        let headers: Vec<_> = (0..5).map(|z| header([-10.0, -20.0, z as f64 * 2.0])).collect();
        let (spacing, origin, direction) = VolumeLoader::get_geometry(&headers, false);

        assert_eq!(spacing, [0.5, 0.7, 2.0]);
        assert_eq!(origin, [-10.0, -20.0, 0.0]);
        assert_eq!(direction, IDENTITY_DIRECTION);
    }

    #[test]
    fn gantry_tilt_is_kept_without_orthogonal_correction() {
        // Each slice is shifted 1 in y for every 2 in z.
        let headers: Vec<_> = (0..3)
            .map(|i| header([0.0, i as f64, i as f64 * 2.0]))
            .collect();

        let (spacing, _, direction) = VolumeLoader::get_geometry(&headers, false);
        let expected = 5.0_f64.sqrt();
        assert_relative_eq!(spacing[2], expected, epsilon = 1e-9);
        assert_relative_eq!(direction[1][2], 1.0 / expected, epsilon = 1e-9);
        assert_relative_eq!(direction[2][2], 2.0 / expected, epsilon = 1e-9);

        let (spacing, _, direction) = VolumeLoader::get_geometry(&headers, true);
        assert_relative_eq!(spacing[2], 2.0, epsilon = 1e-9);
        assert_eq!(direction, IDENTITY_DIRECTION);
    }

    #[test]
    fn single_slice_falls_back_to_thickness() {
        let (spacing, _, _) = VolumeLoader::get_geometry(&[header([0.0; 3])], false);
        assert_eq!(spacing[2], 3.0);
    }

    #[test]
    fn missing_orientation_uses_identity() {
        let headers = [SliceHeader {
            pixel_spacing: Some([2.0, 2.0]),
            ..SliceHeader::default()
        }];
        let (spacing, origin, direction) = VolumeLoader::get_geometry(&headers, false);
        assert_eq!(spacing, [2.0, 2.0, 1.0]);
        assert_eq!(origin, [0.0; 3]);
        assert_eq!(direction, IDENTITY_DIRECTION);
    }

    #[test]
    fn mismatched_slices_are_rejected() {
        let slices = vec![
            Slice {
                order: Some(0.0),
                header: SliceHeader::default(),
                image: Array2::zeros((4, 4)),
            },
            Slice {
                order: Some(1.0),
                header: SliceHeader::default(),
                image: Array2::zeros((4, 5)),
            },
        ];
        assert!(matches!(
            VolumeLoader::validate_dimensions(&slices),
            Err(VolumeLoaderError::InconsistentDimensions {
                expected: (4, 4),
                found: (4, 5)
            })
        ));
    }
}
