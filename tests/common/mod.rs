#![allow(dead_code)]

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use dicom::{
    core::{DataElement, PrimitiveValue, VR},
    object::{FileMetaTableBuilder, InMemDicomObject},
};
use dicom_dictionary_std::tags;
use dicom_grid::ConversionEvent;

const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

/// Synthetic series description.
pub struct SeriesSpec {
    pub uid: &'static str,
    pub date: &'static str,
    pub rows: u16,
    pub columns: u16,
    pub slices: usize,
    /// Row spacing, column spacing, slice step.
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    /// Shift along y per slice, emulating gantry tilt.
    pub tilt_step: f64,
}

impl SeriesSpec {
    pub fn new(uid: &'static str, rows: u16, columns: u16, slices: usize) -> Self {
        Self {
            uid,
            date: "20240101",
            rows,
            columns,
            slices,
            spacing: [1.0, 1.0, 1.0],
            origin: [0.0; 3],
            tilt_step: 0.0,
        }
    }

    pub fn spacing(mut self, spacing: [f64; 3]) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn origin(mut self, origin: [f64; 3]) -> Self {
        self.origin = origin;
        self
    }

    pub fn tilt_step(mut self, tilt_step: f64) -> Self {
        self.tilt_step = tilt_step;
        self
    }
}

/// Stored value of pixel `(row, column)` on slice `slice`.
pub fn pixel_value(slice: usize, row: usize, column: usize) -> u16 {
    ((slice * 7 + row * 3 + column) % 50) as u16 * 10
}

/// Modality value the stored pixel decodes to.
pub fn modality_value(slice: usize, row: usize, column: usize) -> f32 {
    f32::from(pixel_value(slice, row, column)) - 1000.0
}

fn strs(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect())
}

/// Write one CT slice per file, named so that directory order is reversed
/// with respect to slice order.
pub fn write_series(dir: &Path, spec: &SeriesSpec) {
    for slice in 0..spec.slices {
        let instance_uid = format!("{}.{}", spec.uid, slice + 1);
        let position = [
            spec.origin[0],
            spec.origin[1] + spec.tilt_step * slice as f64,
            spec.origin[2] + spec.spacing[2] * slice as f64,
        ];

        let mut bytes = Vec::with_capacity(usize::from(spec.rows) * usize::from(spec.columns) * 2);
        for row in 0..usize::from(spec.rows) {
            for column in 0..usize::from(spec.columns) {
                bytes.extend_from_slice(&pixel_value(slice, row, column).to_le_bytes());
            }
        }

        let object = InMemDicomObject::from_element_iter([
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(CT_IMAGE_STORAGE)),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(instance_uid.as_str())),
            DataElement::new(tags::SERIES_DATE, VR::DA, PrimitiveValue::from(spec.date)),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
            DataElement::new(tags::SERIES_DESCRIPTION, VR::LO, PrimitiveValue::from("synthetic")),
            DataElement::new(tags::SLICE_THICKNESS, VR::DS, strs(&[spec.spacing[2]])),
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(spec.uid)),
            DataElement::new(tags::INSTANCE_NUMBER, VR::IS, PrimitiveValue::from((slice + 1).to_string())),
            DataElement::new(tags::IMAGE_POSITION_PATIENT, VR::DS, strs(&position)),
            DataElement::new(
                tags::IMAGE_ORIENTATION_PATIENT,
                VR::DS,
                strs(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            ),
            DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
            DataElement::new(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, PrimitiveValue::from("MONOCHROME2")),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(spec.rows)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(spec.columns)),
            DataElement::new(tags::PIXEL_SPACING, VR::DS, strs(&spec.spacing[..2])),
            DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
            DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
            DataElement::new(tags::RESCALE_INTERCEPT, VR::DS, strs(&[-1000.0])),
            DataElement::new(tags::RESCALE_SLOPE, VR::DS, strs(&[1.0])),
            DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(bytes)),
        ]);

        let file = object
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid(instance_uid.as_str()),
            )
            .expect("file meta should be valid");

        let name = format!("{}-{:03}.dcm", spec.uid, spec.slices - slice);
        file.write_to_file(dir.join(name))
            .expect("slice should be written");
    }
}

/// Collects events emitted by a worker.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<ConversionEvent>>>,
}

impl Recorder {
    pub fn sink(&self) -> impl Fn(ConversionEvent) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |event| events.lock().expect("recorder lock").push(event)
    }

    pub fn events(&self) -> Vec<ConversionEvent> {
        self.events.lock().expect("recorder lock").clone()
    }
}
