//! Summary statistics of an assembled volume.

use crate::{rescale::IntensityRange, resampler::TargetGeometry, volume::Volume};

use ndarray::parallel::prelude::*;
use serde::{Deserialize, Serialize};

/// What a user needs to pick an intensity window and an output geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeSummary {
    #[serde(rename = "input_min")]
    pub min: f32,
    #[serde(rename = "input_max")]
    pub max: f32,
    /// Voxel counts, `(x, y, z)`.
    #[serde(rename = "input_size")]
    pub size: [usize; 3],
    #[serde(rename = "input_spacing")]
    pub spacing: [f64; 3],
}

impl VolumeSummary {
    /// The input's own range, a neutral default for rescaling.
    pub fn intensity_range(&self) -> IntensityRange {
        IntensityRange {
            min: self.min,
            max: self.max,
        }
    }

    /// Unit-spacing geometry spanning the same physical extent.
    pub fn isotropic_target(&self) -> TargetGeometry {
        TargetGeometry::isotropic(self.size, self.spacing)
    }
}

/// True minimum and maximum sample plus the volume's grid geometry.
/// NaN samples are ignored.
pub fn summarize(volume: &Volume) -> VolumeSummary {
    let (min, max) = intensity_bounds(volume);
    VolumeSummary {
        min,
        max,
        size: volume.size(),
        spacing: volume.spacing,
    }
}

pub(crate) fn intensity_bounds(volume: &Volume) -> (f32, f32) {
    volume
        .data
        .par_iter()
        .fold(
            || (f32::INFINITY, f32::NEG_INFINITY),
            |(min, max), &value| (min.min(value), max.max(value)),
        )
        .reduce(
            || (f32::INFINITY, f32::NEG_INFINITY),
            |a, b| (a.0.min(b.0), a.1.max(b.1)),
        )
}
