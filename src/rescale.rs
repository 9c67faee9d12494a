//! Min-max normalization of voxel intensities onto a target band.

use crate::{metadata::intensity_bounds, volume::Volume};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum RescaleError {
    #[error("Invalid intensity range [{min}, {max}]: min must not exceed max")]
    InvalidRange { min: f32, max: f32 },
}

/// Output intensity band. `min == max` is allowed and maps everything to
/// one value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityRange {
    pub min: f32,
    pub max: f32,
}

impl IntensityRange {
    /// # Errors
    ///
    /// Returns an error if either bound is not finite or `min > max`.
    pub fn new(min: f32, max: f32) -> Result<Self, RescaleError> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    fn validate(&self) -> Result<(), RescaleError> {
        if self.min.is_finite() && self.max.is_finite() && self.min <= self.max {
            Ok(())
        } else {
            Err(RescaleError::InvalidRange {
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Map the volume's own minimum to `range.min` and its maximum to
/// `range.max`. A constant volume maps entirely to `range.min`.
///
/// # Errors
///
/// Returns an error if `range` is not a valid band.
pub fn rescale(mut volume: Volume, range: IntensityRange) -> Result<Volume, RescaleError> {
    range.validate()?;

    let (input_min, input_max) = intensity_bounds(&volume);
    let input_width = f64::from(input_max) - f64::from(input_min);
    debug!(input_min, input_max, output_min = range.min, output_max = range.max, "rescaling");

    if !(input_width.is_finite() && input_width > 0.0) {
        volume.data.fill(range.min);
        return Ok(volume);
    }

    let scale = (f64::from(range.max) - f64::from(range.min)) / input_width;
    let input_min = f64::from(input_min);
    let output_min = f64::from(range.min);
    volume.data.par_mapv_inplace(|value| {
        let mapped = (f64::from(value) - input_min).mul_add(scale, output_min) as f32;
        mapped.clamp(range.min, range.max)
    });

    Ok(volume)
}
