//! Re-gridding of a volume onto a new voxel lattice with an identity
//! transform.
//!
//! The output keeps the input's direction cosines, so a tilted acquisition
//! stays tilted. Because both lattices share their axes, the mapping from
//! an output index to an input position is separable and computed once per
//! axis.

use crate::{
    enums::Interpolation,
    interpolator::Interpolator,
    volume::{Volume, VolumeError, validate_spacing},
};

use ndarray::{Array3, Zip};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum ResampleError {
    #[error("Invalid target geometry: voxel counts must be positive, got {0:?}")]
    InvalidCounts([usize; 3]),

    #[error("Invalid target geometry: {0}")]
    InvalidSpacing(#[from] VolumeError),

    #[error("Target geometry {0:?} has too many voxels to allocate")]
    TooLarge([usize; 3]),
}

/// Largest voxel count an `f32` lattice can address.
const MAX_VOXELS: usize = isize::MAX as usize / std::mem::size_of::<f32>();

/// Requested output lattice, in `(x, y, z)` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetGeometry {
    pub counts: [usize; 3],
    pub spacing: [f64; 3],
}

impl TargetGeometry {
    /// # Errors
    ///
    /// Returns an error if a count is zero, the lattice is too large to
    /// allocate or a spacing is not strictly positive.
    pub fn new(counts: [usize; 3], spacing: [f64; 3]) -> Result<Self, ResampleError> {
        let geometry = Self { counts, spacing };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Unit spacing with `round(size * spacing)` voxels per axis.
    pub fn isotropic(size: [usize; 3], spacing: [f64; 3]) -> Self {
        Self::isotropic_with_spacing(size, spacing, 1.0)
    }

    /// Spacing `target_spacing` on every axis, keeping the physical extent.
    pub fn isotropic_with_spacing(size: [usize; 3], spacing: [f64; 3], target_spacing: f64) -> Self {
        Self {
            counts: Interpolator::get_isotropic_dimensions(size, spacing, target_spacing),
            spacing: [target_spacing; 3],
        }
    }

    /// Default target for a volume.
    pub fn isotropic_for(volume: &Volume) -> Self {
        Self::isotropic(volume.size(), volume.spacing)
    }

    /// Total voxel count, saturating at `usize::MAX`.
    pub fn voxel_count(&self) -> usize {
        self.checked_voxel_count().unwrap_or(usize::MAX)
    }

    fn checked_voxel_count(&self) -> Option<usize> {
        self.counts
            .iter()
            .try_fold(1_usize, |total, &count| total.checked_mul(count))
    }

    fn validate(&self) -> Result<(), ResampleError> {
        if self.counts.contains(&0) {
            return Err(ResampleError::InvalidCounts(self.counts));
        }
        match self.checked_voxel_count() {
            Some(total) if total <= MAX_VOXELS => {}
            _ => return Err(ResampleError::TooLarge(self.counts)),
        }
        validate_spacing(self.spacing)?;
        Ok(())
    }
}

/// Origin of the resampled lattice: shifted by half the spacing change
/// along each volume axis so that the outer voxel faces stay put.
pub fn aligned_origin(volume: &Volume, output_spacing: [f64; 3]) -> [f64; 3] {
    let offset: [f64; 3] =
        std::array::from_fn(|axis| 0.5 * (output_spacing[axis] - volume.spacing[axis]));
    let mut origin = volume.origin;
    for (row, coordinate) in origin.iter_mut().enumerate() {
        for axis in 0..3 {
            *coordinate += volume.direction[row][axis] * offset[axis];
        }
    }
    origin
}

/// Resample `volume` onto `target`.
///
/// # Errors
///
/// Returns an error if `target` is not a valid lattice.
pub fn resample(
    volume: Volume,
    target: &TargetGeometry,
    interpolation: Interpolation,
) -> Result<Volume, ResampleError> {
    target.validate()?;
    let [width, height, depth] = target.counts;

    // Allocation failure must surface as an error, not abort the worker.
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(target.voxel_count())
        .map_err(|_| ResampleError::TooLarge(target.counts))?;
    buffer.resize(target.voxel_count(), 0.0_f32);
    let mut output = Array3::from_shape_vec((depth, height, width), buffer)
        .map_err(|_| ResampleError::TooLarge(target.counts))?;

    let input_size = volume.size();
    let samples: [_; 3] = std::array::from_fn(|axis| {
        Interpolator::axis_samples(
            target.counts[axis],
            target.spacing[axis],
            input_size[axis],
            volume.spacing[axis],
            interpolation,
        )
    });
    debug!(
        input = ?input_size,
        output = ?target.counts,
        ?interpolation,
        "resampling"
    );

    let input = volume.data.view();
    let [xs, ys, zs] = &samples;

    Zip::indexed(&mut output).par_for_each(|(z, y, x), value| {
        *value = Interpolator::trilinear_interpolate(&input, zs[z], ys[y], xs[x]);
    });

    let origin = aligned_origin(&volume, target.spacing);
    Ok(Volume::new(output, target.spacing)?
        .with_origin(origin)
        .with_direction(volume.direction))
}
