use ndarray::Array3;
use thiserror::Error;

/// Axis directions in physical space. Column `d` is the direction of index
/// axis `d` (x, y, z), i.e. `direction[row][d]`.
pub type Direction = [[f64; 3]; 3];

pub const IDENTITY_DIRECTION: Direction = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

#[derive(Debug, Error, PartialEq)]
pub enum VolumeError {
    #[error("Volume has an empty dimension: {0:?}")]
    EmptyDimension([usize; 3]),

    #[error("Spacing along axis {axis} must be positive and finite, got {value}")]
    InvalidSpacing { axis: usize, value: f64 },
}

/// A dense 3D scalar volume with its physical geometry.
///
/// Samples are stored as `(z, y, x)` so that one slice is a contiguous
/// `(y, x)` plane; all geometry arrays are in `(x, y, z)` order.
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Array3<f32>,
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    pub direction: Direction,
}

impl Volume {
    /// Create a volume at the physical origin with identity direction.
    ///
    /// # Errors
    ///
    /// Returns an error if any dimension is zero or any spacing is not
    /// strictly positive.
    pub fn new(data: Array3<f32>, spacing: [f64; 3]) -> Result<Self, VolumeError> {
        let (depth, height, width) = data.dim();
        if depth == 0 || height == 0 || width == 0 {
            return Err(VolumeError::EmptyDimension([width, height, depth]));
        }
        validate_spacing(spacing)?;

        Ok(Self {
            data,
            spacing,
            origin: [0.0; 3],
            direction: IDENTITY_DIRECTION,
        })
    }

    #[must_use]
    pub fn with_origin(mut self, origin: [f64; 3]) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Voxel counts in `(x, y, z)` order.
    pub fn size(&self) -> [usize; 3] {
        let (depth, height, width) = self.data.dim();
        [width, height, depth]
    }

    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }

    /// Physical position of the center of voxel `index` (`x, y, z`).
    /// Fractional indices are allowed.
    pub fn index_to_physical(&self, index: [f64; 3]) -> [f64; 3] {
        let mut point = self.origin;
        for (row, coordinate) in point.iter_mut().enumerate() {
            for axis in 0..3 {
                *coordinate += self.direction[row][axis] * self.spacing[axis] * index[axis];
            }
        }
        point
    }

    /// Physical length covered along each index axis, measured from the
    /// outer faces of the boundary voxels.
    pub fn physical_extent(&self) -> [f64; 3] {
        let size = self.size();
        std::array::from_fn(|axis| size[axis] as f64 * self.spacing[axis])
    }
}

pub(crate) fn validate_spacing(spacing: [f64; 3]) -> Result<(), VolumeError> {
    for (axis, &value) in spacing.iter().enumerate() {
        if !(value.is_finite() && value > 0.0) {
            return Err(VolumeError::InvalidSpacing { axis, value });
        }
    }
    Ok(())
}
