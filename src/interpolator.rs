use crate::enums::Interpolation;

use ndarray::ArrayView3;

/// Position of one output voxel along one input axis: the two input
/// neighbours and the weight of the upper one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AxisSample {
    pub(crate) lower: usize,
    pub(crate) upper: usize,
    pub(crate) weight: f32,
}

pub(crate) struct Interpolator;

impl Interpolator {
    /// Voxel counts that cover the same physical extent at
    /// `target_spacing`, at least one per axis.
    pub(crate) fn get_isotropic_dimensions(
        size: [usize; 3],
        spacing: [f64; 3],
        target_spacing: f64,
    ) -> [usize; 3] {
        let inv_target = 1.0 / target_spacing; // Multiply instead of divide
        std::array::from_fn(|axis| {
            let count = (size[axis] as f64 * spacing[axis] * inv_target).round();
            count.max(1.0) as usize
        })
    }

    /// Map every output index along one axis onto the input grid.
    ///
    /// The first voxel corners of both grids coincide, so output voxel `i`
    /// sits at continuous input index `((i + 0.5) * out - 0.5 * in) / in`.
    /// Positions past the first or last input voxel clamp to that voxel.
    pub(crate) fn axis_samples(
        output_count: usize,
        output_spacing: f64,
        input_count: usize,
        input_spacing: f64,
        interpolation: Interpolation,
    ) -> Vec<AxisSample> {
        let last = (input_count - 1) as f64;
        (0..output_count)
            .map(|i| {
                let position = ((i as f64 + 0.5) * output_spacing - 0.5 * input_spacing)
                    / input_spacing;
                let position = position.clamp(0.0, last);

                match interpolation {
                    Interpolation::Nearest => {
                        let index = position.round() as usize;
                        AxisSample {
                            lower: index,
                            upper: index,
                            weight: 0.0,
                        }
                    }
                    Interpolation::Trilinear => {
                        let lower = position.floor() as usize;
                        let upper = (lower + 1).min(input_count - 1);
                        AxisSample {
                            lower,
                            upper,
                            weight: (position - lower as f64) as f32,
                        }
                    }
                }
            })
            .collect()
    }

    #[inline]
    pub(crate) fn trilinear_interpolate(
        data: &ArrayView3<f32>,
        z: AxisSample,
        y: AxisSample,
        x: AxisSample,
    ) -> f32 {
        let c00 = Self::lerp(data[[z.lower, y.lower, x.lower]], data[[z.lower, y.lower, x.upper]], x.weight);
        let c01 = Self::lerp(data[[z.lower, y.upper, x.lower]], data[[z.lower, y.upper, x.upper]], x.weight);
        let c10 = Self::lerp(data[[z.upper, y.lower, x.lower]], data[[z.upper, y.lower, x.upper]], x.weight);
        let c11 = Self::lerp(data[[z.upper, y.upper, x.lower]], data[[z.upper, y.upper, x.upper]], x.weight);

        let c0 = Self::lerp(c00, c01, y.weight);
        let c1 = Self::lerp(c10, c11, y.weight);

        Self::lerp(c0, c1, z.weight)
    }

    #[inline]
    fn lerp(a: f32, b: f32, t: f32) -> f32 {
        if t == 0.0 {
            return a;
        }
        a.mul_add(1.0 - t, b * t)
    }
}
