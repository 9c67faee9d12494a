use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Sampling kernel used when a volume is re-gridded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Trilinear,
    Nearest,
}

/// Order in which the slices of one series are stacked into a volume.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Position along the slice normal, ascending.
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}
