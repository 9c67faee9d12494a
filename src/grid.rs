//! Sparse voxel grids and their on-disk container.
//!
//! A [`SparseGrid`] stores only voxels that differ from its background, in
//! 8x8x8 leaf blocks keyed by the block's origin. Each leaf carries a
//! 512-bit activity mask next to its values, the same layout hierarchical
//! sparse volume formats use at their finest level.
//!
//! Writing goes through the [`GridWriter`] trait; [`GridFile`] is the
//! bundled container format (serde + bincode) and can read its own files
//! back.

use crate::volume::Volume;

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};
use thiserror::Error;
use tracing::{debug, info};

/// Integer voxel coordinate `(x, y, z)`.
pub type Coord = [i32; 3];

/// Name given to grids holding scalar density samples.
pub const DENSITY_GRID_NAME: &str = "density";

/// File extension of [`GridFile`] containers.
pub const GRID_FILE_EXTENSION: &str = "sgrid";

const LEAF_LOG2_DIM: u32 = 3;
const LEAF_DIM: i32 = 1 << LEAF_LOG2_DIM;
const LEAF_VOXELS: usize = 1 << (3 * LEAF_LOG2_DIM);
const LEAF_MASK_WORDS: usize = LEAF_VOXELS / 64;

const MAGIC: [u8; 8] = *b"SPGRID\0\x01";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("Cannot write grid file {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Not a grid file")]
    BadMagic,

    #[error("Unsupported grid file version {0}")]
    UnsupportedVersion(u32),

    #[error("Voxel index {0:?} does not fit a grid coordinate")]
    CoordinateOverflow([usize; 3]),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LeafNode {
    mask: [u64; LEAF_MASK_WORDS],
    values: Vec<f32>,
}

impl LeafNode {
    fn new(background: f32) -> Self {
        Self {
            mask: [0; LEAF_MASK_WORDS],
            values: vec![background; LEAF_VOXELS],
        }
    }

    fn is_active(&self, offset: usize) -> bool {
        self.mask[offset / 64] & (1 << (offset % 64)) != 0
    }

    fn activate(&mut self, offset: usize) {
        self.mask[offset / 64] |= 1 << (offset % 64);
    }

    fn active_count(&self) -> usize {
        self.mask.iter().map(|word| word.count_ones() as usize).sum()
    }
}

/// A named scalar grid with an implicit background value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseGrid {
    name: String,
    background: f32,
    leaves: BTreeMap<Coord, LeafNode>,
}

impl SparseGrid {
    pub fn new(name: impl Into<String>, background: f32) -> Self {
        Self {
            name: name.into(),
            background,
            leaves: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn background(&self) -> f32 {
        self.background
    }

    /// Store `value` at `coord` and mark the voxel active.
    pub fn set_value(&mut self, coord: Coord, value: f32) {
        let (origin, offset) = split(coord);
        let background = self.background;
        let leaf = self
            .leaves
            .entry(origin)
            .or_insert_with(|| LeafNode::new(background));
        leaf.values[offset] = value;
        leaf.activate(offset);
    }

    /// Value at `coord`, or `None` if the voxel is not active.
    pub fn probe_value(&self, coord: Coord) -> Option<f32> {
        let (origin, offset) = split(coord);
        let leaf = self.leaves.get(&origin)?;
        leaf.is_active(offset).then(|| leaf.values[offset])
    }

    /// Value at `coord`, the background for inactive voxels.
    pub fn value(&self, coord: Coord) -> f32 {
        self.probe_value(coord).unwrap_or(self.background)
    }

    pub fn active_voxel_count(&self) -> usize {
        self.leaves.values().map(LeafNode::active_count).sum()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// All active voxels, leaf by leaf.
    pub fn iter_active(&self) -> impl Iterator<Item = (Coord, f32)> + '_ {
        self.leaves.iter().flat_map(|(origin, leaf)| {
            (0..LEAF_VOXELS)
                .filter(|&offset| leaf.is_active(offset))
                .map(move |offset| (join(*origin, offset), leaf.values[offset]))
        })
    }

    /// Inclusive min and max coordinates of the active voxels.
    pub fn bounding_box(&self) -> Option<(Coord, Coord)> {
        self.iter_active().fold(None, |bounds, (coord, _)| {
            let (mut min, mut max) = bounds.unwrap_or((coord, coord));
            for axis in 0..3 {
                min[axis] = min[axis].min(coord[axis]);
                max[axis] = max[axis].max(coord[axis]);
            }
            Some((min, max))
        })
    }
}

fn split(coord: Coord) -> (Coord, usize) {
    let origin = coord.map(|c| c & !(LEAF_DIM - 1));
    let local = coord.map(|c| (c & (LEAF_DIM - 1)) as usize);
    let offset = (local[0] << (2 * LEAF_LOG2_DIM)) | (local[1] << LEAF_LOG2_DIM) | local[2];
    (origin, offset)
}

fn join(origin: Coord, offset: usize) -> Coord {
    let mask = (LEAF_DIM - 1) as usize;
    [
        origin[0] + ((offset >> (2 * LEAF_LOG2_DIM)) & mask) as i32,
        origin[1] + ((offset >> LEAF_LOG2_DIM) & mask) as i32,
        origin[2] + (offset & mask) as i32,
    ]
}

/// Sparse copy of a dense volume: every non-zero sample becomes an active
/// voxel at its `(x, y, z)` index, zero is the background.
///
/// # Errors
///
/// Returns an error if the volume is too large for 32-bit coordinates.
pub fn pack(volume: &Volume, name: &str) -> Result<SparseGrid, GridError> {
    let (depth, height, width) = volume.dim();
    if [width, height, depth].iter().any(|&n| i32::try_from(n).is_err()) {
        return Err(GridError::CoordinateOverflow([width, height, depth]));
    }

    let mut grid = SparseGrid::new(name, 0.0);
    for ((z, y, x), &value) in volume.data.indexed_iter() {
        if value != 0.0 {
            grid.set_value([x as i32, y as i32, z as i32], value);
        }
    }
    debug!(
        active = grid.active_voxel_count(),
        total = volume.voxel_count(),
        leaves = grid.leaf_count(),
        "volume packed"
    );
    Ok(grid)
}

/// Pack `volume` into a density grid and hand it to `writer`.
///
/// # Errors
///
/// Returns an error if packing fails or the writer cannot create `path`.
pub fn pack_and_write(
    volume: Volume,
    path: &Path,
    writer: &dyn GridWriter,
) -> Result<SparseGrid, GridError> {
    let grid = pack(&volume, DENSITY_GRID_NAME)?;
    drop(volume);
    writer.write(path, std::slice::from_ref(&grid))?;
    Ok(grid)
}

/// Serializes grids to a single file.
pub trait GridWriter: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if `path` cannot be created or written.
    fn write(&self, path: &Path, grids: &[SparseGrid]) -> Result<(), GridError>;
}

#[derive(Serialize, Deserialize)]
struct Header {
    magic: [u8; 8],
    version: u32,
}

/// Bundled grid container: a magic header followed by the bincode-encoded
/// grids.
#[derive(Debug, Default, Clone, Copy)]
pub struct GridFile;

impl GridFile {
    /// Read every grid stored in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a grid file.
    pub fn read(path: &Path) -> Result<Vec<SparseGrid>, GridError> {
        let mut reader = BufReader::new(File::open(path)?);
        let header: Header = bincode::deserialize_from(&mut reader)?;
        if header.magic != MAGIC {
            return Err(GridError::BadMagic);
        }
        if header.version != FORMAT_VERSION {
            return Err(GridError::UnsupportedVersion(header.version));
        }
        Ok(bincode::deserialize_from(&mut reader)?)
    }
}

impl GridWriter for GridFile {
    fn write(&self, path: &Path, grids: &[SparseGrid]) -> Result<(), GridError> {
        let file = File::create(path).map_err(|source| GridError::Create {
            path: path.display().to_string(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            magic: MAGIC,
            version: FORMAT_VERSION,
        };
        bincode::serialize_into(&mut writer, &header)?;
        bincode::serialize_into(&mut writer, grids)?;
        writer.flush()?;

        info!(
            path = %path.display(),
            grids = grids.len(),
            active_voxels = grids.iter().map(SparseGrid::active_voxel_count).sum::<usize>(),
            "grid file written"
        );
        Ok(())
    }
}
