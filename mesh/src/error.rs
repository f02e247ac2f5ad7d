//! The core's single error taxonomy (§7). Every fallible entry point
//! returns `Result<T, MeshError>`; there is no string-parsing of error
//! messages by callers.

use thiserror::Error;

/// Invalid or inconsistent input configuration (§4.4 step 1, §4.8).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("mesh extents invalid: x{{1,2,3}}max must exceed x{{1,2,3}}min")]
    InvalidExtents,

    #[error("nx3 > 1 requires nx2 > 1")]
    InvalidDimensionality,

    #[error("cell count on axis {dim} is {nx}, must be >= 4")]
    CellCountTooSmall { dim: i32, nx: i32 },

    #[error("stretch ratio on axis {dim} is {rat}, must be in [0.9, 1.1]")]
    StretchRatioOutOfRange { dim: i32, rat: f64 },

    #[error("cfl_number {cfl} exceeds the limit of {limit} for a {dim}-d mesh")]
    CflTooLarge { cfl: f64, limit: f64, dim: i32 },

    #[error("mesh.num_threads must be >= 1, got {0}")]
    InvalidThreadCount(i32),

    #[error("meshblock.nx{dim} = {block_nx} does not divide mesh.nx{dim} = {mesh_nx}")]
    BlockSizeDoesNotDivideMesh { dim: i32, block_nx: i32, mesh_nx: i32 },

    #[error("multilevel refinement requires even block extents, got nx{dim} = {nx}")]
    OddBlockExtentUnderMultilevel { dim: i32, nx: i32 },

    #[error("refinement level {level} exceeds the maximum of {max}")]
    LevelExceedsMaximum { level: i32, max: i32 },

    #[error("refinement region '{name}' lies outside the mesh domain")]
    RefinementRegionOutsideMesh { name: String },

    #[error("failed to parse input configuration: {0}")]
    Parse(String),
}

/// `nbtotal < nranks` (§4.3).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{nbtotal} blocks cannot be distributed across {nranks} ranks")]
pub struct InsufficientBlocks {
    pub nbtotal: i32,
    pub nranks: i32,
}

/// A short read or tree-shape mismatch while reconstructing from a restart
/// file (§4.4, §7).
#[derive(Debug, Error)]
pub enum CorruptedRestart {
    #[error("unexpected end of file reading {what} (needed {needed} bytes, got {got})")]
    ShortRead { what: &'static str, needed: usize, got: usize },

    #[error("restart header claims {nbtotal} blocks but the rebuilt tree has {rebuilt} leaves")]
    LeafCountMismatch { nbtotal: i32, rebuilt: i32 },

    #[error("restart record references an invalid logical location: {0:?}")]
    InvalidLocation(crate::logical_location::LogicalLocation),
}

/// The core's single error type. Variants group by §7's taxonomy; each
/// wraps the detail enum/struct for that category so match arms stay
/// specific without a combinatorial flat enum.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capacity(#[from] InsufficientBlocks),

    #[error(transparent)]
    CorruptedRestart(#[from] CorruptedRestart),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MeshResult<T> = Result<T, MeshError>;
