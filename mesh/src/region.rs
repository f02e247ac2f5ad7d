//! Physical extents and boundary tagging for a mesh or a block.

use serde::Deserialize;

use crate::error::{ConfigError, MeshError};

/// Physical extents, cell counts, and stretch ratios of a mesh or block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionSize {
    pub x1min: f64,
    pub x1max: f64,
    pub x2min: f64,
    pub x2max: f64,
    pub x3min: f64,
    pub x3max: f64,
    pub nx1: i32,
    pub nx2: i32,
    pub nx3: i32,
    pub x1rat: f64,
    pub x2rat: f64,
    pub x3rat: f64,
}

impl RegionSize {
    /// `dim = 1 + (nx2>1) + (nx3>1)`; `nx3>1` with `nx2=1` is invalid, and is
    /// checked by [`RegionSize::validate`] rather than here so callers can
    /// still ask a region its dimensionality before validating it.
    pub fn dim(&self) -> i32 {
        1 + i32::from(self.nx2 > 1) + i32::from(self.nx3 > 1)
    }

    pub fn nx(&self, d: usize) -> i32 {
        match d {
            1 => self.nx1,
            2 => self.nx2,
            3 => self.nx3,
            _ => panic!("dimension index must be 1, 2, or 3"),
        }
    }

    pub fn min(&self, d: usize) -> f64 {
        match d {
            1 => self.x1min,
            2 => self.x2min,
            3 => self.x3min,
            _ => panic!("dimension index must be 1, 2, or 3"),
        }
    }

    pub fn max(&self, d: usize) -> f64 {
        match d {
            1 => self.x1max,
            2 => self.x2max,
            3 => self.x3max,
            _ => panic!("dimension index must be 1, 2, or 3"),
        }
    }

    pub fn rat(&self, d: usize) -> f64 {
        match d {
            1 => self.x1rat,
            2 => self.x2rat,
            3 => self.x3rat,
            _ => panic!("dimension index must be 1, 2, or 3"),
        }
    }

    /// Validates the invariants from §3: `xd_max > xd_min`, stretch ratios
    /// in `[0.9, 1.1]`, `nx1 >= 4`, and any active `nx2`/`nx3` also `>= 4`.
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.x1max <= self.x1min || self.x2max <= self.x2min || self.x3max <= self.x3min {
            return Err(ConfigError::InvalidExtents.into());
        }
        if self.nx3 > 1 && self.nx2 <= 1 {
            return Err(ConfigError::InvalidDimensionality.into());
        }
        if self.nx1 < 4 {
            return Err(ConfigError::CellCountTooSmall { dim: 1, nx: self.nx1 }.into());
        }
        if self.nx2 > 1 && self.nx2 < 4 {
            return Err(ConfigError::CellCountTooSmall { dim: 2, nx: self.nx2 }.into());
        }
        if self.nx3 > 1 && self.nx3 < 4 {
            return Err(ConfigError::CellCountTooSmall { dim: 3, nx: self.nx3 }.into());
        }
        for (d, rat) in [(1, self.x1rat), (2, self.x2rat), (3, self.x3rat)] {
            if !(0.9..=1.1).contains(&rat) {
                return Err(ConfigError::StretchRatioOutOfRange { dim: d, rat }.into());
            }
        }
        Ok(())
    }
}

/// One of the six faces of a block or the mesh, and the boundary condition
/// applied there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryTag {
    Reflecting,
    Outflow,
    Periodic,
    User,
    Polar,
    /// Shared with another block rather than the domain edge. Never
    /// appears in the input configuration; assigned internally when a
    /// face's neighbor is resolved to another leaf.
    Internal,
}

impl BoundaryTag {
    pub fn connects_across_domain_edge(&self) -> bool {
        matches!(self, BoundaryTag::Periodic | BoundaryTag::Polar)
    }
}

/// The six face tags of a mesh or block, in `ix1, ox1, ix2, ox2, ix3, ox3`
/// order (inner/outer face per axis).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryTags {
    pub ix1: BoundaryTag,
    pub ox1: BoundaryTag,
    pub ix2: BoundaryTag,
    pub ox2: BoundaryTag,
    pub ix3: BoundaryTag,
    pub ox3: BoundaryTag,
}

impl BoundaryTags {
    pub fn face(&self, dim: usize, inner: bool) -> BoundaryTag {
        match (dim, inner) {
            (1, true) => self.ix1,
            (1, false) => self.ox1,
            (2, true) => self.ix2,
            (2, false) => self.ox2,
            (3, true) => self.ix3,
            (3, false) => self.ox3,
            _ => panic!("dimension index must be 1, 2, or 3"),
        }
    }
}

/// Monotonic mapping from a fractional position within the root domain to a
/// physical coordinate, per axis. Supplied by a downstream crate; the core
/// only consumes this trait (§6).
pub trait MeshGenerator: Send + Sync {
    fn x1(&self, r: f64, size: &RegionSize) -> f64;
    fn x2(&self, r: f64, size: &RegionSize) -> f64;
    fn x3(&self, r: f64, size: &RegionSize) -> f64;
}

/// Linear-spacing generator honoring `xd_rat`; the default used when no
/// problem-specific coordinate generator is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformMeshGenerator;

impl UniformMeshGenerator {
    /// Geometric spacing, reducing to uniform spacing as `rat -> 1`.
    fn coord(r: f64, min: f64, max: f64, rat: f64) -> f64 {
        if (rat - 1.0).abs() < 1e-12 {
            min + r * (max - min)
        } else {
            min + (max - min) * (rat.powf(r) - 1.0) / (rat - 1.0)
        }
    }
}

impl MeshGenerator for UniformMeshGenerator {
    fn x1(&self, r: f64, size: &RegionSize) -> f64 {
        Self::coord(r, size.x1min, size.x1max, size.x1rat)
    }
    fn x2(&self, r: f64, size: &RegionSize) -> f64 {
        Self::coord(r, size.x2min, size.x2max, size.x2rat)
    }
    fn x3(&self, r: f64, size: &RegionSize) -> f64 {
        Self::coord(r, size.x3min, size.x3max, size.x3rat)
    }
}
