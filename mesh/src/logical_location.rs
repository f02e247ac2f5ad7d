//! Addressing of blocks within the refinement tree.

use std::cmp::Ordering;

use memoffset::offset_of;
use mpi::datatype::{Equivalence, UncommittedUserDatatype, UserDatatype};
use mpi::Address;

/// Maximum refinement level a [`LogicalLocation`] may name.
pub const MAX_LEVEL: i32 = 63;

/// A block's position in the refinement tree: its level and its integer
/// coordinate in each dimension at that level.
///
/// Mirrors the source's packed Morton key (`morton::Key`, `find_level`,
/// `find_parent`, `find_siblings`), but stores the four fields unpacked
/// instead of bit-interleaved into a single `u64`. The source's packed
/// encoding reserves 4 bits for level, which caps depth at 15; this core
/// needs levels up to 63, so the fields are kept explicit and the Morton
/// comparison is computed on demand in [`Ord`] rather than baked into the
/// key's bit layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LogicalLocation {
    pub level: i32,
    pub lx1: i64,
    pub lx2: i64,
    pub lx3: i64,
}

unsafe impl Equivalence for LogicalLocation {
    type Out = UserDatatype;
    fn equivalent_datatype() -> Self::Out {
        UserDatatype::structured(
            &[1, 1, 1, 1],
            &[
                offset_of!(LogicalLocation, level) as Address,
                offset_of!(LogicalLocation, lx1) as Address,
                offset_of!(LogicalLocation, lx2) as Address,
                offset_of!(LogicalLocation, lx3) as Address,
            ],
            &[
                UncommittedUserDatatype::contiguous(1, &i32::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &i64::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &i64::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &i64::equivalent_datatype()).as_ref(),
            ],
        )
    }
}

impl LogicalLocation {
    pub fn root() -> Self {
        LogicalLocation { level: 0, lx1: 0, lx2: 0, lx3: 0 }
    }

    pub fn new(level: i32, lx1: i64, lx2: i64, lx3: i64) -> Self {
        LogicalLocation { level, lx1, lx2, lx3 }
    }

    /// The parent location, one level coarser. Panics at the root; callers
    /// are expected to check `level > 0` first (mirrors `find_parent`,
    /// which is likewise only meaningful below the root).
    pub fn parent(&self) -> LogicalLocation {
        assert!(self.level > 0, "root location has no parent");
        LogicalLocation {
            level: self.level - 1,
            lx1: self.lx1 >> 1,
            lx2: self.lx2 >> 1,
            lx3: self.lx3 >> 1,
        }
    }

    /// The 2^dim children one level finer. `dim` selects how many axes
    /// actually split (mirrors `find_children`/`find_siblings`, generalized
    /// to 1D/2D/3D instead of always assuming three active axes).
    pub fn children(&self, dim: i32) -> Vec<LogicalLocation> {
        let child_level = self.level + 1;
        let mut out = Vec::with_capacity(1 << dim);
        let i_range = 0..=1i64;
        let j_range = if dim >= 2 { 0..=1i64 } else { 0..=0i64 };
        let k_range = if dim >= 3 { 0..=1i64 } else { 0..=0i64 };
        for k in k_range.clone() {
            for j in j_range.clone() {
                for i in i_range.clone() {
                    out.push(LogicalLocation {
                        level: child_level,
                        lx1: (self.lx1 << 1) | i,
                        lx2: (self.lx2 << 1) | j,
                        lx3: (self.lx3 << 1) | k,
                    });
                }
            }
        }
        out
    }

    /// Which octant of its parent this location occupies, as (i, j, k) each
    /// in {0, 1}.
    pub fn octant(&self) -> (i64, i64, i64) {
        (self.lx1 & 1, self.lx2 & 1, self.lx3 & 1)
    }

    /// True if `ancestor` is a (possibly non-strict) ancestor of `self`.
    pub fn is_descendant_of(&self, ancestor: &LogicalLocation) -> bool {
        if ancestor.level > self.level {
            return false;
        }
        let shift = self.level - ancestor.level;
        (self.lx1 >> shift) == ancestor.lx1
            && (self.lx2 >> shift) == ancestor.lx2
            && (self.lx3 >> shift) == ancestor.lx3
    }

    /// Interleave the low `level` bits of `lx1`, `lx2`, `lx3` into a single
    /// Morton code, finest bit first. Adapted from the bit-extraction
    /// approach in `morton::extract`/`_less_than`, generalized from a fixed
    /// 20-bit width to the location's own level.
    fn morton_code(&self) -> u128 {
        let mut code: u128 = 0;
        for bit in (0..self.level).rev() {
            let x = (self.lx1 >> bit) & 1;
            let y = (self.lx2 >> bit) & 1;
            let z = (self.lx3 >> bit) & 1;
            code = (code << 3) | ((z as u128) << 2) | ((y as u128) << 1) | (x as u128);
        }
        code
    }
}

/// Morton order on (lx3, lx2, lx1) within a level, levels descending (finer
/// first) — the balancer's total order (§3).
impl Ord for LogicalLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        // Finer levels sort first.
        match other.level.cmp(&self.level) {
            Ordering::Equal => self.morton_code().cmp(&other.morton_code()),
            ord => ord,
        }
    }
}

impl PartialOrd for LogicalLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
