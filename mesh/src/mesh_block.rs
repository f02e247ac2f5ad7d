//! A single leaf of the refinement tree: indices, physics, neighbors, and
//! per-step task bookkeeping (§3).

use crate::logical_location::LogicalLocation;
use crate::neighbor::NeighborTable;
use crate::physics::PhysicsHooks;
use crate::region::{BoundaryTags, RegionSize};

/// Fixed ghost-zone width on every face of every block (§3).
pub const NGHOST: i32 = 2;

/// The number of 64-bit words in a block's task-completion bitset, giving
/// up to 256 distinct tasks per step (§4.5).
const TASK_BITSET_WORDS: usize = 4;

/// The inclusive-exclusive cell-index window of a block's interior, plus
/// its ghost margin (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellWindow {
    pub is: i32,
    pub ie: i32,
    pub js: i32,
    pub je: i32,
    pub ks: i32,
    pub ke: i32,
}

impl CellWindow {
    /// Builds the interior window for a block of the given active cell
    /// counts, padded by `NGHOST` on every active axis.
    pub fn new(nx1: i32, nx2: i32, nx3: i32) -> Self {
        CellWindow {
            is: NGHOST,
            ie: NGHOST + nx1 - 1,
            js: if nx2 > 1 { NGHOST } else { 0 },
            je: if nx2 > 1 { NGHOST + nx2 - 1 } else { 0 },
            ks: if nx3 > 1 { NGHOST } else { 0 },
            ke: if nx3 > 1 { NGHOST + nx3 - 1 } else { 0 },
        }
    }

    /// The coarsened window used for multilevel prolongation: half the
    /// interior plus `(NGHOST+1)/2 + 1` ghosts on each active axis (§3).
    pub fn coarse(&self, nx2_active: bool, nx3_active: bool) -> CellWindow {
        let cng = (NGHOST + 1) / 2 + 1;
        let half = |s: i32, e: i32| ((e - s + 1) / 2, cng);
        let (n1, g1) = half(self.is, self.ie);
        CellWindow {
            is: g1,
            ie: g1 + n1 - 1,
            js: if nx2_active { g1 } else { 0 },
            je: if nx2_active { g1 + half(self.js, self.je).0 - 1 } else { 0 },
            ks: if nx3_active { g1 } else { 0 },
            ke: if nx3_active { g1 + half(self.ks, self.ke).0 - 1 } else { 0 },
        }
    }
}

/// A four-word bitset tracking which of a block's declared tasks have
/// completed this step (§4.5, §9: "cooperative task re-entry").
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskBitset([u64; TASK_BITSET_WORDS]);

impl TaskBitset {
    pub fn clear(&mut self) {
        self.0 = [0; TASK_BITSET_WORDS];
    }

    pub fn is_set(&self, task: u32) -> bool {
        let (word, bit) = (task as usize / 64, task % 64);
        self.0[word] & (1 << bit) != 0
    }

    pub fn set(&mut self, task: u32) {
        let (word, bit) = (task as usize / 64, task % 64);
        self.0[word] |= 1 << bit;
    }

    pub fn count_set(&self) -> u32 {
        self.0.iter().map(|w| w.count_ones()).sum()
    }
}

/// One leaf of the refinement tree, owned exclusively by its rank (§3, §5).
pub struct MeshBlock {
    pub gid: i32,
    pub loc: LogicalLocation,
    pub size: RegionSize,
    pub boundary_tags: BoundaryTags,
    pub window: CellWindow,
    pub coarse_window: Option<CellWindow>,
    pub cost: f64,
    pub neighbors: NeighborTable,
    pub physics: Box<dyn PhysicsHooks>,
    pub tasks_done: TaskBitset,
    pub num_tasks_todo: u32,
    pub dt: f64,
}

impl MeshBlock {
    pub fn new(
        gid: i32,
        loc: LogicalLocation,
        size: RegionSize,
        boundary_tags: BoundaryTags,
        neighbors: NeighborTable,
        physics: Box<dyn PhysicsHooks>,
        multilevel: bool,
    ) -> Self {
        let window = CellWindow::new(size.nx1, size.nx2, size.nx3);
        let coarse_window = multilevel.then(|| window.coarse(size.nx2 > 1, size.nx3 > 1));
        MeshBlock {
            gid,
            loc,
            size,
            boundary_tags,
            window,
            coarse_window,
            cost: 1.0,
            neighbors,
            physics,
            tasks_done: TaskBitset::default(),
            num_tasks_todo: 0,
            dt: f64::INFINITY,
        }
    }

    pub fn reset_task_state(&mut self, num_tasks: u32) {
        self.tasks_done.clear();
        self.num_tasks_todo = num_tasks;
    }

    pub fn is_step_complete(&self) -> bool {
        self.tasks_done.count_set() >= self.num_tasks_todo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_window_includes_ghosts() {
        let w = CellWindow::new(8, 8, 1);
        assert_eq!(w.is, NGHOST);
        assert_eq!(w.ie, NGHOST + 7);
        assert_eq!(w.js, NGHOST);
        assert_eq!(w.ks, 0);
        assert_eq!(w.ke, 0);
    }

    #[test]
    fn task_bitset_tracks_completion() {
        let mut bits = TaskBitset::default();
        assert_eq!(bits.count_set(), 0);
        bits.set(5);
        bits.set(200);
        assert!(bits.is_set(5));
        assert!(bits.is_set(200));
        assert!(!bits.is_set(6));
        assert_eq!(bits.count_set(), 2);
        bits.clear();
        assert_eq!(bits.count_set(), 0);
    }
}
