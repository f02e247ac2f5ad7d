//! The per-step task-graph driver (§4.5: `UpdateOneStep`).
//!
//! Scheduling is single-threaded and cooperative per rank: the engine
//! round-robins over local blocks, invoking one task-list step on each,
//! leaving a block that suspends (awaiting an incoming boundary buffer)
//! for the next round rather than blocking on it (§5, §9: "Cooperative task
//! re-entry").

use tracing::debug;

use crate::mesh_block::MeshBlock;

/// A block's status after one invocation of [`TaskList::do_one_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The block has at least one task still pending (it may have
    /// suspended waiting on a boundary buffer, or simply has more tasks
    /// left for this step).
    InProgress,
    /// Every task declared for this block has completed this step.
    Complete,
}

/// A declared, ordered set of per-block tasks, injected into the engine
/// (§4.5). A concrete implementation (supplied by a downstream physics
/// crate) encodes intra-block task dependencies; the engine itself knows
/// nothing about what a task does, only whether the block as a whole is
/// done.
pub trait TaskList: Send + Sync {
    /// How many distinct tasks this list declares per block; arms the
    /// block's completion bitset capacity for the step.
    fn num_tasks(&self) -> u32;

    /// Runs one step of this block's task graph (whichever task is next
    /// runnable, honoring the list's own dependency order) and reports
    /// whether the block is now fully done for this step.
    fn do_one_task(&self, block: &mut MeshBlock) -> TaskStatus;

    /// Arms this block's neighbor receive intents ahead of the step (e.g.
    /// posting asynchronous boundary receives). No-op by default; a list
    /// backed by real point-to-point communication overrides this.
    fn arm_receive_intents(&self, _block: &mut MeshBlock) {}

    /// Clears this block's receive intents once every local block has
    /// completed the step.
    fn clear_receive_intents(&self, _block: &mut MeshBlock) {}
}

/// A minimal [`TaskList`] of exactly one task — `step_advance` — used by
/// tests and by binaries that only exercise the mesh subsystem (mirrors
/// [`crate::physics::NullPhysics`]).
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleStageTaskList;

impl TaskList for SingleStageTaskList {
    fn num_tasks(&self) -> u32 {
        1
    }

    fn do_one_task(&self, block: &mut MeshBlock) -> TaskStatus {
        use crate::physics::StepOutcome;
        match block.physics.step_advance() {
            StepOutcome::Complete => {
                block.tasks_done.set(0);
                TaskStatus::Complete
            }
            StepOutcome::AwaitingBoundary => TaskStatus::InProgress,
        }
    }
}

/// The single-step driver (§4.5).
pub struct TaskEngine;

impl TaskEngine {
    /// Drives every block in `blocks` through `task_list` to completion.
    /// Returns the number of scheduling rounds it took, mostly useful for
    /// tests and diagnostics.
    pub fn update_one_step(blocks: &mut [MeshBlock], task_list: &dyn TaskList) -> u32 {
        let num_tasks = task_list.num_tasks();
        for block in blocks.iter_mut() {
            block.reset_task_state(num_tasks);
            task_list.arm_receive_intents(block);
        }

        let mut done = vec![false; blocks.len()];
        let mut remaining = blocks.len();
        let mut rounds = 0u32;

        while remaining > 0 {
            rounds += 1;
            for (i, block) in blocks.iter_mut().enumerate() {
                if done[i] {
                    continue;
                }
                if task_list.do_one_task(block) == TaskStatus::Complete {
                    done[i] = true;
                    remaining -= 1;
                }
            }
            debug_assert!(rounds < 1_000_000, "task engine made no progress for an implausible number of rounds");
        }

        for block in blocks.iter_mut() {
            task_list.clear_receive_intents(block);
        }
        debug!(nblocks = blocks.len(), rounds, "step complete");
        rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical_location::LogicalLocation;
    use crate::neighbor::NeighborTable;
    use crate::physics::NullPhysics;
    use crate::region::{BoundaryTag, BoundaryTags, RegionSize};

    fn sample_block(gid: i32) -> MeshBlock {
        let size = RegionSize {
            x1min: 0.0,
            x1max: 1.0,
            x2min: 0.0,
            x2max: 1.0,
            x3min: 0.0,
            x3max: 1.0,
            nx1: 8,
            nx2: 8,
            nx3: 1,
            x1rat: 1.0,
            x2rat: 1.0,
            x3rat: 1.0,
        };
        let bcs = BoundaryTags {
            ix1: BoundaryTag::Outflow,
            ox1: BoundaryTag::Outflow,
            ix2: BoundaryTag::Outflow,
            ox2: BoundaryTag::Outflow,
            ix3: BoundaryTag::Outflow,
            ox3: BoundaryTag::Outflow,
        };
        MeshBlock::new(
            gid,
            LogicalLocation::root(),
            size,
            bcs,
            NeighborTable { neighbors: vec![], nblevel: [[[-1; 3]; 3]; 3] },
            Box::new(NullPhysics::with_dt(0.1)),
            false,
        )
    }

    #[test]
    fn single_stage_list_completes_every_block_in_one_round() {
        let mut blocks = vec![sample_block(0), sample_block(1)];
        let rounds = TaskEngine::update_one_step(&mut blocks, &SingleStageTaskList);
        assert_eq!(rounds, 1);
        for block in &blocks {
            assert!(block.is_step_complete());
        }
    }

    struct SuspendOnceTaskList;
    impl TaskList for SuspendOnceTaskList {
        fn num_tasks(&self) -> u32 {
            1
        }
        fn do_one_task(&self, block: &mut MeshBlock) -> TaskStatus {
            if block.tasks_done.is_set(1) {
                block.tasks_done.set(0);
                TaskStatus::Complete
            } else {
                block.tasks_done.set(1); // mark "has suspended once" using a spare bit
                TaskStatus::InProgress
            }
        }
    }

    #[test]
    fn a_block_that_suspends_is_revisited_next_round() {
        let mut blocks = vec![sample_block(0)];
        let rounds = TaskEngine::update_one_step(&mut blocks, &SuspendOnceTaskList);
        assert_eq!(rounds, 2);
        assert!(blocks[0].is_step_complete());
    }
}
