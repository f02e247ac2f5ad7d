//! Periodic rebalance: refine/derefine flags folded into a new tree shape
//! and rank map (§4.6).
//!
//! Cross-rank agreement on refine flags and costs is reached without a
//! variable-length allgatherv: every rank contributes a full-length,
//! mostly-zero vector indexed by global block id (its own blocks filled
//! in, everything else left at zero), and each position is resolved by
//! reading back the contributing rank's segment via `Mesh::ranklist`
//! (§9, grounded in [`crate::rank_context::Collectives`]).

use std::collections::HashMap;

use tracing::{debug, info};

use crate::load_balancer;
use crate::logical_location::LogicalLocation;
use crate::mesh::{Mesh, PhysicsFactory};
use crate::mesh_block::MeshBlock;
use crate::rank_context::Collectives;

/// A block's requested change this cycle (§3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineFlag {
    Derefine,
    Keep,
    Refine,
}

impl RefineFlag {
    fn as_i32(self) -> i32 {
        match self {
            RefineFlag::Derefine => -1,
            RefineFlag::Keep => 0,
            RefineFlag::Refine => 1,
        }
    }
}

/// Outcome of one call to [`run_cycle`] (§4.6, §7's `RefinementRejected`).
#[derive(Debug, Clone, Default)]
pub struct RefinementSummary {
    pub refined: usize,
    pub derefined: usize,
    pub rejected_two_level_jump: usize,
    pub rejected_incomplete_sibling_group: usize,
}

fn minbl(dim: i32) -> usize {
    1usize << dim
}

/// Gathers a per-global-block i32 vector where each rank has filled in
/// only the positions it owns, resolving every position from its owning
/// rank's contribution (§4.6 step 1/2/4).
fn gather_owned_i32(mesh: &Mesh, collectives: &dyn Collectives, local: &[i32]) -> Vec<i32> {
    let nbtotal = mesh.loclist.len();
    let gathered = collectives.all_gather_i32(local);
    let nranks = gathered.len() / nbtotal.max(1);
    let mut out = vec![0i32; nbtotal];
    for i in 0..nbtotal {
        let owner = mesh.ranklist[i] as usize;
        if owner < nranks {
            out[i] = gathered[owner * nbtotal + i];
        }
    }
    out
}

fn gather_owned_f64(mesh: &Mesh, collectives: &dyn Collectives, local: &[f64]) -> Vec<f64> {
    let nbtotal = mesh.loclist.len();
    let gathered = collectives.all_gather_f64(local);
    let nranks = gathered.len() / nbtotal.max(1);
    let mut out = vec![0.0f64; nbtotal];
    for i in 0..nbtotal {
        let owner = mesh.ranklist[i] as usize;
        if owner < nranks {
            out[i] = gathered[owner * nbtotal + i];
        }
    }
    out
}

/// A representative set of children touching `ox`'s face, used to probe
/// the neighbor level on the other side of a prospective derefinement
/// (§4.6's "two-level jump" rejection).
fn children_touching_face(parent: LogicalLocation, dim: i32, ox1: i64, ox2: i64, ox3: i64) -> Vec<LogicalLocation> {
    parent
        .children(dim)
        .into_iter()
        .filter(|c| {
            let (i, j, k) = c.octant();
            (ox1 == 0 || i == i64::from(ox1 > 0))
                && (ox2 == 0 || j == i64::from(ox2 > 0))
                && (ox3 == 0 || k == i64::from(ox3 > 0))
        })
        .collect()
}

fn would_create_two_level_jump(mesh: &Mesh, parent: LogicalLocation) -> bool {
    let dim = mesh.dim;
    let directions: &[(i64, i64, i64)] = match dim {
        1 => &[(-1, 0, 0), (1, 0, 0)],
        2 => &[(-1, 0, 0), (1, 0, 0), (0, -1, 0), (0, 1, 0)],
        _ => &[(-1, 0, 0), (1, 0, 0), (0, -1, 0), (0, 1, 0), (0, 0, -1), (0, 0, 1)],
    };
    for &(ox1, ox2, ox3) in directions {
        for child in children_touching_face(parent, dim, ox1, ox2, ox3) {
            if let crate::block_tree::Neighbor::CoarserOrEqual(id) | crate::block_tree::Neighbor::Finer(id) =
                mesh.tree.find_neighbor(child, ox1, ox2, ox3, &mesh.mesh_bcs)
            {
                let level = mesh.tree.location(id).level;
                if level > parent.level + 1 {
                    return true;
                }
            }
        }
    }
    false
}

/// Runs one refinement cycle (§4.6). `local_flags` names one flag per
/// entry of `mesh.blocks`, in the same order. `world` carries the
/// point-to-point boundary re-initialization after rebuild; pass `None`
/// for a single-rank run.
pub fn run_cycle(
    mesh: &mut Mesh,
    local_flags: &[RefineFlag],
    collectives: &dyn Collectives,
    world: Option<&mpi::topology::SystemCommunicator>,
    physics_factory: &PhysicsFactory,
) -> RefinementSummary {
    assert_eq!(local_flags.len(), mesh.blocks.len());
    let nbtotal = mesh.loclist.len();
    let dim = mesh.dim;

    // Step 1: the cost allgather is started here and awaited at step 7;
    // there is exactly one build configuration in this core, so — per the
    // Open Question this core resolves — it is always awaited before
    // rebalancing (no MPI/MPI_PARALLEL guard to collapse).
    let mut local_cost = mesh.costlist.clone();
    for block in &mesh.blocks {
        local_cost[block.gid as usize] = block.cost;
    }

    // Steps 2-3: per-rank flag counts, allgathered as part of the same
    // owned-vector scheme as the locations below.
    let mut local_flag_vec = vec![0i32; nbtotal];
    for (lid, flag) in local_flags.iter().enumerate() {
        local_flag_vec[mesh.blocks[lid].gid as usize] = flag.as_i32();
    }
    let global_flags = gather_owned_i32(mesh, collectives, &local_flag_vec);

    let total_refine = global_flags.iter().filter(|&&f| f > 0).count();
    let total_derefine = global_flags.iter().filter(|&&f| f < 0).count();
    if total_refine == 0 && total_derefine <= minbl(dim) {
        debug!(total_refine, total_derefine, "refinement cycle is a no-op this round");
        return RefinementSummary::default();
    }

    // Step 4: the flagged locations are already known to every rank via
    // `mesh.loclist`, so no separate location allgather is needed.
    let loc_to_gid: HashMap<LogicalLocation, usize> =
        mesh.loclist.iter().enumerate().map(|(gid, &loc)| (loc, gid)).collect();

    // Step 5: sibling-group validation for derefinement; accepted parents
    // sorted so the deepest derefines are applied first.
    let mut clderef: Vec<LogicalLocation> = Vec::new();
    let mut seen_parents = std::collections::HashSet::new();
    let mut rejected_incomplete = 0usize;
    for (gid, &flag) in global_flags.iter().enumerate() {
        if flag >= 0 {
            continue;
        }
        let loc = mesh.loclist[gid];
        if loc.level <= mesh.root_level {
            continue; // cannot derefine a root block
        }
        let parent = loc.parent();
        if !seen_parents.insert(parent) {
            continue;
        }
        let siblings = parent.children(dim);
        let complete = siblings.iter().all(|s| {
            loc_to_gid.get(s).map(|&g| global_flags[g] < 0).unwrap_or(false)
        });
        if complete {
            clderef.push(parent);
        } else {
            rejected_incomplete += 1;
        }
    }
    clderef.sort(); // finer (deeper) first, matching LogicalLocation::Ord

    let to_refine: Vec<LogicalLocation> = global_flags
        .iter()
        .enumerate()
        .filter(|&(_, &f)| f > 0)
        .map(|(gid, _)| mesh.loclist[gid])
        .collect();

    // Step 6, refine-first: apply every accepted refinement before any
    // derefinement is considered, so a rejected derefine in this same
    // cycle never undoes an accepted refine (the Open Question this core
    // resolves, §4.6, §9.1).
    for loc in &to_refine {
        mesh.tree.add_leaf(*loc);
    }

    let mut rejected_jump = 0usize;
    let mut accepted_derefine = Vec::new();
    for parent in clderef {
        if would_create_two_level_jump(mesh, parent) {
            rejected_jump += 1;
            debug!(?parent, "derefinement rejected: would create a two-level jump");
            continue;
        }
        mesh.tree.derefine(parent);
        accepted_derefine.push(parent);
    }

    // Step 7: await the cost allgather (already collected above), carry
    // costs across the mutation (parents inherit the sum of their former
    // children; children of a refined block split the parent's cost
    // uniformly), rebalance, and rebuild.
    let global_cost = gather_owned_f64(mesh, collectives, &local_cost);
    let old_loc_to_gid: HashMap<LogicalLocation, usize> =
        mesh.loclist.iter().enumerate().map(|(gid, &loc)| (loc, gid)).collect();

    let new_loclist = mesh.tree.enumerate_leaves();
    let mut new_costlist = Vec::with_capacity(new_loclist.len());
    for &loc in &new_loclist {
        if let Some(&gid) = old_loc_to_gid.get(&loc) {
            new_costlist.push(global_cost[gid]);
            continue;
        }
        if loc.level > mesh.root_level {
            if let Some(&pgid) = old_loc_to_gid.get(&loc.parent()) {
                new_costlist.push(global_cost[pgid] / (1 << dim) as f64);
                continue;
            }
        }
        let children_cost: f64 = loc
            .children(dim)
            .iter()
            .filter_map(|c| old_loc_to_gid.get(c))
            .map(|&gid| global_cost[gid])
            .sum();
        new_costlist.push(if children_cost > 0.0 { children_cost } else { 1.0 });
    }

    let summary = RefinementSummary {
        refined: to_refine.len(),
        derefined: accepted_derefine.len(),
        rejected_two_level_jump: rejected_jump,
        rejected_incomplete_sibling_group: rejected_incomplete,
    };
    info!(
        refined = summary.refined,
        derefined = summary.derefined,
        rejected_two_level_jump = summary.rejected_two_level_jump,
        rejected_incomplete_sibling_group = summary.rejected_incomplete_sibling_group,
        nbtotal = new_loclist.len(),
        "refinement cycle complete"
    );

    rebuild_mesh_state(mesh, new_loclist, new_costlist, physics_factory);
    mesh.initialize(2, world);
    summary
}

/// Rebalances and rebuilds local blocks after a tree mutation, preserving
/// the physics object of any block whose location survived unchanged on
/// the same rank (§4.6 step 7, §5's ownership-exclusivity invariant).
fn rebuild_mesh_state(
    mesh: &mut Mesh,
    new_loclist: Vec<LogicalLocation>,
    new_costlist: Vec<f64>,
    physics_factory: &PhysicsFactory,
) {
    let assignment = load_balancer::assign(&new_costlist, &mesh.ctx).expect("rebalance after refinement cycle");

    let mut surviving: HashMap<LogicalLocation, MeshBlock> =
        mesh.blocks.drain(..).map(|b| (b.loc, b)).collect();

    mesh.reindex_locations(&new_loclist);
    mesh.ranklist = assignment.ranklist.clone();

    let start = assignment.nslist[mesh.ctx.rank as usize] as usize;
    let count = assignment.nblist[mesh.ctx.rank as usize] as usize;
    let mut rebuilt = Vec::with_capacity(count);
    for gid in start..start + count {
        let loc = new_loclist[gid];
        let size = mesh.block_region(loc);
        let bcs = mesh.block_boundary_tags(loc);
        let neighbors = mesh.neighbor_table_for(loc);
        let mut block = if let Some(mut existing) = surviving.remove(&loc) {
            existing.neighbors = neighbors;
            existing
        } else {
            let physics = physics_factory(gid as i32, loc, size, bcs);
            MeshBlock::new(gid as i32, loc, size, bcs, neighbors, physics, mesh.multilevel)
        };
        block.gid = gid as i32;
        block.cost = new_costlist[gid];
        rebuilt.push(block);
    }

    mesh.loclist = new_loclist;
    mesh.costlist = new_costlist;
    mesh.nslist = assignment.nslist;
    mesh.nblist = assignment.nblist;
    mesh.blocks = rebuilt;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::mesh::{default_generator, MeshOptions};
    use crate::physics::NullPhysics;
    use crate::rank_context::{RankContext, SingleRankCollectives};
    use crate::region::{BoundaryTags, RegionSize};

    fn null_factory(_gid: i32, _loc: LogicalLocation, _size: RegionSize, _bcs: BoundaryTags) -> Box<dyn crate::physics::PhysicsHooks> {
        Box::new(NullPhysics::with_dt(0.1))
    }

    fn toml_2d() -> &'static str {
        r#"
            [time]
            tlim = 1.0
            cfl_number = 0.4

            [mesh]
            nx1 = 32
            nx2 = 32
            x1min = 0.0
            x1max = 1.0
            x2min = 0.0
            x2max = 1.0
            ix1_bc = "periodic"
            ox1_bc = "periodic"
            ix2_bc = "periodic"
            ox2_bc = "periodic"
            refinement = "adaptive"
            maxlevel = 2

            [meshblock]
            nx1 = 8
            nx2 = 8
        "#
    }

    fn build_mesh() -> Mesh {
        let cfg = Config::from_str(toml_2d()).unwrap();
        Mesh::new(&cfg, RankContext::single_rank_for_test(), default_generator(), MeshOptions::default(), &null_factory).unwrap()
    }

    #[test]
    fn refining_one_block_splits_it_into_a_full_sibling_group() {
        let mut mesh = build_mesh();
        let nbefore = mesh.nbtotal();
        let mut flags = vec![RefineFlag::Keep; mesh.blocks.len()];
        flags[0] = RefineFlag::Refine;
        let summary = run_cycle(&mut mesh, &flags, &SingleRankCollectives, None, &null_factory);
        assert_eq!(summary.refined, 1);
        assert_eq!(mesh.nbtotal(), nbefore - 1 + (1 << mesh.dim));
    }

    #[test]
    fn s6_single_sibling_derefine_flag_is_a_no_op() {
        let mut mesh = build_mesh();
        let mut flags = vec![RefineFlag::Keep; mesh.blocks.len()];
        flags[0] = RefineFlag::Refine;
        run_cycle(&mut mesh, &flags, &SingleRankCollectives, None, &null_factory);

        // Only one of the resulting sibling group's four children is
        // marked for derefinement; with no refinements and a derefine
        // count at or below 2^dim this cycle is a no-op before the
        // sibling-group check even runs (§4.6 step 3).
        let nbefore = mesh.nbtotal();
        let mut flags2 = vec![RefineFlag::Keep; mesh.blocks.len()];
        flags2[0] = RefineFlag::Derefine;
        let summary = run_cycle(&mut mesh, &flags2, &SingleRankCollectives, None, &null_factory);
        assert_eq!(summary.derefined, 0);
        assert_eq!(summary.refined, 0);
        assert_eq!(mesh.nbtotal(), nbefore);
    }

    #[test]
    fn derefining_complete_sibling_groups_collapses_them() {
        // A derefine batch at or below 2^dim blocks is a no-op (§4.6 step
        // 3), so exercise two full sibling groups at once.
        let mut mesh = build_mesh();
        let mut flags = vec![RefineFlag::Keep; mesh.blocks.len()];
        flags[0] = RefineFlag::Refine;
        flags[1] = RefineFlag::Refine;
        run_cycle(&mut mesh, &flags, &SingleRankCollectives, None, &null_factory);

        let nbefore = mesh.nbtotal();
        let parents: std::collections::HashSet<LogicalLocation> =
            mesh.blocks.iter().filter(|b| b.loc.level > mesh.root_level).map(|b| b.loc.parent()).collect();
        assert_eq!(parents.len(), 2);
        let mut flags2 = vec![RefineFlag::Keep; mesh.blocks.len()];
        for (lid, block) in mesh.blocks.iter().enumerate() {
            if block.loc.level > mesh.root_level {
                flags2[lid] = RefineFlag::Derefine;
            }
        }
        let summary = run_cycle(&mut mesh, &flags2, &SingleRankCollectives, None, &null_factory);
        assert_eq!(summary.derefined, 2);
        assert_eq!(mesh.nbtotal(), nbefore - 2 * (1 << mesh.dim) + 2);
    }
}
