//! Process-wide owner of the refinement tree, the block list local to this
//! rank, the global location/cost/rank arrays, and the time/step state
//! (§2 item 7, §4.4, §4.7).

use std::collections::HashMap;

use tracing::{debug, info};

use crate::block_tree::BlockTree;
use crate::config::Config;
use crate::error::{ConfigError, MeshError, MeshResult};
use crate::load_balancer;
use crate::logical_location::LogicalLocation;
use crate::mesh_block::MeshBlock;
use crate::neighbor::{self, NeighborTable};
use crate::physics::PhysicsHooks;
use crate::rank_context::{Collectives, RankContext};
use crate::region::{BoundaryTag, BoundaryTags, MeshGenerator, RegionSize, UniformMeshGenerator};

/// A factory a downstream crate supplies to build the opaque physics
/// object set for one newly created block (§6, §9: "Polymorphic physics
/// per block").
pub type PhysicsFactory = dyn Fn(i32, LogicalLocation, RegionSize, BoundaryTags) -> Box<dyn PhysicsHooks>;

/// Construction-time options the core itself cannot derive from the input
/// configuration, because they depend on which collaborator physics
/// modules (MHD, viscosity) are actually linked in (§4.2).
#[derive(Debug, Clone, Copy)]
pub struct MeshOptions {
    /// Populate edge and corner neighbors in addition to faces. Forced on
    /// whenever the mesh is multilevel, regardless of this flag (§4.2).
    pub edges_and_corners: bool,
}

impl Default for MeshOptions {
    fn default() -> Self {
        MeshOptions { edges_and_corners: false }
    }
}

/// The process-wide mesh: the tree, the global per-block arrays, and the
/// blocks this rank owns (§3's "Mesh globals per rank").
pub struct Mesh {
    pub tree: BlockTree,
    pub dim: i32,
    pub nrbx: [i64; 3],
    pub root_level: i32,
    pub max_level: i32,
    pub multilevel: bool,
    pub face_only: bool,
    pub mesh_size: RegionSize,
    pub mesh_bcs: BoundaryTags,
    pub block_nx: (i32, i32, i32),
    generator: Box<dyn MeshGenerator>,

    /// Location of every block in the global order, indexed by gid.
    pub loclist: Vec<LogicalLocation>,
    pub costlist: Vec<f64>,
    pub ranklist: Vec<i32>,
    pub nslist: Vec<i32>,
    pub nblist: Vec<i32>,
    loc_to_gid: HashMap<LogicalLocation, i32>,

    /// Blocks owned by this rank, indexed by local id (lid).
    pub blocks: Vec<MeshBlock>,

    pub ctx: RankContext,

    pub time: f64,
    pub dt: f64,
    dt_prev: f64,
    pub tlim: f64,
    pub nlim: i64,
    pub ncycle: i64,
    pub cfl_number: f64,
}

fn root_level_for(nrbx: [i64; 3]) -> i32 {
    let max_nrbx = nrbx.iter().copied().max().unwrap_or(1).max(1);
    let mut level = 0;
    while (1i64 << level) < max_nrbx {
        level += 1;
    }
    level
}

/// Inverts a monotonic axis mapping `f(r) -> x` via bisection on `r in
/// [0, 1]`, since [`MeshGenerator`] only exposes the forward direction
/// (§4.4 step 4, §6).
fn invert_monotonic(target: f64, f: impl Fn(f64) -> f64) -> f64 {
    let (mut lo, mut hi) = (0.0f64, 1.0f64);
    let increasing = f(1.0) >= f(0.0);
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        let x = f(mid);
        let below = if increasing { x < target } else { x > target };
        if below {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

impl Mesh {
    /// Fresh construction from a validated [`Config`] (§4.4's "Fresh
    /// construction").
    pub fn new(
        config: &Config,
        ctx: RankContext,
        generator: Box<dyn MeshGenerator>,
        options: MeshOptions,
        physics_factory: &PhysicsFactory,
    ) -> MeshResult<Mesh> {
        let block_nx = config.validate()?;
        let mesh_size = config.mesh_size();
        let mesh_bcs = config.mesh_bcs();
        let dim = mesh_size.dim();

        let nrbx = [
            (mesh_size.nx1 / block_nx.0) as i64,
            if dim >= 2 { (mesh_size.nx2 / block_nx.1) as i64 } else { 1 },
            if dim >= 3 { (mesh_size.nx3 / block_nx.2) as i64 } else { 1 },
        ];
        let root_level = root_level_for(nrbx);
        info!(nrbx1 = nrbx[0], nrbx2 = nrbx[1], nrbx3 = nrbx[2], root_level, dim, "deriving root grid");

        let mut tree = BlockTree::create_root(nrbx[0], nrbx[1], nrbx[2], root_level, dim);

        let multilevel = config.is_multilevel();
        for region in &config.refinement_regions {
            Self::add_refinement_region(&mut tree, region, &mesh_size, &*generator, dim, nrbx, root_level)?;
        }

        let max_level = if matches!(config.mesh.refinement, crate::config::RefinementMode::Adaptive) {
            (root_level + config.mesh.maxlevel - 1).min(crate::logical_location::MAX_LEVEL)
        } else {
            crate::logical_location::MAX_LEVEL
        };

        let loclist = tree.enumerate_leaves();
        let nbtotal = loclist.len();
        info!(nbtotal, "enumerated leaves");
        let costlist = vec![1.0f64; nbtotal];

        let assignment = load_balancer::assign(&costlist, &ctx)?;
        let face_only = !(multilevel || options.edges_and_corners);

        let mut loc_to_gid = HashMap::with_capacity(nbtotal);
        for (gid, loc) in loclist.iter().enumerate() {
            loc_to_gid.insert(*loc, gid as i32);
        }

        let mut mesh = Mesh {
            tree,
            dim,
            nrbx,
            root_level,
            max_level,
            multilevel,
            face_only,
            mesh_size,
            mesh_bcs,
            block_nx,
            generator,
            loclist,
            costlist,
            ranklist: assignment.ranklist,
            nslist: assignment.nslist,
            nblist: assignment.nblist,
            loc_to_gid,
            blocks: Vec::new(),
            ctx,
            time: config.time.start_time,
            dt: f64::INFINITY,
            dt_prev: f64::INFINITY,
            tlim: config.time.tlim,
            nlim: config.time.nlim,
            ncycle: 0,
            cfl_number: config.time.cfl_number,
        };

        mesh.build_local_blocks(physics_factory);
        Ok(mesh)
    }

    fn add_refinement_region(
        tree: &mut BlockTree,
        region: &crate::config::RefinementRegionConfig,
        mesh_size: &RegionSize,
        generator: &dyn MeshGenerator,
        dim: i32,
        nrbx: [i64; 3],
        root_level: i32,
    ) -> MeshResult<()> {
        if region.x1min >= mesh_size.x1max
            || region.x1max <= mesh_size.x1min
            || (dim >= 2 && (region.x2min >= mesh_size.x2max || region.x2max <= mesh_size.x2min))
            || (dim >= 3 && (region.x3min >= mesh_size.x3max || region.x3max <= mesh_size.x3min))
        {
            let err: MeshError = ConfigError::RefinementRegionOutsideMesh { name: "refinement".into() }.into();
            return Err(err);
        }
        // `region.level` is a depth relative to the root grid, the same
        // convention `config.mesh.maxlevel` uses — not an absolute
        // `LogicalLocation::level`, so it's offset by `root_level` before
        // driving any tree arithmetic (DESIGN.md's "refinement-region
        // level" note).
        let target_level = root_level + region.level;
        if target_level > crate::logical_location::MAX_LEVEL {
            return Err(ConfigError::LevelExceedsMaximum { level: target_level, max: crate::logical_location::MAX_LEVEL }.into());
        }

        let clamp = |x: f64, min: f64, max: f64| x.max(min).min(max);
        let x1lo = clamp(region.x1min, mesh_size.x1min, mesh_size.x1max);
        let x1hi = clamp(region.x1max, mesh_size.x1min, mesh_size.x1max);

        let shift = (target_level - root_level).max(0);
        let total1 = nrbx[0] * (1i64 << shift);
        let r1lo = invert_monotonic(x1lo, |r| generator.x1(r, mesh_size));
        let r1hi = invert_monotonic(x1hi, |r| generator.x1(r, mesh_size));
        let (mut lx1_lo, mut lx1_hi) = ((r1lo * total1 as f64).floor() as i64, ((r1hi * total1 as f64).ceil() as i64 - 1).max(0));
        lx1_lo -= lx1_lo % 2;
        if lx1_hi % 2 == 0 {
            lx1_hi += 1;
        }
        lx1_hi = lx1_hi.min(total1 - 1);

        let (lx2_lo, lx2_hi, total2) = if dim >= 2 {
            let x2lo = clamp(region.x2min, mesh_size.x2min, mesh_size.x2max);
            let x2hi = clamp(region.x2max, mesh_size.x2min, mesh_size.x2max);
            let total2 = nrbx[1] * (1i64 << shift);
            let r2lo = invert_monotonic(x2lo, |r| generator.x2(r, mesh_size));
            let r2hi = invert_monotonic(x2hi, |r| generator.x2(r, mesh_size));
            let (mut lo, mut hi) = ((r2lo * total2 as f64).floor() as i64, ((r2hi * total2 as f64).ceil() as i64 - 1).max(0));
            lo -= lo % 2;
            if hi % 2 == 0 {
                hi += 1;
            }
            (lo, hi.min(total2 - 1), total2)
        } else {
            (0, 0, 1)
        };

        let (lx3_lo, lx3_hi, total3) = if dim >= 3 {
            let x3lo = clamp(region.x3min, mesh_size.x3min, mesh_size.x3max);
            let x3hi = clamp(region.x3max, mesh_size.x3min, mesh_size.x3max);
            let total3 = nrbx[2] * (1i64 << shift);
            let r3lo = invert_monotonic(x3lo, |r| generator.x3(r, mesh_size));
            let r3hi = invert_monotonic(x3hi, |r| generator.x3(r, mesh_size));
            let (mut lo, mut hi) = ((r3lo * total3 as f64).floor() as i64, ((r3hi * total3 as f64).ceil() as i64 - 1).max(0));
            lo -= lo % 2;
            if hi % 2 == 0 {
                hi += 1;
            }
            (lo, hi.min(total3 - 1), total3)
        } else {
            (0, 0, 1)
        };
        let _ = (total2, total3);

        debug!(level = region.level, target_level, lx1_lo, lx1_hi, lx2_lo, lx2_hi, lx3_lo, lx3_hi, "adding static refinement region");
        for lx3 in lx3_lo..=lx3_hi {
            for lx2 in lx2_lo..=lx2_hi {
                for lx1 in lx1_lo..=lx1_hi {
                    tree.add_leaf(LogicalLocation::new(target_level, lx1, lx2, lx3));
                }
            }
        }
        Ok(())
    }

    /// The `RegionSize` of the block at `loc`, derived from this mesh's
    /// coordinate generator (§4.4 step 6).
    pub(crate) fn block_region(&self, loc: LogicalLocation) -> RegionSize {
        let shift = (loc.level - self.root_level).max(0);
        let axis = |nrbx: i64, lx: i64, active: bool, gen: &dyn Fn(f64) -> f64, min: f64, max: f64| -> (f64, f64) {
            if !active {
                return (min, max);
            }
            let total = nrbx * (1i64 << shift);
            let r_min = lx as f64 / total as f64;
            let r_max = (lx + 1) as f64 / total as f64;
            (gen(r_min), gen(r_max))
        };
        let (x1min, x1max) = axis(self.nrbx[0], loc.lx1, true, &|r| self.generator.x1(r, &self.mesh_size), self.mesh_size.x1min, self.mesh_size.x1max);
        let (x2min, x2max) = axis(self.nrbx[1], loc.lx2, self.dim >= 2, &|r| self.generator.x2(r, &self.mesh_size), self.mesh_size.x2min, self.mesh_size.x2max);
        let (x3min, x3max) = axis(self.nrbx[2], loc.lx3, self.dim >= 3, &|r| self.generator.x3(r, &self.mesh_size), self.mesh_size.x3min, self.mesh_size.x3max);
        RegionSize {
            x1min,
            x1max,
            x2min,
            x2max,
            x3min,
            x3max,
            nx1: self.block_nx.0,
            nx2: self.block_nx.1,
            nx3: self.block_nx.2,
            x1rat: self.mesh_size.x1rat,
            x2rat: self.mesh_size.x2rat,
            x3rat: self.mesh_size.x3rat,
        }
    }

    /// This block's six face tags: `Internal` wherever the tree finds a
    /// neighbor (including a periodic wrap), the mesh's own tag at a true
    /// domain edge (§3).
    pub(crate) fn block_boundary_tags(&self, loc: LogicalLocation) -> BoundaryTags {
        let face = |ox1, ox2, ox3, inner: bool, dim_needed: i32| -> BoundaryTag {
            if self.dim < dim_needed {
                return BoundaryTag::Outflow;
            }
            match self.tree.find_neighbor(loc, ox1, ox2, ox3, &self.mesh_bcs) {
                crate::block_tree::Neighbor::Null => {
                    let axis = [1usize, 2, 3][dim_needed as usize - 1];
                    self.mesh_bcs.face(axis, inner)
                }
                _ => BoundaryTag::Internal,
            }
        };
        BoundaryTags {
            ix1: face(-1, 0, 0, true, 1),
            ox1: face(1, 0, 0, false, 1),
            ix2: face(0, -1, 0, true, 2),
            ox2: face(0, 1, 0, false, 2),
            ix3: face(0, 0, -1, true, 3),
            ox3: face(0, 0, 1, false, 3),
        }
    }

    fn build_local_blocks(&mut self, physics_factory: &PhysicsFactory) {
        let rank = self.ctx.rank;
        let start = self.nslist[rank as usize] as usize;
        let count = self.nblist[rank as usize] as usize;
        self.blocks = Vec::with_capacity(count);

        for gid in start..start + count {
            let loc = self.loclist[gid];
            let size = self.block_region(loc);
            let bcs = self.block_boundary_tags(loc);
            let neighbors = self.neighbor_table_for(loc);
            let physics = physics_factory(gid as i32, loc, size, bcs);
            let mut block = MeshBlock::new(gid as i32, loc, size, bcs, neighbors, physics, self.multilevel);
            block.cost = self.costlist[gid];
            self.blocks.push(block);
        }
        info!(rank, nblocks = self.blocks.len(), "local blocks constructed");
    }

    pub(crate) fn neighbor_table_for(&self, loc: LogicalLocation) -> NeighborTable {
        let ranklist = &self.ranklist;
        let loc_to_gid = &self.loc_to_gid;
        neighbor::build_neighbor_table(&self.tree, loc, &self.block_boundary_tags(loc), self.face_only, self.multilevel, |nloc| {
            let gid = *loc_to_gid.get(&nloc).expect("neighbor location must be a known leaf");
            (gid, ranklist[gid as usize])
        })
    }

    /// Re-derives the location-to-gid index after a tree mutation, before
    /// any call to [`Mesh::neighbor_table_for`] against the new shape
    /// (§4.6 step 7).
    pub(crate) fn reindex_locations(&mut self, new_loclist: &[LogicalLocation]) {
        self.loc_to_gid = new_loclist.iter().enumerate().map(|(gid, &loc)| (loc, gid as i32)).collect();
    }

    /// `find_block`: linear walk over local blocks (§4.7 — acceptable
    /// since the local list is small).
    pub fn find_block(&self, gid: i32) -> Option<&MeshBlock> {
        self.blocks.iter().find(|b| b.gid == gid)
    }

    pub fn find_block_mut(&mut self, gid: i32) -> Option<&mut MeshBlock> {
        self.blocks.iter_mut().find(|b| b.gid == gid)
    }

    /// `get_total_cells`: `nbtotal * nx1 * nx2 * nx3` for homogeneous
    /// blocks (§4.7).
    pub fn get_total_cells(&self) -> u64 {
        self.loclist.len() as u64 * self.block_nx.0 as u64 * self.block_nx.1 as u64 * self.block_nx.2 as u64
    }

    /// `new_time_step`: min-reduce each local block's CFL dt across the
    /// process, then (via `collectives`) across ranks, clamped to
    /// `2*dt_prev` and `tlim - time` (§4.7, invariant 8).
    pub fn new_time_step(&mut self, collectives: &dyn Collectives) {
        let local_min = self.blocks.iter().map(|b| b.physics.cfl_dt()).fold(f64::INFINITY, f64::min);
        let global_min = collectives.all_reduce_min_f64(local_min);

        let max_allowed = (2.0 * self.dt_prev).min(self.tlim - self.time);
        let dt = global_min.min(max_allowed).max(0.0);

        self.dt_prev = self.dt;
        self.dt = dt;
        debug!(time = self.time, dt = self.dt, "advanced timestep");
    }

    /// `test_conservation`: volume-weighted sum of each block's conserved
    /// variables, summed across ranks, emitted on rank 0 (§4.7).
    pub fn test_conservation(&self, collectives: &dyn Collectives) -> Vec<f64> {
        let mut totals: Vec<f64> = Vec::new();
        for block in &self.blocks {
            let volume = block_volume(&block.size);
            let sums = block.physics.conserved_sum();
            if totals.len() < sums.len() {
                totals.resize(sums.len(), 0.0);
            }
            for (acc, v) in totals.iter_mut().zip(sums.iter()) {
                *acc += v * volume;
            }
        }
        let global: Vec<f64> = totals.iter().map(|&t| collectives.all_reduce_sum_f64(t)).collect();
        if self.ctx.is_root() {
            info!(?global, "conservation totals");
        }
        global
    }

    /// `initialize`: runs problem generators on cold start, then exchanges
    /// boundary data and recomputes per-block dt (§4.7). `world` carries
    /// remote point-to-point exchange; pass `None` for a single-rank run
    /// (no cross-rank neighbors can exist in that case).
    pub fn initialize(&mut self, res_flag: i32, world: Option<&mpi::topology::SystemCommunicator>) {
        if res_flag == 0 {
            for block in &mut self.blocks {
                block.physics.problem_init();
            }
            info!("ran problem generators on cold start");
        }
        self.exchange_boundaries(world);
        if self.multilevel {
            self.prolongate_coarse_fine_interfaces();
        }
        for block in &mut self.blocks {
            block.dt = block.physics.cfl_dt();
        }
    }

    fn exchange_boundaries(&mut self, world: Option<&mpi::topology::SystemCommunicator>) {
        let gid_to_lid: HashMap<i32, usize> = self.blocks.iter().enumerate().map(|(lid, b)| (b.gid, lid)).collect();
        let rank = self.ctx.rank;

        for lid in 0..self.blocks.len() {
            let local_neighbors = self.blocks[lid].neighbors.neighbors.clone();
            for nb in &local_neighbors {
                if nb.rank == rank {
                    if let Some(&other_lid) = gid_to_lid.get(&nb.gid) {
                        let mut buf = Vec::new();
                        self.blocks[lid].physics.pack_boundary(nb.buffer_id, &mut buf);
                        self.blocks[other_lid].physics.unpack_boundary(nb.target_buffer_id, &buf);
                    }
                }
            }
        }

        let Some(world) = world else { return };
        let mut expected = 0usize;
        for block in &self.blocks {
            for nb in &block.neighbors.neighbors {
                if nb.rank != rank {
                    let mut payload = Vec::new();
                    block.physics.pack_boundary(nb.buffer_id, &mut payload);
                    // Envelope: [dest gid, dest buffer id, ...payload] so the
                    // receiver can route without consulting its own tree.
                    let mut envelope = Vec::with_capacity(payload.len() + 2);
                    envelope.push(nb.gid as f64);
                    envelope.push(nb.target_buffer_id as f64);
                    envelope.extend_from_slice(&payload);
                    use mpi::traits::*;
                    world.process_at_rank(nb.rank).send_with_tag(&envelope[..], block.gid);
                    expected += 1;
                }
            }
        }
        use mpi::traits::*;
        for _ in 0..expected {
            let (envelope, _status) = world.any_process().receive_vec::<f64>();
            let target_gid = envelope[0] as i32;
            let target_buffer_id = envelope[1] as i32;
            if let Some(&lid) = gid_to_lid.get(&target_gid) {
                self.blocks[lid].physics.unpack_boundary(target_buffer_id, &envelope[2..]);
            }
        }
    }

    fn prolongate_coarse_fine_interfaces(&mut self) {
        for block in &mut self.blocks {
            for nb in block.neighbors.neighbors.clone() {
                if nb.level < block.loc.level {
                    block.physics.prolongate(nb.buffer_id);
                }
            }
        }
    }

    pub fn nbtotal(&self) -> usize {
        self.loclist.len()
    }

    pub fn is_multilevel(&self) -> bool {
        self.multilevel
    }

    /// Assembles a [`Mesh`] from state already recovered from a restart
    /// file plus the run-control parameters of a freshly parsed [`Config`]
    /// (§4.4 "Restart construction"). The tree, global arrays, and block
    /// count are the restart file's own; `blocks` starts empty and is
    /// filled in one [`Mesh::push_restored_block`] call per local block as
    /// [`crate::restart::read_restart`] reads each one's payload back.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_restart_state(
        tree: BlockTree,
        dim: i32,
        nrbx: [i64; 3],
        root_level: i32,
        max_level: i32,
        multilevel: bool,
        face_only: bool,
        mesh_size: RegionSize,
        mesh_bcs: BoundaryTags,
        block_nx: (i32, i32, i32),
        generator: Box<dyn MeshGenerator>,
        loclist: Vec<LogicalLocation>,
        costlist: Vec<f64>,
        ranklist: Vec<i32>,
        nslist: Vec<i32>,
        nblist: Vec<i32>,
        ctx: RankContext,
        time: f64,
        dt: f64,
        tlim: f64,
        nlim: i64,
        cfl_number: f64,
        ncycle: i64,
    ) -> Mesh {
        let loc_to_gid = loclist.iter().enumerate().map(|(gid, &loc)| (loc, gid as i32)).collect();
        Mesh {
            tree,
            dim,
            nrbx,
            root_level,
            max_level,
            multilevel,
            face_only,
            mesh_size,
            mesh_bcs,
            block_nx,
            generator,
            loclist,
            costlist,
            ranklist,
            nslist,
            nblist,
            loc_to_gid,
            blocks: Vec::new(),
            ctx,
            time,
            dt,
            dt_prev: dt,
            tlim,
            nlim,
            ncycle,
            cfl_number,
        }
    }

    /// Reconstructs one local block's runtime state (window, neighbor
    /// table, cost) from its restart-file record and hands it the physics
    /// object [`crate::restart::read_restart`] already populated via
    /// [`PhysicsHooks::load_restart_payload`] (§4.4).
    pub(crate) fn push_restored_block(
        &mut self,
        gid: i32,
        loc: LogicalLocation,
        size: RegionSize,
        bcs: BoundaryTags,
        physics: Box<dyn PhysicsHooks>,
    ) {
        let neighbors = self.neighbor_table_for(loc);
        let mut block = MeshBlock::new(gid, loc, size, bcs, neighbors, physics, self.multilevel);
        block.cost = self.costlist[gid as usize];
        block.dt = block.physics.cfl_dt();
        self.blocks.push(block);
    }
}

fn block_volume(size: &RegionSize) -> f64 {
    let dx1 = size.x1max - size.x1min;
    let dx2 = if size.nx2 > 1 { size.x2max - size.x2min } else { 1.0 };
    let dx3 = if size.nx3 > 1 { size.x3max - size.x3min } else { 1.0 };
    dx1 * dx2 * dx3
}

/// Builds a default [`MeshGenerator`] for callers that don't need a custom
/// coordinate mapping (§6).
pub fn default_generator() -> Box<dyn MeshGenerator> {
    Box::new(UniformMeshGenerator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::NullPhysics;

    fn null_factory(_gid: i32, _loc: LogicalLocation, _size: RegionSize, _bcs: BoundaryTags) -> Box<dyn PhysicsHooks> {
        Box::new(NullPhysics::with_dt(0.1))
    }

    fn uniform_3d_periodic_toml() -> &'static str {
        r#"
            [time]
            tlim = 1.0
            cfl_number = 0.4

            [mesh]
            nx1 = 16
            nx2 = 16
            nx3 = 16
            x1min = 0.0
            x1max = 1.0
            x2min = 0.0
            x2max = 1.0
            x3min = 0.0
            x3max = 1.0
            ix1_bc = "periodic"
            ox1_bc = "periodic"
            ix2_bc = "periodic"
            ox2_bc = "periodic"
            ix3_bc = "periodic"
            ox3_bc = "periodic"

            [meshblock]
            nx1 = 8
            nx2 = 8
            nx3 = 8
        "#
    }

    #[test]
    fn s1_uniform_3d_grid_has_expected_block_count() {
        let cfg = Config::from_str(uniform_3d_periodic_toml()).unwrap();
        let ctx = RankContext::single_rank_for_test();
        let mesh = Mesh::new(&cfg, ctx, default_generator(), MeshOptions::default(), &null_factory).unwrap();
        assert_eq!(mesh.nbtotal(), 8);
        assert_eq!(mesh.root_level, 1);
        assert!(!mesh.is_multilevel());
        assert_eq!(mesh.blocks.len(), 8);
        for block in &mesh.blocks {
            let faces = block.neighbors.neighbors.iter().filter(|n| n.neighbor_type == crate::neighbor::NeighborType::Face).count();
            assert_eq!(faces, 6);
        }
    }

    fn one_d_toml(cfl: f64) -> String {
        format!(
            r#"
            [time]
            tlim = 1.0
            cfl_number = {cfl}

            [mesh]
            nx1 = 64
            x1min = 0.0
            x1max = 1.0
            ix1_bc = "periodic"
            ox1_bc = "periodic"

            [meshblock]
            nx1 = 16
        "#
        )
    }

    #[test]
    fn s2_one_dimensional_grid_builds_and_rejects_bad_cfl() {
        let cfg = Config::from_str(&one_d_toml(0.8)).unwrap();
        let ctx = RankContext::single_rank_for_test();
        let mesh = Mesh::new(&cfg, ctx, default_generator(), MeshOptions::default(), &null_factory).unwrap();
        assert_eq!(mesh.dim, 1);
        assert_eq!(mesh.nbtotal(), 4);

        let bad = Config::from_str(&one_d_toml(1.1)).unwrap();
        assert!(Mesh::new(&bad, RankContext::single_rank_for_test(), default_generator(), MeshOptions::default(), &null_factory).is_err());
    }

    fn two_d_static_refinement_toml() -> &'static str {
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
            refinement = "static"
            maxlevel = 1

            [meshblock]
            nx1 = 8
            nx2 = 8

            [[refinement]]
            x1min = 0.25
            x1max = 0.75
            x2min = 0.25
            x2max = 0.75
            level = 1
        "#
    }

    #[test]
    fn s3_two_dimensional_static_refinement_leaf_count() {
        let cfg = Config::from_str(two_d_static_refinement_toml()).unwrap();
        let ctx = RankContext::single_rank_for_test();
        let mesh = Mesh::new(&cfg, ctx, default_generator(), MeshOptions::default(), &null_factory).unwrap();
        // 16 root leaves, 4 replaced by their 4 children each (16 new) -> 28.
        assert_eq!(mesh.nbtotal(), 16 - 4 + 16);
        assert!(mesh.is_multilevel());
    }

    #[test]
    fn total_cells_is_homogeneous_product() {
        let cfg = Config::from_str(uniform_3d_periodic_toml()).unwrap();
        let ctx = RankContext::single_rank_for_test();
        let mesh = Mesh::new(&cfg, ctx, default_generator(), MeshOptions::default(), &null_factory).unwrap();
        assert_eq!(mesh.get_total_cells(), 8 * 8 * 8 * 8);
    }

    #[test]
    fn new_time_step_respects_tlim_clamp() {
        let cfg = Config::from_str(uniform_3d_periodic_toml()).unwrap();
        let ctx = RankContext::single_rank_for_test();
        let mut mesh = Mesh::new(&cfg, ctx, default_generator(), MeshOptions::default(), &null_factory).unwrap();
        mesh.time = 0.95;
        for block in &mut mesh.blocks {
            block.physics = Box::new(NullPhysics::with_dt(1.0));
        }
        mesh.new_time_step(&crate::rank_context::SingleRankCollectives);
        assert!(mesh.time + mesh.dt <= mesh.tlim + 1e-9);
    }
}
