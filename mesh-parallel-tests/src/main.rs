//! Multi-rank correctness checks for the mesh crate, run under `mpirun`.
//! Mirrors the crate's own single-rank unit tests but exercises the real
//! `MpiCollectives` path: cost-weighted distribution across the actual
//! world size, boundary exchange over point-to-point sends, and a
//! refinement cycle's cross-rank cost allgather.

use mesh::config::Config;
use mesh::load_balancer;
use mesh::logical_location::LogicalLocation;
use mesh::mesh::{default_generator, MeshOptions};
use mesh::physics::{NullPhysics, PhysicsHooks, StepOutcome};
use mesh::rank_context::{MpiCollectives, RankContext};
use mesh::refinement::{self, RefineFlag};
use mesh::region::{BoundaryTags, RegionSize};
use mesh::Mesh;
use mpi::traits::*;

/// A tiny physics stand-in that tags its conserved sum with its own gid so
/// conservation across ranks is a simple arithmetic check.
struct TaggedPhysics {
    gid: i32,
}

impl PhysicsHooks for TaggedPhysics {
    fn step_advance(&mut self) -> StepOutcome {
        StepOutcome::Complete
    }
    fn pack_boundary(&self, _buffer_id: i32, out: &mut Vec<f64>) {
        out.push(self.gid as f64);
    }
    fn unpack_boundary(&mut self, _buffer_id: i32, _data: &[f64]) {}
    fn prolongate(&mut self, _buffer_id: i32) {}
    fn restrict(&mut self, _buffer_id: i32) {}
    fn problem_init(&mut self) {}
    fn cfl_dt(&self) -> f64 {
        0.1 + 0.01 * self.gid as f64
    }
    fn conserved_sum(&self) -> Vec<f64> {
        vec![1.0]
    }
}

fn tagged_factory(gid: i32, _loc: LogicalLocation, _size: RegionSize, _bcs: BoundaryTags) -> Box<dyn PhysicsHooks> {
    Box::new(TaggedPhysics { gid })
}

fn null_factory(_gid: i32, _loc: LogicalLocation, _size: RegionSize, _bcs: BoundaryTags) -> Box<dyn PhysicsHooks> {
    Box::new(NullPhysics::with_dt(0.1))
}

fn two_d_adaptive_toml() -> &'static str {
    r#"
        [time]
        tlim = 1.0
        cfl_number = 0.4

        [mesh]
        nx1 = 64
        nx2 = 64
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

/// Every block appears on exactly one rank and `nbtotal` is conserved
/// across the distribution (§4.3, §5's ownership-exclusivity invariant).
fn assert_partition_covers_every_block(mesh: &Mesh, world: &mpi::topology::SystemCommunicator) {
    let local_count = mesh.blocks.len() as i32;
    let mut total = 0i32;
    world.all_reduce_into(&local_count, &mut total, &mpi::collective::SystemOperation::sum());
    assert_eq!(total, mesh.nbtotal() as i32, "every block must be owned by exactly one rank");
}

fn run(world: &mpi::topology::SystemCommunicator) {
    let rank = world.rank();
    let ctx = RankContext::from_world(world);
    let cfg = Config::from_str(two_d_adaptive_toml()).unwrap();

    let mut mesh = Mesh::new(&cfg, ctx, default_generator(), MeshOptions::default(), &tagged_factory)
        .expect("mesh construction across the real world size");
    assert_partition_covers_every_block(&mesh, world);

    mesh.initialize(0, Some(world));
    let collectives = MpiCollectives::new(world);
    mesh.new_time_step(&collectives);

    // Every rank must land on the exact same global dt after the min-reduce.
    let mut dts = vec![0.0f64; world.size() as usize];
    world.all_gather_into(&[mesh.dt], &mut dts[..]);
    assert!(dts.iter().all(|&d| (d - mesh.dt).abs() < 1e-12), "new_time_step must agree across ranks");

    let totals = mesh.test_conservation(&collectives);
    if ctx.is_root() {
        assert_eq!(totals[0], mesh.nbtotal() as f64, "conserved sum must equal one unit per block summed globally");
    }

    // Refine every block this rank owns with gid 0 mod 4 and run one cycle;
    // the rebalance afterward must still cover every block exactly once.
    let flags: Vec<RefineFlag> = mesh
        .blocks
        .iter()
        .map(|b| if b.gid % 4 == 0 { RefineFlag::Refine } else { RefineFlag::Keep })
        .collect();
    refinement::run_cycle(&mut mesh, &flags, &collectives, Some(world), &tagged_factory);
    assert_partition_covers_every_block(&mesh, world);

    // Sanity-check the balancer directly against this run's actual rank
    // count, independent of any particular mesh shape.
    let costs = vec![1.0; mesh.nbtotal()];
    let balanced = load_balancer::assign(&costs, &ctx).unwrap();
    assert_eq!(balanced.nblist.iter().sum::<i32>(), mesh.nbtotal() as i32);

    if rank == 0 {
        println!("mesh-parallel-tests: {} ranks, {} blocks, all checks passed", world.size(), mesh.nbtotal());
    }

    // Exercise the no-physics path too, since it is what most CI runs use.
    let mut null_mesh = Mesh::new(&cfg, ctx, default_generator(), MeshOptions::default(), &null_factory).unwrap();
    null_mesh.initialize(0, Some(world));
    assert_partition_covers_every_block(&null_mesh, world);
}

fn main() {
    tracing_subscriber::fmt::init();
    let universe = mpi::initialize().expect("MPI_Init");
    let world = universe.world();
    run(&world);
}
