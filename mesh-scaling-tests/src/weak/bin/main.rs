//! Weak-scaling harness: block count per rank held fixed
//! (`MESH_BLOCKS_PER_RANK`, default 16) while the rank count grows, so the
//! root grid itself grows with `world.size()`. Reports wall-clock time for
//! construction, initialization, and a handful of refinement cycles.

use std::time::Instant;

use mesh::mesh::{default_generator, MeshOptions};
use mesh::physics::{NullPhysics, PhysicsHooks, StepOutcome};
use mesh::rank_context::{MpiCollectives, RankContext};
use mesh::refinement::{self, RefineFlag};
use mesh::region::{BoundaryTags, RegionSize};
use mesh::logical_location::LogicalLocation;
use mesh::{Config, Mesh};
use mpi::traits::*;
use tracing::info;

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn null_factory(_gid: i32, _loc: LogicalLocation, _size: RegionSize, _bcs: BoundaryTags) -> Box<dyn PhysicsHooks> {
    Box::new(NullPhysics::with_dt(0.1))
}

fn mesh_toml(nrbx1: usize, nrbx2: usize, block_nx: i32) -> String {
    format!(
        r#"
        [time]
        tlim = 1.0
        cfl_number = 0.4

        [mesh]
        nx1 = {nx1}
        nx2 = {nx2}
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
        nx1 = {block_nx}
        nx2 = {block_nx}
        "#,
        nx1 = nrbx1 as i32 * block_nx,
        nx2 = nrbx2 as i32 * block_nx,
    )
}

fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("MESH_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let universe = mpi::initialize().expect("MPI_Init");
    let world = universe.world();
    let ctx = RankContext::from_world(&world);
    let nranks = world.size().max(1) as usize;

    let blocks_per_rank = env_usize("MESH_BLOCKS_PER_RANK", 16);
    let block_nx = env_usize("MESH_BLOCK_NX", 8) as i32;
    let total_blocks = blocks_per_rank * nranks;
    // A roughly square root-level grid whose leaf count scales with rank
    // count, matching this harness's "hold per-rank work fixed" contract.
    let side = (total_blocks as f64).sqrt().ceil() as usize;
    let (nrbx1, nrbx2) = (side.max(1), (total_blocks / side.max(1)).max(1));

    let cfg = Config::from_str(&mesh_toml(nrbx1, nrbx2, block_nx)).expect("weak-scaling config must be valid");

    let t0 = Instant::now();
    let mut mesh = Mesh::new(&cfg, ctx, default_generator(), MeshOptions::default(), &null_factory)
        .expect("weak-scaling mesh construction");
    let construct_time = t0.elapsed();

    let t1 = Instant::now();
    mesh.initialize(0, Some(&world));
    let init_time = t1.elapsed();

    let collectives = MpiCollectives::new(&world);
    let t2 = Instant::now();
    for _ in 0..3 {
        let flags = vec![RefineFlag::Keep; mesh.blocks.len()];
        refinement::run_cycle(&mut mesh, &flags, &collectives, Some(&world), &null_factory);
    }
    let cycle_time = t2.elapsed();

    if ctx.is_root() {
        info!(
            nranks,
            nbtotal = mesh.nbtotal(),
            blocks_per_rank,
            construct_ms = construct_time.as_secs_f64() * 1e3,
            init_ms = init_time.as_secs_f64() * 1e3,
            cycle_ms = cycle_time.as_secs_f64() * 1e3,
            "weak scaling point"
        );
        println!(
            "weak: nranks={nranks} nbtotal={} construct_ms={:.3} init_ms={:.3} cycle_ms={:.3}",
            mesh.nbtotal(),
            construct_time.as_secs_f64() * 1e3,
            init_time.as_secs_f64() * 1e3,
            cycle_time.as_secs_f64() * 1e3
        );
    }
}
