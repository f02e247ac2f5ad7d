//! End-to-end scenarios and cross-module invariants, exercised only
//! through the crate's public API (no access to private fields) — the
//! six scenarios and the invariants that aren't already pinned down by a
//! unit test living next to the code they check.

use mesh::config::Config;
use mesh::load_balancer;
use mesh::logical_location::LogicalLocation;
use mesh::mesh::{default_generator, MeshOptions};
use mesh::neighbor::NeighborType;
use mesh::physics::{NullPhysics, PhysicsHooks};
use mesh::rank_context::RankContext;
use mesh::region::{BoundaryTags, RegionSize};
use mesh::Mesh;

fn null_factory(_gid: i32, _loc: LogicalLocation, _size: RegionSize, _bcs: BoundaryTags) -> Box<dyn PhysicsHooks> {
    Box::new(NullPhysics::with_dt(0.1))
}

fn build(toml: &str) -> Mesh {
    let cfg = Config::from_str(toml).unwrap();
    Mesh::new(&cfg, RankContext::single_rank_for_test(), default_generator(), MeshOptions::default(), &null_factory)
        .unwrap()
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

/// S1: uniform 3D grid — 8 blocks, root level 1, 6 face neighbors each.
#[test]
fn s1_uniform_3d_grid() {
    let mesh = build(uniform_3d_periodic_toml());
    assert_eq!(mesh.nbtotal(), 8);
    assert_eq!(mesh.root_level, 1);
    assert!(!mesh.is_multilevel());
    for block in &mesh.blocks {
        let faces = block.neighbors.neighbors.iter().filter(|n| n.neighbor_type == NeighborType::Face).count();
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

/// S2: 1D grid — CFL 0.8 succeeds, CFL 1.1 fails, two face neighbors per block.
#[test]
fn s2_one_dimensional_grid() {
    let mesh = build(&one_d_toml(0.8));
    assert_eq!(mesh.dim, 1);
    assert_eq!(mesh.nbtotal(), 4);
    for block in &mesh.blocks {
        let faces = block.neighbors.neighbors.iter().filter(|n| n.neighbor_type == NeighborType::Face).count();
        assert_eq!(faces, 2);
    }

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

/// S3: 2D static refinement — 28 leaves, coarse-fine interfaces differ by
/// exactly one level (invariant 1).
#[test]
fn s3_two_dimensional_static_refinement() {
    let mesh = build(two_d_static_refinement_toml());
    assert_eq!(mesh.nbtotal(), 16 - 4 + 16);
    assert!(mesh.is_multilevel());
    assert_invariant_1_bounded_level_jump(&mesh);
}

/// S4: load balance — 10 blocks, 4 ranks, uniform cost -> {2,2,3,3}, rank 0
/// gets 2.
#[test]
fn s4_load_balance_uniform_cost() {
    let costs = vec![1.0; 10];
    let ctx = RankContext::for_test(0, 4);
    let a = load_balancer::assign(&costs, &ctx).unwrap();
    let mut counts = a.nblist.clone();
    counts.sort();
    assert_eq!(counts, vec![2, 2, 3, 3]);
    assert_eq!(a.nblist[0], 2);
}

/// S5: restart round trip preserves globals, per-block size, and payload
/// (invariant 4). Covered in depth in `restart.rs`'s own unit tests; this
/// is the black-box version using only the public API.
#[test]
fn s5_restart_round_trip() {
    use mesh::restart::{read_restart, write_restart};

    let mesh = build(two_d_static_refinement_toml());
    let cfg = Config::from_str(two_d_static_refinement_toml()).unwrap();
    let mut path = std::env::temp_dir();
    path.push(format!("mesh-scenario-restart-{}.bin", std::process::id()));

    write_restart(&path, &mesh, 0).unwrap();
    let restored = read_restart(
        &path,
        &cfg,
        RankContext::single_rank_for_test(),
        default_generator(),
        MeshOptions::default(),
        &null_factory,
    )
    .unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(restored.loclist, mesh.loclist);
    assert_eq!(restored.costlist, mesh.costlist);
    assert_eq!(restored.ranklist, mesh.ranklist);
    for (a, b) in mesh.blocks.iter().zip(restored.blocks.iter()) {
        assert_eq!(a.size, b.size);
    }
    assert_neighbor_symmetry(&restored);
}

/// S6: derefinement rejection — a lone flagged sibling out of four leaves
/// the tree untouched and the cycle reports zero derefinements.
#[test]
fn s6_derefinement_rejection() {
    use mesh::rank_context::SingleRankCollectives;
    use mesh::refinement::{run_cycle, RefineFlag};

    let mut mesh = build(two_d_static_refinement_toml());
    let nbefore = mesh.nbtotal();
    let mut flags = vec![RefineFlag::Keep; mesh.blocks.len()];
    // Flag exactly one leaf of a four-sibling group for derefinement.
    if let Some((lid, _)) = mesh.blocks.iter().enumerate().find(|(_, b)| b.loc.level > mesh.root_level) {
        flags[lid] = RefineFlag::Derefine;
    }
    let summary = run_cycle(&mut mesh, &flags, &SingleRankCollectives, None, &null_factory);
    assert_eq!(summary.derefined, 0);
    assert_eq!(mesh.nbtotal(), nbefore);
}

/// Invariant 1: every leaf pair sharing a face differs by at most one
/// refinement level, read off the 3x3x3 `nblevel` map every block already
/// carries.
fn assert_invariant_1_bounded_level_jump(mesh: &Mesh) {
    for block in &mesh.blocks {
        for k in 0..3 {
            for j in 0..3 {
                for i in 0..3 {
                    let level = block.neighbors.nblevel[k][j][i];
                    if level < 0 {
                        continue;
                    }
                    assert!((level - block.loc.level).abs() <= 1, "level jump exceeds one across a shared face/edge/corner");
                }
            }
        }
    }
}

/// Invariant 5: if A's neighbor in direction d is B, B has a neighbor
/// pointing back toward A in direction -d (same rank only here, since this
/// is a single-rank scenario; cross-rank symmetry is exercised by
/// `mesh-parallel-tests`).
fn assert_neighbor_symmetry(mesh: &Mesh) {
    for block in &mesh.blocks {
        for nb in &block.neighbors.neighbors {
            let Some(other) = mesh.find_block(nb.gid) else { continue };
            let back = other.neighbors.neighbors.iter().find(|o| o.gid == block.gid);
            assert!(back.is_some(), "block {} has no return neighbor toward {}", nb.gid, block.gid);
        }
    }
}

/// Invariant 6: the canonical buffer-id scheme never collides and never
/// overruns its capacity, for every direction and finer-child sub-octant a
/// block of any dimensionality can actually produce. For the full 3D,
/// non-face-only case (the only one where every one of the 26 directions
/// is in play) the ids also form a complete, gap-free `[0, maxneighbor)` —
/// that's what lets a null neighbor's id still "advance" the packed space
/// (§4.2) on both ends of an exchange.
#[test]
fn invariant_6_buffer_id_scheme_is_collision_free_and_in_bounds() {
    use mesh::neighbor::{buffer_id_capacity, find_buffer_id};

    for dim in 1..=3 {
        for face_only in [false, true] {
            for multilevel in [false, true] {
                let cap = buffer_id_capacity(dim, multilevel, face_only);
                let mut seen = vec![false; cap as usize];
                let subs: &[(i32, i32)] = if multilevel { &[(0, 0), (1, 0), (0, 1), (1, 1)] } else { &[(0, 0)] };
                let mut count = 0;
                for k in -1..=1 {
                    if dim < 3 && k != 0 {
                        continue;
                    }
                    for j in -1..=1 {
                        if dim < 2 && j != 0 {
                            continue;
                        }
                        for i in -1..=1 {
                            if i == 0 && j == 0 && k == 0 {
                                continue;
                            }
                            let nonzero = (i != 0) as i32 + (j != 0) as i32 + (k != 0) as i32;
                            if face_only && nonzero > 1 {
                                continue;
                            }
                            for &(fi1, fi2) in subs {
                                let id = find_buffer_id(i, j, k, fi1, fi2, cap);
                                assert!((id as usize) < seen.len(), "buffer id {id} overruns capacity {cap}");
                                assert!(!seen[id as usize], "buffer id {id} assigned twice for dim {dim}");
                                seen[id as usize] = true;
                                count += 1;
                            }
                        }
                    }
                }
                if dim == 3 && !face_only {
                    assert_eq!(count as i32, cap, "full 3D scheme must densely cover [0, {cap})");
                }
            }
        }
    }
}

/// Invariant 2: per-rank block ranges are contiguous and sum to nbtotal.
#[test]
fn invariant_2_rank_ranges_are_contiguous() {
    let mesh = build(uniform_3d_periodic_toml());
    assert_eq!(mesh.nblist.iter().sum::<i32>(), mesh.nbtotal() as i32);
    let mut expected_start = 0;
    for r in 0..mesh.nblist.len() {
        assert_eq!(mesh.nslist[r], expected_start);
        expected_start += mesh.nblist[r];
    }
}

/// Invariant 7: after a refinement cycle, every leaf's location is
/// consistent with a complete octant partition of some ancestor — i.e.
/// every leaf below the root level has a full 2^dim sibling group sharing
/// its parent.
#[test]
fn invariant_7_leaves_form_complete_octant_partitions() {
    use mesh::rank_context::SingleRankCollectives;
    use mesh::refinement::{run_cycle, RefineFlag};
    use std::collections::HashSet;

    let mut mesh = build(uniform_3d_periodic_toml());
    let mut flags = vec![RefineFlag::Keep; mesh.blocks.len()];
    flags[0] = RefineFlag::Refine;
    run_cycle(&mut mesh, &flags, &SingleRankCollectives, None, &null_factory);

    let locs: HashSet<LogicalLocation> = mesh.loclist.iter().copied().collect();
    for &loc in &mesh.loclist {
        if loc.level <= mesh.root_level {
            continue;
        }
        let parent = loc.parent();
        for sibling in parent.children(mesh.dim) {
            assert!(locs.contains(&sibling), "sibling {sibling:?} of leaf {loc:?} missing from the leaf set");
        }
    }
}
