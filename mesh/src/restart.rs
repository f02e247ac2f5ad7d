//! Binary checkpoint/restart reader and writer (§4.4 "Restart
//! construction", §6 "Restart header", §8 invariant 4 and S5).
//!
//! The layout matches §6 exactly: a rank-shared header, `nbtotal` fixed
//! fields and per-block payloads in a single direct-access file. All
//! multi-byte integers and reals are written in the host's own byte order
//! (`to_ne_bytes`/`from_ne_bytes`) rather than a portable wire format —
//! the source's raw-memory restart layout does not survive cross-endian
//! migration either (§6), so there is nothing to gain from a portable
//! codec here. Bulk per-block payload arrays are moved with
//! `bytemuck::cast_slice`, avoiding an element-by-element copy for the
//! part of the format that is actually bulk numeric data.
//!
//! Per-block payload *content* (conserved variables, optional GR/MHD
//! arrays) is opaque to this module — it is handed to and read back from
//! [`crate::physics::PhysicsHooks::write_restart_payload`] /
//! [`load_restart_payload`](crate::physics::PhysicsHooks::load_restart_payload)
//! so the codec never depends on a concrete physics crate (§6).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{error, info};

use crate::block_tree::BlockTree;
use crate::config::Config;
use crate::error::{CorruptedRestart, MeshError, MeshResult};
use crate::load_balancer;
use crate::logical_location::LogicalLocation;
use crate::mesh::{Mesh, MeshOptions, PhysicsFactory};
use crate::rank_context::RankContext;
use crate::region::{BoundaryTag, BoundaryTags, MeshGenerator, RegionSize};

const REGION_SIZE_BYTES: usize = 8 * 9 + 4 * 3; // 9 reals + 3 ints, field order below
const BOUNDARY_TAGS_BYTES: usize = 4 * 6;
const INDEX_RECORD_BYTES: usize = 4 + (4 + 8 * 3) + 8 + 8; // gid, loc, cost, offset

/// The rank-shared prefix of a restart file (§6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartHeader {
    pub nbtotal: i32,
    pub root_level: i32,
    pub mesh_size: RegionSize,
    pub mesh_bcs: BoundaryTags,
    pub time: f64,
    pub dt: f64,
    pub ncycle: i64,
}

/// One entry of the restart index: `{gid, LogicalLocation, cost, offset}`
/// (§6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockIndexRecord {
    pub gid: i32,
    pub loc: LogicalLocation,
    pub cost: f64,
    pub offset: u64,
}

fn boundary_tag_code(tag: BoundaryTag) -> i32 {
    match tag {
        BoundaryTag::Reflecting => 0,
        BoundaryTag::Outflow => 1,
        BoundaryTag::Periodic => 2,
        BoundaryTag::User => 3,
        BoundaryTag::Polar => 4,
        BoundaryTag::Internal => -1,
    }
}

fn boundary_tag_from_code(code: i32) -> MeshResult<BoundaryTag> {
    Ok(match code {
        0 => BoundaryTag::Reflecting,
        1 => BoundaryTag::Outflow,
        2 => BoundaryTag::Periodic,
        3 => BoundaryTag::User,
        4 => BoundaryTag::Polar,
        -1 => BoundaryTag::Internal,
        other => {
            let err: MeshError = CorruptedRestart::InvalidLocation(LogicalLocation::default()).into();
            error!(code = other, "unrecognized boundary tag code in restart file");
            return Err(err);
        }
    })
}

fn read_exact_checked<R: Read>(r: &mut R, buf: &mut [u8], what: &'static str) -> MeshResult<()> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => {
                let err: MeshError =
                    CorruptedRestart::ShortRead { what, needed: buf.len(), got }.into();
                error!(error = %err, "short read during restart reconstruction");
                return Err(err);
            }
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(MeshError::Io(e)),
        }
    }
    Ok(())
}

fn write_i32(w: &mut impl Write, v: i32) -> MeshResult<()> {
    Ok(w.write_all(&v.to_ne_bytes())?)
}
fn write_i64(w: &mut impl Write, v: i64) -> MeshResult<()> {
    Ok(w.write_all(&v.to_ne_bytes())?)
}
fn write_u64(w: &mut impl Write, v: u64) -> MeshResult<()> {
    Ok(w.write_all(&v.to_ne_bytes())?)
}
fn write_f64(w: &mut impl Write, v: f64) -> MeshResult<()> {
    Ok(w.write_all(&v.to_ne_bytes())?)
}

fn read_i32<R: Read>(r: &mut R, what: &'static str) -> MeshResult<i32> {
    let mut b = [0u8; 4];
    read_exact_checked(r, &mut b, what)?;
    Ok(i32::from_ne_bytes(b))
}
fn read_i64<R: Read>(r: &mut R, what: &'static str) -> MeshResult<i64> {
    let mut b = [0u8; 8];
    read_exact_checked(r, &mut b, what)?;
    Ok(i64::from_ne_bytes(b))
}
fn read_u64<R: Read>(r: &mut R, what: &'static str) -> MeshResult<u64> {
    let mut b = [0u8; 8];
    read_exact_checked(r, &mut b, what)?;
    Ok(u64::from_ne_bytes(b))
}
fn read_f64<R: Read>(r: &mut R, what: &'static str) -> MeshResult<f64> {
    let mut b = [0u8; 8];
    read_exact_checked(r, &mut b, what)?;
    Ok(f64::from_ne_bytes(b))
}

fn write_region_size(w: &mut impl Write, size: &RegionSize) -> MeshResult<()> {
    write_f64(w, size.x1min)?;
    write_f64(w, size.x1max)?;
    write_f64(w, size.x2min)?;
    write_f64(w, size.x2max)?;
    write_f64(w, size.x3min)?;
    write_f64(w, size.x3max)?;
    write_f64(w, size.x1rat)?;
    write_f64(w, size.x2rat)?;
    write_f64(w, size.x3rat)?;
    write_i32(w, size.nx1)?;
    write_i32(w, size.nx2)?;
    write_i32(w, size.nx3)?;
    Ok(())
}

fn read_region_size<R: Read>(r: &mut R) -> MeshResult<RegionSize> {
    Ok(RegionSize {
        x1min: read_f64(r, "RegionSize")?,
        x1max: read_f64(r, "RegionSize")?,
        x2min: read_f64(r, "RegionSize")?,
        x2max: read_f64(r, "RegionSize")?,
        x3min: read_f64(r, "RegionSize")?,
        x3max: read_f64(r, "RegionSize")?,
        x1rat: read_f64(r, "RegionSize")?,
        x2rat: read_f64(r, "RegionSize")?,
        x3rat: read_f64(r, "RegionSize")?,
        nx1: read_i32(r, "RegionSize")?,
        nx2: read_i32(r, "RegionSize")?,
        nx3: read_i32(r, "RegionSize")?,
    })
}

fn write_boundary_tags(w: &mut impl Write, tags: &BoundaryTags) -> MeshResult<()> {
    for tag in [tags.ix1, tags.ox1, tags.ix2, tags.ox2, tags.ix3, tags.ox3] {
        write_i32(w, boundary_tag_code(tag))?;
    }
    Ok(())
}

fn read_boundary_tags<R: Read>(r: &mut R) -> MeshResult<BoundaryTags> {
    let mut codes = [0i32; 6];
    for c in &mut codes {
        *c = read_i32(r, "BoundaryTags")?;
    }
    Ok(BoundaryTags {
        ix1: boundary_tag_from_code(codes[0])?,
        ox1: boundary_tag_from_code(codes[1])?,
        ix2: boundary_tag_from_code(codes[2])?,
        ox2: boundary_tag_from_code(codes[3])?,
        ix3: boundary_tag_from_code(codes[4])?,
        ox3: boundary_tag_from_code(codes[5])?,
    })
}

fn write_location(w: &mut impl Write, loc: &LogicalLocation) -> MeshResult<()> {
    write_i32(w, loc.level)?;
    write_i64(w, loc.lx1)?;
    write_i64(w, loc.lx2)?;
    write_i64(w, loc.lx3)?;
    Ok(())
}

fn read_location<R: Read>(r: &mut R) -> MeshResult<LogicalLocation> {
    Ok(LogicalLocation {
        level: read_i32(r, "LogicalLocation")?,
        lx1: read_i64(r, "LogicalLocation")?,
        lx2: read_i64(r, "LogicalLocation")?,
        lx3: read_i64(r, "LogicalLocation")?,
    })
}

/// The size in bytes of one block's payload under a given per-block
/// restart payload length (`RegionSize` + `BoundaryTags` + the physics
/// payload, §6). Computed up front so every block's file offset is known
/// before any payload is written (§4.4).
fn block_payload_bytes(payload_len: usize) -> u64 {
    (REGION_SIZE_BYTES + BOUNDARY_TAGS_BYTES + payload_len * 8) as u64
}

fn header_bytes() -> u64 {
    (4 + 4 + REGION_SIZE_BYTES + BOUNDARY_TAGS_BYTES + 8 + 8 + 8) as u64
}

/// Writes the rank-shared header and the full block index, and returns
/// the file offset at which each gid's payload belongs. Called once
/// (conventionally by the root rank); every rank then calls
/// [`write_local_blocks`] to fill in the blocks it owns (§4.4).
pub fn write_header_and_index(path: &Path, mesh: &Mesh, payload_len: usize) -> MeshResult<Vec<u64>> {
    let nbtotal = mesh.loclist.len();
    let payload_bytes = block_payload_bytes(payload_len);
    let index_bytes = nbtotal as u64 * INDEX_RECORD_BYTES as u64;
    let base = header_bytes() + index_bytes;

    let offsets: Vec<u64> = (0..nbtotal).map(|gid| base + gid as u64 * payload_bytes).collect();

    let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    write_i32(&mut file, nbtotal as i32)?;
    write_i32(&mut file, mesh.root_level)?;
    write_region_size(&mut file, &mesh.mesh_size)?;
    write_boundary_tags(&mut file, &mesh.mesh_bcs)?;
    write_f64(&mut file, mesh.time)?;
    write_f64(&mut file, mesh.dt)?;
    write_i64(&mut file, mesh.ncycle)?;

    for gid in 0..nbtotal {
        write_i32(&mut file, gid as i32)?;
        write_location(&mut file, &mesh.loclist[gid])?;
        write_f64(&mut file, mesh.costlist[gid])?;
        write_u64(&mut file, offsets[gid])?;
    }

    info!(nbtotal, path = %path.display(), "wrote restart header and index");
    Ok(offsets)
}

/// Writes every block this rank owns to its precomputed offset (§4.4).
/// Must run after [`write_header_and_index`] has created the file (on
/// any rank, including this one); multiple ranks writing disjoint
/// byte ranges of the same file is the caller's responsibility to
/// sequence (e.g. behind a barrier) since this module has no MPI
/// dependency of its own for plain file I/O.
pub fn write_local_blocks(path: &Path, mesh: &Mesh, offsets: &[u64]) -> MeshResult<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    for block in &mesh.blocks {
        let offset = offsets[block.gid as usize];
        file.seek(SeekFrom::Start(offset))?;
        write_region_size(&mut file, &block.size)?;
        write_boundary_tags(&mut file, &block.boundary_tags)?;
        let mut payload = Vec::with_capacity(block.physics.restart_payload_len());
        block.physics.write_restart_payload(&mut payload);
        file.write_all(bytemuck::cast_slice(&payload))?;
    }
    info!(nblocks = mesh.blocks.len(), path = %path.display(), "wrote local block payloads");
    Ok(())
}

/// Convenience wrapper for a single-rank run (most tests, and any binary
/// running with exactly one rank): writes the header, index, and every
/// block in one call.
pub fn write_restart(path: &Path, mesh: &Mesh, payload_len: usize) -> MeshResult<()> {
    let offsets = write_header_and_index(path, mesh, payload_len)?;
    write_local_blocks(path, mesh, &offsets)
}

/// Reads the header and the full block index (§4.4 "Restart
/// construction" steps 1-2).
pub fn read_header_and_index(path: &Path) -> MeshResult<(RestartHeader, Vec<BlockIndexRecord>)> {
    let mut file = File::open(path)?;
    let nbtotal = read_i32(&mut file, "restart header nbtotal")?;
    let root_level = read_i32(&mut file, "restart header root_level")?;
    let mesh_size = read_region_size(&mut file)?;
    let mesh_bcs = read_boundary_tags(&mut file)?;
    let time = read_f64(&mut file, "restart header time")?;
    let dt = read_f64(&mut file, "restart header dt")?;
    let ncycle = read_i64(&mut file, "restart header ncycle")?;

    let mut records = Vec::with_capacity(nbtotal.max(0) as usize);
    for _ in 0..nbtotal {
        let gid = read_i32(&mut file, "restart index gid")?;
        let loc = read_location(&mut file)?;
        let cost = read_f64(&mut file, "restart index cost")?;
        let offset = read_u64(&mut file, "restart index offset")?;
        records.push(BlockIndexRecord { gid, loc, cost, offset });
    }

    let header = RestartHeader { nbtotal, root_level, mesh_size, mesh_bcs, time, dt, ncycle };
    Ok((header, records))
}

/// Rebuilds a [`Mesh`] from a restart file (§4.4 "Restart construction").
///
/// Mesh shape (tree, locations, costs, time/cycle state) comes entirely
/// from `path`; run-control parameters that are not mesh state —
/// `tlim`, `nlim`, `cfl_number`, and (for an adaptive run) `maxlevel` —
/// come from a freshly parsed `config`, exactly as a non-restarted run
/// reads them, since whether a restarted run keeps refining adaptively
/// or runs to a new time limit is a run-control decision, not something
/// the restart file itself should pin (§4.4, §4.8).
pub fn read_restart(
    path: &Path,
    config: &Config,
    ctx: RankContext,
    generator: Box<dyn MeshGenerator>,
    options: MeshOptions,
    physics_factory: &PhysicsFactory,
) -> MeshResult<Mesh> {
    let (header, records) = read_header_and_index(path)?;
    let dim = header.mesh_size.dim();
    let max_level = if matches!(config.mesh.refinement, crate::config::RefinementMode::Adaptive) {
        (header.root_level + config.mesh.maxlevel - 1).min(crate::logical_location::MAX_LEVEL)
    } else {
        crate::logical_location::MAX_LEVEL
    };

    let mut by_gid = records.clone();
    by_gid.sort_by_key(|r| r.gid);

    let mut file = File::open(path)?;
    let first = by_gid.first().ok_or_else(|| {
        let err: MeshError =
            CorruptedRestart::LeafCountMismatch { nbtotal: header.nbtotal, rebuilt: 0 }.into();
        error!(error = %err, "restart file has no blocks");
        err
    })?;
    file.seek(SeekFrom::Start(first.offset))?;
    let first_block_size = read_region_size(&mut file)?;
    let block_nx = (first_block_size.nx1, first_block_size.nx2, first_block_size.nx3);

    let nrbx = [
        (header.mesh_size.nx1 / block_nx.0) as i64,
        if dim >= 2 { (header.mesh_size.nx2 / block_nx.1) as i64 } else { 1 },
        if dim >= 3 { (header.mesh_size.nx3 / block_nx.2) as i64 } else { 1 },
    ];

    let mut tree = BlockTree::empty(nrbx[0], nrbx[1], nrbx[2], header.root_level, dim);
    for record in &by_gid {
        tree.add_without_refine(record.loc);
    }
    if tree.count_leaves() != by_gid.len() {
        let err: MeshError = CorruptedRestart::LeafCountMismatch {
            nbtotal: header.nbtotal,
            rebuilt: tree.count_leaves() as i32,
        }
        .into();
        error!(error = %err, "restart tree reconstruction does not match the recorded leaf count");
        return Err(err);
    }

    let loclist: Vec<LogicalLocation> = by_gid.iter().map(|r| r.loc).collect();
    let costlist: Vec<f64> = by_gid.iter().map(|r| r.cost).collect();
    let assignment = load_balancer::assign(&costlist, &ctx)?;

    let multilevel = loclist.iter().any(|l| l.level != header.root_level);
    let face_only = !(multilevel || options.edges_and_corners);

    let mut mesh = Mesh::from_restart_state(
        tree,
        dim,
        nrbx,
        header.root_level,
        max_level,
        multilevel,
        face_only,
        header.mesh_size,
        header.mesh_bcs,
        block_nx,
        generator,
        loclist,
        costlist,
        assignment.ranklist,
        assignment.nslist,
        assignment.nblist,
        ctx,
        header.time,
        header.dt,
        config.time.tlim,
        config.time.nlim,
        config.time.cfl_number,
        header.ncycle,
    );

    let start = mesh.nslist[ctx.rank as usize] as usize;
    let count = mesh.nblist[ctx.rank as usize] as usize;
    for gid in start..start + count {
        let record = &by_gid[gid];
        file.seek(SeekFrom::Start(record.offset))?;
        let size = read_region_size(&mut file)?;
        let bcs = read_boundary_tags(&mut file)?;
        let mut physics = physics_factory(gid as i32, record.loc, size, bcs);
        let payload_len = physics.restart_payload_len();
        // Allocated as `f64` rather than `u8` so the buffer is already
        // 8-byte aligned for `cast_slice_mut` — a `Vec<u8>` view reinterpreted
        // as `f64` has no such alignment guarantee (§6).
        let mut payload = vec![0.0f64; payload_len];
        read_exact_checked(&mut file, bytemuck::cast_slice_mut(&mut payload), "restart block payload")?;
        physics.load_restart_payload(&payload);
        mesh.push_restored_block(gid as i32, record.loc, size, bcs, physics);
    }

    info!(nbtotal = header.nbtotal, nblocks = mesh.blocks.len(), "reconstructed mesh from restart");
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::default_generator;
    use crate::physics::{NullPhysics, PhysicsHooks, StepOutcome};

    #[derive(Debug, Clone, Default)]
    struct RecordingPhysics {
        values: Vec<f64>,
    }

    impl PhysicsHooks for RecordingPhysics {
        fn step_advance(&mut self) -> StepOutcome {
            StepOutcome::Complete
        }
        fn pack_boundary(&self, _buffer_id: i32, _out: &mut Vec<f64>) {}
        fn unpack_boundary(&mut self, _buffer_id: i32, _data: &[f64]) {}
        fn prolongate(&mut self, _buffer_id: i32) {}
        fn restrict(&mut self, _buffer_id: i32) {}
        fn problem_init(&mut self) {}
        fn cfl_dt(&self) -> f64 {
            0.1
        }
        fn restart_payload_len(&self) -> usize {
            4
        }
        fn write_restart_payload(&self, out: &mut Vec<f64>) {
            out.extend_from_slice(&self.values);
        }
        fn load_restart_payload(&mut self, data: &[f64]) {
            self.values = data.to_vec();
        }
    }

    fn recording_factory(
        gid: i32,
        _loc: LogicalLocation,
        _size: RegionSize,
        _bcs: BoundaryTags,
    ) -> Box<dyn PhysicsHooks> {
        Box::new(RecordingPhysics { values: vec![gid as f64, gid as f64 * 2.0, 1.0, -1.0] })
    }

    fn null_factory(
        _gid: i32,
        _loc: LogicalLocation,
        _size: RegionSize,
        _bcs: BoundaryTags,
    ) -> Box<dyn PhysicsHooks> {
        Box::new(NullPhysics::with_dt(0.1))
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

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("mesh-restart-test-{name}-{}.bin", std::process::id()));
        p
    }

    #[test]
    fn s5_restart_round_trip_preserves_globals_and_payload() {
        let cfg = Config::from_str(two_d_static_refinement_toml()).unwrap();
        let ctx = RankContext::single_rank_for_test();
        let mesh = Mesh::new(&cfg, ctx, default_generator(), MeshOptions::default(), &recording_factory).unwrap();

        let path = tmp_path("roundtrip");
        write_restart(&path, &mesh, 4).unwrap();

        let restored =
            read_restart(&path, &cfg, ctx, default_generator(), MeshOptions::default(), &recording_factory).unwrap();
        let _ = std::fs::remove_file(&path);

        // Invariant 4: identical loclist, costlist, ranklist, per-block size.
        assert_eq!(restored.loclist, mesh.loclist);
        assert_eq!(restored.costlist, mesh.costlist);
        assert_eq!(restored.ranklist, mesh.ranklist);
        assert_eq!(restored.blocks.len(), mesh.blocks.len());
        for (a, b) in mesh.blocks.iter().zip(restored.blocks.iter()) {
            assert_eq!(a.gid, b.gid);
            assert_eq!(a.loc, b.loc);
            assert_eq!(a.size, b.size);
        }

        // Byte-identical payload: recover it back out through the trait.
        for block in &restored.blocks {
            let mut out = Vec::new();
            block.physics.write_restart_payload(&mut out);
            assert_eq!(out, vec![block.gid as f64, block.gid as f64 * 2.0, 1.0, -1.0]);
        }
    }

    #[test]
    fn restart_rejects_truncated_file() {
        let cfg = Config::from_str(two_d_static_refinement_toml()).unwrap();
        let ctx = RankContext::single_rank_for_test();
        let mesh = Mesh::new(&cfg, ctx, default_generator(), MeshOptions::default(), &null_factory).unwrap();

        let path = tmp_path("truncated");
        write_restart(&path, &mesh, 0).unwrap();
        let full_len = std::fs::metadata(&path).unwrap().len();
        let truncated = File::options().write(true).open(&path).unwrap();
        truncated.set_len(full_len / 2).unwrap();
        drop(truncated);

        let result = read_restart(&path, &cfg, ctx, default_generator(), MeshOptions::default(), &null_factory);
        let _ = std::fs::remove_file(&path);
        assert!(result.is_err());
    }
}
