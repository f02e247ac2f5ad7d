//! Per-block neighbor discovery and the canonical boundary-buffer id
//! scheme (§4.2, §6).

use mpi::topology::Rank;

use crate::block_tree::{BlockTree, Neighbor as TreeNeighbor};
use crate::logical_location::LogicalLocation;
use crate::region::BoundaryTags;

/// Whether a neighbor shares a face, an edge, or only a corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborType {
    Face,
    Edge,
    Corner,
}

/// One entry in a block's neighbor list (§3).
#[derive(Debug, Clone, Copy)]
pub struct NeighborBlock {
    pub rank: Rank,
    pub level: i32,
    /// Global block id (index into `Mesh::loclist`/`costlist`/`ranklist`).
    pub gid: i32,
    /// Index into the owning rank's local block vector.
    pub lid: i32,
    pub ox1: i32,
    pub ox2: i32,
    pub ox3: i32,
    pub neighbor_type: NeighborType,
    pub buffer_id: i32,
    pub target_buffer_id: i32,
    /// Which finer child this entry corresponds to, when the neighbor is
    /// finer than this block (0 otherwise).
    pub fi1: i32,
    pub fi2: i32,
}

/// The 26-direction neighbor table plus the 3x3x3 level map (§4.2).
#[derive(Debug, Clone)]
pub struct NeighborTable {
    pub neighbors: Vec<NeighborBlock>,
    /// `nblevel[k][j][i]` is the level of the neighbor in direction
    /// `(i-1, j-1, k-1)`, or -1 if there is none; the center is always this
    /// block's own level.
    pub nblevel: [[[i32; 3]; 3]; 3],
}

/// Every direction with at least one nonzero offset, in the fixed
/// canonical order that both ends of an exchange agree on. Offsets are
/// `(ox1, ox2, ox3)` each in `{-1, 0, 1}`.
fn canonical_directions(dim: i32, face_only: bool) -> Vec<(i32, i32, i32)> {
    let mut dirs = Vec::with_capacity(26);
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
                dirs.push((i, j, k));
            }
        }
    }
    dirs
}

fn neighbor_type(ox1: i32, ox2: i32, ox3: i32) -> NeighborType {
    match (ox1 != 0) as i32 + (ox2 != 0) as i32 + (ox3 != 0) as i32 {
        1 => NeighborType::Face,
        2 => NeighborType::Edge,
        _ => NeighborType::Corner,
    }
}

/// Whether `loc` is the one sibling entitled to report an edge/corner
/// neighbor that resolved coarser than its own level (§4.2).
///
/// An edge or corner direction reaches past more than one axis at once, so
/// several siblings of the same parent can all have that direction resolve
/// to the same single coarser block on the other side — each would derive
/// the same `target_buffer_id` there, and without this check the coarser
/// block would see more than one sender land on the slot it expects exactly
/// one sender for. Only the sibling sitting on the outward side of every
/// nonzero axis of the direction is the one actually touching that corner
/// or edge from the coarse block's perspective; the others are skipped.
/// Face directions never need this: a single nonzero axis already pins the
/// direction to one side of the parent, so the ambiguity can't arise.
fn is_unique_edge_or_corner_sender(loc: LogicalLocation, ox1: i32, ox2: i32, ox3: i32) -> bool {
    if loc.level == 0 {
        return true;
    }
    let (i, j, k) = loc.octant();
    (ox1 == 0 || (ox1 > 0) == (i == 1)) && (ox2 == 0 || (ox2 > 0) == (j == 1)) && (ox3 == 0 || (ox3 > 0) == (k == 1))
}

/// Compact, symmetric rank of a direction in `[0, 25]`: opposite
/// directions satisfy `rank(-ox) == 25 - rank(ox)`, so each side of an
/// exchange can compute the other's slot without consulting its tree.
fn direction_rank(ox1: i32, ox2: i32, ox3: i32) -> i32 {
    let idx = (ox1 + 1) + 3 * (ox2 + 1) + 9 * (ox3 + 1); // 0..=26, center = 13
    if idx < 13 {
        idx
    } else {
        idx - 1
    }
}

/// `BufferID(dim, multilevel, face_only) -> maxneighbor`: the size of the
/// dense id space a block's neighbor array must provide for this
/// configuration (§6).
///
/// [`find_buffer_id`] ranks a direction against the *full* 26-entry
/// offset space (it has no notion of `dim`/`face_only` — both ends of an
/// exchange must agree on an id without knowing the other side's mesh
/// dimensionality), so the capacity has to reserve the whole 26-direction
/// range even when a lower-dimensional or face-only mesh only ever
/// populates a subset of it. Sizing this by the *filtered* direction count
/// instead would let a direction's rank (up to 25) overrun a capacity
/// computed for, say, 2 or 6 directions.
pub fn buffer_id_capacity(_dim: i32, multilevel: bool, _face_only: bool) -> i32 {
    const NDIRS: i32 = 26;
    let sub_slots = if multilevel { 4 } else { 1 };
    NDIRS * sub_slots
}

/// `FindBufferID(ox1, ox2, ox3, fi1, fi2, maxneighbor) -> buffer id`: a
/// pure function of direction and finer-child sub-index, independent of
/// tree state, so both ends of an exchange derive the same id for a given
/// direction/sub-octant without needing to know what the other side's
/// tree looks like (§6).
///
/// The number of sub-slots per direction (4 when a coarse-fine interface
/// can exist and needs to disambiguate up to four finer children sharing
/// a face, 1 otherwise) isn't known to this function on its own — it's
/// derived from `maxneighbor`, which [`buffer_id_capacity`] already sized
/// using that same multilevel flag. Hardcoding 4 sub-slots regardless of
/// `maxneighbor` let a non-multilevel id overrun the capacity it was
/// checked against, since `buffer_id_capacity(dim, false, _)` only reserves
/// one slot per direction.
pub fn find_buffer_id(ox1: i32, ox2: i32, ox3: i32, fi1: i32, fi2: i32, maxneighbor: i32) -> i32 {
    let rank = direction_rank(ox1, ox2, ox3);
    let sub_slots = maxneighbor / 26;
    let sub = fi1 + 2 * fi2;
    let id = rank * sub_slots + sub;
    debug_assert!(id < maxneighbor, "buffer id {id} exceeds capacity {maxneighbor}");
    id
}

/// The finer-child sub-octant offsets touching direction `ox`, in the
/// canonical `(fi1, fi2)` order used by [`find_buffer_id`]. For a face
/// direction in 3D this is all four combinations of the two axes
/// orthogonal to `ox`; for an edge, the two combinations along the single
/// free axis; for a corner, just `(0, 0)`.
fn finer_child_octants(ox1: i32, ox2: i32, ox3: i32) -> Vec<(i64, i64, i64, i32, i32)> {
    let axes_free: Vec<usize> = [ox1, ox2, ox3]
        .iter()
        .enumerate()
        .filter(|&(_, &o)| o == 0)
        .map(|(idx, _)| idx)
        .collect();

    let fixed = |axis: usize| -> i64 {
        let o = [ox1, ox2, ox3][axis];
        if o < 0 {
            1
        } else {
            0
        }
    };

    let mut out = Vec::new();
    match axes_free.len() {
        2 => {
            for (fi2, b2) in [0i64, 1].into_iter().enumerate() {
                for (fi1, b1) in [0i64, 1].into_iter().enumerate() {
                    let mut oct = [0i64; 3];
                    for a in 0..3 {
                        oct[a] = fixed(a);
                    }
                    oct[axes_free[0]] = b1;
                    oct[axes_free[1]] = b2;
                    out.push((oct[0], oct[1], oct[2], fi1 as i32, fi2 as i32));
                }
            }
        }
        1 => {
            for (fi1, b1) in [0i64, 1].into_iter().enumerate() {
                let mut oct = [0i64; 3];
                for a in 0..3 {
                    oct[a] = fixed(a);
                }
                oct[axes_free[0]] = b1;
                out.push((oct[0], oct[1], oct[2], fi1 as i32, 0));
            }
        }
        _ => {
            let oct = [fixed(0), fixed(1), fixed(2)];
            out.push((oct[0], oct[1], oct[2], 0, 0));
        }
    }
    out
}

/// This leaf's own `(fi1, fi2)` sub-octant index along the axes direction
/// `ox` leaves free, in the same order [`finer_child_octants`] assigns them.
/// When a coarser neighbor is reached via a face or edge direction, the
/// node on the other side builds its own table with `ox` reversed and
/// enumerates exactly this leaf among its finer children — so the slot this
/// leaf reports as its `target_buffer_id` has to match the `(fi1, fi2)` the
/// coarser side computed for it, not always `(0, 0)` (that coincidence only
/// holds for corners, which have no free axes).
fn own_sub_octant(loc: LogicalLocation, ox1: i32, ox2: i32, ox3: i32) -> (i32, i32) {
    let octant = loc.octant();
    let bits = [octant.0, octant.1, octant.2];
    let axes_free: Vec<usize> = [ox1, ox2, ox3]
        .iter()
        .enumerate()
        .filter(|&(_, &o)| o == 0)
        .map(|(idx, _)| idx)
        .collect();
    match axes_free.len() {
        2 => (bits[axes_free[0]] as i32, bits[axes_free[1]] as i32),
        1 => (bits[axes_free[0]] as i32, 0),
        _ => (0, 0),
    }
}

/// Builds the neighbor table for a single leaf (§4.2).
///
/// `gid_of` maps a tree [`NodeId`] to the global block id and owning rank
/// needed to fill in a [`NeighborBlock`] — the tree only knows shape, not
/// the mesh's rank assignment, so that lookup is supplied by the caller
/// (normally backed by `Mesh::loclist`/`ranklist`).
pub fn build_neighbor_table(
    tree: &BlockTree,
    loc: LogicalLocation,
    boundary_tags: &BoundaryTags,
    face_only: bool,
    multilevel: bool,
    gid_of: impl Fn(LogicalLocation) -> (i32, Rank),
) -> NeighborTable {
    let dim = tree.dim();
    let maxneighbor = buffer_id_capacity(dim, multilevel, face_only);
    let mut neighbors = Vec::new();
    let mut nblevel = [[[-1; 3]; 3]; 3];
    nblevel[1][1][1] = loc.level;

    for (ox1, ox2, ox3) in canonical_directions(dim, face_only) {
        match tree.find_neighbor(loc, ox1 as i64, ox2 as i64, ox3 as i64, boundary_tags) {
            TreeNeighbor::Null => {}
            TreeNeighbor::CoarserOrEqual(id) => {
                let nloc = tree.location(id);
                if nloc.level < loc.level
                    && neighbor_type(ox1, ox2, ox3) != NeighborType::Face
                    && !is_unique_edge_or_corner_sender(loc, ox1, ox2, ox3)
                {
                    continue;
                }
                let (gid, rank) = gid_of(nloc);
                let buffer_id = find_buffer_id(ox1, ox2, ox3, 0, 0, maxneighbor);
                let (own_fi1, own_fi2) = if nloc.level < loc.level { own_sub_octant(loc, ox1, ox2, ox3) } else { (0, 0) };
                let target_id = find_buffer_id(-ox1, -ox2, -ox3, own_fi1, own_fi2, maxneighbor);
                neighbors.push(NeighborBlock {
                    rank,
                    level: nloc.level,
                    gid,
                    lid: -1,
                    ox1,
                    ox2,
                    ox3,
                    neighbor_type: neighbor_type(ox1, ox2, ox3),
                    buffer_id,
                    target_buffer_id: target_id,
                    fi1: 0,
                    fi2: 0,
                });
                record_level(&mut nblevel, ox1, ox2, ox3, nloc.level);
            }
            TreeNeighbor::Finer(interior) => {
                for (i, j, k, fi1, fi2) in finer_child_octants(ox1, ox2, ox3) {
                    if let Some(child) = tree.get_leaf(interior, i, j, k) {
                        let nloc = tree.location(child);
                        let (gid, rank) = gid_of(nloc);
                        let buffer_id = find_buffer_id(ox1, ox2, ox3, fi1, fi2, maxneighbor);
                        let target_id = find_buffer_id(-ox1, -ox2, -ox3, 0, 0, maxneighbor);
                        neighbors.push(NeighborBlock {
                            rank,
                            level: nloc.level,
                            gid,
                            lid: -1,
                            ox1,
                            ox2,
                            ox3,
                            neighbor_type: neighbor_type(ox1, ox2, ox3),
                            buffer_id,
                            target_buffer_id: target_id,
                            fi1,
                            fi2,
                        });
                        record_level(&mut nblevel, ox1, ox2, ox3, nloc.level);
                    }
                }
            }
        }
    }

    NeighborTable { neighbors, nblevel }
}

/// Records a direction's neighbor level into every cell of the 3x3x3 map
/// it covers (a face direction covers a 1x3x3-ish slab; §4.2).
fn record_level(nblevel: &mut [[[i32; 3]; 3]; 3], ox1: i32, ox2: i32, ox3: i32, level: i32) {
    let is_ = if ox1 == 0 { 0..=2 } else { (ox1 + 1)..=(ox1 + 1) };
    let js_ = if ox2 == 0 { 0..=2 } else { (ox2 + 1)..=(ox2 + 1) };
    let ks_ = if ox3 == 0 { 0..=2 } else { (ox3 + 1)..=(ox3 + 1) };
    for k in ks_.clone() {
        for j in js_.clone() {
            for i in is_.clone() {
                if (i, j, k) != (1, 1, 1) {
                    nblevel[k as usize][j as usize][i as usize] = level;
                }
            }
        }
    }
}
