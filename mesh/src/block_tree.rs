//! The recursive octree of logical locations (§4.1).
//!
//! Nodes live in a single arena (`Vec<TreeNode>`) addressed by [`NodeId`]
//! rather than linked by pointers or `Rc`/`RefCell` cycles (§9). A
//! `LogicalLocation -> NodeId` index sits alongside the arena so callers can
//! look a location up directly instead of re-descending from the root on
//! every query; downward traversals (enumeration, splitting) still walk
//! the inline child arrays, which is the access pattern that dominates.
//!
//! **Level convention** (an Open Question this core resolves, see
//! DESIGN.md): `LogicalLocation::level` is the absolute depth from the
//! tree's single virtual super-root (level 0). Root blocks — the leaves
//! produced by [`BlockTree::create_root`] — sit at `root_level`, where
//! `root_level = ceil(log2(max(nrbx1, nrbx2, nrbx3)))`. Depths below
//! `root_level` are the "padded" virtual zone of §4.1: only the ancestor
//! chains that lead to a real root block are ever created there, so an
//! interior node at those depths may have fewer than `2^dim` children.
//! From `root_level` downward, every interior node has exactly `2^dim`
//! children, matching §3's invariant.

use std::collections::HashMap;

use crate::logical_location::LogicalLocation;
use crate::region::BoundaryTags;

/// Index into a [`BlockTree`]'s node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Debug, Clone)]
struct TreeNode {
    loc: LogicalLocation,
    /// `Some` for interior nodes; slot `i + 2*j + 4*k` holds the child in
    /// octant `(i, j, k)`, or `None` if that octant was never realized
    /// (only possible in the padding zone above `root_level`).
    children: Option<[Option<NodeId>; 8]>,
    is_leaf: bool,
}

impl TreeNode {
    fn leaf(loc: LogicalLocation) -> Self {
        TreeNode { loc, children: None, is_leaf: true }
    }
}

fn octant_index(i: i64, j: i64, k: i64) -> usize {
    debug_assert!((0..=1).contains(&i) && (0..=1).contains(&j) && (0..=1).contains(&k));
    (i + 2 * j + 4 * k) as usize
}

/// The outcome of a neighbor lookup (§4.1, §4.2).
#[derive(Debug, Clone, Copy)]
pub enum Neighbor {
    /// No neighbor in this direction (domain edge with a non-connecting
    /// boundary condition).
    Null,
    /// A leaf at an equal or coarser level.
    CoarserOrEqual(NodeId),
    /// An interior node at the same level as the query: the actual
    /// neighbors are its finer children touching the query direction.
    Finer(NodeId),
}

/// The recursive octree (quadtree in 2D, binary in 1D) of logical
/// locations (§4.1).
#[derive(Debug, Clone)]
pub struct BlockTree {
    nodes: Vec<TreeNode>,
    index: HashMap<LogicalLocation, NodeId>,
    dim: i32,
    nrbx: [i64; 3],
    root_level: i32,
}

impl BlockTree {
    /// `create_root`: builds the virtual super-root and realizes the
    /// `nrbx1 x nrbx2 x nrbx3` real root blocks as leaves at `root_level`,
    /// padded by unused ancestor nodes up to `2^root_level` on the longest
    /// axis (§4.1).
    pub fn create_root(nrbx1: i64, nrbx2: i64, nrbx3: i64, root_level: i32, dim: i32) -> Self {
        let super_root = TreeNode { loc: LogicalLocation::root(), children: None, is_leaf: false };
        let mut tree = BlockTree {
            nodes: vec![super_root],
            index: HashMap::new(),
            dim,
            nrbx: [nrbx1, nrbx2, nrbx3],
            root_level,
        };
        tree.index.insert(LogicalLocation::root(), NodeId(0));

        let n2 = if dim >= 2 { nrbx2 } else { 1 };
        let n3 = if dim >= 3 { nrbx3 } else { 1 };
        for lx3 in 0..n3 {
            for lx2 in 0..n2 {
                for lx1 in 0..nrbx1 {
                    let target = LogicalLocation::new(root_level, lx1, lx2, lx3);
                    tree.realize_padding_path(target);
                }
            }
        }
        tree
    }

    /// Builds a tree containing only the virtual super-root, with no root
    /// blocks pre-realized — used by restart, which recreates the tree's
    /// entire shape leaf-by-leaf via [`BlockTree::add_without_refine`]
    /// from the file's own record list rather than from `nrbx` (§4.4
    /// "Restart construction").
    pub fn empty(nrbx1: i64, nrbx2: i64, nrbx3: i64, root_level: i32, dim: i32) -> Self {
        let super_root = TreeNode { loc: LogicalLocation::root(), children: None, is_leaf: true };
        let mut tree = BlockTree {
            nodes: vec![super_root],
            index: HashMap::new(),
            dim,
            nrbx: [nrbx1, nrbx2, nrbx3],
            root_level,
        };
        tree.index.insert(LogicalLocation::root(), NodeId(0));
        tree
    }

    /// Creates the ancestor chain down to `target` without forcing
    /// sibling groups to exist (the padding-zone rule above `root_level`),
    /// and marks `target` itself as a leaf.
    fn realize_padding_path(&mut self, target: LogicalLocation) {
        let mut parent_id = NodeId(0); // super-root
        for level in 1..=target.level {
            let shift = target.level - level;
            let anc = LogicalLocation::new(
                level,
                target.lx1 >> shift,
                target.lx2 >> shift,
                target.lx3 >> shift,
            );
            if let Some(&id) = self.index.get(&anc) {
                parent_id = id;
                continue;
            }
            let octant = (
                (anc.lx1 & 1) as i64,
                if self.dim >= 2 { anc.lx2 & 1 } else { 0 },
                if self.dim >= 3 { anc.lx3 & 1 } else { 0 },
            );
            let new_id = self.push_node(TreeNode::leaf(anc));
            self.attach_child(parent_id, octant, new_id);
            self.node_mut(parent_id).is_leaf = false;
            parent_id = new_id;
        }
    }

    fn push_node(&mut self, node: TreeNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.index.insert(node.loc, id);
        self.nodes.push(node);
        id
    }

    fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id.0 as usize]
    }

    fn attach_child(&mut self, parent: NodeId, octant: (i64, i64, i64), child: NodeId) {
        let idx = octant_index(octant.0, octant.1, octant.2);
        let node = self.node_mut(parent);
        let slots = node.children.get_or_insert([None; 8]);
        slots[idx] = Some(child);
    }

    /// `add_leaf`: descends the tree, splitting interior nodes (realizing
    /// full `2^dim` sibling groups) as needed so that `loc` exists as a
    /// leaf (§4.1).
    pub fn add_leaf(&mut self, loc: LogicalLocation) {
        if self.index.contains_key(&loc) {
            return; // already a leaf (or already interior, handled below)
        }
        let mut current = self.deepest_existing_ancestor(loc);
        let mut cur_level = self.node(current).loc.level;
        while cur_level < loc.level {
            if self.node(current).is_leaf {
                self.split_leaf(current);
            }
            cur_level += 1;
            let shift = loc.level - cur_level;
            let target_at_level = LogicalLocation::new(
                cur_level,
                loc.lx1 >> shift,
                loc.lx2 >> shift,
                loc.lx3 >> shift,
            );
            current = *self
                .index
                .get(&target_at_level)
                .expect("sibling group realized by split_leaf");
        }
    }

    /// `add_without_refine`: like `add_leaf`, but never forces a full
    /// `2^dim` sibling group into existence — it only walks or extends
    /// whatever path the restart file's own leaf list accounts for,
    /// leaving siblings absent until their own record arrives (or
    /// forever, since restart passes in the complete leaf list itself).
    /// Used to faithfully recreate a tree whose full leaf set is already
    /// known (§4.1, §4.4 restart construction).
    pub fn add_without_refine(&mut self, loc: LogicalLocation) {
        if self.index.contains_key(&loc) {
            return;
        }
        let mut parent_id = self.deepest_existing_ancestor(loc);
        let mut cur_level = self.node(parent_id).loc.level;
        if self.node(parent_id).is_leaf {
            self.node_mut(parent_id).is_leaf = false;
        }
        while cur_level < loc.level {
            cur_level += 1;
            let shift = loc.level - cur_level;
            let anc = LogicalLocation::new(
                cur_level,
                loc.lx1 >> shift,
                loc.lx2 >> shift,
                loc.lx3 >> shift,
            );
            // A sibling's own call may already have realized this ancestor
            // (e.g. two root-level leaves sharing a level-1 parent); reuse
            // it rather than re-creating, splitting it if it had been left
            // as a leaf itself.
            if let Some(&existing) = self.index.get(&anc) {
                if cur_level != loc.level && self.node(existing).is_leaf {
                    self.node_mut(existing).is_leaf = false;
                }
                parent_id = existing;
                continue;
            }
            let octant = (
                anc.lx1 & 1,
                if self.dim >= 2 { anc.lx2 & 1 } else { 0 },
                if self.dim >= 3 { anc.lx3 & 1 } else { 0 },
            );
            let node = if cur_level == loc.level {
                TreeNode::leaf(anc)
            } else {
                TreeNode { loc: anc, children: None, is_leaf: false }
            };
            let new_id = self.push_node(node);
            self.attach_child(parent_id, octant, new_id);
            parent_id = new_id;
        }
    }

    /// Splits a leaf into its full `2^dim` sibling group, all realized as
    /// fresh leaves (§4.1's "sibling groups of 2^dim are created
    /// together").
    fn split_leaf(&mut self, id: NodeId) {
        let loc = self.node(id).loc;
        let children = loc.children(self.dim);
        let mut slots = [None; 8];
        for child_loc in children {
            let octant = (
                child_loc.lx1 & 1,
                if self.dim >= 2 { child_loc.lx2 & 1 } else { 0 },
                if self.dim >= 3 { child_loc.lx3 & 1 } else { 0 },
            );
            let child_id = self.push_node(TreeNode::leaf(child_loc));
            slots[octant_index(octant.0, octant.1, octant.2)] = Some(child_id);
        }
        let node = self.node_mut(id);
        node.is_leaf = false;
        node.children = Some(slots);
    }

    /// Collapses a full sibling group back into their shared parent,
    /// which becomes a leaf. The caller (the refinement cycle) is
    /// responsible for verifying the full group shares the derefine flag
    /// before calling this (§4.6).
    pub fn derefine(&mut self, parent_loc: LogicalLocation) {
        let parent_id = *self
            .index
            .get(&parent_loc)
            .expect("derefine target must already be an interior node");
        let slots = self
            .node(parent_id)
            .children
            .expect("derefine target must be interior");
        for slot in slots.iter().flatten() {
            let child_loc = self.node(*slot).loc;
            self.index.remove(&child_loc);
            // Arena slots for removed children are left in place (tombstoned
            // by removal from `index`) rather than compacted — NodeIds
            // handed out earlier in the same step stay valid.
        }
        let node = self.node_mut(parent_id);
        node.is_leaf = true;
        node.children = None;
    }

    fn deepest_existing_ancestor(&self, loc: LogicalLocation) -> NodeId {
        for level in (0..=loc.level).rev() {
            let shift = loc.level - level;
            let anc = LogicalLocation::new(
                level,
                loc.lx1 >> shift,
                loc.lx2 >> shift,
                loc.lx3 >> shift,
            );
            if let Some(&id) = self.index.get(&anc) {
                return id;
            }
        }
        NodeId(0)
    }

    pub fn count_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf).count()
    }

    /// `enumerate_leaves`: emits leaves via a depth-first octant-order
    /// traversal from the root. This naturally orders finer leaves
    /// relative to the surrounding octant traversal (§4.1) rather than by
    /// a flat numeric sort, which would separate spatially adjacent
    /// leaves that differ in level.
    pub fn enumerate_leaves(&self) -> Vec<LogicalLocation> {
        let mut out = Vec::with_capacity(self.count_leaves());
        self.enumerate_from(NodeId(0), &mut out);
        out
    }

    fn enumerate_from(&self, id: NodeId, out: &mut Vec<LogicalLocation>) {
        let node = self.node(id);
        if node.is_leaf {
            out.push(node.loc);
            return;
        }
        if let Some(children) = node.children {
            for child in children.into_iter().flatten() {
                self.enumerate_from(child, out);
            }
        }
    }

    /// `get_leaf`: descends one level into octant `(i, j, k)`.
    pub fn get_leaf(&self, node: NodeId, i: i64, j: i64, k: i64) -> Option<NodeId> {
        let n = self.node(node);
        n.children.and_then(|c| c[octant_index(i, j, k)])
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.node(id).is_leaf
    }

    pub fn location(&self, id: NodeId) -> LogicalLocation {
        self.node(id).loc
    }

    pub fn lookup(&self, loc: &LogicalLocation) -> Option<NodeId> {
        self.index.get(loc).copied()
    }

    /// `find_neighbor`: the leaf (or finer subtree root) that is this
    /// location's neighbor in direction `(ox1, ox2, ox3)`, honoring
    /// periodic wrap and returning `Null` at a non-connecting domain edge
    /// (§4.1).
    pub fn find_neighbor(
        &self,
        loc: LogicalLocation,
        ox1: i64,
        ox2: i64,
        ox3: i64,
        boundary_tags: &BoundaryTags,
    ) -> Neighbor {
        let shift = loc.level - self.root_level;
        let span = |n: i64| n * (1i64 << shift.max(0));
        let spans = [span(self.nrbx[0]), span(self.nrbx[1]), span(self.nrbx[2])];
        let offsets = [ox1, ox2, ox3];
        let mut nlx = [loc.lx1 + ox1, loc.lx2 + ox2, loc.lx3 + ox3];

        for d in 0..3 {
            if offsets[d] == 0 {
                continue;
            }
            if nlx[d] < 0 || nlx[d] >= spans[d] {
                let inner = offsets[d] < 0;
                let tag = boundary_tags.face(d + 1, inner);
                if tag.connects_across_domain_edge() {
                    nlx[d] = nlx[d].rem_euclid(spans[d]);
                } else {
                    return Neighbor::Null;
                }
            }
        }

        let mut level = loc.level;
        loop {
            let s = loc.level - level;
            let cand = LogicalLocation::new(level, nlx[0] >> s, nlx[1] >> s, nlx[2] >> s);
            if let Some(&id) = self.index.get(&cand) {
                let node = self.node(id);
                if node.is_leaf {
                    return Neighbor::CoarserOrEqual(id);
                } else if level == loc.level {
                    return Neighbor::Finer(id);
                }
                // An interior ancestor found coarser than `loc` means the
                // tree has a jump of more than one level across this face;
                // the refinement cycle is responsible for preventing this,
                // so degrade to treating it as the best coarser match.
                return Neighbor::CoarserOrEqual(id);
            }
            if level == self.root_level {
                break;
            }
            level -= 1;
        }
        Neighbor::Null
    }

    pub fn dim(&self) -> i32 {
        self.dim
    }

    pub fn root_level(&self) -> i32 {
        self.root_level
    }
}
