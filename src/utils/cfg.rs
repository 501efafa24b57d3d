//! Control flow graphs over arena handles.
//!
//! A region (a function) names its entry node, and every node (a block) names
//! the targets of its terminator. [CfgInfo] walks the nodes reachable from
//! the entry and records both edge directions once.

use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::collections::storage::ArenaPtr;

pub trait CfgNode: ArenaPtr + Hash {
    type Region: CfgRegion<A = Self::A, Node = Self>;

    /// Branch targets in terminator order. A target may appear twice.
    fn targets(self, arena: &Self::A) -> Vec<Self>;
}

pub trait CfgRegion: ArenaPtr {
    type Node: CfgNode<A = Self::A, Region = Self>;

    /// `None` for a region without nodes.
    fn entry_node(self, arena: &Self::A) -> Option<Self::Node>;

    fn cfg_info(self, arena: &Self::A) -> CfgInfo<Self::Node> { CfgInfo::new(arena, self) }
}

/// Edges between the nodes reachable from the entry of a region.
pub struct CfgInfo<N: CfgNode> {
    /// Reachable nodes in depth-first preorder.
    reachable: Vec<N>,
    succs: FxHashMap<N, Vec<N>>,
    preds: FxHashMap<N, Vec<N>>,
}

impl<N: CfgNode> CfgInfo<N> {
    pub fn new(arena: &N::A, region: N::Region) -> Self {
        let mut info = Self {
            reachable: Vec::new(),
            succs: FxHashMap::default(),
            preds: FxHashMap::default(),
        };

        let Some(entry) = region.entry_node(arena) else {
            return info;
        };

        let mut stack = vec![entry];
        let mut seen = FxHashSet::default();

        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            info.reachable.push(node);
            info.preds.entry(node).or_default();

            let mut succs: Vec<N> = Vec::new();
            for target in node.targets(arena) {
                if succs.contains(&target) {
                    continue;
                }
                succs.push(target);
                info.preds.entry(target).or_default().push(node);
            }

            // first target on top, so it is visited first
            stack.extend(succs.iter().rev().copied());
            info.succs.insert(node, succs);
        }

        info
    }

    /// Empty for an unreachable node.
    pub fn succs(&self, node: N) -> &[N] {
        self.succs
            .get(&node)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Predecessors in discovery order. Empty for an unreachable node.
    pub fn preds(&self, node: N) -> &[N] {
        self.preds
            .get(&node)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn reachable(&self) -> &[N] { &self.reachable }

    pub fn is_reachable(&self, node: N) -> bool { self.succs.contains_key(&node) }

    /// Every edge once, grouped by source in preorder.
    pub fn edges(&self) -> impl Iterator<Item = (N, N)> + '_ {
        self.reachable
            .iter()
            .flat_map(move |from| self.succs(*from).iter().map(move |to| (*from, *to)))
    }

    /// The source has several successors and the target several predecessors.
    pub fn is_critical_edge(&self, from: N, to: N) -> bool {
        self.succs(from).len() > 1 && self.preds(to).len() > 1 && self.succs(from).contains(&to)
    }
}
