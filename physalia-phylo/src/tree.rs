//! Unrooted trees over directed-branch indices.
//!
//! Every undirected edge `e` owns two directed branches `2e` and `2e + 1`;
//! the reversal of directed branch `b` is always `b ^ 1`. Branch records
//! live in a flat arena, and the outgoing branches of each node form a ring
//! through `next_in_ring` indices, so cloning a tree is a plain vector
//! copy with no pointer chasing.

use physalia_core::{PhysaliaError, Result};

/// One directed branch.
#[derive(Debug, Clone, Copy)]
pub struct BranchRec {
    pub source: usize,
    pub target: usize,
    /// The undirected edge this branch belongs to (`index / 2`).
    pub branch: usize,
    /// The next directed branch leaving `source`.
    pub next_in_ring: usize,
}

/// A set of node indices backed by u64 blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSet {
    blocks: Vec<u64>,
    len: usize,
}

impl NodeSet {
    pub fn new(n_nodes: usize) -> Self {
        NodeSet {
            blocks: vec![0; n_nodes.div_ceil(64)],
            len: n_nodes,
        }
    }

    pub fn insert(&mut self, node: usize) {
        debug_assert!(node < self.len);
        self.blocks[node / 64] |= 1 << (node % 64);
    }

    pub fn contains(&self, node: usize) -> bool {
        node < self.len && (self.blocks[node / 64] >> (node % 64)) & 1 == 1
    }

    pub fn count(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&n| self.contains(n))
    }
}

/// An unrooted tree with per-edge lengths.
#[derive(Debug, Clone)]
pub struct Tree {
    n_nodes: usize,
    branches: Vec<BranchRec>,
    first_out: Vec<Option<usize>>,
    lengths: Vec<f64>,
}

impl Tree {
    /// Build from an undirected edge list. The edge set must form a single
    /// connected tree over `n_nodes` nodes.
    pub fn from_edges(n_nodes: usize, edges: &[(usize, usize)]) -> Result<Self> {
        if n_nodes == 0 {
            return Err(PhysaliaError::InvalidInput("a tree needs nodes".into()));
        }
        if edges.len() + 1 != n_nodes {
            return Err(PhysaliaError::Structure(format!(
                "{} edges cannot form a tree over {} nodes",
                edges.len(),
                n_nodes
            )));
        }

        let mut branches = Vec::with_capacity(edges.len() * 2);
        for (e, &(u, v)) in edges.iter().enumerate() {
            for &(s, t) in &[(u, v), (v, u)] {
                if s >= n_nodes || t >= n_nodes || s == t {
                    return Err(PhysaliaError::InvalidInput(format!(
                        "bad edge ({u}, {v}) over {n_nodes} nodes"
                    )));
                }
                branches.push(BranchRec {
                    source: s,
                    target: t,
                    branch: e,
                    next_in_ring: usize::MAX,
                });
            }
        }

        // Chain each node's outgoing branches into a ring, in index order.
        let mut first_out: Vec<Option<usize>> = vec![None; n_nodes];
        let mut prev_of: Vec<Option<usize>> = vec![None; n_nodes];
        for b in 0..branches.len() {
            let s = branches[b].source;
            match prev_of[s] {
                None => first_out[s] = Some(b),
                Some(p) => branches[p].next_in_ring = b,
            }
            prev_of[s] = Some(b);
        }
        for (s, &last) in prev_of.iter().enumerate() {
            if let (Some(last), Some(first)) = (last, first_out[s]) {
                branches[last].next_in_ring = first;
            }
        }

        let lengths = vec![1.0; edges.len()];
        let tree = Tree {
            n_nodes,
            branches,
            first_out,
            lengths,
        };

        // A tree with the right edge count is a tree iff it is connected.
        if tree.subtree_set(None).count() != n_nodes {
            return Err(PhysaliaError::Structure(
                "edge list is not connected".into(),
            ));
        }
        Ok(tree)
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Undirected branch count.
    pub fn n_branches(&self) -> usize {
        self.branches.len() / 2
    }

    pub fn n_directed_branches(&self) -> usize {
        self.branches.len()
    }

    /// The reversal of a directed branch.
    pub fn reverse(&self, b: usize) -> usize {
        b ^ 1
    }

    pub fn source(&self, b: usize) -> usize {
        self.branches[b].source
    }

    pub fn target(&self, b: usize) -> usize {
        self.branches[b].target
    }

    pub fn record(&self, b: usize) -> &BranchRec {
        &self.branches[b]
    }

    /// Directed branches leaving a node, in ring order.
    pub fn branches_out_of(&self, node: usize) -> Vec<usize> {
        let Some(first) = self.first_out[node] else {
            return Vec::new();
        };
        let mut out = vec![first];
        let mut b = self.branches[first].next_in_ring;
        while b != first {
            out.push(b);
            b = self.branches[b].next_in_ring;
        }
        out
    }

    /// Directed branches entering a node.
    pub fn branches_in_to(&self, node: usize) -> Vec<usize> {
        self.branches_out_of(node)
            .into_iter()
            .map(|b| self.reverse(b))
            .collect()
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        self.branches_out_of(node).len() == 1
    }

    pub fn leaves(&self) -> Vec<usize> {
        (0..self.n_nodes).filter(|&n| self.is_leaf(n)).collect()
    }

    /// The nodes on the target side of directed branch `b`.
    pub fn subtree_nodes(&self, b: usize) -> NodeSet {
        self.subtree_set(Some(b))
    }

    fn subtree_set(&self, b: Option<usize>) -> NodeSet {
        let start = match b {
            Some(b) => self.target(b),
            None => 0,
        };
        let mut set = NodeSet::new(self.n_nodes);
        let mut stack = vec![start];
        set.insert(start);
        while let Some(node) = stack.pop() {
            for out in self.branches_out_of(node) {
                if Some(self.reverse(out)) == b || Some(out) == b {
                    continue;
                }
                let t = self.target(out);
                if !set.contains(t) {
                    set.insert(t);
                    stack.push(t);
                }
            }
        }
        set
    }

    /// Directed branches strictly beyond `b`: branches continuing away
    /// from `b`'s target, recursively.
    pub fn branches_after(&self, b: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self
            .branches_out_of(self.target(b))
            .into_iter()
            .filter(|&c| c != self.reverse(b))
            .collect();
        while let Some(c) = stack.pop() {
            out.push(c);
            stack.extend(
                self.branches_out_of(self.target(c))
                    .into_iter()
                    .filter(|&d| d != self.reverse(c)),
            );
        }
        out
    }

    pub fn branch_length(&self, b: usize) -> f64 {
        self.lengths[self.branches[b].branch]
    }

    pub fn set_branch_length(&mut self, b: usize, length: f64) -> Result<()> {
        if b >= self.branches.len() {
            return Err(PhysaliaError::index(
                "directed branch",
                b,
                self.branches.len(),
            ));
        }
        if length < 0.0 {
            return Err(PhysaliaError::InvalidInput(format!(
                "negative branch length {length}"
            )));
        }
        self.lengths[self.branches[b].branch] = length;
        Ok(())
    }
}

/// Move the cache's peeling root to whichever endpoint of `b` is nearer
/// the current root.
pub fn nearer_end(tree: &Tree, b: usize, root: usize) -> usize {
    if tree.subtree_nodes(b).contains(root) {
        tree.target(b)
    } else {
        tree.source(b)
    }
}
