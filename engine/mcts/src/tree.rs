//! Search tree with arena allocation.
//!
//! Nodes live in a contiguous arena and are referenced by `NodeId` indices;
//! the arena is owned by the tree, so parent back-references and child links
//! are non-owning by construction and dropping the tree releases everything.
//! Workers never delete nodes; between searches the controller may promote a
//! child to root and release the rest via `promote_root`.

use std::collections::{HashMap, VecDeque};

use engine_core::{Move, MoveList};
use thiserror::Error;

use crate::node::{Edge, Node, NodeId};

/// Errors from tree mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// A second extension attempt on the same node; the walker that sees
    /// this converts its pick into a collision.
    #[error("node already extended")]
    AlreadyExtended,

    #[error("root has no materialized child reached by {0}")]
    NoSuchChild(Move),
}

/// The search tree. Structural mutation and backup require `&mut self`
/// (callers hold the tree lock exclusively); virtual-loss updates go through
/// the nodes' atomic counters and work behind `&self`.
#[derive(Debug)]
pub struct SearchTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for SearchTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchTree {
    /// A tree holding a single unexpanded root.
    pub fn new() -> Self {
        SearchTree {
            nodes: vec![Node::new(NodeId::NONE)],
            root: NodeId(0),
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Materialize the child behind `edge_idx` of `parent` as a placeholder
    /// claimed by the calling worker (`being_extended` set).
    pub fn allocate_child(&mut self, parent: NodeId, edge_idx: usize) -> NodeId {
        debug_assert!(self.get(parent).edges[edge_idx].child.is_none());
        let id = NodeId(self.nodes.len() as u32);
        let mut child = Node::new(parent);
        child.being_extended = true;
        self.nodes.push(child);
        self.get_mut(parent).edges[edge_idx].child = id;
        id
    }

    /// Populate a node's edges exactly once. Priors must already be
    /// normalized; move order is preserved for insertion-order tie breaks.
    pub fn extend_with_moves(
        &mut self,
        id: NodeId,
        moves: MoveList,
        priors: &[f32],
    ) -> Result<(), TreeError> {
        debug_assert_eq!(moves.len(), priors.len());
        let node = self.get_mut(id);
        if node.extended || node.is_terminal {
            return Err(TreeError::AlreadyExtended);
        }
        node.edges = moves
            .into_iter()
            .zip(priors.iter().copied())
            .map(|(mv, prior)| Edge {
                mv,
                prior,
                child: NodeId::NONE,
            })
            .collect();
        node.extended = true;
        node.being_extended = false;
        Ok(())
    }

    /// Fix a node's result. Terminal nodes are never expanded.
    pub fn make_terminal(&mut self, id: NodeId, value: f32) -> Result<(), TreeError> {
        let node = self.get_mut(id);
        if node.extended {
            return Err(TreeError::AlreadyExtended);
        }
        node.is_terminal = true;
        node.terminal_value = value;
        node.being_extended = false;
        Ok(())
    }

    /// PUCT-best edge of an extended node, or None if it has no edges.
    /// Ties break toward insertion order. Virtual loss counts as extra
    /// losing visits, so in-flight paths repel concurrent walkers.
    pub fn select_child(&self, id: NodeId, cpuct: f32, fpu_reduction: f32) -> Option<usize> {
        let scores = self.edge_scores(id, cpuct, fpu_reduction);
        let mut best: Option<(usize, f32)> = None;
        for (idx, &score) in scores.iter().enumerate() {
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((idx, score));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Per-edge PUCT scores in edge order. The prefetch pass uses these to
    /// rank lines worth warming.
    pub fn edge_scores(&self, id: NodeId, cpuct: f32, fpu_reduction: f32) -> Vec<f32> {
        let node = self.get(id);
        let parent_effective = node.visits as u64 + node.vl() as u64;
        let sqrt_parent = (parent_effective.max(1) as f32).sqrt();
        let fpu = node.q() as f32 - fpu_reduction;
        node.edges
            .iter()
            .map(|edge| {
                let (n_effective, q_sel) = self.edge_selection_terms(edge, fpu);
                q_sel + cpuct * edge.prior * sqrt_parent / (1.0 + n_effective as f32)
            })
            .collect()
    }

    /// (effective visits, selection-frame Q) for one edge.
    fn edge_selection_terms(&self, edge: &Edge, fpu: f32) -> (u32, f32) {
        if edge.child.is_none() {
            return (0, fpu);
        }
        let child = self.get(edge.child);
        let vl = child.vl();
        let n_effective = child.visits + vl;
        let q_sel = if child.is_terminal {
            -child.terminal_value
        } else if n_effective > 0 {
            ((-child.value_sum - vl as f64) / n_effective as f64) as f32
        } else {
            fpu
        };
        (n_effective, q_sel)
    }

    /// Most-visited edge; ties by Q from the parent's perspective, then by
    /// insertion order.
    pub fn best_edge_by_visits(&self, id: NodeId) -> Option<usize> {
        let node = self.get(id);
        let mut best: Option<(usize, u32, f32)> = None;
        for (idx, edge) in node.edges.iter().enumerate() {
            let (n, q) = if edge.child.is_none() {
                (0, f32::NEG_INFINITY)
            } else {
                let child = self.get(edge.child);
                (child.visits, -(child.q() as f32))
            };
            let better = match best {
                None => true,
                Some((_, best_n, best_q)) => n > best_n || (n == best_n && q > best_q),
            };
            if better {
                best = Some((idx, n, q));
            }
        }
        best.map(|(idx, _, _)| idx)
    }

    /// Leaf-to-root update: one visit and the (sign-flipped per ply) value
    /// on every node of the path, consuming one installed virtual loss per
    /// node. Collision leaves back up with value 0.
    pub fn backup(&mut self, leaf: NodeId, value: f32) {
        let mut current = leaf;
        let mut v = value as f64;
        while current.is_some() {
            let node = self.get_mut(current);
            node.visits += 1;
            node.value_sum += v;
            node.remove_virtual_loss();
            v = -v;
            current = node.parent;
        }
    }

    /// Drain the virtual loss installed along a pick's path without
    /// applying a backup (iteration abort).
    pub fn cancel_virtual_loss(&self, leaf: NodeId) {
        let mut current = leaf;
        while current.is_some() {
            let node = self.get(current);
            node.remove_virtual_loss();
            current = node.parent;
        }
    }

    /// Principal variation: follow the most-visited child from the root,
    /// stopping at an unexpanded or terminal node.
    pub fn principal_variation(&self) -> MoveList {
        let mut pv = Vec::new();
        let mut id = self.root;
        loop {
            let node = self.get(id);
            if node.is_terminal || !node.extended {
                break;
            }
            let Some(idx) = self.best_edge_by_visits(id) else {
                break;
            };
            let edge = &node.edges[idx];
            pv.push(edge.mv);
            if edge.child.is_none() {
                break;
            }
            id = edge.child;
        }
        pv
    }

    /// Tree reuse: make the child reached by `mv` the new root, releasing
    /// every sibling subtree. The retained subtree's statistics are
    /// preserved; only arena indices change.
    pub fn promote_root(&mut self, mv: Move) -> Result<(), TreeError> {
        let old_root = self.get(self.root);
        let new_root_old_id = old_root
            .edges
            .iter()
            .find(|edge| edge.mv == mv)
            .map(|edge| edge.child)
            .filter(|child| child.is_some())
            .ok_or(TreeError::NoSuchChild(mv))?;

        // First pass: BFS order of the retained subtree and old->new index map.
        let mut map: HashMap<u32, u32> = HashMap::new();
        let mut order: Vec<NodeId> = Vec::new();
        let mut queue = VecDeque::from([new_root_old_id]);
        while let Some(old_id) = queue.pop_front() {
            map.insert(old_id.0, order.len() as u32);
            order.push(old_id);
            for edge in &self.get(old_id).edges {
                if edge.child.is_some() {
                    queue.push_back(edge.child);
                }
            }
        }

        // Second pass: move the retained nodes into a fresh arena, remapping
        // parent and child links.
        let mut old_nodes: Vec<Option<Node>> =
            std::mem::take(&mut self.nodes).into_iter().map(Some).collect();
        let mut new_nodes: Vec<Node> = Vec::with_capacity(order.len());
        for (new_idx, old_id) in order.iter().enumerate() {
            let mut node = old_nodes[old_id.0 as usize]
                .take()
                .expect("retained subtree is a tree");
            node.parent = if new_idx == 0 {
                NodeId::NONE
            } else {
                NodeId(map[&node.parent.0])
            };
            for edge in &mut node.edges {
                if edge.child.is_some() {
                    edge.child = NodeId(map[&edge.child.0]);
                }
            }
            new_nodes.push(node);
        }
        self.nodes = new_nodes;
        self.root = NodeId(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::Square;

    fn mv(i: u8) -> Move {
        Move::new(Square::from_index(i), Square::from_index(i))
    }

    fn extend(tree: &mut SearchTree, id: NodeId, n: usize) {
        let moves: MoveList = (0..n as u8).map(mv).collect();
        let priors = vec![1.0 / n as f32; n];
        tree.extend_with_moves(id, moves, &priors).unwrap();
    }

    #[test]
    fn test_new_tree_has_unexpanded_root() {
        let tree = SearchTree::new();
        assert_eq!(tree.node_count(), 1);
        let root = tree.get(tree.root());
        assert!(!root.extended);
        assert!(root.parent.is_none());
    }

    #[test]
    fn test_extend_is_once_only() {
        let mut tree = SearchTree::new();
        let root = tree.root();
        extend(&mut tree, root, 3);
        let err = tree
            .extend_with_moves(tree.root(), vec![mv(0)], &[1.0])
            .unwrap_err();
        assert_eq!(err, TreeError::AlreadyExtended);
    }

    #[test]
    fn test_terminal_node_cannot_be_extended() {
        let mut tree = SearchTree::new();
        tree.make_terminal(tree.root(), -1.0).unwrap();
        let err = tree
            .extend_with_moves(tree.root(), vec![mv(0)], &[1.0])
            .unwrap_err();
        assert_eq!(err, TreeError::AlreadyExtended);
        assert!((tree.get(tree.root()).q() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_backup_negates_per_ply() {
        let mut tree = SearchTree::new();
        let root = tree.root();
        extend(&mut tree, root, 2);
        let child = tree.allocate_child(tree.root(), 0);
        extend(&mut tree, child, 1);
        let grandchild = tree.allocate_child(child, 0);

        // Install the virtual loss a pick would have left behind.
        for id in [tree.root(), child, grandchild] {
            tree.get(id).add_virtual_loss();
        }
        tree.backup(grandchild, 1.0);

        assert_eq!(tree.get(grandchild).visits, 1);
        assert!((tree.get(grandchild).value_sum - 1.0).abs() < 1e-9);
        assert!((tree.get(child).value_sum + 1.0).abs() < 1e-9);
        assert!((tree.get(tree.root()).value_sum - 1.0).abs() < 1e-9);
        for id in [tree.root(), child, grandchild] {
            assert_eq!(tree.get(id).vl(), 0);
        }
    }

    #[test]
    fn test_select_prefers_prior_when_unvisited() {
        let mut tree = SearchTree::new();
        tree.extend_with_moves(tree.root(), vec![mv(0), mv(1)], &[0.3, 0.7])
            .unwrap();
        tree.get_mut(tree.root()).visits = 1;
        assert_eq!(tree.select_child(tree.root(), 1.0, 0.0), Some(1));
    }

    #[test]
    fn test_select_ties_break_by_insertion_order() {
        let mut tree = SearchTree::new();
        tree.extend_with_moves(tree.root(), vec![mv(0), mv(1)], &[0.5, 0.5])
            .unwrap();
        tree.get_mut(tree.root()).visits = 1;
        assert_eq!(tree.select_child(tree.root(), 1.0, 0.0), Some(0));
    }

    #[test]
    fn test_select_avoids_in_flight_child() {
        let mut tree = SearchTree::new();
        tree.extend_with_moves(tree.root(), vec![mv(0), mv(1)], &[0.6, 0.4])
            .unwrap();
        tree.get_mut(tree.root()).visits = 1;
        let first = tree.allocate_child(tree.root(), 0);
        // An in-flight pick through the first child repels the next walker.
        tree.get(first).add_virtual_loss();
        assert_eq!(tree.select_child(tree.root(), 1.0, 0.0), Some(1));
    }

    #[test]
    fn test_select_uses_fpu_for_unvisited() {
        let mut tree = SearchTree::new();
        tree.extend_with_moves(tree.root(), vec![mv(0), mv(1)], &[0.5, 0.5])
            .unwrap();
        {
            let root = tree.get_mut(tree.root());
            root.visits = 4;
            root.value_sum = 3.2; // parent Q = 0.8
        }
        // With a large FPU reduction, unvisited children look bad; a mildly
        // negative visited child must win.
        let child = tree.allocate_child(tree.root(), 1);
        {
            let node = tree.get_mut(child);
            node.visits = 1;
            node.value_sum = 0.5; // selection Q = -0.5
        }
        assert_eq!(tree.select_child(tree.root(), 0.1, 1.9), Some(1));
        // With no reduction, the unvisited child inherits the good parent Q.
        assert_eq!(tree.select_child(tree.root(), 0.1, 0.0), Some(0));
    }

    #[test]
    fn test_terminal_child_contributes_fixed_value() {
        let mut tree = SearchTree::new();
        tree.extend_with_moves(tree.root(), vec![mv(0), mv(1)], &[0.5, 0.5])
            .unwrap();
        tree.get_mut(tree.root()).visits = 1;
        let winning = tree.allocate_child(tree.root(), 0);
        // Child terminal value -1 (child side loses) is +1 for the parent.
        tree.make_terminal(winning, -1.0).unwrap();
        assert_eq!(tree.select_child(tree.root(), 0.0, 0.0), Some(0));
    }

    #[test]
    fn test_best_edge_by_visits_ties_by_q() {
        let mut tree = SearchTree::new();
        tree.extend_with_moves(tree.root(), vec![mv(0), mv(1)], &[0.5, 0.5])
            .unwrap();
        let a = tree.allocate_child(tree.root(), 0);
        let b = tree.allocate_child(tree.root(), 1);
        for (id, value) in [(a, 0.5), (b, -0.5)] {
            let node = tree.get_mut(id);
            node.visits = 10;
            // Equal visits; the second child is worse for its own side,
            // hence better for the parent.
            node.value_sum = value * 10.0;
        }
        assert_eq!(tree.best_edge_by_visits(tree.root()), Some(1));
    }

    #[test]
    fn test_principal_variation_stops_at_frontier() {
        let mut tree = SearchTree::new();
        let root = tree.root();
        extend(&mut tree, root, 2);
        let child = tree.allocate_child(tree.root(), 1);
        tree.get_mut(child).visits = 3;
        extend(&mut tree, child, 2);

        let pv = tree.principal_variation();
        assert_eq!(pv, vec![mv(1), mv(0)]);
    }

    #[test]
    fn test_promote_root_preserves_subtree() {
        let mut tree = SearchTree::new();
        let root = tree.root();
        extend(&mut tree, root, 3);
        let kept = tree.allocate_child(tree.root(), 1);
        let dropped = tree.allocate_child(tree.root(), 2);
        extend(&mut tree, kept, 2);
        let grandchild = tree.allocate_child(kept, 0);

        for (id, visits) in [(kept, 7), (dropped, 3), (grandchild, 4)] {
            tree.get_mut(id).visits = visits;
        }
        tree.get_mut(kept).value_sum = 2.5;

        tree.promote_root(mv(1)).unwrap();

        // Only the chosen child and its subtree survive.
        assert_eq!(tree.node_count(), 2);
        let root = tree.get(tree.root());
        assert_eq!(root.visits, 7);
        assert!((root.value_sum - 2.5).abs() < 1e-9);
        assert!(root.parent.is_none());
        assert_eq!(root.edges.len(), 2);

        let new_grandchild = root.edges[0].child;
        assert!(new_grandchild.is_some());
        assert_eq!(tree.get(new_grandchild).visits, 4);
        assert_eq!(tree.get(new_grandchild).parent, tree.root());
    }

    #[test]
    fn test_promote_root_unknown_move() {
        let mut tree = SearchTree::new();
        let root = tree.root();
        extend(&mut tree, root, 2);
        // Edge exists but was never materialized.
        assert_eq!(
            tree.promote_root(mv(0)),
            Err(TreeError::NoSuchChild(mv(0)))
        );
        assert_eq!(tree.promote_root(mv(8)), Err(TreeError::NoSuchChild(mv(8))));
    }
}
