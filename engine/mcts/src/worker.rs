//! Search worker: the repeating gather/evaluate/backup iteration.
//!
//! Each worker runs the same seven-step loop against the shared tree:
//! initialize, gather a minibatch of leaves (installing virtual loss along
//! each pick's path), speculatively prefetch into the evaluation cache, run
//! one network computation, fetch results into the gathered leaves, back
//! everything up, and update the controller's counters.

use std::sync::Arc;

use engine_core::{Move, MoveList, Position, PositionHistory};
use neural::{AddResult, CachingComputation, NetworkInput};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Gamma};
use tracing::{trace, warn};

use crate::node::NodeId;
use crate::params::{DIRICHLET_ALPHA, DIRICHLET_EPSILON};
use crate::search::Search;
use crate::tree::{SearchTree, TreeError};

/// Abandon the search after this many failed network computations in a row.
const MAX_COMPUTE_RETRIES: u32 = 3;

/// One gathered leaf, in gather order.
struct NodeToProcess {
    node: NodeId,
    /// Plies from the root to this leaf.
    depth: u32,
    /// Landed on a node another pick is already extending; backs up with
    /// value 0 and only cancels its own virtual loss.
    is_collision: bool,
    /// Value fixed by the game result; no evaluation needed.
    is_terminal: bool,
    /// Index of this leaf's input in the caching computation.
    comp_idx: usize,
    /// Legal moves at the leaf, kept for extension at fetch time.
    moves: MoveList,
    is_root: bool,
    /// Backup value from the leaf's own perspective.
    v: f32,
}

impl NodeToProcess {
    fn collision(node: NodeId, depth: u32) -> Self {
        NodeToProcess {
            node,
            depth,
            is_collision: true,
            is_terminal: false,
            comp_idx: 0,
            moves: Vec::new(),
            is_root: false,
            v: 0.0,
        }
    }

    fn terminal(node: NodeId, depth: u32, v: f32) -> Self {
        NodeToProcess {
            node,
            depth,
            is_collision: false,
            is_terminal: true,
            comp_idx: 0,
            moves: Vec::new(),
            is_root: false,
            v,
        }
    }
}

enum Pick {
    /// Claimed a fresh leaf for extension; history sits at its position.
    Extend { node: NodeId, depth: u32 },
    Terminal { node: NodeId, depth: u32, value: f32 },
    Collision { node: NodeId, depth: u32 },
}

pub(crate) struct SearchWorker<P: Position> {
    search: Arc<Search<P>>,
    history: PositionHistory<P>,
    /// History length of the search root; picks rewind to this.
    base_len: usize,
    rng: ChaCha20Rng,
    nodes_to_process: Vec<NodeToProcess>,
}

impl<P: Position> SearchWorker<P> {
    pub(crate) fn new(search: Arc<Search<P>>, worker_id: u64) -> Self {
        let history = search.played_history.clone();
        let base_len = history.len();
        let rng = ChaCha20Rng::seed_from_u64(search.params.seed.wrapping_add(worker_id));
        SearchWorker {
            search,
            history,
            base_len,
            rng,
            nodes_to_process: Vec::new(),
        }
    }

    /// Runs iterations until the controller signals stop.
    pub(crate) fn run_blocking(&mut self) {
        while !self.search.is_stopped() {
            self.execute_one_iteration();
        }
    }

    fn execute_one_iteration(&mut self) {
        for attempt in 0..=MAX_COMPUTE_RETRIES {
            self.nodes_to_process.clear();
            let mut computation = CachingComputation::new(
                Arc::clone(&self.search.network),
                Arc::clone(&self.search.cache),
            );

            self.gather_minibatch(&mut computation);
            self.maybe_prefetch_into_cache(&mut computation);

            match computation.compute_pending() {
                Ok(()) => {
                    self.fetch_minibatch_results(&computation);
                    self.do_backup_update();
                    let playouts = self
                        .nodes_to_process
                        .iter()
                        .filter(|ntp| !ntp.is_collision && !ntp.is_terminal)
                        .count() as u64;
                    self.search.update_counters(playouts);
                    return;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "network computation failed, aborting iteration");
                    self.abort_iteration();
                }
            }
        }
        warn!("network computation kept failing, stopping the search");
        self.search.request_stop_after_failure();
    }

    /// Step 2: pick up to `mini_batch_size` leaves, walking the tree by
    /// PUCT under the shared lock and publishing virtual loss as we go.
    fn gather_minibatch(&mut self, computation: &mut CachingComputation) {
        let mini_batch_size = self.search.params.mini_batch_size;
        let allowed_collisions = self.search.params.allowed_node_collisions;
        let mut gathered = 0usize;
        let mut collisions = 0u32;

        while gathered < mini_batch_size {
            if self.search.is_stopped() {
                break;
            }
            self.history.truncate(self.base_len);
            match self.pick_node_to_extend() {
                Pick::Collision { node, depth } => {
                    self.nodes_to_process.push(NodeToProcess::collision(node, depth));
                    collisions += 1;
                    if collisions > allowed_collisions {
                        break;
                    }
                }
                Pick::Terminal { node, depth, value } => {
                    self.nodes_to_process.push(NodeToProcess::terminal(node, depth, value));
                    gathered += 1;
                }
                Pick::Extend { node, depth } => {
                    self.process_extend_pick(node, depth, computation);
                    gathered += 1;
                }
            }
        }
    }

    /// Walk from the root, choosing the PUCT-best edge at each extended
    /// node, until reaching a terminal node, a node being extended by
    /// another pick (collision), or an unextended frontier to claim.
    fn pick_node_to_extend(&mut self) -> Pick {
        enum Step {
            Terminal(f32),
            Collision,
            Claim,
            Descend { child: NodeId, mv: Move },
            Materialize { edge_idx: usize, mv: Move },
        }

        let search = Arc::clone(&self.search);
        let cpuct = search.params.cpuct;
        let fpu_reduction = search.params.fpu_reduction;

        let mut depth = 0u32;
        let mut node_id = {
            let st = search.state.read().unwrap();
            let root = st.tree.root();
            st.tree.get(root).add_virtual_loss();
            root
        };

        loop {
            let step = {
                let st = search.state.read().unwrap();
                let node = st.tree.get(node_id);
                if node.is_terminal {
                    Step::Terminal(node.terminal_value)
                } else if node.being_extended {
                    Step::Collision
                } else if !node.extended {
                    Step::Claim
                } else {
                    match st.tree.select_child(node_id, cpuct, fpu_reduction) {
                        None => Step::Collision,
                        Some(edge_idx) => {
                            let edge = &node.edges[edge_idx];
                            if edge.child.is_some() {
                                Step::Descend {
                                    child: edge.child,
                                    mv: edge.mv,
                                }
                            } else {
                                Step::Materialize {
                                    edge_idx,
                                    mv: edge.mv,
                                }
                            }
                        }
                    }
                }
            };

            match step {
                Step::Terminal(value) => {
                    return Pick::Terminal {
                        node: node_id,
                        depth,
                        value,
                    }
                }
                Step::Collision => {
                    return Pick::Collision {
                        node: node_id,
                        depth,
                    }
                }
                Step::Claim => {
                    let mut st = search.state.write().unwrap();
                    let node = st.tree.get_mut(node_id);
                    if node.is_terminal {
                        return Pick::Terminal {
                            node: node_id,
                            depth,
                            value: node.terminal_value,
                        };
                    }
                    if node.being_extended {
                        return Pick::Collision {
                            node: node_id,
                            depth,
                        };
                    }
                    if node.extended {
                        // Extended between our read and write; keep walking.
                        continue;
                    }
                    node.being_extended = true;
                    return Pick::Extend {
                        node: node_id,
                        depth,
                    };
                }
                Step::Descend { child, mv } => {
                    {
                        let st = search.state.read().unwrap();
                        st.tree.get(child).add_virtual_loss();
                    }
                    self.history.append(mv);
                    node_id = child;
                    depth += 1;
                }
                Step::Materialize { edge_idx, mv } => {
                    let (child, claimed) = {
                        let mut st = search.state.write().unwrap();
                        let existing = st.tree.get(node_id).edges[edge_idx].child;
                        if existing.is_none() {
                            let child = st.tree.allocate_child(node_id, edge_idx);
                            st.tree.get(child).add_virtual_loss();
                            (child, true)
                        } else {
                            // Raced with another pick; step onto its child.
                            st.tree.get(existing).add_virtual_loss();
                            (existing, false)
                        }
                    };
                    self.history.append(mv);
                    if claimed {
                        return Pick::Extend {
                            node: child,
                            depth: depth + 1,
                        };
                    }
                    node_id = child;
                    depth += 1;
                }
            }
        }
    }

    /// Resolve a claimed frontier node: terminal positions get their result
    /// immediately; everything else becomes a computation input.
    fn process_extend_pick(
        &mut self,
        node: NodeId,
        depth: u32,
        computation: &mut CachingComputation,
    ) {
        let search = Arc::clone(&self.search);
        let pos = self.history.last().clone();

        if let Some(outcome) = pos.outcome() {
            let value = outcome.value();
            let mut st = search.state.write().unwrap();
            let _ = st.tree.make_terminal(node, value);
            drop(st);
            self.nodes_to_process.push(NodeToProcess::terminal(node, depth, value));
            return;
        }

        let moves = pos.legal_moves();
        let key = self
            .history
            .cache_hash(search.params.cache_history_length);
        let comp_idx = computation.total();
        let added = computation.add_input(
            key,
            NetworkInput {
                planes: pos.encode(),
                moves: moves.clone(),
            },
        );
        trace!(
            node = node.0,
            depth,
            cache_hit = matches!(added, AddResult::Hit),
            "gathered leaf"
        );
        let is_root = {
            let st = search.state.read().unwrap();
            node == st.tree.root()
        };
        self.nodes_to_process.push(NodeToProcess {
            node,
            depth,
            is_collision: false,
            is_terminal: false,
            comp_idx,
            moves,
            is_root,
            v: 0.0,
        });
    }

    /// Step 3: spend the leftover batch budget warming the cache along the
    /// currently most attractive lines. Creates no tree nodes.
    fn maybe_prefetch_into_cache(&mut self, computation: &mut CachingComputation) {
        let budget = self
            .search
            .params
            .max_prefetch_batch
            .saturating_sub(computation.pending());
        if budget == 0 {
            return;
        }
        self.history.truncate(self.base_len);
        let search = Arc::clone(&self.search);
        let st = search.state.read().unwrap();
        let root = st.tree.root();
        self.prefetch_into_cache(&st.tree, root, budget, computation);
    }

    fn prefetch_into_cache(
        &mut self,
        tree: &SearchTree,
        id: NodeId,
        budget: usize,
        computation: &mut CachingComputation,
    ) -> usize {
        if budget == 0 {
            return 0;
        }
        let node = tree.get(id);
        if node.is_terminal {
            return 0;
        }
        if !node.extended {
            return self.prefetch_position(computation);
        }

        // Rank edges by their current PUCT score; promising lines get the
        // larger budget share.
        let scores = tree.edge_scores(id, self.search.params.cpuct, self.search.params.fpu_reduction);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(std::cmp::Ordering::Equal));

        let mut remaining = budget;
        let mut used_total = 0;
        for (rank, &edge_idx) in order.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            let spend = if rank + 1 == order.len() {
                remaining
            } else {
                (remaining + 1) / 2
            };
            let (mv, child) = {
                let edge = &tree.get(id).edges[edge_idx];
                (edge.mv, edge.child)
            };
            self.history.append(mv);
            let used = if child.is_some() {
                self.prefetch_into_cache(tree, child, spend, computation)
            } else {
                self.prefetch_position(computation)
            };
            self.history.pop();
            remaining -= used;
            used_total += used;
        }
        used_total
    }

    /// Queue the history's tip position for cache warming. Costs one budget
    /// unit only when a network slot is actually consumed.
    fn prefetch_position(&mut self, computation: &mut CachingComputation) -> usize {
        let pos = self.history.last();
        if pos.outcome().is_some() {
            return 0;
        }
        let key = self
            .history
            .cache_hash(self.search.params.cache_history_length);
        let input = NetworkInput {
            planes: pos.encode(),
            moves: pos.legal_moves(),
        };
        usize::from(computation.add_prefetch(key, input))
    }

    /// Step 5: extend every evaluated leaf with its legal moves and priors,
    /// releasing the being-extended claim.
    fn fetch_minibatch_results(&mut self, computation: &CachingComputation) {
        let search = Arc::clone(&self.search);
        for i in 0..self.nodes_to_process.len() {
            if self.nodes_to_process[i].is_collision || self.nodes_to_process[i].is_terminal {
                continue;
            }
            let node_id = self.nodes_to_process[i].node;
            let is_root = self.nodes_to_process[i].is_root;
            let entry = computation.entry(self.nodes_to_process[i].comp_idx);

            let mut moves = self.nodes_to_process[i].moves.clone();
            let mut priors: Vec<f32> = moves
                .iter()
                .map(|mv| {
                    entry
                        .policy
                        .iter()
                        .find(|(m, _)| m == mv)
                        .map(|(_, p)| *p)
                        .unwrap_or(0.0)
                })
                .collect();

            if is_root && !search.limits.searchmoves.is_empty() {
                self.restrict_to_searchmoves(&mut moves, &mut priors);
            }

            apply_policy_softmax(&mut priors, search.params.policy_softmax_temp);
            normalize_priors(&mut priors);

            if is_root && search.params.dirichlet_noise {
                let noise = self.dirichlet_noise(priors.len(), DIRICHLET_ALPHA);
                for (p, n) in priors.iter_mut().zip(noise) {
                    *p = (1.0 - DIRICHLET_EPSILON) * *p + DIRICHLET_EPSILON * n;
                }
            }

            let mut st = search.state.write().unwrap();
            match st.tree.extend_with_moves(node_id, moves, &priors) {
                Ok(()) => self.nodes_to_process[i].v = entry.value,
                Err(TreeError::AlreadyExtended) => {
                    let ntp = &mut self.nodes_to_process[i];
                    ntp.is_collision = true;
                    ntp.v = 0.0;
                }
                Err(_) => {}
            }
        }
    }

    /// Restrict root extension to the limits' searchmoves, before noise.
    fn restrict_to_searchmoves(&self, moves: &mut MoveList, priors: &mut Vec<f32>) {
        let searchmoves = &self.search.limits.searchmoves;
        if !moves.iter().any(|mv| searchmoves.contains(mv)) {
            warn!("searchmoves excludes every legal move, ignoring the restriction");
            return;
        }
        let mut kept_moves = Vec::new();
        let mut kept_priors = Vec::new();
        for (mv, p) in moves.iter().zip(priors.iter()) {
            if searchmoves.contains(mv) {
                kept_moves.push(*mv);
                kept_priors.push(*p);
            }
        }
        *moves = kept_moves;
        *priors = kept_priors;
    }

    fn dirichlet_noise(&mut self, n: usize, alpha: f32) -> Vec<f32> {
        let gamma = Gamma::new(alpha as f64, 1.0).unwrap();
        let mut samples: Vec<f32> = (0..n).map(|_| gamma.sample(&mut self.rng) as f32).collect();
        let sum: f32 = samples.iter().sum();
        if sum > 0.0 {
            for s in &mut samples {
                *s /= sum;
            }
        }
        samples
    }

    /// Step 6: back up every gathered leaf in gather order, returning each
    /// path's virtual loss.
    fn do_backup_update(&mut self) {
        let search = Arc::clone(&self.search);
        let mut st = search.state.write().unwrap();
        for ntp in &self.nodes_to_process {
            let v = if ntp.is_collision { 0.0 } else { ntp.v };
            st.tree.backup(ntp.node, v);
            if ntp.depth > st.max_depth {
                st.max_depth = ntp.depth;
            }
        }
    }

    /// Roll back an iteration whose network call failed: drain installed
    /// virtual loss and release any extension claims so other picks can
    /// take over.
    fn abort_iteration(&mut self) {
        let search = Arc::clone(&self.search);
        let mut st = search.state.write().unwrap();
        for ntp in &self.nodes_to_process {
            st.tree.cancel_virtual_loss(ntp.node);
            if !ntp.is_collision && !ntp.is_terminal {
                let node = st.tree.get_mut(ntp.node);
                if !node.extended {
                    node.being_extended = false;
                }
            }
        }
        self.nodes_to_process.clear();
    }
}

fn apply_policy_softmax(priors: &mut [f32], temp: f32) {
    if temp <= 0.0 || (temp - 1.0).abs() < f32::EPSILON {
        return;
    }
    for p in priors.iter_mut() {
        *p = p.max(1e-10).powf(1.0 / temp);
    }
}

fn normalize_priors(priors: &mut [f32]) {
    let sum: f32 = priors.iter().sum();
    if sum > 0.0 {
        for p in priors.iter_mut() {
            *p /= sum;
        }
    } else if !priors.is_empty() {
        let uniform = 1.0 / priors.len() as f32;
        for p in priors.iter_mut() {
            *p = uniform;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_priors() {
        let mut priors = vec![2.0, 6.0];
        normalize_priors(&mut priors);
        assert!((priors[0] - 0.25).abs() < 1e-6);
        assert!((priors[1] - 0.75).abs() < 1e-6);

        let mut zeros = vec![0.0, 0.0];
        normalize_priors(&mut zeros);
        assert!((zeros[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_policy_softmax_sharpens() {
        let mut priors = vec![0.8f32, 0.2];
        apply_policy_softmax(&mut priors, 0.5);
        normalize_priors(&mut priors);
        // Temperature below 1 sharpens the distribution.
        assert!(priors[0] > 0.9);

        let mut unchanged = vec![0.8f32, 0.2];
        apply_policy_softmax(&mut unchanged, 1.0);
        assert!((unchanged[0] - 0.8).abs() < 1e-6);
    }
}
