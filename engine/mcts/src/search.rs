//! Search controller.
//!
//! Owns the shared tree, spawns workers, watches the stop conditions, emits
//! throttled progress reports, and announces the final best move. Lock
//! order is always the tree lock before the counters lock, and the protocol
//! callbacks run with neither held.

use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use engine_core::{
    q_to_centipawns, BestMoveCallback, BestMoveInfo, InfoCallback, Move, Position,
    PositionHistory, SearchLimits, ThinkingInfo,
};
use neural::{Network, NnCache};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::node::NodeId;
use crate::params::SearchParams;
use crate::tree::SearchTree;
use crate::worker::SearchWorker;

/// Minimum wall-clock gap between periodic progress reports.
const INFO_INTERVAL: Duration = Duration::from_millis(250);

/// Fatal errors raised before a search starts.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

/// Tree-side shared state, guarded by the readers-writer lock.
pub(crate) struct TreeState {
    pub(crate) tree: SearchTree,
    /// Completed leaf extensions (collisions and terminal revisits
    /// excluded).
    pub(crate) total_playouts: u64,
    /// Deepest ply reached by any playout.
    pub(crate) max_depth: u32,
    /// Upper bound on playouts still achievable within the limits.
    pub(crate) remaining_playouts: i64,
    last_info: Option<Instant>,
    last_outputted_best: Option<Move>,
}

/// Stop/announcement flags, guarded by the counters mutex (acquired after
/// the tree lock, never before).
pub(crate) struct Counters {
    pub(crate) stop: bool,
    responded_bestmove: bool,
    found_best_move: bool,
    best_move: Option<BestMoveInfo>,
}

/// A single search from a fixed root position.
pub struct Search<P: Position> {
    pub(crate) state: RwLock<TreeState>,
    pub(crate) counters: Mutex<Counters>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) cache: Arc<NnCache>,
    pub(crate) params: SearchParams,
    pub(crate) limits: SearchLimits,
    effective_infinite: bool,
    pub(crate) played_history: PositionHistory<P>,
    start_time: Instant,
    initial_visits: u32,
    best_move_callback: BestMoveCallback,
    info_callback: InfoCallback,
    rng: Mutex<ChaCha20Rng>,
}

impl<P: Position> Search<P> {
    /// Validate the root and set up a search over `tree` (a fresh tree, or
    /// one promoted from a previous search for reuse).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tree: SearchTree,
        history: PositionHistory<P>,
        network: Arc<dyn Network>,
        cache: Arc<NnCache>,
        limits: SearchLimits,
        params: SearchParams,
        best_move_callback: BestMoveCallback,
        info_callback: InfoCallback,
    ) -> Result<Self, SearchError> {
        history
            .last()
            .validate()
            .map_err(SearchError::InvalidPosition)?;

        let mut effective_infinite = limits.infinite;
        if limits.is_malformed() {
            warn!("no limit set and infinite not requested, searching until stopped");
            effective_infinite = true;
        }

        let initial_visits = tree.get(tree.root()).visits;
        let seed = params.seed;
        Ok(Search {
            state: RwLock::new(TreeState {
                tree,
                total_playouts: 0,
                max_depth: 0,
                remaining_playouts: i64::MAX,
                last_info: None,
                last_outputted_best: None,
            }),
            counters: Mutex::new(Counters {
                stop: false,
                responded_bestmove: false,
                found_best_move: false,
                best_move: None,
            }),
            threads: Mutex::new(Vec::new()),
            network,
            cache,
            params,
            limits,
            effective_infinite,
            played_history: history,
            start_time: Instant::now(),
            initial_visits,
            best_move_callback,
            info_callback,
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        })
    }

    /// Spawn worker threads and return immediately.
    pub fn start_threads(self: &Arc<Self>, how_many: usize) {
        let mut threads = self.threads.lock().unwrap();
        let base = threads.len() as u64;
        for i in 0..how_many {
            let search = Arc::clone(self);
            let worker_id = base + i as u64;
            let handle = std::thread::Builder::new()
                .name(format!("search-worker-{worker_id}"))
                .spawn(move || {
                    SearchWorker::new(search, worker_id).run_blocking();
                })
                .expect("failed to spawn search worker");
            threads.push(handle);
        }
    }

    /// Run with `threads` workers and block until the search finishes.
    pub fn run_blocking(self: &Arc<Self>, threads: usize) {
        self.start_threads(threads);
        self.wait();
    }

    /// Request termination; the first worker to observe the stop announces
    /// the best move. Non-blocking.
    pub fn stop(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.stop = true;
    }

    /// Request termination without a best-move announcement. Non-blocking.
    pub fn abort(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.stop = true;
        counters.responded_bestmove = true;
    }

    /// Block until every worker has exited its loop.
    pub fn wait(&self) {
        let current = std::thread::current().id();
        let handles: Vec<JoinHandle<()>> = self.threads.lock().unwrap().drain(..).collect();
        for handle in handles {
            // A worker dropping the last Arc must not join itself.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        self.ensure_responded();
    }

    /// Best move (and ponder) under the configured temperature. Returns the
    /// announced pair once the search has responded.
    pub fn best_move(&self) -> BestMoveInfo {
        {
            let counters = self.counters.lock().unwrap();
            if let Some(best) = &counters.best_move {
                return best.clone();
            }
        }
        let st = self.state.read().unwrap();
        self.best_move_internal(&st)
    }

    /// Evaluation of the no-temperature best edge. With temperature on,
    /// this may describe a different move than `best_move()`.
    pub fn best_eval(&self) -> f32 {
        let st = self.state.read().unwrap();
        self.best_eval_internal(&st)
    }

    /// Completed playouts so far.
    pub fn total_playouts(&self) -> u64 {
        self.state.read().unwrap().total_playouts
    }

    /// Root visits accumulated by this search.
    pub fn root_visits(&self) -> u32 {
        let st = self.state.read().unwrap();
        st.tree.get(st.tree.root()).visits - self.initial_visits
    }

    /// Detach the tree, e.g. to promote the played move's subtree into the
    /// next search. Call after `wait()`.
    pub fn take_tree(&mut self) -> SearchTree {
        std::mem::take(&mut self.state.get_mut().unwrap().tree)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.counters.lock().unwrap().stop
    }

    /// Worker-side stop after repeated evaluation failures: stop with
    /// whatever has been accumulated.
    pub(crate) fn request_stop_after_failure(&self) {
        self.stop();
        self.update_counters(0);
    }

    /// Step 7 of the worker iteration: fold in finished playouts, refresh
    /// the remaining-playout bound, emit throttled progress, and evaluate
    /// the stop ladder. Callbacks fire after every lock is released.
    pub(crate) fn update_counters(&self, new_playouts: u64) {
        let mut pending_info: Option<ThinkingInfo> = None;
        let mut pending_best: Option<BestMoveInfo> = None;
        {
            let mut st = self.state.write().unwrap();
            st.total_playouts += new_playouts;
            self.update_remaining_playouts(&mut st);

            let root = st.tree.root();
            let best_edge_mv = st
                .tree
                .best_edge_by_visits(root)
                .map(|idx| st.tree.get(root).edges[idx].mv);
            let now = Instant::now();
            let gap_elapsed = st
                .last_info
                .map_or(true, |last| now.duration_since(last) >= INFO_INTERVAL);
            let best_changed = best_edge_mv.is_some() && st.last_outputted_best != best_edge_mv;

            let mut counters = self.counters.lock().unwrap();
            if (best_changed || (gap_elapsed && best_edge_mv.is_some()))
                && !counters.responded_bestmove
            {
                pending_info = Some(self.build_thinking_info(&st));
                st.last_info = Some(now);
                st.last_outputted_best = best_edge_mv;
            }

            if !counters.responded_bestmove {
                let mut stop = counters.stop;
                if !stop && !self.effective_infinite {
                    stop = self.check_limits(&st, &mut counters);
                }
                if stop {
                    counters.stop = true;
                    counters.responded_bestmove = true;
                    let best = self.best_move_internal(&st);
                    counters.best_move = Some(best.clone());
                    if self.params.verbose_stats {
                        self.log_move_stats(&st);
                    }
                    pending_best = Some(best);
                }
            }
        }
        if let Some(info_update) = pending_info {
            (self.info_callback)(info_update);
        }
        if let Some(best) = pending_best {
            (self.best_move_callback)(best);
        }
    }

    /// Stop ladder, first match wins: visits, playouts, time, smart
    /// pruning. (External stop was checked by the caller; `searchmoves`
    /// saturation is the pruning bound over the restricted root.)
    fn check_limits(&self, st: &TreeState, counters: &mut Counters) -> bool {
        let root = st.tree.root();
        let root_node = st.tree.get(root);
        let remaining = st.remaining_playouts;

        if self.limits.visits >= 0
            && root_node.visits as i64 >= self.initial_visits as i64 + self.limits.visits
        {
            return true;
        }
        if self.limits.playouts >= 0 && st.total_playouts as i64 >= self.limits.playouts {
            return true;
        }
        if self.limits.time_ms >= 0 && self.elapsed_ms() >= self.limits.time_ms {
            return true;
        }
        if self.params.smart_pruning && !counters.found_best_move && root_node.extended {
            if let Some((best_n, second_n)) = top_two_visits(&st.tree, root) {
                if best_n as i64 > second_n as i64 + remaining {
                    debug!(
                        best_n,
                        second_n, remaining, "smart pruning decided the winner"
                    );
                    counters.found_best_move = true;
                    return true;
                }
            }
        }
        false
    }

    /// Tightest bound over the limit axes on playouts still achievable.
    fn update_remaining_playouts(&self, st: &mut TreeState) {
        if self.effective_infinite {
            st.remaining_playouts = i64::MAX;
            return;
        }
        let mut remaining = i64::MAX;
        if self.limits.playouts >= 0 {
            remaining = remaining.min(self.limits.playouts - st.total_playouts as i64);
        }
        if self.limits.visits >= 0 {
            let root_visits = st.tree.get(st.tree.root()).visits as i64;
            remaining =
                remaining.min(self.initial_visits as i64 + self.limits.visits - root_visits);
        }
        if self.limits.time_ms >= 0 {
            let elapsed = self.elapsed_ms();
            if elapsed > 0 && st.total_playouts > 0 {
                let rate_bound =
                    st.total_playouts as i64 * (self.limits.time_ms - elapsed) / elapsed;
                remaining = remaining.min(rate_bound);
            }
        }
        st.remaining_playouts = remaining.max(0);
    }

    fn build_thinking_info(&self, st: &TreeState) -> ThinkingInfo {
        let pv = st.tree.principal_variation();
        let time_ms = self.elapsed_ms();
        let root = st.tree.root();
        let nodes = (st.tree.get(root).visits - self.initial_visits) as u64;
        let nps = if time_ms > 0 {
            nodes * 1000 / time_ms as u64
        } else {
            nodes * 1000
        };
        ThinkingInfo {
            depth: pv.len() as u32,
            seldepth: st.max_depth,
            time_ms,
            nodes,
            nps,
            score_cp: q_to_centipawns(self.best_eval_internal(st)),
            pv,
        }
    }

    fn best_eval_internal(&self, st: &TreeState) -> f32 {
        let tree = &st.tree;
        let root = tree.root();
        let root_node = tree.get(root);
        if root_node.is_terminal {
            return root_node.terminal_value;
        }
        match tree.best_edge_by_visits(root) {
            Some(idx) => {
                let edge = &root_node.edges[idx];
                if edge.child.is_some() {
                    -(tree.get(edge.child).q() as f32)
                } else {
                    root_node.q() as f32
                }
            }
            None => root_node.q() as f32,
        }
    }

    fn best_move_internal(&self, st: &TreeState) -> BestMoveInfo {
        let tree = &st.tree;
        let root = tree.root();
        let root_node = tree.get(root);
        if !root_node.extended || root_node.edges.is_empty() {
            return BestMoveInfo {
                best: Move::NULL,
                ponder: Move::NULL,
            };
        }

        let temperature_active = self.params.temperature > 0.0
            && (self.params.temp_decay_moves == 0
                || (self.played_history.game_ply() as u32) < self.params.temp_decay_moves);
        let edge_idx = if temperature_active {
            let mut rng = self.rng.lock().unwrap();
            sample_edge_with_temperature(tree, root, self.params.temperature, &mut rng)
        } else {
            tree.best_edge_by_visits(root)
        };
        let Some(edge_idx) = edge_idx else {
            return BestMoveInfo {
                best: Move::NULL,
                ponder: Move::NULL,
            };
        };

        let edge = &root_node.edges[edge_idx];
        let ponder = if edge.child.is_some() {
            tree.best_edge_by_visits(edge.child)
                .map(|idx| tree.get(edge.child).edges[idx].mv)
                .unwrap_or(Move::NULL)
        } else {
            Move::NULL
        };
        BestMoveInfo {
            best: edge.mv,
            ponder,
        }
    }

    fn log_move_stats(&self, st: &TreeState) {
        let tree = &st.tree;
        let root = tree.root();
        let mut rows: Vec<(Move, u32, f32, f64)> = tree
            .get(root)
            .edges
            .iter()
            .map(|edge| {
                let (visits, q) = if edge.child.is_some() {
                    let child = tree.get(edge.child);
                    (child.visits, -child.q())
                } else {
                    (0, 0.0)
                };
                (edge.mv, visits, edge.prior, q)
            })
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        for (mv, visits, prior, q) in rows {
            info!(mv = %mv, visits, prior, q, "root move stats");
        }
    }

    fn ensure_responded(&self) {
        let mut pending_best = None;
        {
            let st = self.state.read().unwrap();
            let mut counters = self.counters.lock().unwrap();
            if counters.stop && !counters.responded_bestmove {
                counters.responded_bestmove = true;
                let best = self.best_move_internal(&st);
                counters.best_move = Some(best.clone());
                pending_best = Some(best);
            }
        }
        if let Some(best) = pending_best {
            (self.best_move_callback)(best);
        }
    }

    fn elapsed_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }
}

impl<P: Position> Drop for Search<P> {
    fn drop(&mut self) {
        self.abort();
        self.wait();
    }
}

/// Highest and second-highest child visit counts under a node.
fn top_two_visits(tree: &SearchTree, id: NodeId) -> Option<(u32, u32)> {
    let node = tree.get(id);
    if node.edges.is_empty() {
        return None;
    }
    let mut best = 0u32;
    let mut second = 0u32;
    for edge in &node.edges {
        let n = if edge.child.is_some() {
            tree.get(edge.child).visits
        } else {
            0
        };
        if n > best {
            second = best;
            best = n;
        } else if n > second {
            second = n;
        }
    }
    Some((best, second))
}

/// Sample a root edge with probability proportional to visits^(1/T). Falls
/// back to the no-temperature rule unless at least two children have been
/// visited.
pub(crate) fn sample_edge_with_temperature(
    tree: &SearchTree,
    id: NodeId,
    temperature: f32,
    rng: &mut ChaCha20Rng,
) -> Option<usize> {
    let node = tree.get(id);
    let visited: Vec<(usize, u32)> = node
        .edges
        .iter()
        .enumerate()
        .filter_map(|(idx, edge)| {
            if edge.child.is_none() {
                return None;
            }
            let visits = tree.get(edge.child).visits;
            (visits >= 1).then_some((idx, visits))
        })
        .collect();
    if visited.len() <= 1 {
        return tree.best_edge_by_visits(id);
    }

    let weights: Vec<f64> = visited
        .iter()
        .map(|(_, visits)| (*visits as f64).powf(1.0 / temperature as f64))
        .collect();
    let total: f64 = weights.iter().sum();
    let draw: f64 = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for ((idx, _), weight) in visited.iter().zip(&weights) {
        cumulative += weight;
        if draw < cumulative {
            return Some(*idx);
        }
    }
    visited.last().map(|(idx, _)| *idx)
}
