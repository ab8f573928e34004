//! Search parameters.
//!
//! The complete tunable surface of the search core. The protocol loop
//! deserializes these from its option table; defaults here are the engine
//! defaults.

use serde::{Deserialize, Serialize};

/// Dirichlet concentration for root noise.
pub const DIRICHLET_ALPHA: f32 = 0.3;
/// Fraction of the root prior replaced by noise.
pub const DIRICHLET_EPSILON: f32 = 0.25;

/// Configuration for one search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Max leaves gathered per worker iteration.
    pub mini_batch_size: usize,

    /// Upper bound on speculative cache-prefetch inputs added alongside
    /// real leaves, per iteration.
    pub max_prefetch_batch: usize,

    /// PUCT exploration constant.
    pub cpuct: f32,

    /// Sampling temperature for root move selection. 0 = always pick the
    /// most-visited move.
    pub temperature: f32,

    /// Halfmove count after which the temperature drops to 0. 0 disables
    /// the decay.
    pub temp_decay_moves: u32,

    /// Mix Dirichlet noise into the root priors.
    pub dirichlet_noise: bool,

    /// Log per-move statistics when the search stops.
    pub verbose_stats: bool,

    /// Stop early once no other move can overtake the leader.
    pub smart_pruning: bool,

    /// Subtracted from the parent's Q to form unvisited children's
    /// first-play estimate.
    pub fpu_reduction: f32,

    /// Plies of history folded into the evaluation-cache key.
    pub cache_history_length: u32,

    /// Softmax temperature applied to the raw policy before
    /// renormalization.
    pub policy_softmax_temp: f32,

    /// Per-iteration cap on collision leaves before gathering aborts.
    pub allowed_node_collisions: u32,

    /// Seed for worker RNGs and temperature sampling.
    pub seed: u64,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            mini_batch_size: 8,
            max_prefetch_batch: 32,
            cpuct: 1.2,
            temperature: 0.0,
            temp_decay_moves: 0,
            dirichlet_noise: false,
            verbose_stats: false,
            smart_pruning: true,
            fpu_reduction: 0.0,
            cache_history_length: 7,
            policy_softmax_temp: 1.0,
            allowed_node_collisions: 0,
            seed: 0,
        }
    }
}

impl SearchParams {
    /// Small batches, no early stop: the configuration the test suite uses
    /// when it wants reproducible trees.
    pub fn for_testing() -> Self {
        SearchParams {
            mini_batch_size: 4,
            smart_pruning: false,
            ..SearchParams::default()
        }
    }

    pub fn with_mini_batch_size(mut self, n: usize) -> Self {
        self.mini_batch_size = n;
        self
    }

    pub fn with_max_prefetch_batch(mut self, n: usize) -> Self {
        self.max_prefetch_batch = n;
        self
    }

    pub fn with_cpuct(mut self, c: f32) -> Self {
        self.cpuct = c;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_temp_decay_moves(mut self, moves: u32) -> Self {
        self.temp_decay_moves = moves;
        self
    }

    pub fn with_dirichlet_noise(mut self, enabled: bool) -> Self {
        self.dirichlet_noise = enabled;
        self
    }

    pub fn with_verbose_stats(mut self, enabled: bool) -> Self {
        self.verbose_stats = enabled;
        self
    }

    pub fn with_smart_pruning(mut self, enabled: bool) -> Self {
        self.smart_pruning = enabled;
        self
    }

    pub fn with_fpu_reduction(mut self, r: f32) -> Self {
        self.fpu_reduction = r;
        self
    }

    pub fn with_cache_history_length(mut self, plies: u32) -> Self {
        self.cache_history_length = plies;
        self
    }

    pub fn with_policy_softmax_temp(mut self, t: f32) -> Self {
        self.policy_softmax_temp = t;
        self
    }

    pub fn with_allowed_node_collisions(mut self, n: u32) -> Self {
        self.allowed_node_collisions = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = SearchParams::default();
        assert_eq!(params.mini_batch_size, 8);
        assert!((params.cpuct - 1.2).abs() < 1e-6);
        assert!(params.smart_pruning);
        assert_eq!(params.allowed_node_collisions, 0);
    }

    #[test]
    fn test_builders() {
        let params = SearchParams::default()
            .with_cpuct(2.0)
            .with_temperature(1.0)
            .with_seed(42);
        assert!((params.cpuct - 2.0).abs() < 1e-6);
        assert!((params.temperature - 1.0).abs() < 1e-6);
        assert_eq!(params.seed, 42);
    }

    #[test]
    fn test_deserialize_partial() {
        let params: SearchParams =
            serde_json::from_str(r#"{"mini_batch_size": 16, "cpuct": 3.0}"#).unwrap();
        assert_eq!(params.mini_batch_size, 16);
        assert!((params.cpuct - 3.0).abs() < 1e-6);
        // Unspecified fields fall back to the defaults.
        assert_eq!(params.max_prefetch_batch, 32);
    }
}
