//! Write-through minibatch computation.
//!
//! One `CachingComputation` is bound to a single worker iteration. Inputs
//! that hit the cache are resolved immediately; misses accumulate into one
//! pending batch that is sent to the network exactly once, after which every
//! fresh result is inserted into the shared cache.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::{NnCache, NnCacheEntry};
use crate::network::{Network, NetworkError, NetworkInput};

/// Result of adding one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    /// Resolved from the cache; no batch slot consumed.
    Hit,
    /// Queued for the network call.
    Miss,
}

enum Slot {
    Cached(Arc<NnCacheEntry>),
    Pending(usize),
}

pub struct CachingComputation {
    network: Arc<dyn Network>,
    cache: Arc<NnCache>,
    // Pending network batch and the cache keys it will populate.
    batch: Vec<NetworkInput>,
    batch_keys: Vec<u64>,
    // One slot per added input, in add order.
    slots: Vec<Slot>,
    // Keys already queued, so prefetch does not batch duplicates.
    queued: HashSet<u64>,
}

impl CachingComputation {
    pub fn new(network: Arc<dyn Network>, cache: Arc<NnCache>) -> Self {
        CachingComputation {
            network,
            cache,
            batch: Vec::new(),
            batch_keys: Vec::new(),
            slots: Vec::new(),
            queued: HashSet::new(),
        }
    }

    /// Number of inputs waiting on the network.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Number of inputs added so far (hits included).
    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// Add an input for a gathered leaf. Cache hits resolve immediately and
    /// do not consume a network batch slot.
    pub fn add_input(&mut self, key: u64, input: NetworkInput) -> AddResult {
        if let Some(entry) = self.cache.get(key) {
            self.slots.push(Slot::Cached(entry));
            return AddResult::Hit;
        }
        self.slots.push(Slot::Pending(self.batch.len()));
        self.batch_keys.push(key);
        self.batch.push(input);
        self.queued.insert(key);
        AddResult::Miss
    }

    /// Speculatively add an input whose only purpose is to warm the cache.
    /// Skips positions already cached or already queued, and bypasses the
    /// cache hit/miss counters. Returns true if a batch slot was consumed.
    pub fn add_prefetch(&mut self, key: u64, input: NetworkInput) -> bool {
        if self.queued.contains(&key) || self.cache.contains(key) {
            return false;
        }
        self.batch_keys.push(key);
        self.batch.push(input);
        self.queued.insert(key);
        true
    }

    /// Run the network once over the pending batch and write every result
    /// through to the cache. A no-op when nothing is pending.
    pub fn compute_pending(&mut self) -> Result<(), NetworkError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let outputs = self.network.compute(&self.batch)?;
        if outputs.len() != self.batch.len() {
            return Err(NetworkError::OutputMismatch {
                expected: self.batch.len(),
                actual: outputs.len(),
            });
        }

        for (batch_idx, output) in outputs.into_iter().enumerate() {
            let input = &self.batch[batch_idx];
            let entry = Arc::new(NnCacheEntry {
                policy: input
                    .moves
                    .iter()
                    .copied()
                    .zip(output.policy.iter().copied())
                    .collect(),
                value: output.value,
            });
            self.cache.insert(self.batch_keys[batch_idx], entry.clone());
            // Resolve the slots waiting on this batch index.
            for slot in &mut self.slots {
                if matches!(slot, Slot::Pending(i) if *i == batch_idx) {
                    *slot = Slot::Cached(entry.clone());
                }
            }
        }
        self.batch.clear();
        self.batch_keys.clear();
        Ok(())
    }

    /// The evaluation for the i-th added input. Panics if the input is
    /// still pending; callers must `compute_pending` first.
    pub fn entry(&self, index: usize) -> Arc<NnCacheEntry> {
        match &self.slots[index] {
            Slot::Cached(entry) => entry.clone(),
            Slot::Pending(_) => panic!("result fetched before compute_pending"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::UniformNetwork;
    use engine_core::{Move, Square};

    fn two_move_input() -> NetworkInput {
        NetworkInput {
            planes: vec![0.0; 4],
            moves: vec![
                Move::new(Square::from_index(0), Square::from_index(1)),
                Move::new(Square::from_index(1), Square::from_index(2)),
            ],
        }
    }

    fn computation() -> (CachingComputation, Arc<NnCache>) {
        let cache = Arc::new(NnCache::new(16));
        let comp = CachingComputation::new(Arc::new(UniformNetwork::new()), cache.clone());
        (comp, cache)
    }

    #[test]
    fn test_miss_then_hit() {
        let (mut comp, cache) = computation();

        assert_eq!(comp.add_input(42, two_move_input()), AddResult::Miss);
        assert_eq!(comp.pending(), 1);
        comp.compute_pending().unwrap();

        let entry = comp.entry(0);
        assert_eq!(entry.policy.len(), 2);
        assert!((entry.policy[0].1 - 0.5).abs() < 1e-6);
        assert!(cache.contains(42));

        // A second computation over the same key resolves from the cache.
        let mut next = CachingComputation::new(Arc::new(UniformNetwork::new()), cache);
        assert_eq!(next.add_input(42, two_move_input()), AddResult::Hit);
        assert_eq!(next.pending(), 0);
        let cached = next.entry(0);
        assert!((cached.value - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_compute_pending_on_empty_batch() {
        let (mut comp, _cache) = computation();
        assert!(comp.compute_pending().is_ok());
        assert_eq!(comp.total(), 0);
    }

    #[test]
    fn test_prefetch_dedupes() {
        let (mut comp, cache) = computation();

        assert_eq!(comp.add_input(7, two_move_input()), AddResult::Miss);
        // Same key again via prefetch: already queued.
        assert!(!comp.add_prefetch(7, two_move_input()));
        assert!(comp.add_prefetch(8, two_move_input()));
        assert_eq!(comp.pending(), 2);

        comp.compute_pending().unwrap();
        assert!(cache.contains(7));
        assert!(cache.contains(8));

        // Prefetch must not touch the gather statistics.
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_duplicate_leaf_inputs_each_get_results() {
        let (mut comp, _cache) = computation();
        assert_eq!(comp.add_input(9, two_move_input()), AddResult::Miss);
        assert_eq!(comp.add_input(9, two_move_input()), AddResult::Miss);
        comp.compute_pending().unwrap();
        assert_eq!(comp.entry(0).policy.len(), 2);
        assert_eq!(comp.entry(1).policy.len(), 2);
    }
}
