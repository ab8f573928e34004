//! Fixed-capacity cache of network evaluations.
//!
//! Shared by every search worker; keyed by the position's cache hash (which
//! may fold in recent history, see `PositionHistory::cache_hash`). Entries
//! are immutable once inserted and handed out behind `Arc`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use engine_core::Move;

/// A cached evaluation: per-move policy plus the value head output.
#[derive(Debug, Clone)]
pub struct NnCacheEntry {
    /// Raw policy for each legal move of the cached position.
    pub policy: Vec<(Move, f32)>,
    /// Value in [-1, 1] from the cached position's side to move.
    pub value: f32,
}

/// Hit/miss counters plus current occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, or 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheInner {
    map: HashMap<u64, Arc<NnCacheEntry>>,
    // Insertion order, oldest first; evicted when over capacity.
    order: VecDeque<u64>,
    hits: u64,
    misses: u64,
}

/// Fixed-capacity evaluation cache with FIFO eviction.
pub struct NnCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl NnCache {
    pub fn new(capacity: usize) -> Self {
        NnCache {
            inner: Mutex::new(CacheInner {
                map: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                hits: 0,
                misses: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up an entry, counting the hit or miss.
    pub fn get(&self, hash: u64) -> Option<Arc<NnCacheEntry>> {
        let mut inner = self.inner.lock().unwrap();
        match inner.map.get(&hash).cloned() {
            Some(entry) => {
                inner.hits += 1;
                Some(entry)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Check for presence without touching the hit/miss counters. Used by
    /// the prefetch path, which must not distort the gather statistics.
    pub fn contains(&self, hash: u64) -> bool {
        self.inner.lock().unwrap().map.contains_key(&hash)
    }

    /// Insert an entry, evicting the oldest once the capacity is reached.
    /// Re-inserting an existing key leaves the old entry in place.
    pub fn insert(&self, hash: u64, entry: Arc<NnCacheEntry>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.map.contains_key(&hash) {
            return;
        }
        while inner.map.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.map.remove(&oldest);
                }
                None => break,
            }
        }
        inner.map.insert(hash, entry);
        inner.order.push_back(hash);
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            len: inner.map.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: f32) -> Arc<NnCacheEntry> {
        Arc::new(NnCacheEntry {
            policy: Vec::new(),
            value,
        })
    }

    #[test]
    fn test_get_insert() {
        let cache = NnCache::new(4);
        assert!(cache.get(1).is_none());

        cache.insert(1, entry(0.5));
        let found = cache.get(1).unwrap();
        assert!((found.value - 0.5).abs() < 1e-6);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);
    }

    #[test]
    fn test_eviction_is_fifo() {
        let cache = NnCache::new(2);
        cache.insert(1, entry(0.1));
        cache.insert(2, entry(0.2));
        cache.insert(3, entry(0.3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_contains_leaves_stats_alone() {
        let cache = NnCache::new(2);
        cache.insert(7, entry(0.0));
        assert!(cache.contains(7));
        assert!(!cache.contains(8));
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_reinsert_keeps_first_entry() {
        let cache = NnCache::new(2);
        cache.insert(1, entry(0.1));
        cache.insert(1, entry(0.9));
        assert!((cache.get(1).unwrap().value - 0.1).abs() < 1e-6);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hit_rate() {
        let cache = NnCache::new(2);
        assert_eq!(cache.stats().hit_rate(), 0.0);
        cache.insert(1, entry(0.0));
        cache.get(1);
        cache.get(2);
        assert!((cache.stats().hit_rate() - 0.5).abs() < 1e-9);
    }
}
