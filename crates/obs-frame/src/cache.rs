//! Per-frame selection cache.
//!
//! Selections are keyed by variable shape and are only valid for the frame
//! they were built in; the reader clears the cache at every frame boundary.
//! There is no eviction.

use std::collections::HashMap;

use obs_store::Selection;

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct SelectionCache {
    entries: HashMap<Vec<u64>, Selection>,
    hits: u64,
    misses: u64,
}

impl SelectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The selection cached for `shape`, building it on a miss.
    pub fn get_or_insert_with(&mut self, shape: &[u64], build: impl FnOnce() -> Selection) -> &Selection {
        if self.entries.contains_key(shape) {
            self.hits += 1;
        } else {
            self.misses += 1;
            self.entries.insert(shape.to_vec(), build());
        }
        &self.entries[shape]
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_after_miss() {
        let mut cache = SelectionCache::new();
        let mut builds = 0;
        for _ in 0..3 {
            cache.get_or_insert_with(&[10, 2], || {
                builds += 1;
                Selection::all(vec![10, 2])
            });
        }
        assert_eq!(builds, 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (2, 1, 1));
        test_utils::assert_approx_eq!(stats.hit_rate(), 2.0 / 3.0, 1e-12);
    }

    #[test]
    fn test_clear_invalidates_all() {
        let mut cache = SelectionCache::new();
        cache.get_or_insert_with(&[4], || Selection::all(vec![4]));
        cache.get_or_insert_with(&[5], || Selection::all(vec![5]));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
        cache.get_or_insert_with(&[4], || Selection::all(vec![4]));
        assert_eq!(cache.stats().misses, 3);
    }
}
