//! Bounded read-through cache for per-phase correlation lookups.

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::types::Correlation;

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Calculate hit rate.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU cache of `correlations_for_phase` results keyed by phase.
pub struct CorrelationCache {
    inner: LruCache<String, Vec<Correlation>>,
    /// Bumped on every invalidation so that reads racing a write are not cached
    generation: u64,
    hits: u64,
    misses: u64,
}

impl CorrelationCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: LruCache::new(capacity),
            generation: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, phase: &str) -> Option<Vec<Correlation>> {
        match self.inner.get(phase) {
            Some(rows) => {
                self.hits += 1;
                Some(rows.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(&mut self, phase: impl Into<String>, rows: Vec<Correlation>) {
        self.inner.put(phase.into(), rows);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cache rows read at `generation`, unless an invalidation happened since.
    pub fn put_if_current(
        &mut self,
        phase: impl Into<String>,
        rows: Vec<Correlation>,
        generation: u64,
    ) -> bool {
        if generation != self.generation {
            return false;
        }
        self.put(phase, rows);
        true
    }

    /// Drop cached rows for both ends of a new correlation.
    pub fn invalidate_pair(&mut self, source_phase: &str, target_phase: &str) {
        self.generation += 1;
        self.inner.pop(source_phase);
        self.inner.pop(target_phase);
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.inner.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.inner.len(),
        }
    }
}
