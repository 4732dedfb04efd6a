//! Bounded string interning for repeated attribute values.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tracing::trace;

pub struct Interner {
    cache: LruCache<Arc<str>, Arc<str>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Interner {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Shared allocation for `value`.  Equal inputs return clones of the same
    /// `Arc` for as long as the value stays in the cache.
    pub fn intern(&mut self, value: &str) -> Arc<str> {
        if let Some(shared) = self.cache.get(value) {
            self.hits += 1;
            return Arc::clone(shared);
        }
        self.misses += 1;
        let shared: Arc<str> = Arc::from(value);
        if let Some((evicted, _)) = self.cache.push(Arc::clone(&shared), Arc::clone(&shared)) {
            if evicted.as_ref() != value {
                self.evictions += 1;
                trace!("intern evicted {:?}", evicted);
            }
        }
        shared
    }

    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }
}
