//! Free-list object pool.
//!
//! Ownership moves in and out of the pool: `acquire` hands an object to the
//! caller by value and `release` takes it back by value, so a previous owner
//! cannot keep touching an object once it has been returned.  Objects are
//! reset on the way *in*, which means everything sitting on the free list is
//! already at its zero value when it is handed out again.

use tracing::debug;

/// Misses tolerated before the pool grows its retained capacity.
const GROW_AFTER_MISSES: u32 = 10;

/// Something that can be returned to its zero value in place.
pub trait Reset {
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub grows: u64,
    pub released: u64,
    /// Objects released while the free list was already at capacity.
    pub discarded: u64,
}

impl PoolStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct Pool<T> {
    free: Vec<T>,
    /// Most objects the free list retains.
    capacity: usize,
    max_capacity: usize,
    growth: f32,
    misses_since_grow: u32,
    stats: PoolStats,
}

impl<T> Pool<T> {
    pub fn new(capacity: usize, max_capacity: usize, growth: f32) -> Self {
        let max_capacity = max_capacity.max(capacity);
        Self {
            free: Vec::with_capacity(capacity),
            capacity,
            max_capacity,
            growth: if growth > 1.0 { growth } else { 1.5 },
            misses_since_grow: 0,
            stats: PoolStats::default(),
        }
    }

    /// Hand out a pooled object, creating one with `make` when the free list
    /// is empty.  Repeated misses grow the retained capacity and pre-fill
    /// the free list so the next burst is served from the pool.
    pub fn acquire_with(&mut self, mut make: impl FnMut() -> T) -> T {
        if let Some(item) = self.free.pop() {
            self.stats.hits += 1;
            return item;
        }

        self.stats.misses += 1;
        self.misses_since_grow += 1;
        if self.misses_since_grow > GROW_AFTER_MISSES && self.capacity < self.max_capacity {
            self.grow(&mut make);
        }
        make()
    }

    /// Like `acquire_with` but never allocates: returns `None` on a miss.
    pub fn try_acquire(&mut self) -> Option<T> {
        match self.free.pop() {
            Some(item) => {
                self.stats.hits += 1;
                Some(item)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Return an object after clearing it with `reset`.  Objects beyond the
    /// retained capacity are dropped.
    pub fn release_with(&mut self, mut item: T, reset: impl FnOnce(&mut T)) {
        self.stats.released += 1;
        if self.free.len() >= self.capacity {
            self.stats.discarded += 1;
            return;
        }
        reset(&mut item);
        self.free.push(item);
    }

    fn grow(&mut self, make: &mut impl FnMut() -> T) {
        let target = ((self.capacity.max(1) as f32) * self.growth).ceil() as usize;
        let target = target.min(self.max_capacity);
        debug!(
            "pool grow {} -> {} after {} misses",
            self.capacity, target, self.misses_since_grow
        );
        self.capacity = target;
        self.misses_since_grow = 0;
        self.stats.grows += 1;
        // Fill half of the new headroom now; the rest fills through releases.
        let prefill = (target - self.free.len()) / 2;
        self.free.reserve(prefill);
        for _ in 0..prefill {
            self.free.push(make());
        }
    }

    /// Drop every pooled object.
    pub fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.free.drain(..)
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = PoolStats::default();
    }
}

impl<T: Default> Pool<T> {
    pub fn acquire(&mut self) -> T {
        self.acquire_with(T::default)
    }
}

impl<T: Reset> Pool<T> {
    pub fn release(&mut self, item: T) {
        self.release_with(item, Reset::reset);
    }
}
