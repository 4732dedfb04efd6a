//! Two-stage reuse of visual elements.
//!
//! An element that scrolls out of range goes to a bounded recency cache keyed
//! by the record it showed.  Scrolling back finds it there with its content
//! intact.  Only when that cache overflows is the oldest element reset and
//! moved to the free pool, where it no longer carries any record data.

use lru::LruCache;
use serde::Serialize;

use super::capabilities::ElementFactory;
use crate::pool::Pool;

/// Where an acquired element came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// Still showing this record; only a refresh is needed.
    Recent,
    /// Reset element from the free pool.
    Pooled,
    /// Newly created by the factory.
    Created,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecycleStats {
    pub recent_hits: u64,
    pub pool_hits: u64,
    pub created: u64,
    pub retired: u64,
    /// Elements pushed out of the recency cache into the pool.
    pub demoted: u64,
}

pub struct ViewRecycler<E> {
    recent: LruCache<String, E>,
    recent_capacity: usize,
    free: Pool<E>,
    stats: RecycleStats,
}

impl<E> ViewRecycler<E> {
    pub fn new(recent_capacity: usize, pool_max: usize) -> Self {
        Self {
            recent: LruCache::unbounded(),
            recent_capacity,
            free: Pool::new(pool_max, pool_max, 1.5),
            stats: RecycleStats::default(),
        }
    }

    /// An element for record `id`: recent cache first, then the pool, then
    /// the factory.
    pub fn acquire<F>(&mut self, id: &str, factory: &mut F) -> (E, Acquisition)
    where
        F: ElementFactory<Element = E>,
    {
        if let Some(element) = self.recent.pop(id) {
            self.stats.recent_hits += 1;
            return (element, Acquisition::Recent);
        }
        if let Some(element) = self.free.try_acquire() {
            self.stats.pool_hits += 1;
            return (element, Acquisition::Pooled);
        }
        self.stats.created += 1;
        (factory.create(), Acquisition::Created)
    }

    /// Take back an element that showed record `id`.
    pub fn retire<F>(&mut self, id: String, element: E, factory: &mut F)
    where
        F: ElementFactory<Element = E>,
    {
        self.stats.retired += 1;
        if self.recent_capacity == 0 {
            self.free.release_with(element, |e| factory.reset(e));
            return;
        }
        if let Some(old) = self.recent.put(id, element) {
            // Same record retired twice; keep the newer element.
            self.free.release_with(old, |e| factory.reset(e));
        }
        while self.recent.len() > self.recent_capacity {
            let Some((_, oldest)) = self.recent.pop_lru() else {
                break;
            };
            self.stats.demoted += 1;
            self.free.release_with(oldest, |e| factory.reset(e));
        }
    }

    /// Drop every cached and pooled element.
    pub fn clear(&mut self) {
        self.recent.clear();
        let _ = self.free.drain();
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    pub fn pooled(&self) -> usize {
        self.free.available()
    }

    pub fn recent_capacity(&self) -> usize {
        self.recent_capacity
    }

    pub fn stats(&self) -> RecycleStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::capabilities::ItemView;

    #[derive(Default)]
    struct Labels {
        created: usize,
    }

    impl ElementFactory for Labels {
        type Element = String;

        fn create(&mut self) -> String {
            self.created += 1;
            String::new()
        }

        fn update(&mut self, element: &mut String, item: &ItemView<'_>) {
            element.clear();
            element.push_str(&item.record.name);
        }

        fn reset(&mut self, element: &mut String) {
            element.clear();
        }
    }

    #[test]
    fn test_recent_then_pool_then_create() {
        let mut f = Labels::default();
        let mut r = ViewRecycler::new(2, 10);

        let (a, how) = r.acquire("a", &mut f);
        assert_eq!(how, Acquisition::Created);
        r.retire("a".into(), format!("{a}A"), &mut f);

        let (a, how) = r.acquire("a", &mut f);
        assert_eq!(how, Acquisition::Recent);
        assert_eq!(a, "A");
        r.retire("a".into(), a, &mut f);
        r.retire("b".into(), "B".into(), &mut f);
        r.retire("c".into(), "C".into(), &mut f);

        // "a" was the oldest and went to the pool, reset.
        assert_eq!(r.recent_len(), 2);
        assert_eq!(r.pooled(), 1);
        let (e, how) = r.acquire("z", &mut f);
        assert_eq!(how, Acquisition::Pooled);
        assert!(e.is_empty());

        let (_, how) = r.acquire("y", &mut f);
        assert_eq!(how, Acquisition::Created);
        assert_eq!(f.created, 2);
        assert_eq!(r.stats().demoted, 1);
    }

    #[test]
    fn test_zero_recent_capacity_goes_straight_to_pool() {
        let mut f = Labels::default();
        let mut r = ViewRecycler::new(0, 10);
        r.retire("a".into(), "A".into(), &mut f);
        assert_eq!(r.recent_len(), 0);
        assert_eq!(r.pooled(), 1);
        r.clear();
        assert_eq!(r.pooled(), 0);
    }
}
