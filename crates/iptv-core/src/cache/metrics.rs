use std::time::Duration;

use serde::Serialize;

use super::tier::Tier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TierMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Reads that found an entry past its expiry (also counted as misses).
    pub expired: u64,
    /// Reads or writes that failed in the store.
    pub errors: u64,
    pub evictions: u64,
    pub writes: u64,
    pub entries: usize,
    pub bytes: u64,
}

impl TierMetrics {
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub memory: TierMetrics,
    pub persisted: TierMetrics,
    pub blob: TierMetrics,
    pub gets: u64,
    pub hits: u64,
    pub hit_rate: f64,
    pub avg_latency: Duration,
    pub memory_bytes: u64,
    /// Writes refused because a persisted tier was full.
    pub quota_events: u64,
    pub last_quota_tier: Option<Tier>,
    pub tier_errors: u64,
}

impl CacheMetrics {
    pub fn tier(&self, tier: Tier) -> &TierMetrics {
        match tier {
            Tier::Memory => &self.memory,
            Tier::Persisted => &self.persisted,
            Tier::Blob => &self.blob,
        }
    }

    pub(crate) fn tier_mut(&mut self, tier: Tier) -> &mut TierMetrics {
        match tier {
            Tier::Memory => &mut self.memory,
            Tier::Persisted => &mut self.persisted,
            Tier::Blob => &mut self.blob,
        }
    }
}

/// Running totals behind [`CacheMetrics`].
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    pub snapshot: CacheMetrics,
    total_latency: Duration,
}

impl MetricsRecorder {
    pub fn record_get(&mut self, hit: bool, latency: Duration) {
        self.snapshot.gets += 1;
        if hit {
            self.snapshot.hits += 1;
        }
        self.total_latency += latency;
    }

    pub fn finish(&self) -> CacheMetrics {
        let mut m = self.snapshot.clone();
        m.hit_rate = ratio(m.hits, m.gets);
        m.avg_latency = if m.gets == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.total_latency.as_secs_f64() / m.gets as f64)
        };
        m
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_latency_and_hit_rate() {
        let mut rec = MetricsRecorder::default();
        rec.record_get(true, Duration::from_micros(10));
        rec.record_get(false, Duration::from_micros(30));
        let m = rec.finish();
        assert_eq!(m.gets, 2);
        assert_eq!(m.hit_rate, 0.5);
        assert!((m.avg_latency.as_nanos() as i64 - 20_000).abs() <= 1);
    }
}
