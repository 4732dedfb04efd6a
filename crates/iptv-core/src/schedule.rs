//! Frame pacing for scroll events.

use std::time::{Duration, Instant};

/// Accepts at most one scroll per interval.  A rejected scroll is kept as a
/// trailing value so the final position of a burst is never lost.
#[derive(Debug, Clone)]
pub struct ScrollThrottle {
    interval: Duration,
    last_accept: Option<Instant>,
    trailing: Option<f32>,
}

impl ScrollThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accept: None,
            trailing: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Offer a scroll offset observed at `now`.  Returns the offset to apply
    /// right away, or `None` when it was deferred.
    pub fn offer(&mut self, offset: f32, now: Instant) -> Option<f32> {
        match self.last_accept {
            Some(last) if now.saturating_duration_since(last) < self.interval => {
                self.trailing = Some(offset);
                None
            }
            _ => {
                self.last_accept = Some(now);
                self.trailing = None;
                Some(offset)
            }
        }
    }

    /// The deferred offset, once its interval has passed.
    pub fn take_trailing(&mut self, now: Instant) -> Option<f32> {
        let last = self.last_accept?;
        if self.trailing.is_some() && now.saturating_duration_since(last) >= self.interval {
            self.last_accept = Some(now);
            return self.trailing.take();
        }
        None
    }

    pub fn has_pending(&self) -> bool {
        self.trailing.is_some()
    }

    pub fn reset(&mut self) {
        self.last_accept = None;
        self.trailing = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_coalesces_to_last_offset() {
        let mut t = ScrollThrottle::new(Duration::from_millis(16));
        let t0 = Instant::now();
        assert_eq!(t.offer(10.0, t0), Some(10.0));
        assert_eq!(t.offer(20.0, t0 + Duration::from_millis(4)), None);
        assert_eq!(t.offer(30.0, t0 + Duration::from_millis(8)), None);
        assert!(t.has_pending());
        assert_eq!(t.take_trailing(t0 + Duration::from_millis(10)), None);
        assert_eq!(t.take_trailing(t0 + Duration::from_millis(16)), Some(30.0));
        assert!(!t.has_pending());
    }

    #[test]
    fn test_spaced_offers_all_pass() {
        let mut t = ScrollThrottle::new(Duration::from_millis(16));
        let t0 = Instant::now();
        assert!(t.offer(1.0, t0).is_some());
        assert!(t.offer(2.0, t0 + Duration::from_millis(20)).is_some());
        assert_eq!(t.take_trailing(t0 + Duration::from_millis(100)), None);
    }
}
