use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use iptv_proto::protocol::ContentKind;
use serde::{Deserialize, Serialize};

/// Shortest lifetime an entry can have; keeps `expires_at > created_at`.
const MIN_TTL: Duration = Duration::from_millis(1);

/// A cached value with its expiry.  Persisted tiers store this serialized as
/// JSON, so `value` stays a `serde_json::Value` until a typed `get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub kind: ContentKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Serialized size of `value`.
    pub size_bytes: u64,
    pub value: serde_json::Value,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        kind: ContentKind,
        value: serde_json::Value,
        size_bytes: u64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl.max(MIN_TTL))
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key: key.into(),
            kind,
            created_at: now,
            expires_at,
            size_bytes,
            value,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_after_creation() {
        let now = Utc::now();
        let e = CacheEntry::new("k", ContentKind::Search, "v".into(), 3, Duration::ZERO, now);
        assert!(e.expires_at > e.created_at);
        assert!(!e.is_expired(now));
        assert!(e.is_expired(now + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn test_remaining() {
        let now = Utc::now();
        let e = CacheEntry::new(
            "k",
            ContentKind::Channels,
            serde_json::Value::Null,
            4,
            Duration::from_secs(60),
            now,
        );
        assert_eq!(e.remaining(now), Duration::from_secs(60));
        assert_eq!(e.remaining(now + chrono::Duration::hours(1)), Duration::ZERO);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::default();
        let before = clock.now();
        clock.advance(Duration::from_millis(150));
        assert_eq!((clock.now() - before).num_milliseconds(), 150);
    }
}
