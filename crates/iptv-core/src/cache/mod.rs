//! Three-tier cache: memory, persisted key-value, blob.
//!
//! `get` walks the tiers top-down and copies a lower-tier hit into every
//! tier above it before returning, so the next `get` for the key is served
//! from memory.  `set` writes all tiers; only a serialization failure is an
//! error.  A store failure degrades to a miss (on read) or a
//! [`TierWrite::Failed`] (on write), and a full persisted tier is reported as
//! [`TierWrite::QuotaExceeded`] so the caller can change strategy.

mod entry;
pub mod keys;
mod metrics;
mod store;
mod tier;

pub use entry::{CacheEntry, Clock, ManualClock, SystemClock};
pub use metrics::{CacheMetrics, TierMetrics};
pub use store::{FsBlobStore, MemoryKvStore, StoreError, TierStore};
pub use tier::Tier;

use std::sync::Arc;
use std::time::{Duration, Instant};

use iptv_proto::config::CacheConfig;
use iptv_proto::protocol::{ChannelRecord, ContentKind, LogoRecord, PlaylistMeta};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use metrics::MetricsRecorder;
use tier::{MemoryTier, PersistedTier, TierRead};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot serialize cache value for {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Outcome of writing one persisted tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierWrite {
    Written { evicted: usize },
    QuotaExceeded { needed: u64, available: u64 },
    Failed(String),
    Skipped,
}

impl TierWrite {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetReport {
    pub memory_evicted: usize,
    pub persisted: TierWrite,
    pub blob: TierWrite,
}

impl SetReport {
    /// True when any persisted tier refused the write for lack of space.
    pub fn quota_exceeded(&self) -> bool {
        matches!(self.persisted, TierWrite::QuotaExceeded { .. })
            || matches!(self.blob, TierWrite::QuotaExceeded { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub batches: usize,
    pub channels: usize,
    pub logos: usize,
    pub quota_events: usize,
}

#[derive(Clone, Copy)]
enum Reach {
    /// Memory and persisted key-value only.
    Warm,
    All,
}

pub struct CacheManager<K, B> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    memory: MemoryTier,
    persisted: PersistedTier<K>,
    blob: PersistedTier<B>,
    metrics: MetricsRecorder,
}

impl<K: TierStore, B: TierStore> CacheManager<K, B> {
    /// Open the cache over the two stores, loading their manifests.
    pub async fn open(config: CacheConfig, kv: K, blob: B) -> Self {
        let persisted =
            PersistedTier::open(Tier::Persisted, kv, &config.key_prefix, config.persisted).await;
        let blob = PersistedTier::open(Tier::Blob, blob, &config.key_prefix, config.blob).await;
        info!(
            "cache open: {} kv entries, {} blob entries",
            persisted.len(),
            blob.len()
        );
        Self {
            memory: MemoryTier::new(config.memory),
            config,
            clock: Arc::new(SystemClock),
            persisted,
            blob,
            metrics: MetricsRecorder::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn persisted_store(&self) -> &K {
        self.persisted.store()
    }

    pub fn blob_store(&self) -> &B {
        self.blob.store()
    }

    pub fn ttl_for(&self, kind: ContentKind) -> Duration {
        Duration::from_secs(self.config.ttl.secs_for(kind))
    }

    pub async fn get<T: DeserializeOwned>(&mut self, key: &str, kind: ContentKind) -> Option<T> {
        let started = Instant::now();
        let entry = self.lookup(key, kind).await;
        self.metrics.record_get(entry.is_some(), started.elapsed());
        let entry = entry?;
        match T::deserialize(&entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("cached {} does not decode as requested type: {}", key, e);
                None
            }
        }
    }

    /// Store `value` in every tier with the kind's TTL, or `ttl` if given.
    pub async fn set<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
        kind: ContentKind,
        ttl: Option<Duration>,
    ) -> Result<SetReport, CacheError> {
        let entry = self.make_entry(key, value, kind, ttl)?;
        let report = self.write(entry, Reach::All).await?;
        self.flush().await;
        Ok(report)
    }

    pub async fn remove(&mut self, key: &str) {
        self.memory.remove(key);
        for result in [
            self.persisted.remove(key).await,
            self.blob.remove(key).await,
        ] {
            if let Err(e) = result {
                debug!("remove {}: {}", key, e);
            }
        }
        self.flush().await;
    }

    /// Purge one kind from every tier, or everything when `kind` is `None`.
    pub async fn clear(&mut self, kind: Option<ContentKind>) -> usize {
        let mut removed = self
            .memory
            .remove_where(|e| kind.map_or(true, |k| e.kind == k));
        removed += self.persisted.remove_kind(kind).await;
        removed += self.blob.remove_kind(kind).await;
        self.flush().await;
        info!(
            "cache cleared {} entries ({})",
            removed,
            kind.map_or("all", |k| k.label())
        );
        removed
    }

    /// Sweep expired entries out of every tier.
    pub async fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let removed = self.memory.purge_expired(now)
            + self.persisted.purge_expired(now).await
            + self.blob.purge_expired(now).await;
        if removed > 0 {
            self.flush().await;
            debug!("purged {} expired entries", removed);
        }
        removed
    }

    /// Warm the memory and key-value tiers with per-channel and per-logo
    /// entries, `batch_size` records at a time with `delay` between batches.
    pub async fn preload(
        &mut self,
        records: &[ChannelRecord],
        batch_size: usize,
        delay: Duration,
    ) -> PreloadReport {
        let mut report = PreloadReport::default();
        let batches = records.chunks(batch_size.max(1));
        let total = batches.len();
        for (i, batch) in batches.enumerate() {
            for record in batch {
                if let Some(quota) = self
                    .warm(&keys::channel(&record.id), record, ContentKind::Metadata)
                    .await
                {
                    report.channels += 1;
                    report.quota_events += usize::from(quota);
                }
                if record.has_logo() {
                    let logo = LogoRecord {
                        url: record.logo_url.clone(),
                        channel_id: record.id.clone(),
                        valid: is_fetchable(&record.logo_url),
                    };
                    if let Some(quota) = self
                        .warm(&keys::logo(&record.logo_url), &logo, ContentKind::Logos)
                        .await
                    {
                        report.logos += 1;
                        report.quota_events += usize::from(quota);
                    }
                }
            }
            report.batches += 1;
            self.flush().await;
            if i + 1 < total && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        debug!(
            "preloaded {} channels and {} logos in {} batches",
            report.channels, report.logos, report.batches
        );
        report
    }

    pub fn metrics(&self) -> CacheMetrics {
        let mut m = self.metrics.finish();
        m.memory.entries = self.memory.len();
        m.memory.bytes = self.memory.bytes();
        m.memory_bytes = self.memory.bytes();
        m.persisted.entries = self.persisted.len();
        m.persisted.bytes = self.persisted.bytes();
        m.blob.entries = self.blob.len();
        m.blob.bytes = self.blob.bytes();
        m
    }

    // ── Catalog helpers ─────────────────────────────────────────────────────

    pub async fn cache_channel_list(
        &mut self,
        playlist_id: &str,
        records: &[ChannelRecord],
    ) -> Result<SetReport, CacheError> {
        self.set(&keys::channels(playlist_id), records, ContentKind::Channels, None)
            .await
    }

    pub async fn cached_channel_list(&mut self, playlist_id: &str) -> Option<Vec<ChannelRecord>> {
        self.get(&keys::channels(playlist_id), ContentKind::Channels)
            .await
    }

    pub async fn cache_playlist_meta(
        &mut self,
        meta: &PlaylistMeta,
    ) -> Result<SetReport, CacheError> {
        self.set(&keys::playlist(&meta.id), meta, ContentKind::Playlist, None)
            .await
    }

    pub async fn cached_playlist_meta(&mut self, playlist_id: &str) -> Option<PlaylistMeta> {
        self.get(&keys::playlist(playlist_id), ContentKind::Playlist)
            .await
    }

    pub async fn cache_logo(&mut self, logo: &LogoRecord) -> Result<SetReport, CacheError> {
        self.set(&keys::logo(&logo.url), logo, ContentKind::Logos, None)
            .await
    }

    pub async fn cached_logo(&mut self, url: &str) -> Option<LogoRecord> {
        self.get(&keys::logo(url), ContentKind::Logos).await
    }

    pub async fn cache_search_results(
        &mut self,
        playlist_id: &str,
        query: &str,
        indices: &[u32],
    ) -> Result<SetReport, CacheError> {
        self.set(
            &keys::search(playlist_id, query),
            indices,
            ContentKind::Search,
            None,
        )
        .await
    }

    pub async fn cached_search_results(
        &mut self,
        playlist_id: &str,
        query: &str,
    ) -> Option<Vec<u32>> {
        self.get(&keys::search(playlist_id, query), ContentKind::Search)
            .await
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn make_entry<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        kind: ContentKind,
        ttl: Option<Duration>,
    ) -> Result<CacheEntry, CacheError> {
        let serialize_err = |source| CacheError::Serialize {
            key: key.to_string(),
            source,
        };
        let value = serde_json::to_value(value).map_err(serialize_err)?;
        let size = serde_json::to_vec(&value).map_err(serialize_err)?.len() as u64;
        let ttl = ttl.unwrap_or_else(|| self.ttl_for(kind));
        Ok(CacheEntry::new(key, kind, value, size, ttl, self.clock.now()))
    }

    /// Write to the warm tiers without flushing.  `Some(true)` means the
    /// key-value tier was full.
    async fn warm<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
        kind: ContentKind,
    ) -> Option<bool> {
        let entry = self.make_entry(key, value, kind, None);
        match entry {
            Ok(entry) => match self.write(entry, Reach::Warm).await {
                Ok(report) => Some(report.quota_exceeded()),
                Err(e) => {
                    warn!("preload: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("preload: {}", e);
                None
            }
        }
    }

    async fn write(&mut self, entry: CacheEntry, reach: Reach) -> Result<SetReport, CacheError> {
        let bytes = serde_json::to_vec(&entry).map_err(|source| CacheError::Serialize {
            key: entry.key.clone(),
            source,
        })?;

        let persisted = self.write_tier(Tier::Persisted, &entry, bytes.clone()).await;
        let blob = match reach {
            Reach::All => self.write_tier(Tier::Blob, &entry, bytes).await,
            Reach::Warm => TierWrite::Skipped,
        };

        let evicted = self.memory.insert(Arc::new(entry));
        let m = self.metrics.snapshot.tier_mut(Tier::Memory);
        m.writes += 1;
        m.evictions += evicted.len() as u64;

        Ok(SetReport {
            memory_evicted: evicted.len(),
            persisted,
            blob,
        })
    }

    async fn write_tier(&mut self, tier: Tier, entry: &CacheEntry, bytes: Vec<u8>) -> TierWrite {
        let result = match tier {
            Tier::Persisted => self.persisted.put(entry, bytes).await,
            Tier::Blob => self.blob.put(entry, bytes).await,
            Tier::Memory => return TierWrite::Skipped,
        };
        let metrics = &mut self.metrics.snapshot;
        match result {
            Ok(evicted) => {
                let m = metrics.tier_mut(tier);
                m.writes += 1;
                m.evictions += evicted as u64;
                TierWrite::Written { evicted }
            }
            Err(StoreError::QuotaExceeded { needed, available }) => {
                warn!(
                    "{} tier full writing {} ({} bytes, {} available)",
                    tier.label(),
                    entry.key,
                    needed,
                    available
                );
                metrics.quota_events += 1;
                metrics.last_quota_tier = Some(tier);
                metrics.tier_mut(tier).errors += 1;
                TierWrite::QuotaExceeded { needed, available }
            }
            Err(e) => {
                warn!("{} tier write {} failed: {}", tier.label(), entry.key, e);
                metrics.tier_errors += 1;
                metrics.tier_mut(tier).errors += 1;
                TierWrite::Failed(e.to_string())
            }
        }
    }

    async fn lookup(&mut self, key: &str, kind: ContentKind) -> Option<Arc<CacheEntry>> {
        let now = self.clock.now();

        if let Some(entry) = self.memory.get(key) {
            let m = self.metrics.snapshot.tier_mut(Tier::Memory);
            if entry.is_expired(now) {
                self.memory.remove(key);
                m.expired += 1;
                m.misses += 1;
            } else if entry.kind != kind {
                m.misses += 1;
            } else {
                m.hits += 1;
                return Some(entry);
            }
        } else {
            self.metrics.snapshot.memory.misses += 1;
        }

        for tier in [Tier::Persisted, Tier::Blob] {
            let read = match tier {
                Tier::Persisted => self.persisted.get(key, now).await,
                _ => self.blob.get(key, now).await,
            };
            let metrics = &mut self.metrics.snapshot;
            match read {
                TierRead::Hit(entry) if entry.kind == kind => {
                    metrics.tier_mut(tier).hits += 1;
                    let entry = Arc::new(entry);
                    self.promote(tier, &entry).await;
                    return Some(entry);
                }
                TierRead::Hit(_) | TierRead::Miss => metrics.tier_mut(tier).misses += 1,
                TierRead::Expired => {
                    let m = metrics.tier_mut(tier);
                    m.expired += 1;
                    m.misses += 1;
                }
                TierRead::Failed(e) => {
                    debug!("{} tier read {} degraded to miss: {}", tier.label(), key, e);
                    metrics.tier_errors += 1;
                    let m = metrics.tier_mut(tier);
                    m.errors += 1;
                    m.misses += 1;
                }
            }
        }
        None
    }

    /// Copy a hit from `from` into every tier above it.
    async fn promote(&mut self, from: Tier, entry: &Arc<CacheEntry>) {
        if from == Tier::Blob {
            match serde_json::to_vec(&**entry) {
                Ok(bytes) => {
                    self.write_tier(Tier::Persisted, entry, bytes).await;
                }
                Err(e) => warn!("promote {}: {}", entry.key, e),
            }
        }
        let evicted = self.memory.insert(Arc::clone(entry));
        self.metrics.snapshot.memory.evictions += evicted.len() as u64;
        self.flush().await;
    }

    async fn flush(&mut self) {
        if let Err(e) = self.persisted.flush().await {
            debug!("kv manifest flush failed: {}", e);
        }
        if let Err(e) = self.blob.flush().await {
            debug!("blob manifest flush failed: {}", e);
        }
    }
}

/// Locators the UI could fetch a logo from.
fn is_fetchable(url: &str) -> bool {
    url.split_once("://")
        .is_some_and(|(scheme, rest)| {
            !rest.is_empty()
                && (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"))
        })
}
