//! The three cache tiers.
//!
//! Every tier keeps its own recency order and budget.  The memory tier holds
//! entries directly; the persisted and blob tiers keep only an index in
//! memory and the serialized entries in their store.  The index is saved to
//! the store as a manifest so recency and byte usage survive a restart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use iptv_proto::config::TierBudget;
use iptv_proto::protocol::ContentKind;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::store::{StoreError, TierStore};

const MANIFEST_KEY: &str = "__manifest";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Memory,
    Persisted,
    Blob,
}

impl Tier {
    pub fn label(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Persisted => "kv",
            Self::Blob => "blob",
        }
    }
}

fn over_budget(budget: &TierBudget, len: usize, bytes: u64, extra: u64) -> bool {
    (budget.max_entries > 0 && len + 1 > budget.max_entries)
        || (budget.max_bytes > 0 && bytes + extra > budget.max_bytes)
}

pub struct MemoryTier {
    entries: LruCache<String, Arc<CacheEntry>>,
    bytes: u64,
    budget: TierBudget,
}

impl MemoryTier {
    pub fn new(budget: TierBudget) -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
            budget,
        }
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &str) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Insert, evicting least recently used entries until the new one fits.
    /// Returns the evicted keys.  An entry larger than the whole byte budget
    /// is not kept; the lower tiers still serve it.
    pub fn insert(&mut self, entry: Arc<CacheEntry>) -> Vec<String> {
        self.remove(&entry.key);
        if self.budget.max_bytes > 0 && entry.size_bytes > self.budget.max_bytes {
            warn!(
                "memory tier: {} is {} bytes, over the {} byte budget, not cached",
                entry.key, entry.size_bytes, self.budget.max_bytes
            );
            return Vec::new();
        }
        let mut evicted = Vec::new();
        while !self.entries.is_empty()
            && over_budget(&self.budget, self.entries.len(), self.bytes, entry.size_bytes)
        {
            if let Some((key, old)) = self.entries.pop_lru() {
                self.bytes -= old.size_bytes;
                evicted.push(key);
            }
        }
        self.bytes += entry.size_bytes;
        self.entries.push(entry.key.clone(), entry);
        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<Arc<CacheEntry>> {
        let old = self.entries.pop(key)?;
        self.bytes -= old.size_bytes;
        Some(old)
    }

    /// Remove every entry matching `pred`.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&CacheEntry) -> bool) -> usize {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| pred(e))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        self.remove_where(|e| e.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    kind: ContentKind,
    size_bytes: u64,
    expires_at: DateTime<Utc>,
}

/// Index snapshot, least recently used first.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    entries: Vec<(String, IndexEntry)>,
}

pub enum TierRead {
    Hit(CacheEntry),
    Miss,
    Expired,
    Failed(StoreError),
}

/// A tier backed by a [`TierStore`].  Used for both the persisted key-value
/// tier and the blob tier; they differ only in store and budget.
pub struct PersistedTier<S> {
    tier: Tier,
    store: S,
    prefix: String,
    index: LruCache<String, IndexEntry>,
    bytes: u64,
    budget: TierBudget,
    dirty: bool,
}

impl<S: TierStore> PersistedTier<S> {
    /// Open the tier and load its manifest.  A missing, unreadable or corrupt
    /// manifest leaves the index empty.
    pub async fn open(tier: Tier, store: S, prefix: &str, budget: TierBudget) -> Self {
        let mut this = Self {
            tier,
            store,
            prefix: prefix.to_string(),
            index: LruCache::unbounded(),
            bytes: 0,
            budget,
            dirty: false,
        };
        match this.store.read(&this.store_key(MANIFEST_KEY)).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Manifest>(&bytes) {
                Ok(manifest) if manifest.version == MANIFEST_VERSION => {
                    for (key, entry) in manifest.entries {
                        this.bytes += entry.size_bytes;
                        this.index.push(key, entry);
                    }
                    debug!(
                        "{} tier: loaded {} entries ({} bytes)",
                        tier.label(),
                        this.index.len(),
                        this.bytes
                    );
                }
                Ok(manifest) => warn!(
                    "{} tier: manifest version {} not understood, starting empty",
                    tier.label(),
                    manifest.version
                ),
                Err(e) => warn!("{} tier: corrupt manifest ({}), starting empty", tier.label(), e),
            },
            Ok(None) => {}
            Err(e) => warn!("{} tier: manifest unreadable ({}), starting empty", tier.label(), e),
        }
        this
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Read `key`.  Entries the index has lost track of (e.g. after a corrupt
    /// manifest) are still found in the store and re-indexed.
    pub async fn get(&mut self, key: &str, now: DateTime<Utc>) -> TierRead {
        let bytes = match self.store.read(&self.store_key(key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.forget(key);
                return TierRead::Miss;
            }
            Err(e) => return TierRead::Failed(e),
        };

        let entry = match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.key == key => entry,
            Ok(entry) => {
                return TierRead::Failed(StoreError::Corrupt {
                    key: key.to_string(),
                    reason: format!("holds entry for {}", entry.key),
                })
            }
            Err(e) => {
                self.discard(key).await;
                return TierRead::Failed(StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if entry.is_expired(now) {
            self.discard(key).await;
            return TierRead::Expired;
        }

        if self.index.get(key).is_none() {
            self.bytes += bytes.len() as u64;
            self.index.push(key.to_string(), index_entry(&entry, bytes.len() as u64));
        }
        self.dirty = true;
        TierRead::Hit(entry)
    }

    /// Write a serialized entry, evicting least recently used entries first.
    /// Returns how many entries were evicted.
    pub async fn put(&mut self, entry: &CacheEntry, bytes: Vec<u8>) -> Result<usize, StoreError> {
        let size = bytes.len() as u64;
        self.forget(&entry.key);

        let mut evicted = 0;
        while !self.index.is_empty() && over_budget(&self.budget, self.index.len(), self.bytes, size)
        {
            let Some((key, old)) = self.index.pop_lru() else {
                break;
            };
            self.bytes -= old.size_bytes;
            self.dirty = true;
            evicted += 1;
            if let Err(e) = self.store.remove(&self.store_key(&key)).await {
                warn!("{} tier: failed to evict {}: {}", self.tier.label(), key, e);
            }
        }

        if let Err(e) = self.store.write(&self.store_key(&entry.key), bytes).await {
            // The store may still hold the superseded value.
            self.discard(&entry.key).await;
            return Err(e);
        }
        self.bytes += size;
        self.index.push(entry.key.clone(), index_entry(entry, size));
        self.dirty = true;
        Ok(evicted)
    }

    pub async fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.forget(key);
        self.store.remove(&self.store_key(key)).await
    }

    /// Remove every indexed entry of `kind`, or everything when `kind` is
    /// `None`.  Store failures are logged and skipped.
    pub async fn remove_kind(&mut self, kind: Option<ContentKind>) -> usize {
        let doomed: Vec<String> = self
            .index
            .iter()
            .filter(|(_, e)| kind.map_or(true, |k| e.kind == k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.discard(key).await;
        }
        doomed.len()
    }

    pub async fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let doomed: Vec<String> = self
            .index
            .iter()
            .filter(|(_, e)| now >= e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.discard(key).await;
        }
        doomed.len()
    }

    /// Save the index if it changed since the last flush.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            entries: self
                .index
                .iter()
                .rev()
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect(),
        };
        let bytes = serde_json::to_vec(&manifest).map_err(|e| StoreError::Corrupt {
            key: MANIFEST_KEY.to_string(),
            reason: e.to_string(),
        })?;
        self.store.write(&self.store_key(MANIFEST_KEY), bytes).await?;
        self.dirty = false;
        Ok(())
    }

    fn forget(&mut self, key: &str) {
        if let Some(old) = self.index.pop(key) {
            self.bytes -= old.size_bytes;
            self.dirty = true;
        }
    }

    async fn discard(&mut self, key: &str) {
        self.forget(key);
        if let Err(e) = self.store.remove(&self.store_key(key)).await {
            debug!("{} tier: remove {} failed: {}", self.tier.label(), key, e);
        }
    }
}

fn index_entry(entry: &CacheEntry, size_bytes: u64) -> IndexEntry {
    IndexEntry {
        kind: entry.kind,
        size_bytes,
        expires_at: entry.expires_at,
    }
}
