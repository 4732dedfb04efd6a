//! Storage collaborators behind the persisted and blob tiers.
//!
//! A store is a dumb key to bytes map.  Expiry and budgets are the
//! tier's business; the store only reports whether a read or write worked.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub trait TierStore: Send + Sync {
    fn read(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    fn write(&self, key: &str, bytes: Vec<u8>) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removing a key that does not exist is not an error.
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// In-process key-value store with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    inner: Mutex<KvInner>,
    quota: Option<u64>,
    offline: AtomicBool,
}

#[derive(Debug, Default)]
struct KvInner {
    map: HashMap<String, Vec<u8>>,
    used: u64,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Make every operation fail with `Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn used_bytes(&self) -> u64 {
        self.lock().map(|inner| inner.used).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, KvInner>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn read_sync(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.map.get(key).cloned())
    }

    fn write_sync(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let previous = inner.map.get(key).map_or(0, |v| v.len() as u64);
        let needed = bytes.len() as u64;
        if let Some(quota) = self.quota {
            let available = quota.saturating_sub(inner.used - previous);
            if needed > available {
                return Err(StoreError::QuotaExceeded { needed, available });
            }
        }
        inner.used = inner.used - previous + needed;
        inner.map.insert(key.to_string(), bytes);
        Ok(())
    }

    fn remove_sync(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(old) = inner.map.remove(key) {
            inner.used -= old.len() as u64;
        }
        Ok(())
    }
}

impl TierStore for MemoryKvStore {
    fn read(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send {
        let result = self.read_sync(key);
        async move { result }
    }

    fn write(&self, key: &str, bytes: Vec<u8>) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = self.write_sync(key, bytes);
        async move { result }
    }

    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = self.remove_sync(key);
        async move { result }
    }
}

/// One file per key under a root directory.  File names are the blake3 hash
/// of the key, so any key is a safe file name.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let hash = blake3::hash(key.as_bytes());
        self.root.join(format!("{}.json", hash.to_hex()))
    }
}

impl TierStore for FsBlobStore {
    fn read(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send {
        let path = self.path_for(key);
        async move {
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
    }

    fn write(&self, key: &str, bytes: Vec<u8>) -> impl Future<Output = Result<(), StoreError>> + Send {
        let path = self.path_for(key);
        let root = self.root.clone();
        async move {
            tokio::fs::create_dir_all(&root).await?;
            // Write beside the target and rename so readers never see half a file.
            let tmp = path.with_extension("tmp");
            tokio::fs::write(&tmp, &bytes).await.map_err(map_quota)?;
            tokio::fs::rename(&tmp, &path).await?;
            debug!("blob write {} ({} bytes)", path.display(), bytes.len());
            Ok(())
        }
    }

    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        let path = self.path_for(key);
        async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }
}

/// ENOSPC on Linux and macOS.
const NO_SPACE: i32 = 28;

fn map_quota(e: io::Error) -> StoreError {
    if cfg!(unix) && e.raw_os_error() == Some(NO_SPACE) {
        StoreError::QuotaExceeded {
            needed: 0,
            available: 0,
        }
    } else {
        StoreError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kv_quota() {
        let store = MemoryKvStore::with_quota(10);
        store.write("a", vec![0; 6]).await.unwrap();
        let err = store.write("b", vec![0; 6]).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::QuotaExceeded {
                needed: 6,
                available: 4
            }
        ));
        // Overwriting reuses the old entry's bytes.
        store.write("a", vec![0; 10]).await.unwrap();
        assert_eq!(store.used_bytes(), 10);
        store.remove("a").await.unwrap();
        assert_eq!(store.used_bytes(), 0);
    }

    #[tokio::test]
    async fn test_kv_offline() {
        let store = MemoryKvStore::new();
        store.write("a", b"1".to_vec()).await.unwrap();
        store.set_offline(true);
        assert!(matches!(
            store.read("a").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false);
        assert_eq!(store.read("a").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_blob_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().join("blobs"));
        assert_eq!(store.read("logo_http://x/a.png").await.unwrap(), None);
        store
            .write("logo_http://x/a.png", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(
            store.read("logo_http://x/a.png").await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert!(store.path_for("logo_http://x/a.png").exists());
        store.remove("logo_http://x/a.png").await.unwrap();
        store.remove("logo_http://x/a.png").await.unwrap();
        assert_eq!(store.read("logo_http://x/a.png").await.unwrap(), None);
    }
}
