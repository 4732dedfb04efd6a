use std::sync::Arc;
use std::time::Duration;

use iptv_core::cache::{
    keys, CacheManager, FsBlobStore, ManualClock, MemoryKvStore, Tier, TierWrite,
};
use iptv_proto::config::{CacheConfig, TierBudget};
use iptv_proto::protocol::{ChannelRecord, ContentKind, LogoRecord, PlaylistMeta, Quality};
use serde_json::{json, Value};
use tempfile::TempDir;

type Cache = CacheManager<MemoryKvStore, FsBlobStore>;

async fn open(dir: &TempDir, config: CacheConfig, kv: MemoryKvStore) -> Cache {
    CacheManager::open(config, kv, FsBlobStore::new(dir.path())).await
}

async fn fresh(dir: &TempDir) -> Cache {
    open(dir, CacheConfig::default(), MemoryKvStore::new()).await
}

fn record(i: usize, logo: &str) -> ChannelRecord {
    ChannelRecord {
        id: format!("ch_{i}"),
        name: format!("Channel {i}"),
        logo_url: logo.to_string(),
        group: Arc::from("News"),
        url: format!("http://x/{i}.m3u8"),
        country: Some(Arc::from("UK")),
        language: None,
        tvg_id: None,
        catchup: None,
        duration_secs: None,
        quality: Quality::Hd,
    }
}

#[tokio::test]
async fn test_set_then_get_round_trips() {
    let dir = TempDir::new().unwrap();
    let mut cache = fresh(&dir).await;
    let value = json!({"query": "bbc", "hits": [1, 2, 3]});

    let report = cache
        .set("k", &value, ContentKind::Search, None)
        .await
        .unwrap();
    assert!(report.persisted.is_written());
    assert!(report.blob.is_written());
    assert!(!report.quota_exceeded());

    let got: Option<Value> = cache.get("k", ContentKind::Search).await;
    assert_eq!(got, Some(value));
    let m = cache.metrics();
    assert_eq!(m.gets, 1);
    assert_eq!(m.memory.hits, 1);
    assert!(m.memory_bytes > 0);
}

#[tokio::test]
async fn test_short_ttl_expires() {
    let dir = TempDir::new().unwrap();
    let mut cache = fresh(&dir).await;
    cache
        .set("k", "v", ContentKind::Search, Some(Duration::from_millis(100)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let got: Option<String> = cache.get("k", ContentKind::Search).await;
    assert_eq!(got, None);
}

#[tokio::test]
async fn test_expired_entry_is_absent_while_still_stored() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let mut cache = fresh(&dir).await.with_clock(clock.clone());
    cache
        .set("meta", &json!({"x": 1}), ContentKind::Metadata, None)
        .await
        .unwrap();

    clock.advance(Duration::from_secs(59 * 60));
    let got: Option<Value> = cache.get("meta", ContentKind::Metadata).await;
    assert!(got.is_some());

    clock.advance(Duration::from_secs(2 * 60));
    let stored_before = cache.persisted_store().len();
    assert!(stored_before >= 1);
    let got: Option<Value> = cache.get("meta", ContentKind::Metadata).await;
    assert_eq!(got, None);
    assert!(cache.metrics().memory.expired >= 1);
}

#[tokio::test]
async fn test_memory_tier_evicts_least_recently_used() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        memory: TierBudget {
            max_entries: 2,
            max_bytes: 0,
        },
        ..CacheConfig::default()
    };
    let mut cache = open(&dir, config, MemoryKvStore::new()).await;

    cache.set("a", &1, ContentKind::Search, None).await.unwrap();
    cache.set("b", &2, ContentKind::Search, None).await.unwrap();
    // Touch "a" so "b" becomes the oldest.
    assert_eq!(cache.get::<i32>("a", ContentKind::Search).await, Some(1));
    let report = cache.set("c", &3, ContentKind::Search, None).await.unwrap();
    assert_eq!(report.memory_evicted, 1);

    assert_eq!(cache.get::<i32>("a", ContentKind::Search).await, Some(1));
    // "b" left memory but the key-value tier still has it.
    assert_eq!(cache.get::<i32>("b", ContentKind::Search).await, Some(2));
    let m = cache.metrics();
    assert_eq!(m.memory.hits, 2);
    assert_eq!(m.persisted.hits, 1);

    // The persisted hit was promoted, so memory serves it now.
    assert_eq!(cache.get::<i32>("b", ContentKind::Search).await, Some(2));
    assert_eq!(cache.metrics().memory.hits, 3);
}

#[tokio::test]
async fn test_blob_tier_survives_reopen_and_promotes() {
    let dir = TempDir::new().unwrap();
    {
        let mut cache = fresh(&dir).await;
        cache
            .cache_channel_list("pl", &[record(0, ""), record(1, "")])
            .await
            .unwrap();
    }

    // New process: empty memory and key-value tiers, same blob directory.
    let mut cache = fresh(&dir).await;
    assert_eq!(cache.metrics().blob.entries, 1);
    let list = cache.cached_channel_list("pl").await.unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[1].id, "ch_1");

    let m = cache.metrics();
    assert_eq!(m.blob.hits, 1);
    assert_eq!(m.persisted.entries, 1);
    assert_eq!(m.memory.entries, 1);

    assert!(cache.cached_channel_list("pl").await.is_some());
    assert_eq!(cache.metrics().memory.hits, 1);
}

#[tokio::test]
async fn test_corrupt_blob_degrades_to_miss() {
    let dir = TempDir::new().unwrap();
    let path = {
        let mut cache = fresh(&dir).await;
        cache.set("k", "v", ContentKind::Search, None).await.unwrap();
        let key = format!("{}k", cache.config().key_prefix);
        cache.blob_store().path_for(&key)
    };
    std::fs::write(&path, b"{ not json").unwrap();

    let mut cache = fresh(&dir).await;
    let got: Option<String> = cache.get("k", ContentKind::Search).await;
    assert_eq!(got, None);
    let m = cache.metrics();
    assert_eq!(m.blob.errors, 1);
    assert!(m.tier_errors >= 1);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_full_kv_tier_reports_quota() {
    let dir = TempDir::new().unwrap();
    let mut cache = open(&dir, CacheConfig::default(), MemoryKvStore::with_quota(256)).await;
    let big = "x".repeat(4096);

    let report = cache
        .set("big", &big, ContentKind::Channels, None)
        .await
        .unwrap();
    assert!(report.quota_exceeded());
    assert!(matches!(report.persisted, TierWrite::QuotaExceeded { .. }));
    assert!(report.blob.is_written());

    let m = cache.metrics();
    assert_eq!(m.quota_events, 1);
    assert_eq!(m.last_quota_tier, Some(Tier::Persisted));
    // Still served from memory.
    assert_eq!(cache.get::<String>("big", ContentKind::Channels).await, Some(big));
}

#[tokio::test]
async fn test_failed_kv_write_never_resurrects_old_value() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        memory: TierBudget {
            max_entries: 1,
            max_bytes: 0,
        },
        ..CacheConfig::default()
    };
    let mut cache = open(&dir, config, MemoryKvStore::with_quota(2_000)).await;

    cache.set("k", "v1", ContentKind::Channels, None).await.unwrap();
    let big = "x".repeat(5_000);
    let report = cache.set("k", &big, ContentKind::Channels, None).await.unwrap();
    assert!(matches!(report.persisted, TierWrite::QuotaExceeded { .. }));

    // Push "k" out of memory so the lower tiers must answer.
    cache.set("other", &1, ContentKind::Channels, None).await.unwrap();
    assert_eq!(cache.get::<String>("k", ContentKind::Channels).await, Some(big));
    assert_eq!(cache.metrics().blob.hits, 1);
}

#[tokio::test]
async fn test_unavailable_store_degrades() {
    let dir = TempDir::new().unwrap();
    let mut cache = fresh(&dir).await;
    cache.persisted_store().set_offline(true);

    let report = cache.set("k", &7, ContentKind::Search, None).await.unwrap();
    assert!(matches!(report.persisted, TierWrite::Failed(_)));
    assert!(report.blob.is_written());
    assert_eq!(cache.get::<i32>("k", ContentKind::Search).await, Some(7));

    // An unreadable kv tier counts as an error and the lookup moves on.
    assert_eq!(cache.get::<i32>("other", ContentKind::Search).await, None);
    assert!(cache.metrics().tier_errors >= 2);
}

#[tokio::test]
async fn test_kind_mismatch_is_a_miss() {
    let dir = TempDir::new().unwrap();
    let mut cache = fresh(&dir).await;
    cache.set("k", &1, ContentKind::Logos, None).await.unwrap();
    assert_eq!(cache.get::<i32>("k", ContentKind::Search).await, None);
    assert_eq!(cache.get::<i32>("k", ContentKind::Logos).await, Some(1));
}

#[tokio::test]
async fn test_clear_by_kind() {
    let dir = TempDir::new().unwrap();
    let mut cache = fresh(&dir).await;
    cache.set("s", &1, ContentKind::Search, None).await.unwrap();
    cache.set("c", &2, ContentKind::Channels, None).await.unwrap();

    let removed = cache.clear(Some(ContentKind::Search)).await;
    assert_eq!(removed, 3);
    assert_eq!(cache.get::<i32>("s", ContentKind::Search).await, None);
    assert_eq!(cache.get::<i32>("c", ContentKind::Channels).await, Some(2));

    cache.clear(None).await;
    assert_eq!(cache.get::<i32>("c", ContentKind::Channels).await, None);
}

#[tokio::test]
async fn test_purge_expired_sweeps_every_tier() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let mut cache = fresh(&dir).await.with_clock(clock.clone());
    let short = Some(Duration::from_secs(1));
    cache.set("a", &1, ContentKind::Search, short).await.unwrap();
    cache.set("b", &2, ContentKind::Search, short).await.unwrap();
    cache.set("keep", &3, ContentKind::Search, None).await.unwrap();

    clock.advance(Duration::from_secs(2));
    assert_eq!(cache.purge_expired().await, 6);
    let m = cache.metrics();
    assert_eq!(m.memory.entries, 1);
    assert_eq!(m.persisted.entries, 1);
    assert_eq!(m.blob.entries, 1);
    assert_eq!(cache.purge_expired().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_preload_paces_batches() {
    let mut cache: CacheManager<MemoryKvStore, MemoryKvStore> =
        CacheManager::open(CacheConfig::default(), MemoryKvStore::new(), MemoryKvStore::new())
            .await;
    let records: Vec<ChannelRecord> = (0..5)
        .map(|i| record(i, if i % 2 == 0 { "http://logo/x.png" } else { "" }))
        .collect();

    let started = tokio::time::Instant::now();
    let report = cache
        .preload(&records, 2, Duration::from_millis(10))
        .await;
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(report.batches, 3);
    assert_eq!(report.channels, 5);
    assert_eq!(report.logos, 3);
    assert_eq!(report.quota_events, 0);

    let channel: Option<ChannelRecord> = cache
        .get(&keys::channel("ch_3"), ContentKind::Metadata)
        .await;
    assert_eq!(channel.map(|c| c.name), Some("Channel 3".to_string()));
    let logo = cache.cached_logo("http://logo/x.png").await.unwrap();
    assert!(logo.valid);
    // Preload never touches the blob tier.
    assert!(cache.blob_store().is_empty());
}

#[tokio::test]
async fn test_catalog_helpers() {
    let dir = TempDir::new().unwrap();
    let mut cache = fresh(&dir).await;

    let meta = PlaylistMeta {
        id: "pl".into(),
        title: "Playlist".into(),
        source: "/tmp/pl.m3u".into(),
        channel_count: 2,
        group_count: 1,
        imported_at: chrono::Utc::now(),
    };
    cache.cache_playlist_meta(&meta).await.unwrap();
    assert_eq!(cache.cached_playlist_meta("pl").await, Some(meta));

    cache
        .cache_search_results("pl", "BBC ", &[4, 2])
        .await
        .unwrap();
    assert_eq!(
        cache.cached_search_results("pl", "bbc").await,
        Some(vec![4, 2])
    );

    let logo = LogoRecord {
        url: "ftp://nope".into(),
        channel_id: "ch_0".into(),
        valid: false,
    };
    cache.cache_logo(&logo).await.unwrap();
    assert_eq!(cache.cached_logo("ftp://nope").await, Some(logo));
}
