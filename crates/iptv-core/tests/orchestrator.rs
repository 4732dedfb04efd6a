use std::time::Duration;

use iptv_core::cache::{CacheManager, MemoryKvStore};
use iptv_core::render::{ElementFactory, ItemView, NoopCallbacks, RenderEngine, RenderMode, Viewport};
use iptv_core::retry::RetryPolicy;
use iptv_core::{IngestError, Orchestrator, RefreshSource};
use iptv_proto::config::{CacheConfig, ParserConfig, RenderConfig};
use iptv_proto::protocol::ContentKind;

struct Names;

impl ElementFactory for Names {
    type Element = String;

    fn create(&mut self) -> String {
        String::new()
    }

    fn update(&mut self, element: &mut String, item: &ItemView<'_>) {
        element.clone_from(&item.record.name);
    }

    fn reset(&mut self, element: &mut String) {
        element.clear();
    }
}

type Orch = Orchestrator<MemoryKvStore, MemoryKvStore, Names, NoopCallbacks>;

async fn orchestrator() -> Orch {
    let cache = CacheManager::open(
        CacheConfig {
            preload_delay_ms: 0,
            ..CacheConfig::default()
        },
        MemoryKvStore::new(),
        MemoryKvStore::new(),
    )
    .await;
    let mut engine = RenderEngine::new(RenderConfig::default(), Names, NoopCallbacks);
    engine.attach(Viewport {
        width: 800.0,
        height: 600.0,
        item_height: 100.0,
        columns: 4,
    });
    Orchestrator::new(ParserConfig::default(), cache, engine)
}

fn playlist(n: usize) -> String {
    let mut text = String::from("#EXTM3U\n");
    for i in 0..n {
        text.push_str(&format!(
            "#EXTINF:-1 tvg-logo=\"http://l/{i}.png\" group-title=\"G{}\",Ch {i}\nhttp://x/{i}\n",
            i % 3
        ));
    }
    text
}

#[tokio::test]
async fn test_ingest_caches_and_renders() {
    let mut o = orchestrator().await;
    let report = o.ingest("pl", playlist(30)).await.unwrap();
    assert_eq!(report.records, 30);
    assert_eq!(report.groups, ["G0", "G1", "G2"]);
    assert_eq!(report.mode, RenderMode::Direct);
    assert_eq!(report.preload.channels, 30);
    assert_eq!(report.preload.logos, 30);
    assert!(!report.quota_exceeded);

    assert_eq!(o.engine().catalog().len(), 30);
    assert!(o.engine_mut().frame().unwrap());
    assert_eq!(o.engine().mounted_len(), 30);

    let meta = o.cache_mut().cached_playlist_meta("pl").await.unwrap();
    assert_eq!(meta.channel_count, 30);
    assert_eq!(meta.group_count, 3);
    let list = o.cache_mut().cached_channel_list("pl").await.unwrap();
    assert_eq!(list.len(), 30);
}

#[tokio::test]
async fn test_ingest_bytes_rejects_binary() {
    let mut o = orchestrator().await;
    let err = o.ingest_bytes("pl", "file", &[0u8, 1, 2]).await.unwrap_err();
    assert!(matches!(err, IngestError::Parse(_)));
    assert!(o.engine().catalog().is_empty());
}

#[tokio::test]
async fn test_load_cached_restores_catalog() {
    let mut o = orchestrator().await;
    o.ingest("pl", playlist(5)).await.unwrap();
    o.engine_mut().set_catalog(Vec::new());

    assert_eq!(o.load_cached("pl").await, Some(5));
    assert_eq!(o.engine().catalog().len(), 5);
    assert_eq!(o.load_cached("missing").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_success_ingests_fresh_text() {
    let mut o = orchestrator().await;
    let policy = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        ..RetryPolicy::default()
    };
    let report = o
        .refresh_with_timeout("pl", &policy, Duration::from_secs(5), |attempt| async move {
            if attempt == 1 {
                Err("connection reset")
            } else {
                Ok(playlist(4))
            }
        })
        .await
        .unwrap();
    assert_eq!(report.source, RefreshSource::Fresh);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.records, 4);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_timeout_falls_back_to_cache() {
    let mut o = orchestrator().await;
    o.ingest("pl", playlist(7)).await.unwrap();
    o.engine_mut().set_catalog(Vec::new());

    let report = o
        .refresh_with_timeout(
            "pl",
            &RetryPolicy::default(),
            Duration::from_millis(200),
            |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<String, String>(String::new())
            },
        )
        .await
        .unwrap();
    assert!(report.timed_out);
    assert_eq!(report.source, RefreshSource::Cached);
    assert_eq!(report.records, 7);
    assert_eq!(o.engine().catalog().len(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_exhausted_without_cache_is_partial() {
    let mut o = orchestrator().await;
    let policy = RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        ..RetryPolicy::default()
    };
    let report = o
        .refresh_with_timeout("pl", &policy, Duration::from_secs(30), |_| async {
            Err::<String, _>("offline")
        })
        .await
        .unwrap();
    assert_eq!(report.source, RefreshSource::Partial);
    assert_eq!(report.attempts, 2);
    assert!(!report.timed_out);
    assert_eq!(report.records, 0);
    assert_eq!(
        o.cache_mut()
            .get::<serde_json::Value>("channels_pl", ContentKind::Channels)
            .await,
        None
    );
}
