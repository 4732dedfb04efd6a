//! Wires the parser, the cache and the render engine together.
//!
//! The orchestrator owns one of each.  It is built explicitly by the caller
//! and dropped with it.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use iptv_proto::config::ParserConfig;
use iptv_proto::protocol::PlaylistMeta;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{CacheError, CacheManager, PreloadReport, TierStore};
use crate::parser::{as_text, M3uParser, ParseDiagnostics, ParseError};
use crate::render::{ChannelCallbacks, ElementFactory, RenderEngine, RenderMode};
use crate::retry::{retry, RetryOutcome, RetryPolicy};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub playlist_id: String,
    pub records: usize,
    pub groups: Vec<String>,
    pub diagnostics: ParseDiagnostics,
    pub mode: RenderMode,
    pub preload: PreloadReport,
    /// A persisted tier was full; callers may switch to storing metadata
    /// only.
    pub quota_exceeded: bool,
}

/// Where the catalog shown after a refresh came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSource {
    Fresh,
    Cached,
    /// Neither fresh nor cached data; the previous catalog stays.
    Partial,
}

#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub source: RefreshSource,
    pub records: usize,
    pub attempts: u32,
    pub timed_out: bool,
    pub ingest: Option<IngestReport>,
}

pub struct Orchestrator<K, B, F: ElementFactory, C: ChannelCallbacks> {
    parser: M3uParser,
    cache: CacheManager<K, B>,
    engine: RenderEngine<F, C>,
}

impl<K, B, F, C> Orchestrator<K, B, F, C>
where
    K: TierStore,
    B: TierStore,
    F: ElementFactory,
    C: ChannelCallbacks,
{
    pub fn new(parser: ParserConfig, cache: CacheManager<K, B>, engine: RenderEngine<F, C>) -> Self {
        Self {
            parser: M3uParser::new(parser),
            cache,
            engine,
        }
    }

    pub async fn ingest(
        &mut self,
        playlist_id: &str,
        text: impl Into<Arc<str>>,
    ) -> Result<IngestReport, IngestError> {
        self.ingest_from(playlist_id, playlist_id, text).await
    }

    /// Parse `text`, cache the channel list and playlist metadata, warm the
    /// cache for the first records and hand the catalog to the engine.
    /// `source` names where the text came from.
    pub async fn ingest_from(
        &mut self,
        playlist_id: &str,
        source: &str,
        text: impl Into<Arc<str>>,
    ) -> Result<IngestReport, IngestError> {
        let records = self.parser.parse_adaptive(text.into()).await;
        let groups = self.parser.groups();
        let diagnostics = self.parser.diagnostics().clone();

        let list = self.cache.cache_channel_list(playlist_id, &records).await?;
        let meta = PlaylistMeta {
            id: playlist_id.to_string(),
            title: playlist_id.to_string(),
            source: source.to_string(),
            channel_count: records.len(),
            group_count: groups.len(),
            imported_at: Utc::now(),
        };
        let meta_report = self.cache.cache_playlist_meta(&meta).await?;

        let (limit, batch, delay) = {
            let cfg = self.cache.config();
            (
                cfg.preload_limit,
                cfg.preload_batch,
                Duration::from_millis(cfg.preload_delay_ms),
            )
        };
        let head = &records[..records.len().min(limit)];
        let preload = self.cache.preload(head, batch, delay).await;

        let quota_exceeded =
            list.quota_exceeded() || meta_report.quota_exceeded() || preload.quota_events > 0;
        if quota_exceeded {
            warn!("cache quota exceeded while ingesting {}", playlist_id);
        }

        let count = records.len();
        self.engine.set_catalog(records);
        info!(
            "ingested {}: {} channels in {} groups ({:?}, {:.0} rec/s)",
            playlist_id,
            count,
            groups.len(),
            diagnostics.strategy,
            diagnostics.records_per_second
        );
        Ok(IngestReport {
            playlist_id: playlist_id.to_string(),
            records: count,
            groups,
            diagnostics,
            mode: self.engine.mode(),
            preload,
            quota_exceeded,
        })
    }

    /// Like [`ingest_from`](Self::ingest_from) for raw bytes.  Fails only if
    /// the bytes are not text.
    pub async fn ingest_bytes(
        &mut self,
        playlist_id: &str,
        source: &str,
        bytes: &[u8],
    ) -> Result<IngestReport, IngestError> {
        let text = as_text(bytes)?;
        self.ingest_from(playlist_id, source, text).await
    }

    /// Show the cached channel list for `playlist_id`.  Returns the number
    /// of records, or `None` on a cache miss.
    pub async fn load_cached(&mut self, playlist_id: &str) -> Option<usize> {
        let records = self.cache.cached_channel_list(playlist_id).await?;
        let count = records.len();
        self.engine.set_catalog(records);
        info!("restored {} channels for {} from cache", count, playlist_id);
        Some(count)
    }

    /// Fetch fresh playlist text through `fetch` with retries, giving up
    /// after `timeout`.  On failure the cached list is shown instead; with
    /// no cached list the current catalog stays.
    pub async fn refresh_with_timeout<S, Fut, E>(
        &mut self,
        playlist_id: &str,
        policy: &RetryPolicy,
        timeout: Duration,
        fetch: S,
    ) -> Result<RefreshReport, IngestError>
    where
        S: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: Display,
    {
        let (attempts, timed_out) =
            match tokio::time::timeout(timeout, retry(policy, fetch)).await {
                Ok(RetryOutcome::Success { value, attempts }) => {
                    let report = self.ingest(playlist_id, value).await?;
                    return Ok(RefreshReport {
                        source: RefreshSource::Fresh,
                        records: report.records,
                        attempts,
                        timed_out: false,
                        ingest: Some(report),
                    });
                }
                Ok(RetryOutcome::Exhausted { last_error, attempts }) => {
                    warn!("refresh of {} failed: {}", playlist_id, last_error);
                    (attempts, false)
                }
                Err(_) => {
                    warn!("refresh of {} timed out after {:?}", playlist_id, timeout);
                    (0, true)
                }
            };

        let (source, records) = match self.load_cached(playlist_id).await {
            Some(count) => (RefreshSource::Cached, count),
            None => (RefreshSource::Partial, self.engine.catalog().len()),
        };
        Ok(RefreshReport {
            source,
            records,
            attempts,
            timed_out,
            ingest: None,
        })
    }

    pub fn parser(&self) -> &M3uParser {
        &self.parser
    }

    pub fn cache(&self) -> &CacheManager<K, B> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut CacheManager<K, B> {
        &mut self.cache
    }

    pub fn engine(&self) -> &RenderEngine<F, C> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut RenderEngine<F, C> {
        &mut self.engine
    }
}
