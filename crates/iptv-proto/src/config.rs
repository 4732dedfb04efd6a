use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;
use super::protocol::ContentKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Playlist parsing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Lines processed between two cooperative yields in chunked mode.
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,
    /// Records per `on_batch` callback in chunked mode.
    #[serde(default = "default_batch_records")]
    pub batch_records: usize,
    #[serde(default = "default_pool_initial")]
    pub pool_initial: usize,
    #[serde(default = "default_pool_max")]
    pub pool_max: usize,
    #[serde(default = "default_pool_growth")]
    pub pool_growth: f32,
    #[serde(default = "default_intern_capacity")]
    pub intern_capacity: usize,
    /// Inputs at or above this many bytes are parsed in chunks.
    #[serde(default = "default_chunked_threshold")]
    pub chunked_threshold_bytes: usize,
    /// Inputs at or above this many bytes are parsed off the main loop.
    #[serde(default = "default_worker_threshold")]
    pub worker_threshold_bytes: usize,
    #[serde(default = "default_group_label")]
    pub default_group: String,
    #[serde(default)]
    pub max_records: Option<usize>,
    #[serde(default)]
    pub dedupe: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            chunk_lines: default_chunk_lines(),
            batch_records: default_batch_records(),
            pool_initial: default_pool_initial(),
            pool_max: default_pool_max(),
            pool_growth: default_pool_growth(),
            intern_capacity: default_intern_capacity(),
            chunked_threshold_bytes: default_chunked_threshold(),
            worker_threshold_bytes: default_worker_threshold(),
            default_group: default_group_label(),
            max_records: None,
            dedupe: false,
        }
    }
}

fn default_chunk_lines() -> usize {
    500
}

fn default_batch_records() -> usize {
    250
}

fn default_pool_initial() -> usize {
    64
}

fn default_pool_max() -> usize {
    4096
}

fn default_pool_growth() -> f32 {
    1.5
}

fn default_intern_capacity() -> usize {
    2048
}

fn default_chunked_threshold() -> usize {
    256 * 1024
}

fn default_worker_threshold() -> usize {
    8 * 1024 * 1024
}

fn default_group_label() -> String {
    "General".to_string()
}

/// Expiry in seconds per content kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlTable {
    #[serde(default = "default_ttl_playlist")]
    pub playlist: u64,
    #[serde(default = "default_ttl_channels")]
    pub channels: u64,
    #[serde(default = "default_ttl_logos")]
    pub logos: u64,
    #[serde(default = "default_ttl_search")]
    pub search: u64,
    #[serde(default = "default_ttl_metadata")]
    pub metadata: u64,
}

impl TtlTable {
    pub fn secs_for(&self, kind: ContentKind) -> u64 {
        match kind {
            ContentKind::Playlist => self.playlist,
            ContentKind::Channels => self.channels,
            ContentKind::Logos => self.logos,
            ContentKind::Search => self.search,
            ContentKind::Metadata => self.metadata,
        }
    }
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            playlist: default_ttl_playlist(),
            channels: default_ttl_channels(),
            logos: default_ttl_logos(),
            search: default_ttl_search(),
            metadata: default_ttl_metadata(),
        }
    }
}

fn default_ttl_playlist() -> u64 {
    24 * 60 * 60
}

fn default_ttl_channels() -> u64 {
    6 * 60 * 60
}

fn default_ttl_logos() -> u64 {
    7 * 24 * 60 * 60
}

fn default_ttl_search() -> u64 {
    30 * 60
}

fn default_ttl_metadata() -> u64 {
    60 * 60
}

/// Budget of one cache tier.  Either limit may be zero to disable it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBudget {
    pub max_entries: usize,
    pub max_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespace prepended to every key written to the persisted tier.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_memory_budget")]
    pub memory: TierBudget,
    #[serde(default = "default_persisted_budget")]
    pub persisted: TierBudget,
    #[serde(default = "default_blob_budget")]
    pub blob: TierBudget,
    #[serde(default)]
    pub ttl: TtlTable,
    #[serde(default = "default_preload_batch")]
    pub preload_batch: usize,
    #[serde(default = "default_preload_delay_ms")]
    pub preload_delay_ms: u64,
    /// How many records `ingest` hands to `preload`.
    #[serde(default = "default_preload_limit")]
    pub preload_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            memory: default_memory_budget(),
            persisted: default_persisted_budget(),
            blob: default_blob_budget(),
            ttl: TtlTable::default(),
            preload_batch: default_preload_batch(),
            preload_delay_ms: default_preload_delay_ms(),
            preload_limit: default_preload_limit(),
        }
    }
}

fn default_key_prefix() -> String {
    "iptv_cache_".to_string()
}

fn default_memory_budget() -> TierBudget {
    TierBudget {
        max_entries: 500,
        max_bytes: 50 * 1024 * 1024,
    }
}

fn default_persisted_budget() -> TierBudget {
    TierBudget {
        max_entries: 5_000,
        max_bytes: 200 * 1024 * 1024,
    }
}

fn default_blob_budget() -> TierBudget {
    TierBudget {
        max_entries: 50_000,
        max_bytes: 1024 * 1024 * 1024,
    }
}

fn default_preload_batch() -> usize {
    50
}

fn default_preload_delay_ms() -> u64 {
    10
}

fn default_preload_limit() -> usize {
    500
}

/// Windowing and mode-selection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_item_height")]
    pub item_height: f32,
    #[serde(default = "default_columns")]
    pub columns: usize,
    /// Catalogs below this size render directly.
    #[serde(default = "default_windowed_threshold")]
    pub windowed_threshold: usize,
    /// Catalogs at or above this size use the extreme strategy.
    #[serde(default = "default_extreme_threshold")]
    pub extreme_threshold: usize,
    #[serde(default = "default_overscan")]
    pub overscan_rows: usize,
    #[serde(default = "default_extreme_overscan")]
    pub extreme_overscan_rows: usize,
    #[serde(default = "default_windowed_ceiling")]
    pub windowed_max_render: usize,
    #[serde(default = "default_extreme_ceiling")]
    pub extreme_max_render: usize,
    #[serde(default = "default_recent_views")]
    pub recent_views: usize,
    #[serde(default = "default_extreme_recent_views")]
    pub extreme_recent_views: usize,
    #[serde(default = "default_view_pool_max")]
    pub view_pool_max: usize,
    #[serde(default = "default_scroll_throttle_ms")]
    pub scroll_throttle_ms: u64,
    /// Screen height used when the viewport has not been measured yet.
    #[serde(default = "default_screen_height")]
    pub screen_height: f32,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            item_height: default_item_height(),
            columns: default_columns(),
            windowed_threshold: default_windowed_threshold(),
            extreme_threshold: default_extreme_threshold(),
            overscan_rows: default_overscan(),
            extreme_overscan_rows: default_extreme_overscan(),
            windowed_max_render: default_windowed_ceiling(),
            extreme_max_render: default_extreme_ceiling(),
            recent_views: default_recent_views(),
            extreme_recent_views: default_extreme_recent_views(),
            view_pool_max: default_view_pool_max(),
            scroll_throttle_ms: default_scroll_throttle_ms(),
            screen_height: default_screen_height(),
            search_limit: default_search_limit(),
        }
    }
}

fn default_item_height() -> f32 {
    120.0
}

fn default_columns() -> usize {
    4
}

fn default_windowed_threshold() -> usize {
    1_000
}

fn default_extreme_threshold() -> usize {
    15_000
}

fn default_overscan() -> usize {
    5
}

fn default_extreme_overscan() -> usize {
    2
}

fn default_windowed_ceiling() -> usize {
    500
}

fn default_extreme_ceiling() -> usize {
    200
}

fn default_recent_views() -> usize {
    100
}

fn default_extreme_recent_views() -> usize {
    300
}

fn default_view_pool_max() -> usize {
    600
}

fn default_scroll_throttle_ms() -> u64 {
    16
}

fn default_screen_height() -> f32 {
    1080.0
}

fn default_search_limit() -> usize {
    2_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Root of the blob tier and of the persisted-tier store.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    platform::data_dir()
}

fn default_cache_dir() -> PathBuf {
    platform::cache_dir()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            tracing::info!("wrote default config to {}", config_path.display());
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.render.windowed_threshold, 1_000);
        assert_eq!(config.render.extreme_threshold, 15_000);
        assert_eq!(config.cache.ttl.secs_for(ContentKind::Search), 1800);
        assert_eq!(config.cache.ttl.secs_for(ContentKind::Logos), 604_800);
        assert_eq!(config.parser.default_group, "General");
        assert!(config.paths.cache_dir.ends_with("iptv"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [render]
            columns = 6

            [cache.ttl]
            search = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.render.columns, 6);
        assert_eq!(config.render.overscan_rows, 5);
        assert_eq!(config.cache.ttl.search, 60);
        assert_eq!(config.cache.ttl.channels, 6 * 60 * 60);
        assert_eq!(config.cache.key_prefix, "iptv_cache_");
    }

    #[test]
    fn test_config_roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.cache.memory, config.cache.memory);
        assert_eq!(back.parser.max_records, None);
    }
}
