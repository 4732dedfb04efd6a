use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Resource schemes a playlist entry may point at.
pub const ALLOWED_SCHEMES: &[&str] = &["http", "https", "rtmp", "rtmps", "udp", "rtp"];

/// One channel of a parsed catalog.
///
/// `name` and `group` are never empty (the parser substitutes a placeholder
/// name and the configured fallback group), and `url` always carries one of
/// [`ALLOWED_SCHEMES`].  Group, country and language are interned, so equal
/// values across a catalog share a single allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: String,
    pub name: String,
    /// Logo locator from `tvg-logo`; empty when absent.
    #[serde(default)]
    pub logo_url: String,
    pub group: Arc<str>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<Arc<str>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Arc<str>>,
    /// EPG identifier from `tvg-id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvg_id: Option<String>,
    /// Catch-up mode from `catchup` (e.g. "default", "append")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catchup: Option<String>,
    /// Positive `#EXTINF` duration in seconds; live streams use -1 and leave this unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub quality: Quality,
}

impl ChannelRecord {
    /// Country or empty string, matching the flat output record shape.
    pub fn country_str(&self) -> &str {
        self.country.as_deref().unwrap_or("")
    }

    pub fn language_str(&self) -> &str {
        self.language.as_deref().unwrap_or("")
    }

    pub fn has_logo(&self) -> bool {
        !self.logo_url.is_empty()
    }

    /// Scheme of `url`, lower-cased.
    pub fn scheme(&self) -> Option<String> {
        self.url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
    }
}

/// Picture quality guessed from the display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Quality {
    #[default]
    Sd,
    Hd,
    Fhd,
    Uhd,
}

impl Quality {
    pub fn from_name(name: &str) -> Self {
        name.split(|c: char| !c.is_alphanumeric())
            .map(|token| match token.to_ascii_lowercase().as_str() {
                "4k" | "uhd" | "2160" | "2160p" => Self::Uhd,
                "fhd" | "1080" | "1080p" | "1080i" => Self::Fhd,
                "hd" | "720" | "720p" => Self::Hd,
                _ => Self::Sd,
            })
            .max_by_key(|q| q.rank())
            .unwrap_or(Self::Sd)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Sd => 0,
            Self::Hd => 1,
            Self::Fhd => 2,
            Self::Uhd => 3,
        }
    }

    /// Short label for badges (≤3 chars).
    pub fn badge_label(self) -> &'static str {
        match self {
            Self::Sd => "SD",
            Self::Hd => "HD",
            Self::Fhd => "FHD",
            Self::Uhd => "4K",
        }
    }
}

/// What a cached value is.  Each kind carries its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Playlist-level metadata (title, source, import time)
    Playlist,
    /// Full channel lists
    Channels,
    /// Logo blobs or logo stubs
    Logos,
    /// Search result index lists
    Search,
    /// Anything else
    Metadata,
}

impl ContentKind {
    pub const ALL: [ContentKind; 5] = [
        Self::Playlist,
        Self::Channels,
        Self::Logos,
        Self::Search,
        Self::Metadata,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Playlist => "playlist",
            Self::Channels => "channels",
            Self::Logos => "logos",
            Self::Search => "search",
            Self::Metadata => "metadata",
        }
    }
}

/// Playlist-level metadata kept in the cache beside the channel list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistMeta {
    pub id: String,
    pub title: String,
    /// Where the playlist text came from (file path or locator).
    pub source: String,
    pub channel_count: usize,
    pub group_count: usize,
    pub imported_at: DateTime<Utc>,
}

/// Logo reference cached per locator.  Image bytes are fetched by the UI, so
/// only the locator and its validation verdict are stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoRecord {
    pub url: String,
    pub channel_id: String,
    pub valid: bool,
}

/// Searchable projection of a record, copied into the search worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDoc {
    pub name: String,
    pub group: String,
}

impl From<&ChannelRecord> for IndexDoc {
    fn from(record: &ChannelRecord) -> Self {
        Self {
            name: record.name.clone(),
            group: record.group.to_string(),
        }
    }
}

/// Messages sent from the render engine to the search worker.
///
/// Every query carries a `token`.  Tokens increase monotonically per engine,
/// and the engine drops any response whose token is not the newest one it
/// issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum WorkerRequest {
    /// Replace the worker's index wholesale with one built from `docs`.
    BuildIndex { generation: u64, docs: Vec<IndexDoc> },
    Search {
        token: u64,
        query: String,
        limit: usize,
    },
    ByGroup {
        token: u64,
        group: String,
        limit: usize,
    },
    Shutdown,
}

/// Messages sent from the search worker back to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply")]
pub enum WorkerResponse {
    IndexReady {
        generation: u64,
        doc_count: usize,
    },
    /// Ranked item indices into the catalog the index was built from.
    Results {
        token: u64,
        generation: u64,
        indices: Vec<u32>,
    },
    Error {
        token: Option<u64>,
        message: String,
    },
}

impl WorkerResponse {
    pub fn token(&self) -> Option<u64> {
        match self {
            Self::IndexReady { .. } => None,
            Self::Results { token, .. } => Some(*token),
            Self::Error { token, .. } => *token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, url: &str) -> ChannelRecord {
        ChannelRecord {
            id: "ch_0".into(),
            name: name.into(),
            logo_url: String::new(),
            group: Arc::from("News"),
            url: url.into(),
            country: None,
            language: None,
            tvg_id: None,
            catchup: None,
            duration_secs: None,
            quality: Quality::from_name(name),
        }
    }

    #[test]
    fn test_quality_from_name() {
        assert_eq!(Quality::from_name("Sky Sports 4K"), Quality::Uhd);
        assert_eq!(Quality::from_name("BBC One FHD"), Quality::Fhd);
        assert_eq!(Quality::from_name("Arte 720p"), Quality::Hd);
        assert_eq!(Quality::from_name("Local TV"), Quality::Sd);
        assert_eq!(Quality::from_name("Shadow TV"), Quality::Sd);
        assert_eq!(Quality::from_name("Thunder Channel"), Quality::Sd);
        assert_eq!(Quality::from_name("Discovery (HD)"), Quality::Hd);
    }

    #[test]
    fn test_scheme_is_lowercased() {
        let r = record("BBC", "HTTPS://x/bbc.m3u8");
        assert_eq!(r.scheme().as_deref(), Some("https"));
    }

    #[test]
    fn test_worker_request_schema_is_tagged() {
        let req = WorkerRequest::Search {
            token: 7,
            query: "bbc".into(),
            limit: 10,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["cmd"], "Search");
        assert_eq!(json["token"], 7);
    }

    #[test]
    fn test_record_omits_absent_optionals() {
        let json = serde_json::to_value(record("BBC", "http://x")).unwrap();
        assert!(json.get("country").is_none());
        assert_eq!(json["group"], "News");
        assert_eq!(json["logo_url"], "");
    }

    #[test]
    fn test_response_token() {
        let resp = WorkerResponse::Results {
            token: 3,
            generation: 1,
            indices: vec![0, 2],
        };
        assert_eq!(resp.token(), Some(3));
        assert_eq!(
            WorkerResponse::IndexReady {
                generation: 1,
                doc_count: 0
            }
            .token(),
            None
        );
    }
}
