//! Catalog core for large IPTV playlists: parsing, tiered caching and
//! windowed rendering.

pub mod cache;
pub mod orchestrator;
pub mod parser;
pub mod pool;
pub mod render;
pub mod retry;
pub mod schedule;

pub use orchestrator::{IngestError, IngestReport, Orchestrator, RefreshReport, RefreshSource};
