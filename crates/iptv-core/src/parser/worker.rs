//! Whole-playlist parse on the blocking pool.
//!
//! The worker builds its own parser, pool and interner.  Only the input text
//! goes in and only the finished records come back, so nothing is shared
//! with the caller's parser while the job runs.

use std::sync::Arc;

use iptv_proto::config::ParserConfig;
use iptv_proto::protocol::ChannelRecord;
use tracing::debug;

use super::{M3uParser, ParseDiagnostics, ParseError, ParseStrategy};

#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub records: Vec<ChannelRecord>,
    pub diagnostics: ParseDiagnostics,
    pub groups: Vec<String>,
}

pub async fn parse_in_background(
    text: Arc<str>,
    config: ParserConfig,
) -> Result<ParseOutput, ParseError> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| ParseError::Worker(e.to_string()))?;
    debug!("parsing {} bytes on the blocking pool", text.len());
    handle
        .spawn_blocking(move || {
            let mut parser = M3uParser::new(config);
            let records = parser.parse(&text);
            let mut diagnostics = parser.diagnostics().clone();
            diagnostics.strategy = ParseStrategy::Worker;
            ParseOutput {
                records,
                diagnostics,
                groups: parser.groups(),
            }
        })
        .await
        .map_err(|e| ParseError::Worker(e.to_string()))
}
