//! Streaming M3U playlist parser.
//!
//! The parser is a two-state machine: it waits for an `#EXTINF` metadata
//! line, then for the resource line that completes the entry.  Working
//! records come from a [`Pool`] and attribute values go through a bounded
//! [`Interner`], so a 50k-entry playlist allocates one `String` per emitted
//! name/url and shares every repeated group, country and language.
//!
//! Per-line problems never abort a parse.  They are counted in
//! [`ParseDiagnostics`] and the offending entry is dropped.

mod intern;
mod worker;

pub use intern::Interner;
pub use worker::{parse_in_background, ParseOutput};

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use iptv_proto::config::ParserConfig;
use iptv_proto::protocol::{ChannelRecord, Quality, ALLOWED_SCHEMES};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::pool::{Pool, Reset};

const ENTRY_MARKER: &str = "#EXTINF";
const GROUP_MARKER: &str = "#EXTGRP:";
/// Bytes inspected for NUL when deciding whether input is text.
const TEXT_PROBE_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("playlist is not text (invalid data at byte {offset})")]
    NotText { offset: usize },
    #[error("background parse failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ParseStrategy {
    #[default]
    Direct,
    Chunked,
    Worker,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseDiagnostics {
    pub strategy: ParseStrategy,
    pub lines_processed: u64,
    pub records_emitted: u64,
    /// Entries abandoned: bad resource line, superseded or unterminated entry.
    pub records_dropped: u64,
    pub invalid_urls: u64,
    pub duplicates_removed: u64,
    /// Resource-looking lines with no preceding metadata line.
    pub orphan_lines: u64,
    pub chunks_processed: u64,
    pub pool_hit_ratio: f64,
    pub pool_grows: u64,
    pub intern_hit_ratio: f64,
    pub elapsed: Duration,
    pub records_per_second: f64,
}

/// Mutable scratch record.  Strings keep their capacity across reuse.
#[derive(Debug, Default)]
struct WorkingRecord {
    name: String,
    tvg_name: String,
    logo: String,
    group: String,
    country: String,
    language: String,
    tvg_id: String,
    catchup: String,
    duration: Option<f64>,
}

impl Reset for WorkingRecord {
    fn reset(&mut self) {
        self.name.clear();
        self.tvg_name.clear();
        self.logo.clear();
        self.group.clear();
        self.country.clear();
        self.language.clear();
        self.tvg_id.clear();
        self.catchup.clear();
        self.duration = None;
    }
}

enum State {
    SeekingEntry,
    SeekingResource(WorkingRecord),
}

struct Session {
    state: State,
    emitted: usize,
    seen: Option<HashSet<(String, String)>>,
    limit: Option<usize>,
    started: Instant,
}

impl Session {
    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|max| self.emitted >= max)
    }
}

pub struct M3uParser {
    config: ParserConfig,
    pool: Pool<WorkingRecord>,
    interner: Interner,
    groups: BTreeSet<Arc<str>>,
    diagnostics: ParseDiagnostics,
}

impl M3uParser {
    pub fn new(config: ParserConfig) -> Self {
        let pool = Pool::new(config.pool_initial, config.pool_max, config.pool_growth);
        let interner = Interner::new(config.intern_capacity);
        Self {
            config,
            pool,
            interner,
            groups: BTreeSet::new(),
            diagnostics: ParseDiagnostics::default(),
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Diagnostics of the most recent parse.
    pub fn diagnostics(&self) -> &ParseDiagnostics {
        &self.diagnostics
    }

    /// Sorted distinct groups seen by the most recent parse.
    pub fn groups(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.to_string()).collect()
    }

    /// Which strategy `parse_adaptive` picks for an input of `len` bytes.
    pub fn strategy_for(&self, len: usize) -> ParseStrategy {
        if len >= self.config.worker_threshold_bytes {
            ParseStrategy::Worker
        } else if len >= self.config.chunked_threshold_bytes {
            ParseStrategy::Chunked
        } else {
            ParseStrategy::Direct
        }
    }

    /// Parse a whole playlist in one pass.  Never fails: malformed entries are
    /// dropped and counted.
    pub fn parse(&mut self, text: &str) -> Vec<ChannelRecord> {
        let mut session = self.begin(ParseStrategy::Direct);
        let mut out = Vec::with_capacity(text.len() / 128);
        for line in text.lines() {
            if session.limit_reached() {
                break;
            }
            if let Some(record) = self.feed_line(&mut session, line) {
                out.push(record);
            }
        }
        self.finish(session);
        out
    }

    /// Parse raw bytes.  The only fallible entry point: bytes that are not
    /// UTF-8 text are rejected with [`ParseError::NotText`].  Empty input is
    /// an empty catalog.
    pub fn parse_bytes(&mut self, bytes: &[u8]) -> Result<Vec<ChannelRecord>, ParseError> {
        let text = as_text(bytes)?;
        Ok(self.parse(text))
    }

    /// Parse text as it arrives from `source`, handing completed records to
    /// `on_batch` and yielding to the scheduler every `chunk_lines` lines.
    /// Source items may split lines anywhere.  Returns the number of records
    /// emitted.
    pub async fn parse_chunked<S, T, F>(&mut self, source: S, mut on_batch: F) -> usize
    where
        S: Stream<Item = T>,
        T: AsRef<str>,
        F: FnMut(Vec<ChannelRecord>),
    {
        futures_util::pin_mut!(source);
        let chunk_lines = self.config.chunk_lines.max(1);
        let batch_size = self.config.batch_records.max(1);
        let mut session = self.begin(ParseStrategy::Chunked);
        let mut carry = String::new();
        let mut batch = Vec::with_capacity(batch_size);
        let mut since_yield = 0usize;

        'source: while let Some(piece) = source.next().await {
            carry.push_str(piece.as_ref());
            let mut consumed = 0;
            while let Some(nl) = carry[consumed..].find('\n') {
                let end = consumed + nl;
                let record = self.feed_line(&mut session, &carry[consumed..end]);
                consumed = end + 1;
                if let Some(record) = record {
                    batch.push(record);
                    if batch.len() >= batch_size {
                        on_batch(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)));
                    }
                }
                if session.limit_reached() {
                    break 'source;
                }
                since_yield += 1;
                if since_yield >= chunk_lines {
                    since_yield = 0;
                    self.diagnostics.chunks_processed += 1;
                    tokio::task::yield_now().await;
                }
            }
            carry.drain(..consumed);
        }

        if !carry.is_empty() && !session.limit_reached() {
            if let Some(record) = self.feed_line(&mut session, &carry) {
                batch.push(record);
            }
        }
        if since_yield > 0 {
            self.diagnostics.chunks_processed += 1;
        }
        if !batch.is_empty() {
            on_batch(batch);
        }
        let emitted = session.emitted;
        self.finish(session);
        emitted
    }

    /// Pick a strategy from the input size: inline below the chunked
    /// threshold, cooperative chunks below the worker threshold, a blocking
    /// worker above it.
    pub async fn parse_adaptive(&mut self, text: Arc<str>) -> Vec<ChannelRecord> {
        match self.strategy_for(text.len()) {
            ParseStrategy::Direct => self.parse(&text),
            ParseStrategy::Chunked => {
                let mut out = Vec::new();
                let lines = futures_util::stream::iter(text.split_inclusive('\n'));
                self.parse_chunked(lines, |batch| out.extend(batch)).await;
                out
            }
            ParseStrategy::Worker => {
                match parse_in_background(Arc::clone(&text), self.config.clone()).await {
                    Ok(output) => self.adopt(output),
                    Err(e) => {
                        warn!("{}, parsing inline instead", e);
                        self.parse(&text)
                    }
                }
            }
        }
    }

    /// Take over the results of a background parse so `diagnostics()` and
    /// `groups()` describe it.
    pub fn adopt(&mut self, output: ParseOutput) -> Vec<ChannelRecord> {
        self.groups = output
            .groups
            .iter()
            .map(|g| self.interner.intern(g))
            .collect();
        self.diagnostics = output.diagnostics;
        self.diagnostics.strategy = ParseStrategy::Worker;
        output.records
    }

    fn begin(&mut self, strategy: ParseStrategy) -> Session {
        self.pool.reset_stats();
        self.interner.reset_stats();
        self.groups.clear();
        self.diagnostics = ParseDiagnostics {
            strategy,
            ..ParseDiagnostics::default()
        };
        Session {
            state: State::SeekingEntry,
            emitted: 0,
            seen: self.config.dedupe.then(HashSet::new),
            limit: self.config.max_records,
            started: Instant::now(),
        }
    }

    fn feed_line(&mut self, session: &mut Session, raw: &str) -> Option<ChannelRecord> {
        self.diagnostics.lines_processed += 1;
        let line = raw.trim().trim_start_matches('\u{feff}');
        if line.is_empty() {
            return None;
        }

        if let Some(rest) = strip_prefix_ignore_case(line, ENTRY_MARKER) {
            if let State::SeekingResource(stale) =
                std::mem::replace(&mut session.state, State::SeekingEntry)
            {
                // Metadata line without a resource line: superseded.
                self.diagnostics.records_dropped += 1;
                self.pool.release(stale);
            }
            let mut working = self.pool.acquire();
            read_entry_line(rest, &mut working);
            session.state = State::SeekingResource(working);
            return None;
        }

        if line.starts_with('#') {
            if let State::SeekingResource(working) = &mut session.state {
                if let Some(group) = strip_prefix_ignore_case(line, GROUP_MARKER) {
                    if working.group.is_empty() {
                        working.group.push_str(group.trim());
                    }
                }
            }
            return None;
        }

        match std::mem::replace(&mut session.state, State::SeekingEntry) {
            State::SeekingEntry => {
                self.diagnostics.orphan_lines += 1;
                None
            }
            State::SeekingResource(working) => {
                let record = if is_allowed_resource(line) {
                    self.freeze(session, &working, line)
                } else {
                    trace!("dropping entry with resource {:?}", line);
                    self.diagnostics.invalid_urls += 1;
                    self.diagnostics.records_dropped += 1;
                    None
                };
                self.pool.release(working);
                record
            }
        }
    }

    /// Copy the working record into an immutable `ChannelRecord`.
    fn freeze(
        &mut self,
        session: &mut Session,
        working: &WorkingRecord,
        url: &str,
    ) -> Option<ChannelRecord> {
        let name = if !working.name.is_empty() {
            working.name.clone()
        } else if !working.tvg_name.is_empty() {
            working.tvg_name.clone()
        } else {
            format!("Channel {}", session.emitted + 1)
        };

        if let Some(seen) = session.seen.as_mut() {
            if !seen.insert((name.clone(), url.to_string())) {
                self.diagnostics.duplicates_removed += 1;
                return None;
            }
        }

        let group = if working.group.is_empty() {
            self.interner.intern(&self.config.default_group)
        } else {
            self.interner.intern(&working.group)
        };
        let country = (!working.country.is_empty()).then(|| self.interner.intern(&working.country));
        let language =
            (!working.language.is_empty()).then(|| self.interner.intern(&working.language));
        self.groups.insert(Arc::clone(&group));

        let record = ChannelRecord {
            id: format!("ch_{}", session.emitted),
            quality: Quality::from_name(&name),
            name,
            logo_url: working.logo.clone(),
            group,
            url: url.to_string(),
            country,
            language,
            tvg_id: (!working.tvg_id.is_empty()).then(|| working.tvg_id.clone()),
            catchup: (!working.catchup.is_empty()).then(|| working.catchup.clone()),
            duration_secs: working.duration,
        };
        session.emitted += 1;
        self.diagnostics.records_emitted += 1;
        Some(record)
    }

    fn finish(&mut self, session: Session) {
        if let State::SeekingResource(working) = session.state {
            self.diagnostics.records_dropped += 1;
            self.pool.release(working);
        }
        let stats = self.pool.stats();
        let d = &mut self.diagnostics;
        d.pool_hit_ratio = stats.hit_ratio();
        d.pool_grows = stats.grows;
        d.intern_hit_ratio = self.interner.hit_ratio();
        d.elapsed = session.started.elapsed();
        let secs = d.elapsed.as_secs_f64();
        d.records_per_second = if secs > 0.0 {
            d.records_emitted as f64 / secs
        } else {
            0.0
        };
        if d.records_dropped > 0 {
            debug!(
                "dropped {} entries ({} bad urls)",
                d.records_dropped, d.invalid_urls
            );
        }
        info!(
            "parsed {} records from {} lines in {:?} ({:?})",
            d.records_emitted, d.lines_processed, d.elapsed, d.strategy
        );
    }
}

impl Default for M3uParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

/// View `bytes` as playlist text, rejecting binary data and invalid UTF-8.
pub fn as_text(bytes: &[u8]) -> Result<&str, ParseError> {
    let probe = &bytes[..bytes.len().min(TEXT_PROBE_BYTES)];
    if let Some(offset) = probe.iter().position(|&b| b == 0) {
        return Err(ParseError::NotText { offset });
    }
    std::str::from_utf8(bytes).map_err(|e| ParseError::NotText {
        offset: e.valid_up_to(),
    })
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &line[prefix.len()..])
}

fn is_allowed_resource(line: &str) -> bool {
    let Some((scheme, rest)) = line.split_once("://") else {
        return false;
    };
    !rest.is_empty() && ALLOWED_SCHEMES.iter().any(|s| s.eq_ignore_ascii_case(scheme))
}

/// Fill `working` from the part of a metadata line after `#EXTINF`.
fn read_entry_line(rest: &str, working: &mut WorkingRecord) {
    let body = rest.strip_prefix(':').unwrap_or(rest).trim_start();

    let duration_end = body
        .find(|c: char| c.is_whitespace() || c == ',')
        .unwrap_or(body.len());
    let attrs_start = match body[..duration_end].parse::<f64>() {
        Ok(secs) => {
            if secs > 0.0 && secs.is_finite() {
                working.duration = Some(secs);
            }
            duration_end
        }
        Err(_) => 0,
    };

    // Display name follows the last comma; attributes live before it.
    let (attrs, name) = match body.rfind(',') {
        Some(pos) => (&body[attrs_start.min(pos)..pos], body[pos + 1..].trim()),
        None => (&body[attrs_start..], ""),
    };
    working.name.push_str(name);

    for (key, value) in Attributes::new(attrs) {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let slot = match key.to_ascii_lowercase().as_str() {
            "tvg-logo" | "logo" => &mut working.logo,
            "group-title" | "group" => &mut working.group,
            "tvg-country" | "country" => &mut working.country,
            "tvg-language" | "language" => &mut working.language,
            "tvg-id" => &mut working.tvg_id,
            "tvg-name" => &mut working.tvg_name,
            "catchup" => &mut working.catchup,
            _ => continue,
        };
        if slot.is_empty() {
            slot.push_str(value);
        }
    }
}

/// Linear scan over `key="value"` pairs.  An unterminated value runs to the
/// end of the input.
struct Attributes<'a> {
    rest: &'a str,
}

impl<'a> Attributes<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input }
    }
}

impl<'a> Iterator for Attributes<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest;
        let eq = rest.find("=\"")?;
        let key = rest[..eq]
            .rsplit(|c: char| c.is_whitespace() || c == '"')
            .next()
            .unwrap_or("");
        let value_start = eq + 2;
        let (value, next) = match rest[value_start..].find('"') {
            Some(close) => (
                &rest[value_start..value_start + close],
                &rest[value_start + close + 1..],
            ),
            None => (&rest[value_start..], ""),
        };
        self.rest = next;
        Some((key, value))
    }
}
