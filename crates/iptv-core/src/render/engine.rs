use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use iptv_proto::config::RenderConfig;
use iptv_proto::protocol::{ChannelRecord, IndexDoc, WorkerRequest, WorkerResponse};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::capabilities::{ChannelCallbacks, ElementFactory, ItemView};
use super::index::SearchIndex;
use super::mode::{ModePolicy, RenderMode};
use super::recycler::{RecycleStats, ViewRecycler};
use super::search_worker::SearchWorker;
use super::window::{ViewWindow, WindowRange};
use super::RenderError;
use crate::schedule::ScrollThrottle;

/// Smallest height assumed for a viewport that has not been laid out.
const MIN_FALLBACK_HEIGHT: f32 = 400.0;
/// Screen area taken by chrome around the list.
const SCREEN_CHROME: f32 = 200.0;

/// Measured size of the list area.  A zero `height` means "not laid out
/// yet" and is replaced by an estimate from the screen height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub item_height: f32,
    pub columns: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineDiagnostics {
    pub mode: RenderMode,
    pub total: usize,
    /// Items in the current view; differs from `total` while filtered.
    pub view_len: usize,
    pub filtered: bool,
    pub window: WindowRange,
    pub max_render_items: usize,
    pub mounted: usize,
    pub recent_views: usize,
    pub pooled: usize,
    pub recycle: RecycleStats,
    pub clamp_events: u64,
    pub stale_responses_dropped: u64,
    pub mode_transitions: u64,
    pub frames: u64,
    pub background_search: bool,
    pub index_generation: Option<u64>,
}

enum Search {
    /// Index built on first query, on the calling thread.
    Inline(Option<SearchIndex>),
    Worker(SearchWorker),
}

struct Mounted<E> {
    catalog_index: usize,
    element: E,
}

pub struct RenderEngine<F: ElementFactory, C: ChannelCallbacks> {
    config: RenderConfig,
    factory: F,
    callbacks: C,
    viewport: Option<Viewport>,
    catalog: Arc<[ChannelRecord]>,
    /// Catalog indices of a filtered view, in display order.
    view: Option<Vec<u32>>,
    mode: RenderMode,
    policy: ModePolicy,
    scroll_offset: f32,
    throttle: ScrollThrottle,
    dirty: bool,
    /// Keyed by position in the current view.
    mounted: BTreeMap<usize, Mounted<F::Element>>,
    recycler: ViewRecycler<F::Element>,
    window: WindowRange,
    max_render: usize,
    search: Search,
    generation: u64,
    /// Last token issued; responses for any other token are stale.
    latest_token: u64,
    awaiting: Option<u64>,
    index_generation: Option<u64>,
    clamp_events: u64,
    was_clamped: bool,
    stale_dropped: u64,
    transitions: u64,
    frames: u64,
}

impl<F: ElementFactory, C: ChannelCallbacks> RenderEngine<F, C> {
    pub fn new(config: RenderConfig, factory: F, callbacks: C) -> Self {
        let mode = RenderMode::Direct;
        let policy = mode.policy(&config);
        Self {
            recycler: ViewRecycler::new(policy.recent_views, config.view_pool_max),
            throttle: ScrollThrottle::new(Duration::from_millis(config.scroll_throttle_ms)),
            config,
            factory,
            callbacks,
            viewport: None,
            catalog: Arc::from(Vec::new()),
            view: None,
            mode,
            policy,
            scroll_offset: 0.0,
            dirty: true,
            mounted: BTreeMap::new(),
            window: WindowRange::default(),
            max_render: 0,
            search: Search::Inline(None),
            generation: 0,
            latest_token: 0,
            awaiting: None,
            index_generation: None,
            clamp_events: 0,
            was_clamped: false,
            stale_dropped: 0,
            transitions: 0,
            frames: 0,
        }
    }

    pub fn attach(&mut self, viewport: Viewport) {
        debug!(
            "viewport attached {}x{} item {} cols {}",
            viewport.width, viewport.height, viewport.item_height, viewport.columns
        );
        self.viewport = Some(viewport);
        self.clamp_scroll();
        self.dirty = true;
    }

    pub fn is_attached(&self) -> bool {
        self.viewport.is_some()
    }

    /// Replace the catalog.  Drops any filter, picks the mode for the new
    /// size and starts an index build for it.
    pub fn set_catalog(&mut self, records: impl Into<Arc<[ChannelRecord]>>) {
        // Mounted indices point into the outgoing catalog.
        self.retire_mounted();
        self.catalog = records.into();
        self.generation += 1;
        self.issue_token();
        self.view = None;
        self.scroll_offset = 0.0;
        self.throttle.reset();
        self.index_generation = None;

        let mode = RenderMode::select(self.catalog.len(), &self.config);
        self.transition(mode);
        self.rebuild_index();
        self.dirty = true;
        info!(
            "catalog set: {} records, {} mode, generation {}",
            self.catalog.len(),
            self.mode.label(),
            self.generation
        );
    }

    /// Switch to `mode`, tearing down the previous mode's element caches.
    /// Switching to the current mode changes nothing.
    fn transition(&mut self, mode: RenderMode) {
        if mode == self.mode {
            return;
        }
        info!("render mode {} -> {}", self.mode.label(), mode.label());
        self.mounted.clear();
        self.window = WindowRange::default();
        self.mode = mode;
        self.policy = mode.policy(&self.config);
        self.recycler = ViewRecycler::new(self.policy.recent_views, self.config.view_pool_max);
        self.transitions += 1;

        let has_worker = matches!(self.search, Search::Worker(_));
        if self.policy.use_worker && !has_worker {
            match SearchWorker::spawn() {
                Some(worker) => self.search = Search::Worker(worker),
                None => debug!("no runtime for a search worker, searching inline"),
            }
        } else if !self.policy.use_worker && has_worker {
            self.search = Search::Inline(None);
        }
    }

    fn rebuild_index(&mut self) {
        let sent = match &self.search {
            Search::Worker(worker) => worker.send(WorkerRequest::BuildIndex {
                generation: self.generation,
                docs: self.catalog.iter().map(IndexDoc::from).collect(),
            }),
            Search::Inline(_) => {
                // Built lazily on the first query.
                self.search = Search::Inline(None);
                return;
            }
        };
        if let Err(err) = sent {
            warn!("{err}, falling back to inline search");
            self.search = Search::Inline(None);
        }
    }

    /// Record a scroll position.  Scrolls closer together than the throttle
    /// interval are deferred to the next frame.
    pub fn on_scroll(&mut self, offset: f32) -> Result<(), RenderError> {
        self.on_scroll_at(offset, Instant::now())
    }

    pub fn on_scroll_at(&mut self, offset: f32, now: Instant) -> Result<(), RenderError> {
        self.ensure_attached()?;
        if let Some(offset) = self.throttle.offer(offset, now) {
            self.apply_scroll(offset);
        }
        Ok(())
    }

    pub fn on_resize(&mut self, viewport: Viewport) -> Result<(), RenderError> {
        self.ensure_attached()?;
        if self.viewport != Some(viewport) {
            self.viewport = Some(viewport);
            self.clamp_scroll();
            self.dirty = true;
        }
        Ok(())
    }

    /// Move by whole rows, bypassing the scroll throttle.
    pub fn scroll_by_rows(&mut self, rows: isize) -> Result<(), RenderError> {
        self.ensure_attached()?;
        let offset = self.scroll_offset + rows as f32 * self.item_height();
        self.apply_scroll(offset);
        Ok(())
    }

    /// Scroll the least distance that brings `position` fully into view.
    pub fn scroll_to_index(&mut self, position: usize) -> Result<(), RenderError> {
        let win = self.view_window().ok_or(RenderError::NotAttached)?;
        let item_height = self.item_height();
        let row = position / self.columns();
        let first = (self.scroll_offset / item_height).floor() as usize;
        let visible = ((win.viewport_height / item_height).floor() as usize).max(1);
        if row < first {
            self.apply_scroll(row as f32 * item_height);
        } else if row >= first + visible {
            self.apply_scroll((row + 1 - visible) as f32 * item_height);
        }
        Ok(())
    }

    /// Run one render pass if anything changed since the last one.  Returns
    /// whether the mounted set was reconciled.
    pub fn frame(&mut self) -> Result<bool, RenderError> {
        self.frame_at(Instant::now())
    }

    pub fn frame_at(&mut self, now: Instant) -> Result<bool, RenderError> {
        self.ensure_attached()?;
        self.poll_search_results();
        if let Some(offset) = self.throttle.take_trailing(now) {
            self.apply_scroll(offset);
        }
        if !self.dirty {
            return Ok(false);
        }
        self.reconcile();
        self.dirty = false;
        self.frames += 1;
        Ok(true)
    }

    /// Start a text search.  The returned token identifies the request;
    /// only the newest token's results are ever applied.  An empty query
    /// shows the whole catalog.
    pub fn search(&mut self, query: &str) -> Result<u64, RenderError> {
        self.ensure_attached()?;
        let token = self.issue_token();
        let query = query.trim();
        if query.is_empty() {
            self.show_all();
            return Ok(token);
        }
        self.dispatch(WorkerRequest::Search {
            token,
            query: query.to_string(),
            limit: self.config.search_limit,
        });
        Ok(token)
    }

    /// Show only records whose group equals `group` (ignoring case).
    pub fn filter_by_group(&mut self, group: &str) -> Result<u64, RenderError> {
        self.ensure_attached()?;
        let token = self.issue_token();
        let group = group.trim();
        if group.is_empty() {
            self.show_all();
            return Ok(token);
        }
        self.dispatch(WorkerRequest::ByGroup {
            token,
            group: group.to_string(),
            limit: self.catalog.len(),
        });
        Ok(token)
    }

    /// Drop any filter.  Results still in flight are discarded on arrival.
    pub fn clear_filter(&mut self) {
        self.issue_token();
        self.show_all();
    }

    /// Apply worker responses that have already arrived.  Returns how many
    /// changed the view.
    pub fn poll_search_results(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let next = match &mut self.search {
                Search::Worker(worker) => worker.try_recv(),
                Search::Inline(_) => None,
            };
            let Some(response) = next else {
                break;
            };
            if self.apply_response(response) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait until the newest search request has been answered.
    pub async fn settle(&mut self) -> Result<(), RenderError> {
        while self.awaiting.is_some() {
            let next = match &mut self.search {
                Search::Worker(worker) => worker.recv().await,
                Search::Inline(_) => {
                    self.awaiting = None;
                    break;
                }
            };
            match next {
                Some(response) => {
                    self.apply_response(response);
                }
                None => {
                    warn!("search worker stopped with a query pending");
                    self.search = Search::Inline(None);
                    self.awaiting = None;
                    return Err(RenderError::WorkerGone);
                }
            }
        }
        Ok(())
    }

    /// Route a click on the item at `position` to the callbacks.
    pub fn click(&mut self, position: usize) -> Result<bool, RenderError> {
        self.ensure_attached()?;
        let Some(index) = self.catalog_index(position) else {
            return Ok(false);
        };
        self.callbacks.on_item_click(&self.catalog[index]);
        Ok(true)
    }

    pub fn toggle_favorite(&mut self, position: usize) -> Result<bool, RenderError> {
        self.ensure_attached()?;
        let Some(index) = self.catalog_index(position) else {
            return Ok(false);
        };
        self.callbacks.on_favorite_toggle(&self.catalog[index]);
        if let Some(m) = self.mounted.get_mut(&position) {
            let item = ItemView::resolve(position, &self.catalog[m.catalog_index], &self.callbacks);
            self.factory.update(&mut m.element, &item);
        }
        Ok(true)
    }

    /// Re-run `update` on every mounted element, e.g. after favorites or
    /// the active channel changed outside the engine.
    pub fn refresh_mounted(&mut self) {
        for (&position, m) in self.mounted.iter_mut() {
            let item = ItemView::resolve(position, &self.catalog[m.catalog_index], &self.callbacks);
            self.factory.update(&mut m.element, &item);
        }
    }

    /// Mounted elements in display order with their view positions.
    pub fn mounted(&self) -> impl Iterator<Item = (usize, &F::Element)> {
        self.mounted.iter().map(|(&p, m)| (p, &m.element))
    }

    pub fn mounted_len(&self) -> usize {
        self.mounted.len()
    }

    pub fn record_at(&self, position: usize) -> Option<&ChannelRecord> {
        self.catalog_index(position).map(|i| &self.catalog[i])
    }

    pub fn catalog(&self) -> &Arc<[ChannelRecord]> {
        &self.catalog
    }

    pub fn view_len(&self) -> usize {
        match &self.view {
            Some(view) => view.len(),
            None => self.catalog.len(),
        }
    }

    pub fn is_filtered(&self) -> bool {
        self.view.is_some()
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn window(&self) -> WindowRange {
        self.window
    }

    pub fn scroll_offset(&self) -> f32 {
        self.scroll_offset
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn diagnostics(&self) -> EngineDiagnostics {
        EngineDiagnostics {
            mode: self.mode,
            total: self.catalog.len(),
            view_len: self.view_len(),
            filtered: self.is_filtered(),
            window: self.window,
            max_render_items: self.max_render,
            mounted: self.mounted.len(),
            recent_views: self.recycler.recent_len(),
            pooled: self.recycler.pooled(),
            recycle: self.recycler.stats(),
            clamp_events: self.clamp_events,
            stale_responses_dropped: self.stale_dropped,
            mode_transitions: self.transitions,
            frames: self.frames,
            background_search: matches!(self.search, Search::Worker(_)),
            index_generation: self.index_generation,
        }
    }

    fn ensure_attached(&self) -> Result<(), RenderError> {
        if self.viewport.is_some() {
            Ok(())
        } else {
            Err(RenderError::NotAttached)
        }
    }

    fn issue_token(&mut self) -> u64 {
        self.latest_token += 1;
        self.awaiting = None;
        self.latest_token
    }

    fn dispatch(&mut self, request: WorkerRequest) {
        let token = self.latest_token;
        let sent = match &self.search {
            Search::Worker(worker) => Some(worker.send(request.clone())),
            Search::Inline(_) => None,
        };
        match sent {
            Some(Ok(())) => {
                self.awaiting = Some(token);
                return;
            }
            Some(Err(err)) => {
                warn!("{err}, falling back to inline search");
                self.search = Search::Inline(None);
            }
            None => {}
        }

        let reply = match &mut self.search {
            Search::Inline(slot) => {
                if slot.as_ref().map(SearchIndex::generation) != Some(self.generation) {
                    let docs: Vec<IndexDoc> = self.catalog.iter().map(IndexDoc::from).collect();
                    *slot = Some(SearchIndex::build(&docs, self.generation));
                    self.index_generation = Some(self.generation);
                }
                SearchIndex::handle(slot, request)
            }
            Search::Worker(_) => None,
        };
        if let Some(reply) = reply {
            self.apply_response(reply);
        }
    }

    /// Apply one worker response.  Responses for superseded tokens or an
    /// older catalog are dropped.
    fn apply_response(&mut self, response: WorkerResponse) -> bool {
        match response {
            WorkerResponse::IndexReady {
                generation,
                doc_count,
            } => {
                if generation == self.generation {
                    self.index_generation = Some(generation);
                }
                debug!("search index ready: generation {generation}, {doc_count} docs");
                false
            }
            WorkerResponse::Results {
                token,
                generation,
                indices,
            } => {
                if token != self.latest_token || generation != self.generation {
                    self.stale_dropped += 1;
                    debug!(
                        "dropped stale search response token {token} (latest {})",
                        self.latest_token
                    );
                    return false;
                }
                self.awaiting = None;
                let total = self.catalog.len();
                let view: Vec<u32> = indices
                    .into_iter()
                    .filter(|&i| (i as usize) < total)
                    .collect();
                debug!("search token {token}: {} results", view.len());
                self.view = Some(view);
                self.scroll_offset = 0.0;
                self.dirty = true;
                true
            }
            WorkerResponse::Error { token, message } => {
                warn!("search worker error: {message}");
                if token == Some(self.latest_token) {
                    self.awaiting = None;
                }
                false
            }
        }
    }

    fn show_all(&mut self) {
        if self.view.take().is_some() {
            self.scroll_offset = 0.0;
        }
        self.dirty = true;
    }

    fn catalog_index(&self, position: usize) -> Option<usize> {
        match &self.view {
            Some(view) => view.get(position).map(|&i| i as usize),
            None => (position < self.catalog.len()).then_some(position),
        }
    }

    fn item_height(&self) -> f32 {
        match self.viewport {
            Some(vp) if vp.item_height.is_finite() && vp.item_height > 0.0 => vp.item_height,
            _ => self.config.item_height.max(1.0),
        }
    }

    fn columns(&self) -> usize {
        self.viewport
            .map(|vp| vp.columns)
            .unwrap_or(self.config.columns)
            .max(1)
    }

    fn view_window(&self) -> Option<ViewWindow> {
        let vp = self.viewport?;
        let viewport_height = if vp.height.is_finite() && vp.height > 0.0 {
            vp.height
        } else {
            (self.config.screen_height - SCREEN_CHROME).max(MIN_FALLBACK_HEIGHT)
        };
        Some(ViewWindow {
            scroll_offset: self.scroll_offset,
            viewport_height,
            item_height: self.item_height(),
            columns: self.columns(),
            overscan: self.policy.overscan,
        })
    }

    fn apply_scroll(&mut self, offset: f32) {
        let offset = if offset.is_finite() { offset } else { 0.0 };
        let clamped = match self.view_window() {
            Some(win) => offset.clamp(0.0, win.max_scroll(self.view_len())),
            None => offset.max(0.0),
        };
        if clamped != self.scroll_offset {
            self.scroll_offset = clamped;
            self.dirty = true;
        }
    }

    fn retire_mounted(&mut self) {
        for (_, m) in std::mem::take(&mut self.mounted) {
            let id = self.catalog[m.catalog_index].id.clone();
            self.recycler.retire(id, m.element, &mut self.factory);
        }
        self.window = WindowRange::default();
    }

    fn clamp_scroll(&mut self) {
        let offset = self.scroll_offset;
        self.apply_scroll(offset);
    }

    /// Bring the mounted set in line with the current window.
    fn reconcile(&mut self) {
        let Some(win) = self.view_window() else {
            return;
        };
        let len = self.view_len();
        let (range, max_render) = match self.mode {
            RenderMode::Direct => {
                let ceiling = self.policy.ceiling;
                let range = WindowRange {
                    start: 0,
                    end: len.min(ceiling),
                    clamped: len > ceiling,
                };
                (range, ceiling)
            }
            RenderMode::Windowed | RenderMode::Extreme => {
                let max_render = win.max_render_items(self.policy.ceiling);
                (win.compute(len, max_render), max_render)
            }
        };

        if range.clamped {
            self.clamp_events += 1;
            if !self.was_clamped {
                warn!(
                    "render window clamped to {max_render} items ({} mode, {len} in view)",
                    self.mode.label()
                );
            }
        }
        self.was_clamped = range.clamped;
        self.window = range;
        self.max_render = max_render;

        let previous = std::mem::take(&mut self.mounted);
        for (position, m) in previous {
            if range.contains(position) && self.catalog_index(position) == Some(m.catalog_index) {
                self.mounted.insert(position, m);
            } else {
                let id = self.catalog[m.catalog_index].id.clone();
                self.recycler.retire(id, m.element, &mut self.factory);
            }
        }

        for position in range.start..range.end {
            if self.mounted.contains_key(&position) {
                continue;
            }
            let Some(index) = self.catalog_index(position) else {
                continue;
            };
            let record = &self.catalog[index];
            let (mut element, _) = self.recycler.acquire(&record.id, &mut self.factory);
            let item = ItemView::resolve(position, record, &self.callbacks);
            self.factory.update(&mut element, &item);
            self.mounted.insert(
                position,
                Mounted {
                    catalog_index: index,
                    element,
                },
            );
        }
    }
}
