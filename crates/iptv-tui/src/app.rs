//! App: the terminal event loop around the catalog orchestrator.
//!
//! - A blocking task reads terminal events and forwards them over `mpsc`.
//! - A fast tick drives the render engine (`frame`) so throttled scrolls and
//!   background search results land without user input.
//! - A slow tick sweeps expired cache entries.

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use iptv_core::cache::FsBlobStore;
use iptv_core::render::ChannelCallbacks;
use iptv_core::Orchestrator;
use ratatui::crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    widgets::Paragraph,
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::callbacks::TuiCallbacks;
use crate::theme::style_muted;
use crate::widgets::{
    channel_grid::{self, GridFactory, CELL_HEIGHT},
    filter_input::{FilterAction, FilterInput},
    status_bar::{self, InputMode},
};

pub type Catalog = Orchestrator<FsBlobStore, FsBlobStore, GridFactory, TuiCallbacks>;

const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const PURGE_INTERVAL: Duration = Duration::from_secs(300);
const NOTICE_TTL: Duration = Duration::from_secs(4);

struct Areas {
    filter: Rect,
    separator: Rect,
    grid: Rect,
    info: Rect,
    keys: Rect,
}

fn split(area: Rect) -> Areas {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(area);
    Areas {
        filter: rows[0],
        separator: rows[1],
        grid: rows[2],
        info: rows[3],
        keys: rows[4],
    }
}

pub struct App {
    catalog: Catalog,
    playlist_id: String,
    favorites_path: PathBuf,
    filter: FilterInput,
    mode: InputMode,
    selected: usize,
    groups: Vec<String>,
    group: Option<usize>,
    grid: Rect,
    notice: Option<(String, Instant)>,
    should_quit: bool,
}

impl App {
    pub fn new(catalog: Catalog, playlist_id: String, favorites_path: PathBuf, loaded: String) -> Self {
        let groups: BTreeSet<String> = catalog
            .engine()
            .catalog()
            .iter()
            .map(|r| r.group.to_string())
            .collect();
        Self {
            catalog,
            playlist_id,
            favorites_path,
            filter: FilterInput::default(),
            mode: InputMode::Normal,
            selected: 0,
            groups: groups.into_iter().collect(),
            group: None,
            grid: Rect::default(),
            notice: Some((loaded, Instant::now())),
            should_quit: false,
        }
    }

    // ── Main run loop ─────────────────────────────────────────────────────────

    pub async fn run(mut self) -> anyhow::Result<()> {
        debug!("run(): enabling raw mode");
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let size = terminal.size()?;
        self.grid = split(Rect::new(0, 0, size.width, size.height)).grid;
        self.catalog
            .engine_mut()
            .attach(channel_grid::viewport_for(self.grid));
        info!("{}: grid {}x{}", self.playlist_id, self.grid.width, self.grid.height);

        // ── Background task: keyboard/mouse events ────────────────────────────
        let (tx, mut rx) = mpsc::channel::<Event>(1024);
        tokio::task::spawn_blocking(move || loop {
            match event::read() {
                Ok(ev) => {
                    if tx.blocking_send(ev).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });

        let mut frame_tick = tokio::time::interval(FRAME_INTERVAL);
        frame_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut purge_tick = tokio::time::interval(PURGE_INTERVAL);
        purge_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        purge_tick.tick().await;

        // ── Main loop ─────────────────────────────────────────────────────────
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal.draw(|f| self.draw(f))?;
            }
            needs_redraw = false;

            if self.should_quit {
                break;
            }

            tokio::select! {
                Some(ev) = rx.recv() => {
                    self.handle_event(ev)?;
                    while let Ok(next) = rx.try_recv() {
                        self.handle_event(next)?;
                    }
                    needs_redraw = true;
                }

                _ = frame_tick.tick() => {
                    let engine = self.catalog.engine_mut();
                    needs_redraw = engine.frame()?;
                    let len = engine.view_len();
                    if self.selected >= len {
                        self.selected = len.saturating_sub(1);
                    }
                    if self.notice.as_ref().is_some_and(|(_, at)| at.elapsed() > NOTICE_TTL) {
                        self.notice = None;
                        needs_redraw = true;
                    }
                }

                _ = purge_tick.tick() => {
                    let removed = self.catalog.cache_mut().purge_expired().await;
                    if removed > 0 {
                        debug!("purged {} expired cache entries", removed);
                    }
                }
            }
        }

        // ── Teardown ──────────────────────────────────────────────────────────
        if let Err(e) = self.catalog.engine_mut().callbacks_mut().save(&self.favorites_path) {
            warn!("saving favorites failed: {:#}", e);
        }
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
        terminal.show_cursor()?;
        info!("iptv exiting");
        Ok(())
    }

    // ── Input ─────────────────────────────────────────────────────────────────

    fn handle_event(&mut self, ev: Event) -> anyhow::Result<()> {
        match ev {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                if self.filter.is_active() {
                    self.handle_filter_key(key)?;
                } else {
                    self.handle_key(key)?;
                }
            }
            Event::Mouse(mouse) => self.handle_mouse(mouse)?,
            Event::Resize(w, h) => {
                self.grid = split(Rect::new(0, 0, w, h)).grid;
                self.catalog
                    .engine_mut()
                    .on_resize(channel_grid::viewport_for(self.grid))?;
                self.catalog.engine_mut().scroll_to_index(self.selected)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_filter_key(&mut self, key: KeyEvent) -> anyhow::Result<()> {
        match self.filter.handle_key(key) {
            FilterAction::Changed(text) => {
                self.group = None;
                self.catalog.engine_mut().search(&text)?;
                self.jump_to(0)?;
            }
            FilterAction::Confirmed | FilterAction::Cancelled => self.mode = InputMode::Normal,
            FilterAction::None => {}
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) -> anyhow::Result<()> {
        let columns = self.columns() as isize;
        let page = (self.grid.height / CELL_HEIGHT).max(1) as isize * columns;
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true
            }
            KeyCode::Up | KeyCode::Char('k') => self.move_by(-columns)?,
            KeyCode::Down | KeyCode::Char('j') => self.move_by(columns)?,
            KeyCode::Left | KeyCode::Char('h') => self.move_by(-1)?,
            KeyCode::Right | KeyCode::Char('l') => self.move_by(1)?,
            KeyCode::PageUp => self.move_by(-page)?,
            KeyCode::PageDown => self.move_by(page)?,
            KeyCode::Home => self.jump_to(0)?,
            KeyCode::End => {
                let last = self.catalog.engine().view_len().saturating_sub(1);
                self.jump_to(last)?;
            }
            KeyCode::Enter => self.activate(self.selected)?,
            KeyCode::Char('f') => {
                let engine = self.catalog.engine_mut();
                let Some((id, name)) = engine
                    .record_at(self.selected)
                    .map(|r| (r.id.clone(), r.name.clone()))
                else {
                    return Ok(());
                };
                engine.toggle_favorite(self.selected)?;
                let star = if engine.callbacks().is_favorite(&id) { '★' } else { '☆' };
                self.notify(format!("{star} {name}"));
            }
            KeyCode::Char('/') => {
                self.filter.activate();
                self.mode = InputMode::Filter;
            }
            KeyCode::Char('g') => self.next_group()?,
            KeyCode::Esc => {
                self.filter.clear();
                self.group = None;
                self.catalog.engine_mut().clear_filter();
                self.jump_to(0)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) -> anyhow::Result<()> {
        let step = f32::from(CELL_HEIGHT);
        let engine = self.catalog.engine_mut();
        match mouse.kind {
            MouseEventKind::ScrollDown => {
                let offset = engine.scroll_offset() + step;
                engine.on_scroll(offset)?;
            }
            MouseEventKind::ScrollUp => {
                let offset = (engine.scroll_offset() - step).max(0.0);
                engine.on_scroll(offset)?;
            }
            MouseEventKind::Down(MouseButton::Left) => {
                let hit = channel_grid::position_at(
                    self.grid,
                    mouse.column,
                    mouse.row,
                    self.columns(),
                    self.catalog.engine().scroll_offset(),
                );
                if let Some(position) = hit.filter(|&p| p < self.catalog.engine().view_len()) {
                    self.selected = position;
                    self.activate(position)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ── Actions ───────────────────────────────────────────────────────────────

    fn columns(&self) -> usize {
        self.catalog
            .engine()
            .viewport()
            .map(|vp| vp.columns)
            .unwrap_or(1)
            .max(1)
    }

    fn move_by(&mut self, delta: isize) -> anyhow::Result<()> {
        let len = self.catalog.engine().view_len();
        if len == 0 {
            return Ok(());
        }
        let target = (self.selected as isize + delta).clamp(0, len as isize - 1) as usize;
        self.jump_to(target)
    }

    fn jump_to(&mut self, position: usize) -> anyhow::Result<()> {
        self.selected = position;
        self.catalog.engine_mut().scroll_to_index(position)?;
        Ok(())
    }

    fn activate(&mut self, position: usize) -> anyhow::Result<()> {
        let engine = self.catalog.engine_mut();
        if engine.click(position)? {
            engine.refresh_mounted();
            if let Some(r) = engine.callbacks().active() {
                let msg = format!("▶ {}  {}", r.name, r.url);
                self.notify(msg);
            }
        }
        Ok(())
    }

    /// Cycle the group filter through every group, then back to all channels.
    fn next_group(&mut self) -> anyhow::Result<()> {
        if self.groups.is_empty() {
            return Ok(());
        }
        let next = match self.group {
            None => Some(0),
            Some(i) if i + 1 < self.groups.len() => Some(i + 1),
            Some(_) => None,
        };
        self.group = next;
        self.filter.clear();
        match next {
            Some(i) => {
                self.catalog.engine_mut().filter_by_group(&self.groups[i])?;
            }
            None => self.catalog.engine_mut().clear_filter(),
        }
        self.jump_to(0)
    }

    fn notify(&mut self, message: String) {
        self.notice = Some((message, Instant::now()));
    }

    // ── Drawing ───────────────────────────────────────────────────────────────

    fn draw(&self, frame: &mut Frame) {
        let areas = split(frame.area());
        self.filter.draw(frame, areas.filter);
        status_bar::draw_separator(frame, areas.separator);

        let engine = self.catalog.engine();
        if engine.view_len() == 0 {
            let empty = if engine.catalog().is_empty() {
                "no channels loaded".to_string()
            } else if !self.filter.text().is_empty() {
                format!("no matches for \"{}\"", self.filter.text())
            } else {
                "no matches".to_string()
            };
            frame.render_widget(
                Paragraph::new(empty)
                    .style(style_muted())
                    .alignment(Alignment::Center),
                areas.grid,
            );
        } else {
            let columns = self.columns();
            let offset = engine.scroll_offset();
            for (position, cell) in engine.mounted() {
                if let Some(rect) = channel_grid::cell_rect(areas.grid, position, columns, offset) {
                    channel_grid::draw_cell(frame, rect, cell, position == self.selected);
                }
            }
        }

        let group = self.group.map(|i| self.groups[i].as_str());
        let summary = format!(
            "{} · {} ★",
            status_bar::diagnostics_line(&engine.diagnostics(), group),
            engine.callbacks().favorite_count()
        );
        let notice = self.notice.as_ref().map(|(m, _)| m.as_str());
        status_bar::draw_info_bar(frame, areas.info, &summary, notice);
        status_bar::draw_keys_bar(frame, areas.keys, self.mode);
    }
}
