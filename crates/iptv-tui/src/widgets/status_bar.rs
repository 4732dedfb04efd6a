//! Status bar: input mode, engine diagnostics and keybindings.

use iptv_core::render::EngineDiagnostics;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::theme::{C_ACCENT, C_MODE_FILTER, C_MODE_NORMAL, C_MUTED, C_SECONDARY, C_SEPARATOR};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputMode {
    Normal,
    Filter,
}

impl InputMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "BROWSE",
            Self::Filter => "SEARCH",
        }
    }

    pub fn color(self) -> ratatui::style::Color {
        match self {
            Self::Normal => C_MODE_NORMAL,
            Self::Filter => C_MODE_FILTER,
        }
    }
}

/// One-line summary of the engine state.
pub fn diagnostics_line(d: &EngineDiagnostics, group: Option<&str>) -> String {
    let mut line = format!(
        "{} · {}/{} channels · {} mounted (max {}) · {} pooled",
        d.mode.label(),
        d.view_len,
        d.total,
        d.mounted,
        d.max_render_items,
        d.pooled,
    );
    if let Some(g) = group {
        line.push_str(&format!(" · group {g}"));
    }
    if d.clamp_events > 0 {
        line.push_str(&format!(" · {} clamps", d.clamp_events));
    }
    line
}

pub fn draw_info_bar(frame: &mut Frame, area: Rect, summary: &str, notice: Option<&str>) {
    let mut spans = vec![Span::styled(summary, Style::default().fg(C_SECONDARY))];
    if let Some(n) = notice {
        spans.push(Span::styled("  ", Style::default()));
        spans.push(Span::styled(n, Style::default().fg(C_ACCENT)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Draw a horizontal separator line.
pub fn draw_separator(frame: &mut Frame, area: Rect) {
    let line = Line::from(Span::styled(
        "─".repeat(area.width as usize),
        Style::default().fg(C_SEPARATOR),
    ));
    frame.render_widget(Paragraph::new(line), area);
}

/// Draw the keybindings footer bar (one row).
pub fn draw_keys_bar(frame: &mut Frame, area: Rect, mode: InputMode) {
    let keys = match mode {
        InputMode::Normal => {
            " ←↓↑→/hjkl move  PgUp/PgDn page  Enter select  f favorite  / search  g next group  Esc clear  q quit"
        }
        InputMode::Filter => " type to search  Enter keep  Esc clear+close",
    };
    let line = Line::from(vec![
        Span::styled(
            format!(" {} ", mode.label()),
            Style::default()
                .fg(mode.color())
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(keys, Style::default().fg(C_MUTED)),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use iptv_core::render::RenderMode;

    #[test]
    fn test_diagnostics_line_mentions_mode_and_counts() {
        let d = EngineDiagnostics {
            mode: RenderMode::Extreme,
            total: 20_000,
            view_len: 20_000,
            mounted: 200,
            max_render_items: 200,
            clamp_events: 1,
            ..EngineDiagnostics::default()
        };
        let line = diagnostics_line(&d, Some("Sports"));
        assert!(line.starts_with(RenderMode::Extreme.label()));
        assert!(line.contains("20000/20000"));
        assert!(line.contains("group Sports"));
        assert!(line.contains("1 clamps"));
    }
}
