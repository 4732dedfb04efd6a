//! Channel grid: the cells the render engine mounts, and how they are drawn.

use iptv_core::render::{ElementFactory, ItemView, Viewport};
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
    Frame,
};
use unicode_width::UnicodeWidthStr;

use crate::theme::{
    style_default, style_focused_border, style_muted, style_secondary, style_selected,
    style_unfocused_border, C_ACTIVE, C_BADGE, C_GROUP, C_STARS,
};

/// Terminal columns per cell, borders included.
pub const CELL_WIDTH: u16 = 30;
/// Terminal rows per cell, borders included.
pub const CELL_HEIGHT: u16 = 4;

/// A mounted grid cell.  Fields are filled by [`GridFactory::update`] and
/// wiped on release so a recycled cell never shows stale data.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GridCell {
    pub id: String,
    pub title: String,
    pub group: String,
    pub icon: String,
    pub badge: &'static str,
    pub has_logo: bool,
    pub favorite: bool,
    pub active: bool,
    pub blocked: bool,
}

#[derive(Debug, Default)]
pub struct GridFactory;

impl ElementFactory for GridFactory {
    type Element = GridCell;

    fn create(&mut self) -> GridCell {
        GridCell::default()
    }

    fn update(&mut self, cell: &mut GridCell, item: &ItemView<'_>) {
        let record = item.record;
        cell.id.clone_from(&record.id);
        cell.title.clone_from(&record.name);
        cell.group.clear();
        cell.group.push_str(&record.group);
        cell.icon.clone_from(&item.icon);
        cell.badge = record.quality.badge_label();
        cell.has_logo = item.logo_url.is_some();
        cell.favorite = item.favorite;
        cell.active = item.active;
        cell.blocked = item.blocked;
    }

    fn reset(&mut self, cell: &mut GridCell) {
        cell.id.clear();
        cell.title.clear();
        cell.group.clear();
        cell.icon.clear();
        cell.badge = "";
        cell.has_logo = false;
        cell.favorite = false;
        cell.active = false;
        cell.blocked = false;
    }
}

/// Engine viewport for a grid drawn into `area`, in terminal cells.
pub fn viewport_for(area: Rect) -> Viewport {
    Viewport {
        width: f32::from(area.width),
        height: f32::from(area.height),
        item_height: f32::from(CELL_HEIGHT),
        columns: usize::from((area.width / CELL_WIDTH).max(1)),
    }
}

/// Screen rectangle of the cell at view `position`, or `None` if it falls
/// outside `area` at the current scroll offset.
pub fn cell_rect(area: Rect, position: usize, columns: usize, scroll_offset: f32) -> Option<Rect> {
    let columns = columns.max(1);
    let row = position / columns;
    let col = position % columns;
    let top = row as f32 * f32::from(CELL_HEIGHT) - scroll_offset;
    if top < 0.0 || top + f32::from(CELL_HEIGHT) > f32::from(area.height) {
        return None;
    }
    let x = area.x + (col as u16).saturating_mul(CELL_WIDTH);
    if x + CELL_WIDTH > area.x + area.width {
        return None;
    }
    Some(Rect {
        x,
        y: area.y + top as u16,
        width: CELL_WIDTH,
        height: CELL_HEIGHT,
    })
}

/// View position under the terminal cell (`x`, `y`), if any.
pub fn position_at(area: Rect, x: u16, y: u16, columns: usize, scroll_offset: f32) -> Option<usize> {
    if x < area.x || y < area.y || x >= area.x + area.width || y >= area.y + area.height {
        return None;
    }
    let col = usize::from((x - area.x) / CELL_WIDTH);
    if col >= columns {
        return None;
    }
    let row = ((f32::from(y - area.y) + scroll_offset) / f32::from(CELL_HEIGHT)).floor() as usize;
    Some(row * columns + col)
}

fn truncate(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
}

/// Draw one mounted cell.
pub fn draw_cell(frame: &mut Frame, rect: Rect, cell: &GridCell, selected: bool) {
    let border = if selected {
        style_focused_border()
    } else {
        style_unfocused_border()
    };
    let inner_width = usize::from(rect.width.saturating_sub(2));

    let mut title = vec![];
    if cell.active {
        title.push(Span::styled("▶ ", Style::default().fg(C_ACTIVE)));
    }
    if cell.favorite {
        title.push(Span::styled("★ ", Style::default().fg(C_STARS)));
    }
    let name_style = if cell.blocked {
        style_muted().add_modifier(Modifier::CROSSED_OUT)
    } else if selected {
        style_selected()
    } else {
        style_default()
    };
    let used: usize = title.iter().map(|s| s.content.width()).sum();
    title.push(Span::styled(
        truncate(&cell.title, inner_width.saturating_sub(used)),
        name_style,
    ));

    let logo = if cell.has_logo { "▣" } else { "□" };
    let group_width = inner_width.saturating_sub(cell.badge.len() + cell.icon.width() + 5);
    let detail = Line::from(vec![
        Span::styled(format!("{logo} "), style_secondary()),
        Span::styled(format!("{} ", cell.icon), Style::default().fg(C_GROUP)),
        Span::styled(truncate(&cell.group, group_width), Style::default().fg(C_GROUP)),
        Span::raw(" "),
        Span::styled(cell.badge, Style::default().fg(C_BADGE)),
    ]);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(border);
    let paragraph = Paragraph::new(vec![Line::from(title), detail]).block(block);
    frame.render_widget(paragraph, rect);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_fits_whole_cells() {
        let vp = viewport_for(Rect::new(0, 0, 100, 40));
        assert_eq!(vp.columns, 3);
        assert_eq!(vp.item_height, 4.0);
        assert_eq!(viewport_for(Rect::new(0, 0, 10, 5)).columns, 1);
    }

    #[test]
    fn test_cell_rect_and_hit_test_agree() {
        let area = Rect::new(2, 1, 90, 20);
        let rect = cell_rect(area, 4, 3, 4.0).unwrap();
        assert_eq!((rect.x, rect.y), (2 + CELL_WIDTH, 1));
        assert_eq!(position_at(area, rect.x + 1, rect.y + 1, 3, 4.0), Some(4));
        // Row 0 is scrolled out.
        assert_eq!(cell_rect(area, 0, 3, 4.0), None);
    }

    #[test]
    fn test_truncate_marks_cut() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long channel name", 8), "a long …");
    }
}
