//! Windowing math: which item indices intersect the viewport.

use serde::Serialize;

/// Scroll and layout state of a grid viewport.  All lengths share one unit
/// (pixels for a GUI, terminal rows for the TUI).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewWindow {
    pub scroll_offset: f32,
    pub viewport_height: f32,
    pub item_height: f32,
    pub columns: usize,
    pub overscan: usize,
}

/// Half-open range `[start, end)` of item indices to materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WindowRange {
    pub start: usize,
    pub end: usize,
    /// Set when the range was cut down to the render ceiling.
    pub clamped: bool,
}

impl WindowRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }
}

impl ViewWindow {
    fn item_height(&self) -> f32 {
        if self.item_height.is_finite() && self.item_height > 0.0 {
            self.item_height
        } else {
            1.0
        }
    }

    fn columns(&self) -> usize {
        self.columns.max(1)
    }

    /// Whole rows that fit the viewport, at least one.
    pub fn visible_rows(&self) -> usize {
        let height = if self.viewport_height.is_finite() {
            self.viewport_height.max(0.0)
        } else {
            0.0
        };
        ((height / self.item_height()).ceil() as usize).max(1)
    }

    pub fn total_rows(&self, total: usize) -> usize {
        total.div_ceil(self.columns())
    }

    pub fn content_height(&self, total: usize) -> f32 {
        self.total_rows(total) as f32 * self.item_height()
    }

    /// Largest useful scroll offset for `total` items.
    pub fn max_scroll(&self, total: usize) -> f32 {
        let rows = self.total_rows(total).saturating_sub(self.visible_rows());
        rows as f32 * self.item_height()
    }

    pub fn offset_for_index(&self, index: usize) -> f32 {
        (index / self.columns()) as f32 * self.item_height()
    }

    /// Visible rows times columns plus the overscan buffer, capped at
    /// `ceiling`.
    pub fn max_render_items(&self, ceiling: usize) -> usize {
        let rows = self
            .visible_rows()
            .saturating_add(self.overscan.saturating_mul(2));
        rows.saturating_mul(self.columns()).min(ceiling)
    }

    /// Item range for the current scroll position.  Never longer than
    /// `max_render`; a longer window is truncated from the end.
    pub fn compute(&self, total: usize, max_render: usize) -> WindowRange {
        if total == 0 {
            return WindowRange::default();
        }
        let columns = self.columns();
        let offset = if self.scroll_offset.is_finite() {
            self.scroll_offset.max(0.0)
        } else {
            0.0
        };
        let visible_rows = self.visible_rows();
        let total_rows = self.total_rows(total);

        // Past the end shows the last page.
        let first_row = ((offset / self.item_height()).floor() as usize)
            .min(total_rows.saturating_sub(visible_rows));
        let start_row = first_row.saturating_sub(self.overscan);
        let end_row = first_row
            .saturating_add(visible_rows)
            .saturating_add(self.overscan);

        let start = (start_row * columns).min(total);
        let mut end = end_row.saturating_mul(columns).min(total);
        let mut clamped = false;
        if end - start > max_render {
            end = start + max_render;
            clamped = true;
        }
        WindowRange {
            start,
            end,
            clamped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(offset: f32) -> ViewWindow {
        ViewWindow {
            scroll_offset: offset,
            viewport_height: 600.0,
            item_height: 100.0,
            columns: 4,
            overscan: 2,
        }
    }

    #[test]
    fn test_top_of_list() {
        let w = window(0.0);
        let r = w.compute(1000, 1000);
        assert_eq!(r.start, 0);
        // 6 visible rows + 2 overscan below
        assert_eq!(r.end, 8 * 4);
        assert!(!r.clamped);
    }

    #[test]
    fn test_middle_has_overscan_both_sides() {
        let w = window(1050.0);
        let r = w.compute(1000, 1000);
        // first row 10, overscan 2
        assert_eq!(r.start, 8 * 4);
        assert_eq!(r.end, 18 * 4);
    }

    #[test]
    fn test_scroll_past_end_shows_last_page() {
        let w = window(1.0e9);
        let r = w.compute(100, 1000);
        assert_eq!(r.end, 100);
        assert!(r.start < 100);
    }

    #[test]
    fn test_truncated_from_end_at_ceiling() {
        let w = window(0.0);
        let r = w.compute(1000, 10);
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 10);
        assert!(r.clamped);
    }

    #[test]
    fn test_max_render_items() {
        let w = window(0.0);
        assert_eq!(w.max_render_items(10_000), (6 + 4) * 4);
        assert_eq!(w.max_render_items(12), 12);
    }

    #[test]
    fn test_degenerate_inputs() {
        let w = ViewWindow {
            scroll_offset: f32::NAN,
            viewport_height: f32::INFINITY,
            item_height: 0.0,
            columns: 0,
            overscan: 0,
        };
        let r = w.compute(10, 5);
        assert!(r.start <= r.end && r.end <= 10);
        assert!(r.len() <= 5);
        assert_eq!(w.compute(0, 5), WindowRange::default());
    }
}
