//! What the engine needs from the UI that draws it.

use iptv_proto::protocol::ChannelRecord;

/// Decisions and reactions the UI owns.  Every method has a neutral default,
/// so a UI only overrides what it cares about.
pub trait ChannelCallbacks {
    fn on_item_click(&mut self, _record: &ChannelRecord) {}

    fn on_favorite_toggle(&mut self, _record: &ChannelRecord) {}

    /// The logo locator to show, or `None` to show the placeholder.
    fn validate_logo_url(&self, url: &str) -> Option<String> {
        let (scheme, rest) = url.split_once("://")?;
        let fetchable = scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https");
        (fetchable && !rest.is_empty()).then(|| url.to_string())
    }

    /// Short icon token for a group, e.g. an emoji or a glyph name.
    fn category_icon(&self, _group: &str) -> String {
        String::new()
    }

    fn is_favorite(&self, _id: &str) -> bool {
        false
    }

    fn is_blocked(&self, _record: &ChannelRecord) -> bool {
        false
    }

    fn is_active(&self, _id: &str) -> bool {
        false
    }
}

/// Callbacks that do nothing; for tests and headless use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl ChannelCallbacks for NoopCallbacks {}

/// Everything an element needs to draw one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemView<'a> {
    /// Position in the current (possibly filtered) view.
    pub position: usize,
    pub record: &'a ChannelRecord,
    pub logo_url: Option<String>,
    pub icon: String,
    pub favorite: bool,
    pub blocked: bool,
    pub active: bool,
}

impl<'a> ItemView<'a> {
    pub fn resolve<C: ChannelCallbacks + ?Sized>(
        position: usize,
        record: &'a ChannelRecord,
        callbacks: &C,
    ) -> Self {
        Self {
            position,
            record,
            logo_url: if record.has_logo() {
                callbacks.validate_logo_url(&record.logo_url)
            } else {
                None
            },
            icon: callbacks.category_icon(&record.group),
            favorite: callbacks.is_favorite(&record.id),
            blocked: callbacks.is_blocked(record),
            active: callbacks.is_active(&record.id),
        }
    }
}

/// Creates and refreshes visual elements.  The engine never looks inside an
/// element; it only decides which ones exist and which record each shows.
pub trait ElementFactory {
    type Element;

    fn create(&mut self) -> Self::Element;

    fn update(&mut self, element: &mut Self::Element, item: &ItemView<'_>);

    /// Clear an element before it goes back to the free pool.
    fn reset(&mut self, element: &mut Self::Element);
}
