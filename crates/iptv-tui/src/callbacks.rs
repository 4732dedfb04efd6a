//! Favorites, the active channel and group icons for the grid.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use iptv_core::render::ChannelCallbacks;
use iptv_proto::protocol::ChannelRecord;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct FavoritesFile {
    #[serde(default)]
    favorites: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct TuiCallbacks {
    favorites: BTreeSet<String>,
    active: Option<ChannelRecord>,
    dirty: bool,
}

impl TuiCallbacks {
    /// Read favorites from `path`; a missing or unreadable file starts empty.
    pub fn load(path: &Path) -> Self {
        let favorites = match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str::<FavoritesFile>(&text) {
                Ok(file) => file.favorites,
                Err(e) => {
                    warn!("ignoring {}: {}", path.display(), e);
                    BTreeSet::new()
                }
            },
            Err(_) => BTreeSet::new(),
        };
        Self {
            favorites,
            ..Self::default()
        }
    }

    /// Write favorites back if they changed since the last save.
    pub fn save(&mut self, path: &Path) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let file = FavoritesFile {
            favorites: self.favorites.clone(),
        };
        let text = toml::to_string_pretty(&file)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        self.dirty = false;
        Ok(())
    }

    pub fn active(&self) -> Option<&ChannelRecord> {
        self.active.as_ref()
    }

    pub fn favorite_count(&self) -> usize {
        self.favorites.len()
    }
}

impl ChannelCallbacks for TuiCallbacks {
    fn on_item_click(&mut self, record: &ChannelRecord) {
        info!("selected {} -> {}", record.name, record.url);
        self.active = Some(record.clone());
    }

    fn on_favorite_toggle(&mut self, record: &ChannelRecord) {
        if !self.favorites.remove(&record.id) {
            self.favorites.insert(record.id.clone());
        }
        self.dirty = true;
    }

    fn category_icon(&self, group: &str) -> String {
        let g = group.to_lowercase();
        let icon = if g.contains("news") {
            "N"
        } else if g.contains("sport") {
            "S"
        } else if g.contains("kid") || g.contains("cartoon") {
            "K"
        } else if g.contains("movie") || g.contains("cinema") {
            "M"
        } else if g.contains("music") {
            "♪"
        } else {
            "·"
        };
        icon.to_string()
    }

    fn is_favorite(&self, id: &str) -> bool {
        self.favorites.contains(id)
    }

    fn is_active(&self, id: &str) -> bool {
        self.active.as_ref().is_some_and(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(id: &str) -> ChannelRecord {
        ChannelRecord {
            id: id.into(),
            name: "BBC".into(),
            logo_url: String::new(),
            group: Arc::from("News"),
            url: "http://x/bbc".into(),
            country: None,
            language: None,
            tvg_id: None,
            catchup: None,
            duration_secs: None,
            quality: Default::default(),
        }
    }

    #[test]
    fn test_favorites_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("favorites.toml");

        let mut cb = TuiCallbacks::load(&path);
        cb.on_favorite_toggle(&record("ch_1"));
        cb.on_favorite_toggle(&record("ch_2"));
        cb.on_favorite_toggle(&record("ch_1"));
        cb.save(&path).unwrap();

        let cb = TuiCallbacks::load(&path);
        assert!(cb.is_favorite("ch_2"));
        assert!(!cb.is_favorite("ch_1"));
        assert_eq!(cb.favorite_count(), 1);
    }

    #[test]
    fn test_click_marks_active() {
        let mut cb = TuiCallbacks::default();
        cb.on_item_click(&record("ch_9"));
        assert!(cb.is_active("ch_9"));
        assert_eq!(cb.category_icon("World News"), "N");
    }
}
