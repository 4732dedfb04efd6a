//! Key layout for catalog data.

pub fn channels(playlist_id: &str) -> String {
    format!("channels_{playlist_id}")
}

pub fn playlist(playlist_id: &str) -> String {
    format!("playlist_{playlist_id}")
}

pub fn channel(channel_id: &str) -> String {
    format!("channel_{channel_id}")
}

pub fn logo(url: &str) -> String {
    format!("logo_{url}")
}

/// Queries are normalized so "BBC " and "bbc" share an entry.
pub fn search(playlist_id: &str, query: &str) -> String {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("search_{playlist_id}_{}", normalized.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_key_normalizes_query() {
        assert_eq!(search("pl", "  BBC   One "), "search_pl_bbc one");
        assert_eq!(channels("pl"), "channels_pl");
        assert_eq!(logo("http://l/x.png"), "logo_http://l/x.png");
    }
}
