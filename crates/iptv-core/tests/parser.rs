use iptv_core::parser::{M3uParser, ParseError, ParseStrategy};
use iptv_proto::config::ParserConfig;
use iptv_proto::protocol::ALLOWED_SCHEMES;
use proptest::prelude::*;

fn parser() -> M3uParser {
    M3uParser::new(ParserConfig::default())
}

#[test]
fn test_header_entry_and_resource() {
    let mut p = parser();
    let records = p.parse("#EXTM3U\n#EXTINF:-1 group-title=\"News\",BBC\nhttp://x/bbc.m3u8\n");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "BBC");
    assert_eq!(&*records[0].group, "News");
    assert_eq!(records[0].url, "http://x/bbc.m3u8");
}

#[test]
fn test_ftp_resource_yields_nothing() {
    let mut p = parser();
    let records = p.parse("#EXTM3U\n#EXTINF:-1 group-title=\"News\",BBC\nftp://x/bbc.m3u8\n");
    assert!(records.is_empty());
    assert_eq!(p.diagnostics().invalid_urls, 1);
}

#[test]
fn test_non_utf8_bytes_are_rejected() {
    let mut p = parser();
    let err = p.parse_bytes(&[b'#', b'E', 0xff, 0xfe, b'\n']).unwrap_err();
    assert!(matches!(err, ParseError::NotText { offset: 2 }));
    assert!(p.parse_bytes(b"").unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_large_input_goes_to_worker() {
    let config = ParserConfig {
        chunked_threshold_bytes: 64,
        worker_threshold_bytes: 1024,
        ..ParserConfig::default()
    };
    let mut p = M3uParser::new(config);
    let mut text = String::from("#EXTM3U\n");
    for i in 0..100 {
        text.push_str(&format!(
            "#EXTINF:-1 group-title=\"G{}\",Ch {i}\nhttp://x/{i}\n",
            i % 5
        ));
    }
    let records = p.parse_adaptive(text.into()).await;
    assert_eq!(records.len(), 100);
    assert_eq!(p.diagnostics().strategy, ParseStrategy::Worker);
    assert_eq!(p.groups().len(), 5);
}

fn entry() -> impl Strategy<Value = (String, Option<String>, &'static str)> {
    (
        "[A-Za-z0-9 ]{0,12}",
        proptest::option::of("[A-Za-z]{1,8}"),
        prop::sample::select(vec!["http", "https", "rtmp", "udp", "rtp", "rtmps", "ftp", "file"]),
    )
}

proptest! {
    #[test]
    fn prop_parse_never_panics(text in "\\PC*") {
        let mut p = parser();
        let _ = p.parse(&text);
    }

    #[test]
    fn prop_records_are_always_valid(entries in proptest::collection::vec(entry(), 0..40)) {
        let mut text = String::from("#EXTM3U\n");
        let mut expected = 0;
        for (i, (name, group, scheme)) in entries.iter().enumerate() {
            match group {
                Some(g) => text.push_str(&format!("#EXTINF:-1 group-title=\"{g}\",{name}\n")),
                None => text.push_str(&format!("#EXTINF:-1,{name}\n")),
            }
            text.push_str(&format!("{scheme}://host/{i}\n"));
            if ALLOWED_SCHEMES.contains(scheme) {
                expected += 1;
            }
        }

        let mut p = parser();
        let records = p.parse(&text);
        prop_assert_eq!(records.len(), expected);
        for r in &records {
            prop_assert!(!r.name.trim().is_empty());
            prop_assert!(!r.group.is_empty());
            let scheme = r.url.split("://").next().unwrap_or_default();
            prop_assert!(ALLOWED_SCHEMES.contains(&scheme));
        }
    }
}
