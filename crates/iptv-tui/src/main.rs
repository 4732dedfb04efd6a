mod app;
mod callbacks;
mod theme;
mod widgets;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use iptv_core::cache::{CacheManager, FsBlobStore};
use iptv_core::render::RenderEngine;
use iptv_core::Orchestrator;
use iptv_proto::config::Config;

use crate::callbacks::TuiCallbacks;
use crate::widgets::channel_grid::GridFactory;

/// Terminal browser for large IPTV playlists.
#[derive(Debug, Parser)]
#[command(name = "iptv", version)]
struct Args {
    /// M3U playlist to import.  Without it the cached catalog is shown.
    playlist: Option<PathBuf>,

    /// Cache id of the playlist (defaults to the file stem).
    #[arg(long)]
    id: Option<String>,

    /// Give up reading the playlist after this many seconds and use the cache.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

impl Args {
    fn playlist_id(&self) -> String {
        self.id
            .clone()
            .or_else(|| {
                self.playlist
                    .as_ref()
                    .and_then(|p| p.file_stem())
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "default".to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load().unwrap_or_default();

    let data_dir = config.paths.data_dir.clone();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let log_path = data_dir.join("iptv.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    let log_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,iptv_core=debug".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("iptv log: {}", log_path.display());
    tracing::info!("iptv starting…");

    let cache_dir = &config.paths.cache_dir;
    let cache = CacheManager::open(
        config.cache.clone(),
        FsBlobStore::new(cache_dir.join("kv")),
        FsBlobStore::new(cache_dir.join("blobs")),
    )
    .await;

    let favorites_path = data_dir.join("favorites.toml");
    let callbacks = TuiCallbacks::load(&favorites_path);
    let engine = RenderEngine::new(config.render.clone(), GridFactory, callbacks);
    let mut orchestrator = Orchestrator::new(config.parser.clone(), cache, engine);

    let playlist_id = args.playlist_id();
    let loaded = match &args.playlist {
        Some(path) => {
            let path = path.clone();
            let report = orchestrator
                .refresh_with_timeout(
                    &playlist_id,
                    &iptv_core::retry::RetryPolicy::default(),
                    Duration::from_secs(args.timeout),
                    move |_| tokio::fs::read_to_string(path.clone()),
                )
                .await?;
            tracing::info!(
                "{} channels ({:?}, {} attempts)",
                report.records,
                report.source,
                report.attempts
            );
            format!("{} channels ({:?})", report.records, report.source)
        }
        None => match orchestrator.load_cached(&playlist_id).await {
            Some(n) => format!("{n} cached channels"),
            None => format!("nothing cached for {playlist_id}"),
        },
    };

    let app = app::App::new(orchestrator, playlist_id, favorites_path, loaded);
    app.run().await?;

    Ok(())
}
