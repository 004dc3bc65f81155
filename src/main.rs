//! Playflow 命令行入口
//!
//! 用法：`playflow <playlist.json> [style] [method] [intent]`
//!
//! playlist.json 形如 `{"playlist_id": "...", "tracks": [{"id": "...", "name": "...", "artist": "..."}]}`，
//! 载入内存歌单后执行一次重排任务，结束时打印任务终态与重排后的顺序（JSON）。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;

use playflow::config::{load_config, JobStoreKind, JobsSection};
use playflow::core::TaskScheduler;
use playflow::jobs::{FileJobStore, InMemoryJobStore, JobManager, JobRunner, JobStore};
use playflow::llm::create_llm_from_config;
use playflow::metadata::LlmTrackAnalyzer;
use playflow::observability;
use playflow::oracle::LlmOracle;
use playflow::playlist::memory::InMemoryPlaylistClient;
use playflow::reorder::{PlaylistOrderer, ReorderMethod, ReorderStyle, StyleSpec, Track};

#[derive(Debug, Deserialize)]
struct PlaylistFile {
    playlist_id: String,
    tracks: Vec<Track>,
}

async fn open_store(cfg: &JobsSection) -> anyhow::Result<Arc<dyn JobStore>> {
    Ok(match cfg.store {
        JobStoreKind::Memory => Arc::new(InMemoryJobStore::new()),
        JobStoreKind::File => Arc::new(
            FileJobStore::open(&cfg.path)
                .await
                .with_context(|| format!("cannot open job store at {}", cfg.path.display()))?,
        ),
        #[cfg(feature = "async-sqlite")]
        JobStoreKind::Sqlite => Arc::new(
            playflow::jobs::SqliteJobStore::open(&cfg.path)
                .await
                .with_context(|| format!("cannot open sqlite job store at {}", cfg.path.display()))?,
        ),
        #[cfg(not(feature = "async-sqlite"))]
        JobStoreKind::Sqlite => bail!("sqlite job store requires the async-sqlite feature"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let Some(input) = args.next().map(PathBuf::from) else {
        bail!("usage: playflow <playlist.json> [style] [method] [intent]");
    };
    let style: ReorderStyle = args
        .next()
        .as_deref()
        .unwrap_or("narrative_arc")
        .parse()
        .map_err(anyhow::Error::msg)?;
    let method: ReorderMethod = args
        .next()
        .as_deref()
        .unwrap_or("auto")
        .parse()
        .map_err(anyhow::Error::msg)?;
    let mut spec = StyleSpec::new(style);
    if let Some(intent) = args.next() {
        spec = spec.with_intent(intent);
    }

    let cfg = load_config(None).context("failed to load configuration")?;

    let raw = tokio::fs::read(&input)
        .await
        .with_context(|| format!("cannot read {}", input.display()))?;
    let playlist: PlaylistFile = serde_json::from_slice(&raw).context("invalid playlist file")?;
    tracing::info!(
        playlist_id = %playlist.playlist_id,
        tracks = playlist.tracks.len(),
        style = %style,
        "loaded playlist"
    );

    let playlists = Arc::new(InMemoryPlaylistClient::new());
    playlists.insert(playlist.playlist_id.clone(), playlist.tracks);

    let llm = create_llm_from_config(&cfg.llm);
    let settings = cfg.reorder.orderer_settings();
    let oracle = Arc::new(LlmOracle::new(llm.clone()).with_timeout(settings.oracle_timeout));
    let orderer = PlaylistOrderer::new(
        oracle,
        TaskScheduler::new(cfg.reorder.max_concurrent_oracle_calls),
        settings,
    );
    let mut runner = JobRunner::new(playlists.clone(), orderer, cfg.remote.remote_settings())
        .with_enrich_settings(cfg.metadata.enrich_settings());
    if cfg.metadata.analyze_with_llm {
        runner = runner.with_fetcher(Arc::new(LlmTrackAnalyzer::new(llm)));
    }

    let store = open_store(&cfg.jobs).await?;
    let manager = JobManager::new(runner, store);
    let interrupted = manager.recover_interrupted().await?;
    if !interrupted.is_empty() {
        tracing::warn!(count = interrupted.len(), "previous jobs were interrupted");
    }

    let handle = manager.start_job(&playlist.playlist_id, spec, method).await?;
    let status = handle.wait().await?;

    let order: Vec<String> = playlists
        .order(&playlist.playlist_id)
        .map(|o| o.into_ids())
        .unwrap_or_default();
    let output = serde_json::json!({ "job": status, "order": order });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if let Some(err) = &status.error {
        bail!("reorder job failed ({}): {}", err.kind, err.message);
    }
    Ok(())
}
