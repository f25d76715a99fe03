mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use vtuner_api::{AppState, NoopUpdateSink};
use vtuner_buffer::{BufferContext, BufferRegistry};
use vtuner_core::auth::{StaticCredentials, TokenGate};
use vtuner_core::lineup::LineupTable;
use vtuner_core::models::{InMemoryCatalog, PlaylistSource};
use vtuner_core::{logging, vfs, Config, Fetcher};

#[derive(Parser, Debug)]
#[command(name = "vtuner", about = "IPTV proxy and virtual tuner")]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "VTUNER_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration (fail fast on misconfigurations)
    let config = Config::load(cli.config.as_deref())?;
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("config error: {error}");
        }
        anyhow::bail!("invalid configuration ({} errors)", errors.len());
    }
    let config = Arc::new(config);

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("vTuner starting");
    info!("HTTP address: {}", config.http_address());
    info!("Base URL: {}", config.base_url());

    // Exporter wiring happens outside this process; just surface the intent.
    for var in ["OTEL_EXPORTER_TYPE", "OTEL_EXPORTER_OTLP_ENDPOINT"] {
        if let Ok(value) = std::env::var(var) {
            info!("{var}={value} (exporter configured externally)");
        }
    }

    std::fs::create_dir_all(&config.storage.data_dir)?;
    std::fs::create_dir_all(&config.storage.tmp_dir)?;

    // 3. Ingested playlist data. The ingest jobs live outside this binary;
    // their latest snapshot is picked up from the data directory.
    let catalog = Arc::new(InMemoryCatalog::new());
    load_catalog_snapshot(&catalog, &config)?;

    // 4. Streaming buffer
    let vfs = vfs::from_config(
        &config.storage.buffer_backend,
        &config.storage.tmp_dir.join("buffer"),
    )
    .map_err(|e| anyhow::anyhow!("buffer filesystem: {e}"))?;
    let fetcher = Arc::new(Fetcher::new(&config.fetch)?);
    let registry = Arc::new(BufferRegistry::new(config.storage.tmp_dir.join("buffer")));
    let limit_video = vtuner_buffer::limit::load_limit_video(&config.storage.data_dir);
    let buffer = Arc::new(BufferContext::new(
        registry,
        vfs,
        fetcher,
        config.buffer.clone(),
        config.fetch.clone(),
        limit_video,
    ));

    // 5. Lineup table
    let lineup = Arc::new(LineupTable::load(
        config.storage.data_dir.join("lineup.json"),
    )?);
    info!(channels = lineup.len(), "lineup loaded");

    // 6. Auth gate
    let gate = Arc::new(TokenGate::from_config(&config.auth));
    let credentials = Arc::new(StaticCredentials::new(&config.auth, gate.clone()));

    // 7. HTTP surface
    let state = AppState::new(
        config.clone(),
        catalog,
        buffer,
        lineup,
        gate,
        credentials,
        Arc::new(NoopUpdateSink),
    );

    server::serve(config, state).await
}

/// Load the most recent ingest snapshot: `catalog.json` with the playlist
/// sources, plus the generated output documents when present.
fn load_catalog_snapshot(catalog: &InMemoryCatalog, config: &Config) -> Result<()> {
    let snapshot = config.storage.data_dir.join("catalog.json");
    match std::fs::read(&snapshot) {
        Ok(data) => {
            let sources: Vec<PlaylistSource> = serde_json::from_slice(&data)?;
            info!(playlists = sources.len(), "catalog snapshot loaded");
            for source in sources {
                catalog.upsert_source(source);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("no catalog snapshot found; starting with an empty catalog");
        }
        Err(e) => return Err(e.into()),
    }

    for (file, is_m3u) in [("vtuner.m3u", true), ("vtuner.xml", false)] {
        let path = config.storage.data_dir.join(file);
        if let Ok(body) = std::fs::read_to_string(&path) {
            if is_m3u {
                catalog.set_m3u_document(file, body);
            } else {
                catalog.set_xmltv_document(file, body);
            }
        }
    }
    Ok(())
}
