// Survivor pool daemon entry point.
//
// Startup sequence:
// 1. Initialize tracing (stdout)
// 2. Load config (copying defaults on first run)
// 3. Open database
// 4. Spawn WebSocket server task
// 5. Run the engine loop until Ctrl+C

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

use lastman::app::Engine;
use lastman::config;
use lastman::db::Database;
use lastman::feed::HttpFixtureFeed;
use lastman::ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("Survivor pool daemon starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: ws_port={}, feed={}, poll every {}s",
        config.ws_port, config.feed_base_url, config.poll_interval_secs
    );

    let db = Database::open(&config.db_path).context("failed to open database")?;
    info!("Database opened at {}", config.db_path);

    let feed = Arc::new(HttpFixtureFeed::new(config.feed_base_url.clone()));

    let (ws_tx, ws_rx) = mpsc::channel(256);

    let ws_port = config.ws_port;
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(ws_port, ws_tx).await {
            error!("WebSocket server error: {}", e);
        }
    });

    let engine = Engine::new(config, db, feed);
    let engine_handle = tokio::spawn(async move {
        if let Err(e) = engine.run(ws_rx).await {
            error!("Engine loop error: {}", e);
        }
    });

    info!("Ready. WebSocket server listening on 127.0.0.1:{ws_port}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    // The WebSocket server loops forever; aborting it closes the event
    // channel and lets the engine drain and exit.
    ws_handle.abort();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), engine_handle).await;

    info!("Daemon shut down cleanly");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lastman=info,warn")),
        )
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
