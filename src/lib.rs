use log::{error, info};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

// Module declarations
pub mod api;
pub mod auth;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod drag;
pub mod notes;
pub mod placement;
pub mod progress;
pub mod session;
pub mod time;
pub mod types;
pub mod websocket;

use api::ApiClient;
use config::AppConfig;
use dashboard::Dashboard;
use session::SessionStore;
use types::SharedSession;
use websocket::UiBridge;

pub fn run() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting StickyTrack...");

    let config = AppConfig::from_env()?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config))
}

/// Wires the session, dashboard and UI bridge together and runs until Ctrl+C.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let store = SessionStore::load(&config.session_file)?;
    let session: SharedSession = Arc::new(Mutex::new(store));

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();

    let bridge = Arc::new(UiBridge::new(config.ui_port, command_tx));
    let listener = bridge.bind().await?;

    let api = ApiClient::from_config(&config, session);
    let dashboard = Dashboard::new(api, config.spotify.clone(), config.poll_interval, event_tx);
    let dashboard_task = tokio::spawn(dashboard.run(command_rx, shutdown.clone()));

    let pump = Arc::clone(&bridge);
    tokio::spawn(async move { pump.pump_events(event_rx).await });

    let server = Arc::clone(&bridge);
    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move { server.serve(listener, server_shutdown).await });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
    shutdown.cancel();

    if let Err(e) = dashboard_task.await {
        error!("Dashboard task failed: {}", e);
    }
    if let Err(e) = server_task.await {
        error!("UI bridge task failed: {}", e);
    }

    info!("StickyTrack stopped");
    Ok(())
}
