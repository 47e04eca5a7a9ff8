//! DMXFlow - sACN / Art-Net receiver
//!
//! Listens for DMX512 over IP, merges concurrent senders per universe and
//! streams per-fixture channel changes to WebSocket clients.
//!
//! Usage: `dmxflow [config.toml]` (defaults to `dmxflow.toml`).

#![warn(missing_docs)]

mod config;
mod logging_setup;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};

use dmxflow_control::{ReceiverEngine, WebServer};

use crate::config::DmxflowConfig;

const DEFAULT_CONFIG_PATH: &str = "dmxflow.toml";

/// The main entry point for the application.
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let loaded = DmxflowConfig::load(&config_path)?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();
    let _log_guard = logging_setup::init(&config.log)?;

    info!("==========================================");
    info!("===      DMXFlow Session Started       ===");
    info!("==========================================");
    if found {
        info!("Configuration: {:?}", config_path);
    } else {
        warn!("Config file {:?} not found, using defaults", config_path);
    }

    let patch = config.patch()?;
    info!(
        "Patched {} fixtures across {} universes",
        patch.len(),
        patch.universes().len()
    );

    let engine = ReceiverEngine::new(config.engine_config(), patch);

    let listeners = config.listeners();
    let planned = listeners.len();
    let failures = engine.start(listeners);
    if failures.len() == planned {
        anyhow::bail!("No listener could be started");
    }
    if !failures.is_empty() {
        warn!(
            "{} of {} listeners failed to start; continuing with the rest",
            failures.len(),
            planned
        );
    }

    let (web_shutdown, web_shutdown_rx) = watch::channel(false);
    let web_task = if config.web.enabled {
        Some(WebServer::new(config.web.clone(), engine.clone()).spawn(web_shutdown_rx))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    engine.stop().await;
    web_shutdown.send_replace(true);
    if let Some(task) = web_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Web server failed: {}", e),
            Err(e) => error!("Web server task panicked: {}", e),
        }
    }

    let stats = engine.stats();
    info!(
        "Session ended: {} packets accepted, {} dropped, {} out of order",
        stats.packets_accepted, stats.packets_dropped, stats.out_of_order
    );
    Ok(())
}
