//! Probe Agent - container readiness and liveness prober
//!
//! This binary runs on each node, probing the containers of the pods it
//! is given and reporting readiness and liveness failures.

use anyhow::{Context, Result};
use probe_lib::{PodLister, PodStore, ProbeEngine, ProberManager, StructuredLogger};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod resync;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting probe-agent");

    // Load configuration
    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        exec_runtime = %config.exec_runtime,
        "Agent configured"
    );

    let store = Arc::new(match &config.pods_file {
        Some(path) => PodStore::load_manifest(path)?,
        None => PodStore::new(),
    });

    let logger = StructuredLogger::new(&config.node_name);
    let engine = ProbeEngine::with_runtime(&config.exec_runtime)
        .context("Failed to build probe engine")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (mut manager, mut liveness_updates) =
        ProberManager::new(store.clone(), engine, Arc::new(logger.clone()));
    manager.start(shutdown_tx.subscribe());
    let manager = Arc::new(manager);

    for pod in store.list_pods() {
        manager.add_pod(&pod);
    }
    logger.log_startup(AGENT_VERSION, store.len());

    // Stand-in restart consumer
    let liveness_logger = logger.clone();
    let mut liveness_shutdown = shutdown_tx.subscribe();
    let liveness_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = liveness_shutdown.recv() => break,
                update = liveness_updates.recv() => match update {
                    Some(update) => {
                        liveness_logger.log_liveness_update(&update.namespace, &update.pod)
                    }
                    None => break,
                }
            }
        }
    });

    let resync_handle = config.pods_file.clone().map(|path| {
        tokio::spawn(resync::run(
            path,
            store.clone(),
            manager.clone(),
            config.resync_interval(),
            shutdown_tx.subscribe(),
        ))
    });

    // Start health, metrics and readiness server
    let app_state = Arc::new(api::AppState::new(manager.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            let reason = match result {
                Ok(Ok(())) => "API server exited".to_string(),
                Ok(Err(e)) => format!("API server failed: {e:#}"),
                Err(e) => format!("API server panicked: {e}"),
            };
            error!(reason = %reason, "API server stopped");
            logger.log_shutdown(&reason);
        }
    }

    let _ = shutdown_tx.send(());
    if let Some(handle) = resync_handle {
        let _ = handle.await;
    }
    let _ = liveness_handle.await;
    info!("Shutting down");

    Ok(())
}
