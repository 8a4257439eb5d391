//! Service binary for the Leibniz pi service.
//!
//! Wires configuration, the snapshot store, the calculation engine, and
//! the control API together.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `leibniz-config.yaml` plus env overrides
//! 3. Open the snapshot store
//! 4. Construct the engine (auto-resumes a `running` record)
//! 5. Serve the control API until `Ctrl-C`
//! 6. Disarm the engine timer, leaving the record as last persisted

mod error;

use std::path::Path;
use std::sync::Arc;

use leibniz_api::{AppState, ServerConfig};
use leibniz_core::config::ServiceConfig;
use leibniz_core::{CalculationEngine, FileSnapshotStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Configuration file looked up in the working directory.
const CONFIG_FILE: &str = "leibniz-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the server cannot bind.
#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("leibniz-server starting");

    // 2. Load configuration.
    let config_path = Path::new(CONFIG_FILE);
    if !config_path.exists() {
        info!("Config file not found, using defaults");
    }
    let config = ServiceConfig::load_or_default(config_path)?;
    info!(
        host = config.server.host,
        port = config.server.port,
        state_file = %config.storage.state_file.display(),
        iteration_interval_ms = config.calculation.iteration_interval_ms,
        "Configuration loaded"
    );

    // 3-4. Store and engine.
    let store = Arc::new(FileSnapshotStore::new(config.storage.state_file.clone()));
    let engine = Arc::new(CalculationEngine::new(store, config.calculation.interval()).await);

    // 5. Serve until Ctrl-C.
    let server_config = ServerConfig::from(&config.server);
    let state = Arc::new(AppState::new(Arc::clone(&engine)));
    let served = leibniz_api::start_server(&server_config, state, shutdown_signal()).await;

    // 6. Disarm the timer whether or not serving succeeded.
    engine.shutdown().await;
    served?;

    info!("leibniz-server shutdown complete");
    Ok(())
}

/// Resolve on `Ctrl-C`.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C, serving until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
