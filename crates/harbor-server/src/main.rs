//! Harbor Server Binary

use anyhow::{Context, Result};
use harbor_common_config::Environment;
use harbor_common_log::LogConfig;
use harbor_database::{ConnectionManager, DatabaseConfig, DatabaseError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    Environment::init().context("Failed to load environment")?;
    harbor_common_log::init(LogConfig::from_env()).context("Failed to initialize logging")?;

    info!("Starting Harbor Server v{}", env!("CARGO_PKG_VERSION"));

    let manager = Arc::new(ConnectionManager::new(DatabaseConfig::from_env()));
    manager.install_shutdown_handler();

    let outcome = match manager.connect().await {
        Ok(outcome) => outcome,
        Err(e) => match startup_failure(e) {
            // The interrupt handler owns cleanup and the exit code.
            None => std::future::pending().await,
            Some(failure) => {
                if let Err(cleanup) = manager.shutdown().await {
                    warn!(error = %cleanup, "Cleanup after failed startup did not complete");
                }
                return Err(failure);
            }
        },
    };
    info!(?outcome, "Database ready");

    // Runs until the interrupt handler exits the process.
    let mut interval = tokio::time::interval(HEALTH_INTERVAL);
    loop {
        interval.tick().await;
        let health = manager.check_health(HEALTH_TIMEOUT).await;
        if health.is_healthy {
            debug!(latency_ms = health.latency_ms, source = ?health.source, "Database healthy");
        } else {
            warn!(message = ?health.message, "Database unhealthy");
        }
    }
}

/// `None` when `connect` was cut short by an interrupt rather than failing.
fn startup_failure(error: DatabaseError) -> Option<anyhow::Error> {
    match error {
        DatabaseError::ShuttingDown => None,
        e => Some(anyhow::Error::new(e).context("Database startup failed")),
    }
}
