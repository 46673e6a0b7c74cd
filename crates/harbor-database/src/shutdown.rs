//! Shutdown coordination.

use crate::error::DatabaseResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Exit code after a clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Exit code when cleanup failed.
pub const EXIT_CLEANUP_FAILED: i32 = 1;

/// Tracks whether shutdown has started and notifies pending work.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    /// Shutdown signal sender.
    sender: broadcast::Sender<()>,
    /// Shutdown initiated flag.
    initiated: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);

        Self {
            sender,
            initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Check if shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Initiate shutdown. Returns `false` if it was already initiated.
    pub fn initiate(&self) -> bool {
        if self.initiated.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!("Initiating graceful shutdown...");
        let _ = self.sender.send(());
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Process exit code for a shutdown result.
pub fn exit_code(result: &DatabaseResult<()>) -> i32 {
    match result {
        Ok(()) => EXIT_OK,
        Err(_) => EXIT_CLEANUP_FAILED,
    }
}

/// Wait for an interrupt (`SIGINT` / Ctrl+C).
pub async fn interrupt_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, starting graceful shutdown");
    Ok(())
}
