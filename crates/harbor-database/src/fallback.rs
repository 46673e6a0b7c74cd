//! Disposable local database used when the primary is unreachable.

use crate::error::{DatabaseError, DatabaseResult};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

const READINESS_POLL: Duration = Duration::from_millis(100);

/// A running disposable database instance.
#[async_trait]
pub trait FallbackServer: Send + Sync {
    /// Connection string for the instance.
    fn uri(&self) -> &str;

    /// Stop the instance and release its resources.
    async fn stop(&self) -> DatabaseResult<()>;
}

/// Starts disposable database instances.
#[async_trait]
pub trait FallbackLauncher: Send + Sync {
    async fn launch(&self) -> DatabaseResult<Box<dyn FallbackServer>>;
}

/// Launches a `mongod` child process on a free loopback port with a
/// temporary data directory.
#[derive(Debug, Clone)]
pub struct MongodLauncher {
    binary: PathBuf,
    startup_timeout: Duration,
}

impl MongodLauncher {
    pub fn new(binary: impl Into<PathBuf>, startup_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            startup_timeout,
        }
    }
}

#[async_trait]
impl FallbackLauncher for MongodLauncher {
    #[instrument(skip(self), fields(binary = %self.binary.display()))]
    async fn launch(&self) -> DatabaseResult<Box<dyn FallbackServer>> {
        let data_dir = tempfile::Builder::new().prefix("harbor-mongod-").tempdir()?;
        let port = free_port()?;

        let mut child = Command::new(&self.binary)
            .arg("--port")
            .arg(port.to_string())
            .arg("--bind_ip")
            .arg(Ipv4Addr::LOCALHOST.to_string())
            .arg("--dbpath")
            .arg(data_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DatabaseError::Launch(format!("failed to spawn {}: {e}", self.binary.display()))
            })?;

        debug!(port, pid = ?child.id(), "mongod spawned, waiting for readiness");
        wait_until_ready(&mut child, port, self.startup_timeout).await?;

        let server = MongodServer {
            uri: format!("mongodb://{}:{port}/", Ipv4Addr::LOCALHOST),
            child: Mutex::new(child),
            _data_dir: data_dir,
        };
        info!(uri = %server.uri, "In-memory database started");

        Ok(Box::new(server))
    }
}

fn free_port() -> DatabaseResult<u16> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
    Ok(listener.local_addr()?.port())
}

async fn wait_until_ready(child: &mut Child, port: u16, timeout: Duration) -> DatabaseResult<()> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = child.try_wait()? {
            return Err(DatabaseError::Launch(format!("mongod exited during startup: {status}")));
        }

        if TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.is_ok() {
            return Ok(());
        }

        if Instant::now() >= deadline {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill mongod after startup timeout");
            }
            return Err(DatabaseError::Launch(format!(
                "mongod did not accept connections within {timeout:?}"
            )));
        }

        tokio::time::sleep(READINESS_POLL).await;
    }
}

/// Running `mongod` child. The data directory is removed on drop.
pub struct MongodServer {
    uri: String,
    child: Mutex<Child>,
    _data_dir: TempDir,
}

#[async_trait]
impl FallbackServer for MongodServer {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn stop(&self) -> DatabaseResult<()> {
        let mut child = self.child.lock().await;

        if child.try_wait()?.is_none() {
            child
                .kill()
                .await
                .map_err(|e| DatabaseError::Shutdown(format!("failed to stop mongod: {e}")))?;
        }

        info!(uri = %self.uri, "In-memory database stopped");
        Ok(())
    }
}
