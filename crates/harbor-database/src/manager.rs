//! Connection supervision: primary connect, retry or fallback, shutdown.

use crate::config::{ConnectionTarget, DatabaseConfig};
use crate::connector::{ActiveConnection, Connector, MongoConnector};
use crate::error::{DatabaseError, DatabaseResult};
use crate::fallback::{FallbackLauncher, FallbackServer, MongodLauncher};
use crate::health::DbHealth;
use crate::observer::{EventCounts, LifecycleObserver};
use crate::shutdown::{exit_code, interrupt_signal, ShutdownCoordinator};
use crate::state::{ConnectionOutcome, ConnectionSource, ConnectionState};
use mongodb::Client;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

struct ActiveSlot {
    connection: Arc<dyn ActiveConnection>,
    observer: Arc<LifecycleObserver>,
    outcome: ConnectionOutcome,
}

/// Owns the single database connection of the process and the optional
/// disposable fallback instance.
pub struct ConnectionManager {
    config: DatabaseConfig,
    connector: Arc<dyn Connector>,
    launcher: Arc<dyn FallbackLauncher>,
    /// One-shot guard: set by the first fallback attempt, never cleared.
    fallback_attempted: AtomicBool,
    fallback_server: Mutex<Option<Box<dyn FallbackServer>>>,
    active: RwLock<Option<ActiveSlot>>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: ShutdownCoordinator,
    shutdown_hook_installed: AtomicBool,
    primary_attempts: AtomicU64,
}

impl ConnectionManager {
    /// Manager backed by the MongoDB driver and a local `mongod` fallback.
    pub fn new(config: DatabaseConfig) -> Self {
        let launcher = MongodLauncher::new(
            config.mongod_binary.clone(),
            config.fallback_startup_timeout(),
        );
        Self::with_backends(config, Arc::new(MongoConnector::new()), Arc::new(launcher))
    }

    pub fn with_backends(
        config: DatabaseConfig,
        connector: Arc<dyn Connector>,
        launcher: Arc<dyn FallbackLauncher>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            connector,
            launcher,
            fallback_attempted: AtomicBool::new(false),
            fallback_server: Mutex::new(None),
            active: RwLock::new(None),
            state: Arc::new(state),
            shutdown: ShutdownCoordinator::new(),
            shutdown_hook_installed: AtomicBool::new(false),
            primary_attempts: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Number of primary connection attempts made so far.
    pub fn primary_attempts(&self) -> u64 {
        self.primary_attempts.load(Ordering::SeqCst)
    }

    pub fn fallback_attempted(&self) -> bool {
        self.fallback_attempted.load(Ordering::SeqCst)
    }

    pub async fn has_fallback_server(&self) -> bool {
        self.fallback_server.lock().await.is_some()
    }

    /// Driver client of the active connection.
    pub async fn client(&self) -> Option<Client> {
        self.active
            .read()
            .await
            .as_ref()
            .and_then(|slot| slot.connection.client())
    }

    /// Lifecycle event counts of the active connection.
    pub async fn event_counts(&self) -> Option<EventCounts> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|slot| slot.observer.counts())
    }

    async fn current_outcome(&self) -> Option<ConnectionOutcome> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|slot| slot.outcome.clone())
    }

    /// Connect to the configured database.
    ///
    /// On failure, either starts the in-memory fallback (when allowed) or
    /// retries the primary every `retry_delay` until it succeeds or shutdown
    /// begins. Returns immediately if a connection is already active.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> DatabaseResult<ConnectionOutcome> {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if self.shutdown.is_shutting_down() {
                return Err(DatabaseError::ShuttingDown);
            }

            if let Some(outcome) = self.current_outcome().await {
                debug!(?outcome, "Database already connected");
                return Ok(outcome);
            }

            let error = match self.connect_primary().await {
                Ok(outcome) => return Ok(outcome),
                Err(DatabaseError::ShuttingDown) => return Err(DatabaseError::ShuttingDown),
                Err(error) => error,
            };

            error!(error = %error, "Database connection error");
            error!(details = ?error, "Full error details");
            if error.is_invalid_uri() {
                error!("Please check your MONGODB_URI environment variable");
            }

            if self.config.allow_in_memory {
                info!("Attempting to start in-memory database as fallback...");
                return self.start_fallback().await;
            }

            let delay = self.config.retry_delay();
            debug!(delay_ms = delay.as_millis() as u64, "Scheduling connection retry");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => return Err(DatabaseError::ShuttingDown),
            }

            info!(attempt = self.primary_attempts() + 1, "Retrying database connection...");
        }
    }

    async fn connect_primary(&self) -> DatabaseResult<ConnectionOutcome> {
        self.primary_attempts.fetch_add(1, Ordering::SeqCst);

        let target = self.config.primary_target()?;
        let observer = self.new_observer(ConnectionSource::Primary);
        let connection = self.connector.connect(&target, observer.clone()).await?;

        let host = connection.host();
        info!(host = %host, "Database connected");

        let outcome = ConnectionOutcome::Primary { host };
        self.activate(connection, observer, outcome.clone()).await?;
        Ok(outcome)
    }

    /// Start the disposable instance and connect to it.
    ///
    /// Runs at most once per manager; later calls return
    /// [`ConnectionOutcome::FallbackAlreadyAttempted`] whatever the first
    /// attempt's result was.
    #[instrument(skip(self))]
    pub async fn start_fallback(&self) -> DatabaseResult<ConnectionOutcome> {
        if self.fallback_attempted.swap(true, Ordering::SeqCst) {
            debug!("In-memory fallback already attempted");
            return Ok(ConnectionOutcome::FallbackAlreadyAttempted);
        }

        match self.connect_fallback().await {
            Err(DatabaseError::ShuttingDown) => Err(DatabaseError::ShuttingDown),
            Err(e) => {
                error!(error = %e, "Failed to start in-memory database");
                Err(DatabaseError::Fallback(Box::new(e)))
            }
            Ok(outcome) => Ok(outcome),
        }
    }

    async fn connect_fallback(&self) -> DatabaseResult<ConnectionOutcome> {
        if self.shutdown.is_shutting_down() {
            return Err(DatabaseError::ShuttingDown);
        }

        let server = self.launcher.launch().await?;
        let uri = server.uri().to_string();

        // Stored before connecting so shutdown stops it even if connecting fails.
        {
            let mut slot = self.fallback_server.lock().await;
            if self.shutdown.is_shutting_down() {
                drop(slot);
                debug!(uri = %uri, "Shutdown began during launch; stopping in-memory database");
                if let Err(e) = server.stop().await {
                    warn!(error = %e, "Failed to stop in-memory database");
                }
                return Err(DatabaseError::ShuttingDown);
            }
            *slot = Some(server);
        }

        let target = ConnectionTarget::new(uri.clone(), self.config.options.clone())?;
        let observer = self.new_observer(ConnectionSource::Fallback);
        let connection = self.connector.connect(&target, observer.clone()).await?;

        info!(uri = %uri, "Database (in-memory) connected");

        let outcome = ConnectionOutcome::Fallback { uri };
        self.activate(connection, observer, outcome.clone()).await?;
        Ok(outcome)
    }

    fn new_observer(&self, source: ConnectionSource) -> Arc<LifecycleObserver> {
        Arc::new(LifecycleObserver::new(source, Arc::clone(&self.state)))
    }

    /// Install `connection` as the active one, unless shutdown has begun.
    ///
    /// The shutdown flag is checked under the `active` write lock, which
    /// `shutdown` takes after raising it, so a connection that finishes
    /// after shutdown is closed here instead of outliving it.
    async fn activate(
        &self,
        connection: Arc<dyn ActiveConnection>,
        observer: Arc<LifecycleObserver>,
        outcome: ConnectionOutcome,
    ) -> DatabaseResult<()> {
        let source = observer.source();
        let replaced = {
            let mut active = self.active.write().await;
            if self.shutdown.is_shutting_down() {
                drop(active);
                debug!(?outcome, "Shutdown began while connecting; closing new connection");
                if let Err(e) = connection.close().await {
                    warn!(error = %e, "Failed to close connection opened during shutdown");
                }
                return Err(DatabaseError::ShuttingDown);
            }

            let replaced = active.replace(ActiveSlot {
                connection,
                observer,
                outcome,
            });
            self.state.send_replace(ConnectionState::Connected(source));
            replaced
        };

        if let Some(previous) = replaced {
            debug!("Closing superseded connection");
            if let Err(e) = previous.connection.close().await {
                warn!(error = %e, "Failed to close superseded connection");
            }
        }
        Ok(())
    }

    /// Ping the active connection under `timeout`.
    pub async fn check_health(&self, timeout: Duration) -> DbHealth {
        let active = self
            .active
            .read()
            .await
            .as_ref()
            .map(|slot| (Arc::clone(&slot.connection), slot.observer.source()));

        let Some((connection, source)) = active else {
            return DbHealth::unhealthy(None, 0, "No active database connection");
        };

        let start = Instant::now();
        let result = tokio::time::timeout(timeout, connection.ping()).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => {
                debug!(latency_ms, "Database health check passed");
                DbHealth::healthy(source, latency_ms)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Database health check failed");
                DbHealth::unhealthy(Some(source), latency_ms, e.to_string())
            }
            Err(_) => {
                warn!("Database health check timed out");
                DbHealth::unhealthy(Some(source), latency_ms, "Connection timeout")
            }
        }
    }

    /// Close the active connection, then stop the fallback instance.
    ///
    /// If closing the connection fails the fallback instance is left running.
    pub async fn shutdown(&self) -> DatabaseResult<()> {
        self.shutdown.initiate();

        let slot = self.active.write().await.take();
        self.state.send_replace(ConnectionState::Disconnected);

        if let Some(slot) = slot {
            slot.connection.close().await.map_err(into_shutdown_error)?;
        }

        if let Some(server) = self.fallback_server.lock().await.take() {
            server.stop().await.map_err(into_shutdown_error)?;
        }

        info!("Database connection closed through app termination");
        Ok(())
    }

    /// Run [`shutdown`](Self::shutdown) and map the result to an exit code.
    pub async fn terminate(&self) -> i32 {
        let result = self.shutdown().await;
        if let Err(e) = &result {
            error!(error = %e, "Error closing database connection");
        }
        exit_code(&result)
    }

    /// Install the interrupt handler that shuts down and exits the process.
    ///
    /// Idempotent: returns `false` if a handler was already installed.
    /// Must be called from within a Tokio runtime.
    pub fn install_shutdown_handler(self: &Arc<Self>) -> bool {
        if self.shutdown_hook_installed.swap(true, Ordering::SeqCst) {
            debug!("Shutdown handler already installed");
            return false;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = interrupt_signal().await {
                error!(error = %e, "Failed to listen for interrupt signal");
                return;
            }
            let code = manager.terminate().await;
            std::process::exit(code);
        });

        true
    }
}

fn into_shutdown_error(error: DatabaseError) -> DatabaseError {
    match error {
        DatabaseError::Shutdown(_) => error,
        other => DatabaseError::Shutdown(other.to_string()),
    }
}
