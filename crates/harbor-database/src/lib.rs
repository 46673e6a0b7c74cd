//! Supervised MongoDB connection for Harbor services.
//!
//! [`ConnectionManager`] connects to the configured database and, when that
//! fails, either launches a disposable local `mongod` and connects to it or
//! keeps retrying the primary at a fixed interval. Lifecycle events are
//! logged through `tracing`, and an interrupt handler releases the
//! connection and the disposable instance before exiting.
//!
//! ```no_run
//! use harbor_database::{ConnectionManager, DatabaseConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), harbor_database::DatabaseError> {
//! let manager = Arc::new(ConnectionManager::new(DatabaseConfig::from_env()));
//! manager.install_shutdown_handler();
//! let outcome = manager.connect().await?;
//! println!("connected: {outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod fallback;
pub mod health;
pub mod manager;
pub mod observer;
pub mod shutdown;
pub mod state;

pub use config::{ConnectionOptions, ConnectionTarget, DatabaseConfig, WriteAcknowledgment};
pub use connector::{ActiveConnection, Connector, MongoConnection, MongoConnector};
pub use error::{DatabaseError, DatabaseResult};
pub use fallback::{FallbackLauncher, FallbackServer, MongodLauncher, MongodServer};
pub use health::DbHealth;
pub use manager::ConnectionManager;
pub use observer::{ConnectionEvent, EventCounts, LifecycleObserver};
pub use shutdown::{exit_code, ShutdownCoordinator, EXIT_CLEANUP_FAILED, EXIT_OK};
pub use state::{ConnectionOutcome, ConnectionSource, ConnectionState};
