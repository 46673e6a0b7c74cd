//! Database error types.

use std::time::Duration;
use thiserror::Error;

/// Result alias for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors raised while connecting, supervising or releasing the database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection string is missing or could not be parsed.
    #[error("Invalid connection string: {0}")]
    InvalidUri(String),

    /// Connection option set failed validation.
    #[error("Invalid connection options: {0}")]
    InvalidConfig(String),

    /// Error reported by the MongoDB driver.
    #[error("Database driver error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// Server could not be reached.
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Verification round trip exceeded its deadline.
    #[error("Database did not respond within {0:?}")]
    Timeout(Duration),

    /// Disposable database instance could not be launched.
    #[error("Failed to launch in-memory database: {0}")]
    Launch(String),

    /// The in-memory fallback path failed.
    #[error("In-memory fallback failed: {0}")]
    Fallback(#[source] Box<DatabaseError>),

    /// Releasing the connection or the fallback instance failed.
    #[error("Database shutdown failed: {0}")]
    Shutdown(String),

    /// Shutdown started while a connection attempt was pending.
    #[error("Connection attempt abandoned: shutdown in progress")]
    ShuttingDown,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// Whether this error points at a malformed or missing connection string.
    pub fn is_invalid_uri(&self) -> bool {
        match self {
            Self::InvalidUri(_) => true,
            Self::Driver(e) => matches!(
                *e.kind,
                mongodb::error::ErrorKind::InvalidArgument { .. }
            ),
            Self::Fallback(inner) => inner.is_invalid_uri(),
            _ => false,
        }
    }
}
