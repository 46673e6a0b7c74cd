//! Database configuration.

use crate::error::DatabaseError;
use harbor_common_config::{flag_enabled, non_blank, vars, Environment};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Write acknowledgment requested from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteAcknowledgment {
    /// Acknowledged by a majority of data-bearing members.
    #[default]
    Majority,
    /// Acknowledged by the given number of members.
    Nodes(u32),
}

/// Tuning parameters applied to every connection attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Maximum connections in pool.
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    /// Minimum connections in pool.
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: u32,
    /// Server selection timeout (ms).
    #[serde(default = "default_server_selection_timeout")]
    pub server_selection_timeout_ms: u64,
    /// Socket timeout (ms). Bounds the verification round trip.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_ms: u64,
    /// Connect timeout (ms).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Heartbeat interval (ms).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Pooled connection idle time (ms).
    #[serde(default = "default_max_idle_time")]
    pub max_idle_time_ms: u64,
    /// Retry writes once on transient errors.
    #[serde(default = "default_retry_writes")]
    pub retry_writes: bool,
    /// Write concern.
    #[serde(default)]
    pub write_concern: WriteAcknowledgment,
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_min_pool_size() -> u32 {
    1
}

fn default_server_selection_timeout() -> u64 {
    5_000
}

fn default_socket_timeout() -> u64 {
    45_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_heartbeat_interval() -> u64 {
    10_000
}

fn default_max_idle_time() -> u64 {
    30_000
}

fn default_retry_writes() -> bool {
    true
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            min_pool_size: default_min_pool_size(),
            server_selection_timeout_ms: default_server_selection_timeout(),
            socket_timeout_ms: default_socket_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_idle_time_ms: default_max_idle_time(),
            retry_writes: default_retry_writes(),
            write_concern: WriteAcknowledgment::default(),
        }
    }
}

impl ConnectionOptions {
    pub fn builder() -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder::default()
    }

    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_millis(self.server_selection_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_time_ms)
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.max_pool_size == 0 {
            return Err(DatabaseError::InvalidConfig(
                "max_pool_size must be at least 1".to_string(),
            ));
        }

        if self.min_pool_size > self.max_pool_size {
            return Err(DatabaseError::InvalidConfig(
                "min_pool_size cannot exceed max_pool_size".to_string(),
            ));
        }

        let timeouts = [
            ("server_selection_timeout_ms", self.server_selection_timeout_ms),
            ("socket_timeout_ms", self.socket_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("max_idle_time_ms", self.max_idle_time_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(DatabaseError::InvalidConfig(format!("{name} must be non-zero")));
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct ConnectionOptionsBuilder {
    options: ConnectionOptions,
}

impl ConnectionOptionsBuilder {
    pub fn max_pool_size(mut self, max: u32) -> Self {
        self.options.max_pool_size = max;
        self
    }

    pub fn min_pool_size(mut self, min: u32) -> Self {
        self.options.min_pool_size = min;
        self
    }

    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.options.server_selection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.options.socket_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.options.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn max_idle_time(mut self, idle: Duration) -> Self {
        self.options.max_idle_time_ms = idle.as_millis() as u64;
        self
    }

    pub fn retry_writes(mut self, enabled: bool) -> Self {
        self.options.retry_writes = enabled;
        self
    }

    pub fn write_concern(mut self, ack: WriteAcknowledgment) -> Self {
        self.options.write_concern = ack;
        self
    }

    pub fn build(self) -> Result<ConnectionOptions, DatabaseError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

/// A connection string paired with the option set used for one attempt.
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    uri: String,
    options: ConnectionOptions,
}

const SCHEMES: [&str; 2] = ["mongodb://", "mongodb+srv://"];

impl ConnectionTarget {
    /// Validate the connection string shape before any network I/O.
    pub fn new(uri: impl Into<String>, options: ConnectionOptions) -> Result<Self, DatabaseError> {
        let uri = uri.into();
        let uri = uri.trim().to_string();

        if uri.is_empty() {
            return Err(DatabaseError::InvalidUri("connection string is empty".to_string()));
        }

        let Some(rest) = SCHEMES.iter().find_map(|scheme| uri.strip_prefix(scheme)) else {
            return Err(DatabaseError::InvalidUri(format!(
                "expected scheme \"mongodb://\" or \"mongodb+srv://\" in \"{}\"",
                redact(&uri)
            )));
        };

        if host_section(rest).split(',').any(|host| host.trim().is_empty()) {
            return Err(DatabaseError::InvalidUri(format!(
                "missing host in \"{}\"",
                redact(&uri)
            )));
        }

        options.validate()?;
        Ok(Self { uri, options })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Hosts listed in the connection string, in order.
    pub fn hosts(&self) -> Vec<String> {
        let rest = SCHEMES
            .iter()
            .find_map(|scheme| self.uri.strip_prefix(scheme))
            .unwrap_or_default();
        host_section(rest).split(',').map(str::to_string).collect()
    }

    /// Connection string with credentials masked, suitable for logs.
    pub fn redacted(&self) -> String {
        redact(&self.uri)
    }
}

/// `user:pass@host1,host2/db?opts` -> `host1,host2`
fn host_section(rest: &str) -> &str {
    let end = rest.find(['/', '?']).unwrap_or(rest.len());
    let authority = &rest[..end];
    match authority.rfind('@') {
        Some(at) => &authority[at + 1..],
        None => authority,
    }
}

fn redact(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://").map(|i| i + 3) else {
        return uri.to_string();
    };
    let rest = &uri[scheme_end..];
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}***@{}", &uri[..scheme_end], &rest[at + 1..]),
        None => uri.to_string(),
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Primary connection string.
    #[serde(default)]
    pub uri: Option<String>,
    /// Start a disposable local instance when the primary is unreachable.
    #[serde(default = "default_allow_in_memory")]
    pub allow_in_memory: bool,
    /// Delay between primary attempts when the fallback is disabled (ms).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// `mongod` binary used for the disposable instance.
    #[serde(default = "default_mongod_binary")]
    pub mongod_binary: PathBuf,
    /// How long the disposable instance may take to accept connections (ms).
    #[serde(default = "default_fallback_startup_timeout")]
    pub fallback_startup_timeout_ms: u64,
    /// Per-attempt connection options.
    #[serde(default)]
    pub options: ConnectionOptions,
}

fn default_allow_in_memory() -> bool {
    true
}

fn default_retry_delay() -> u64 {
    5_000
}

fn default_mongod_binary() -> PathBuf {
    PathBuf::from("mongod")
}

fn default_fallback_startup_timeout() -> u64 {
    10_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: None,
            allow_in_memory: default_allow_in_memory(),
            retry_delay_ms: default_retry_delay(),
            mongod_binary: default_mongod_binary(),
            fallback_startup_timeout_ms: default_fallback_startup_timeout(),
            options: ConnectionOptions::default(),
        }
    }
}

impl DatabaseConfig {
    /// Read `MONGODB_URI`, `ALLOW_IN_MEMORY_DB` and `MONGOD_BINARY`.
    pub fn from_env() -> Self {
        Self::from_lookup(Environment::get)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self {
            uri: non_blank(lookup(vars::MONGODB_URI)),
            allow_in_memory: flag_enabled(lookup(vars::ALLOW_IN_MEMORY_DB).as_deref()),
            ..Self::default()
        };

        if let Some(binary) = non_blank(lookup(vars::MONGOD_BINARY)) {
            config.mongod_binary = PathBuf::from(binary);
        }

        config
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_allow_in_memory(mut self, allow: bool) -> Self {
        self.allow_in_memory = allow;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn fallback_startup_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_startup_timeout_ms)
    }

    /// Build the primary target, failing when the URI is unset or malformed.
    pub fn primary_target(&self) -> Result<ConnectionTarget, DatabaseError> {
        let uri = self.uri.as_deref().ok_or_else(|| {
            DatabaseError::InvalidUri(format!("{} is not set", vars::MONGODB_URI))
        })?;
        ConnectionTarget::new(uri, self.options.clone())
    }
}
