//! Database health monitoring.

use crate::state::ConnectionSource;

/// Database health status.
#[derive(Debug, Clone)]
pub struct DbHealth {
    pub is_healthy: bool,
    pub latency_ms: u64,
    pub source: Option<ConnectionSource>,
    pub message: Option<String>,
}

impl DbHealth {
    pub(crate) fn healthy(source: ConnectionSource, latency_ms: u64) -> Self {
        Self {
            is_healthy: true,
            latency_ms,
            source: Some(source),
            message: None,
        }
    }

    pub(crate) fn unhealthy(
        source: Option<ConnectionSource>,
        latency_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            is_healthy: false,
            latency_ms,
            source,
            message: Some(message.into()),
        }
    }
}
