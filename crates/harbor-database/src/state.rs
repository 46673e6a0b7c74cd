//! Connection state published by the manager.

use std::fmt;

/// Where the active connection points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionSource {
    /// The externally configured database.
    Primary,
    /// The disposable local instance.
    Fallback,
}

impl fmt::Display for ConnectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "in-memory"),
        }
    }
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected(ConnectionSource),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn source(&self) -> Option<ConnectionSource> {
        match self {
            Self::Connected(source) => Some(*source),
            Self::Disconnected => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected(source) => write!(f, "connected ({source})"),
        }
    }
}

/// Result of a completed `connect` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Connected to the configured database.
    Primary { host: String },
    /// Connected to a disposable local instance.
    Fallback { uri: String },
    /// The fallback had already been attempted; this call did nothing.
    FallbackAlreadyAttempted,
}

impl ConnectionOutcome {
    pub fn source(&self) -> Option<ConnectionSource> {
        match self {
            Self::Primary { .. } => Some(ConnectionSource::Primary),
            Self::Fallback { .. } => Some(ConnectionSource::Fallback),
            Self::FallbackAlreadyAttempted => None,
        }
    }
}
