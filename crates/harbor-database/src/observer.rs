//! Connection lifecycle observation.
//!
//! The observer is installed as the driver's SDAM event handler and turns
//! server monitoring events into three lifecycle events: error,
//! disconnected and reconnected. It only logs and publishes state; it never
//! acts on the connection.

use crate::state::{ConnectionSource, ConnectionState};
use mongodb::event::sdam::{
    SdamEventHandler, ServerDescriptionChangedEvent, ServerHeartbeatFailedEvent,
};
use mongodb::ServerType;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Lifecycle event derived from server monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Error,
    Disconnected,
    Reconnected,
}

/// Number of lifecycle events seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub errors: u64,
    pub disconnects: u64,
    pub reconnects: u64,
}

#[derive(Default)]
struct Reachability {
    available: HashSet<String>,
    ever_connected: bool,
}

/// Logs lifecycle events for one connection and mirrors them into the
/// manager's state channel.
pub struct LifecycleObserver {
    source: ConnectionSource,
    state: Arc<watch::Sender<ConnectionState>>,
    reachability: Mutex<Reachability>,
    errors: AtomicU64,
    disconnects: AtomicU64,
    reconnects: AtomicU64,
}

impl LifecycleObserver {
    pub fn new(source: ConnectionSource, state: Arc<watch::Sender<ConnectionState>>) -> Self {
        Self {
            source,
            state,
            reachability: Mutex::new(Reachability::default()),
            errors: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn source(&self) -> ConnectionSource {
        self.source
    }

    pub fn counts(&self) -> EventCounts {
        EventCounts {
            errors: self.errors.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Record a link error reported for `address`.
    pub fn on_error(&self, address: &str, message: &str) -> ConnectionEvent {
        self.errors.fetch_add(1, Ordering::Relaxed);
        error!(source = %self.source, address = %address, error = %message, "Database connection error");
        ConnectionEvent::Error
    }

    /// Record that `address` became reachable or unreachable.
    ///
    /// Disconnected fires when the last reachable server is lost; reconnected
    /// fires when one comes back after that. The first discovery is silent.
    pub fn on_availability(&self, address: &str, is_available: bool) -> Option<ConnectionEvent> {
        let event = {
            let mut reach = self
                .reachability
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let was_connected = !reach.available.is_empty();
            if is_available {
                reach.available.insert(address.to_string());
            } else {
                reach.available.remove(address);
            }
            let now_connected = !reach.available.is_empty();

            let event = match (was_connected, now_connected) {
                (true, false) => Some(ConnectionEvent::Disconnected),
                (false, true) if reach.ever_connected => Some(ConnectionEvent::Reconnected),
                _ => None,
            };
            reach.ever_connected |= now_connected;
            event
        };

        match event {
            Some(ConnectionEvent::Disconnected) => {
                self.disconnects.fetch_add(1, Ordering::Relaxed);
                warn!(source = %self.source, address = %address, "Database disconnected");
                self.state.send_replace(ConnectionState::Disconnected);
            }
            Some(ConnectionEvent::Reconnected) => {
                self.reconnects.fetch_add(1, Ordering::Relaxed);
                info!(source = %self.source, address = %address, "Database reconnected");
                self.state.send_replace(ConnectionState::Connected(self.source));
            }
            _ => {}
        }

        event
    }
}

impl SdamEventHandler for LifecycleObserver {
    fn handle_server_description_changed_event(&self, event: ServerDescriptionChangedEvent) {
        let is_available = event.new_description.server_type() != ServerType::Unknown;
        self.on_availability(&event.address.to_string(), is_available);
    }

    fn handle_server_heartbeat_failed_event(&self, event: ServerHeartbeatFailedEvent) {
        self.on_error(&event.server_address.to_string(), &event.failure.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observer(source: ConnectionSource) -> (LifecycleObserver, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Connected(source));
        (LifecycleObserver::new(source, Arc::new(tx)), rx)
    }

    #[test]
    fn test_initial_discovery_is_silent() {
        let (observer, rx) = observer(ConnectionSource::Primary);

        assert_eq!(observer.on_availability("db:27017", true), None);
        assert_eq!(observer.counts(), EventCounts::default());
        assert_eq!(*rx.borrow(), ConnectionState::Connected(ConnectionSource::Primary));
    }

    #[test]
    fn test_disconnect_then_reconnect() {
        let (observer, rx) = observer(ConnectionSource::Primary);
        observer.on_availability("db:27017", true);

        assert_eq!(
            observer.on_availability("db:27017", false),
            Some(ConnectionEvent::Disconnected)
        );
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);

        assert_eq!(
            observer.on_availability("db:27017", true),
            Some(ConnectionEvent::Reconnected)
        );
        assert_eq!(*rx.borrow(), ConnectionState::Connected(ConnectionSource::Primary));

        let counts = observer.counts();
        assert_eq!(counts.disconnects, 1);
        assert_eq!(counts.reconnects, 1);
    }

    #[test]
    fn test_replica_member_loss_is_not_a_disconnect() {
        let (observer, _rx) = observer(ConnectionSource::Primary);
        observer.on_availability("a:27017", true);
        observer.on_availability("b:27017", true);

        assert_eq!(observer.on_availability("a:27017", false), None);
        assert_eq!(
            observer.on_availability("b:27017", false),
            Some(ConnectionEvent::Disconnected)
        );
    }

    #[test]
    fn test_repeated_unavailable_reports_once() {
        let (observer, _rx) = observer(ConnectionSource::Fallback);
        observer.on_availability("127.0.0.1:40000", true);

        observer.on_availability("127.0.0.1:40000", false);
        assert_eq!(observer.on_availability("127.0.0.1:40000", false), None);
        assert_eq!(observer.counts().disconnects, 1);
    }

    #[test]
    fn test_errors_are_counted() {
        let (observer, rx) = observer(ConnectionSource::Primary);

        assert_eq!(observer.on_error("db:27017", "connection reset"), ConnectionEvent::Error);
        assert_eq!(observer.on_error("db:27017", "connection reset"), ConnectionEvent::Error);

        assert_eq!(observer.counts().errors, 2);
        // Errors alone do not change state.
        assert!(rx.borrow().is_connected());
    }
}
