//! Fake driver and fallback backends for manager tests.

#![allow(dead_code)]

use async_trait::async_trait;
use harbor_database::{
    ActiveConnection, ConnectionTarget, Connector, DatabaseConfig, DatabaseError, DatabaseResult,
    FallbackLauncher, FallbackServer, LifecycleObserver,
};
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

pub const PRIMARY_URI: &str = "mongodb://primary.test:27017/app";
pub const FALLBACK_URI: &str = "mongodb://127.0.0.1:45017/";

pub fn config() -> DatabaseConfig {
    DatabaseConfig::default().with_uri(PRIMARY_URI)
}

pub struct FakeConnection {
    host: String,
    fail_close: bool,
    pub closed: AtomicBool,
}

#[async_trait]
impl ActiveConnection for FakeConnection {
    fn host(&self) -> String {
        self.host.clone()
    }

    async fn ping(&self) -> DatabaseResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatabaseError::Connection("connection closed".into()));
        }
        Ok(())
    }

    async fn close(&self) -> DatabaseResult<()> {
        if self.fail_close {
            return Err(DatabaseError::Connection("close interrupted".into()));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Succeeds for reachable URIs once `failures_before_success` attempts have failed.
#[derive(Default)]
pub struct FakeConnector {
    reachable: Mutex<HashSet<String>>,
    failures_before_success: AtomicU32,
    fail_close: AtomicBool,
    delay: Option<Duration>,
    pub attempts: Mutex<Vec<String>>,
    pub observers: Mutex<Vec<Arc<LifecycleObserver>>>,
    pub connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reachable(self, uri: &str) -> Self {
        self.reachable.lock().unwrap().insert(uri.to_string());
        self
    }

    pub fn failing_first(self, failures: u32) -> Self {
        self.failures_before_success.store(failures, Ordering::SeqCst);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_close(self) -> Self {
        self.fail_close.store(true, Ordering::SeqCst);
        self
    }

    pub fn attempts_for(&self, uri: &str) -> usize {
        self.attempts.lock().unwrap().iter().filter(|a| *a == uri).count()
    }

    pub fn last_connection(&self) -> Arc<FakeConnection> {
        self.connections.lock().unwrap().last().cloned().expect("no connection made")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        target: &ConnectionTarget,
        observer: Arc<LifecycleObserver>,
    ) -> DatabaseResult<Arc<dyn ActiveConnection>> {
        self.attempts.lock().unwrap().push(target.uri().to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let pending_failure = self
            .failures_before_success
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let reachable = self.reachable.lock().unwrap().contains(target.uri());

        if pending_failure || !reachable {
            return Err(DatabaseError::Connection(format!(
                "connect ECONNREFUSED {}",
                target.hosts().join(",")
            )));
        }

        self.observers.lock().unwrap().push(observer);
        let connection = Arc::new(FakeConnection {
            host: target.hosts().join(","),
            fail_close: self.fail_close.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
        });
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

pub struct FakeServer {
    uri: String,
    stops: Arc<AtomicU32>,
}

#[async_trait]
impl FallbackServer for FakeServer {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn stop(&self) -> DatabaseResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts launches; optionally slow or failing.
#[derive(Default)]
pub struct FakeLauncher {
    pub launches: AtomicU32,
    pub stops: Arc<AtomicU32>,
    delay: Option<Duration>,
    fail: bool,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FallbackLauncher for FakeLauncher {
    async fn launch(&self) -> DatabaseResult<Box<dyn FallbackServer>> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(DatabaseError::Launch("mongod binary not found".into()));
        }

        Ok(Box::new(FakeServer {
            uri: FALLBACK_URI.to_string(),
            stops: Arc::clone(&self.stops),
        }))
    }
}

/// Shared buffer a `tracing` fmt subscriber writes into.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .finish()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
