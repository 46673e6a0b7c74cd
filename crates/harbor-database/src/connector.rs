//! Driver seam: establishing and releasing a verified connection.

use crate::config::{ConnectionOptions, ConnectionTarget, WriteAcknowledgment};
use crate::error::{DatabaseError, DatabaseResult};
use crate::observer::LifecycleObserver;
use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::event::sdam::SdamEventHandler;
use mongodb::options::{Acknowledgment, ClientOptions, WriteConcern};
use mongodb::Client;
use std::sync::Arc;
use tracing::{debug, instrument};

/// An established, verified connection.
#[async_trait]
pub trait ActiveConnection: Send + Sync {
    /// Host the connection was made to.
    fn host(&self) -> String;

    /// Driver client, when backed by a real driver.
    fn client(&self) -> Option<Client> {
        None
    }

    /// Single round trip to the server.
    async fn ping(&self) -> DatabaseResult<()>;

    /// Release the connection.
    async fn close(&self) -> DatabaseResult<()>;
}

/// Opens connections to a target.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `target`, installing `observer` for lifecycle events.
    async fn connect(
        &self,
        target: &ConnectionTarget,
        observer: Arc<LifecycleObserver>,
    ) -> DatabaseResult<Arc<dyn ActiveConnection>>;
}

impl ConnectionOptions {
    /// Copy this option set onto driver options.
    pub fn apply(&self, options: &mut ClientOptions) {
        options.max_pool_size = Some(self.max_pool_size);
        options.min_pool_size = Some(self.min_pool_size);
        options.server_selection_timeout = Some(self.server_selection_timeout());
        options.connect_timeout = Some(self.connect_timeout());
        options.heartbeat_freq = Some(self.heartbeat_interval());
        options.max_idle_time = Some(self.max_idle_time());
        options.retry_writes = Some(self.retry_writes);

        let w = match self.write_concern {
            WriteAcknowledgment::Majority => Acknowledgment::Majority,
            WriteAcknowledgment::Nodes(n) => Acknowledgment::Nodes(n),
        };
        options.write_concern = Some(WriteConcern::builder().w(w).build());
    }
}

/// Connector backed by the official MongoDB driver.
#[derive(Debug, Default, Clone)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for MongoConnector {
    #[instrument(skip_all, fields(uri = %target.redacted()))]
    async fn connect(
        &self,
        target: &ConnectionTarget,
        observer: Arc<LifecycleObserver>,
    ) -> DatabaseResult<Arc<dyn ActiveConnection>> {
        let mut client_options = ClientOptions::parse(target.uri())
            .await
            .map_err(|e| DatabaseError::InvalidUri(e.to_string()))?;
        target.options().apply(&mut client_options);

        let handler: Arc<dyn SdamEventHandler> = observer;
        client_options.sdam_event_handler = Some(handler);

        let host = client_options
            .hosts
            .first()
            .map(ToString::to_string)
            .unwrap_or_else(|| target.hosts().join(","));

        let client = Client::with_options(client_options)?;
        let connection = MongoConnection {
            client,
            host,
            socket_timeout: target.options().socket_timeout(),
        };

        // Client construction is lazy; verify the server is actually reachable.
        connection.ping().await?;
        debug!(host = %connection.host, "Connection verified");

        Ok(Arc::new(connection))
    }
}

/// Connection held through a driver [`Client`].
pub struct MongoConnection {
    client: Client,
    host: String,
    socket_timeout: std::time::Duration,
}

#[async_trait]
impl ActiveConnection for MongoConnection {
    fn host(&self) -> String {
        self.host.clone()
    }

    fn client(&self) -> Option<Client> {
        Some(self.client.clone())
    }

    async fn ping(&self) -> DatabaseResult<()> {
        let admin = self.client.database("admin");
        let ping = admin.run_command(doc! { "ping": 1 }, None);

        tokio::time::timeout(self.socket_timeout, ping)
            .await
            .map_err(|_| DatabaseError::Timeout(self.socket_timeout))??;

        Ok(())
    }

    async fn close(&self) -> DatabaseResult<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}
