//! The public facade: a fluent [`ClientBuilder`], and [`Client`], the
//! cheap-to-clone handle callers hold.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use valkey_protocol::{Command, Value};

use crate::batch::{Batch, BatchOptions};
use crate::cluster_scan::{ClusterScanCursor, ScanOptions};
use crate::config::{
    BackoffConfig, ClientConfig, ClientConfigBuilder, Credentials, PeriodicChecks, ProtocolVersion, ReadFrom,
    SubscriptionConfig,
};
use crate::errors::Result;
use crate::request_engine::RequestEngine;
use crate::router::RoutingHint;
use crate::subscription::{PushMessage, SubscriptionKind, SubscriptionManager};
use crate::topology::{NodeAddress, TopologyMap};

/// Builds a [`Client`], one method per recognized option, delegating most
/// of them straight to [`ClientConfigBuilder`].
pub struct ClientBuilder {
    config: ClientConfigBuilder,
    on_message: Option<Box<dyn Fn(PushMessage) + Send + Sync>>,
    push_queue_capacity: usize,
}

impl ClientBuilder {
    fn new(addresses: Vec<NodeAddress>) -> Self {
        ClientBuilder {
            config: ClientConfig::builder(addresses),
            on_message: None,
            push_queue_capacity: 1024,
        }
    }

    /// Connect over TLS.
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.config = self.config.use_tls(use_tls);
        self
    }

    /// Credentials presented during handshake.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config = self.config.credentials(credentials);
        self
    }

    /// Per-attempt request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.request_timeout(timeout);
        self
    }

    /// Dial timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connection_timeout(timeout);
        self
    }

    /// Reconnect backoff bounds.
    pub fn reconnect_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config = self.config.reconnect_backoff(backoff);
        self
    }

    /// Where to route read-only commands.
    pub fn read_from(mut self, read_from: ReadFrom) -> Self {
        self.config = self.config.read_from(read_from);
        self
    }

    /// Standalone-mode database index.
    pub fn database_id(mut self, database_id: u32) -> Self {
        self.config = self.config.database_id(database_id);
        self
    }

    /// Client name set via `CLIENT SETNAME`.
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.client_name(name);
        self
    }

    /// Preferred wire protocol version.
    pub fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.config = self.config.protocol(protocol);
        self
    }

    /// Background topology-refresh cadence.
    pub fn periodic_checks(mut self, checks: PeriodicChecks) -> Self {
        self.config = self.config.periodic_checks(checks);
        self
    }

    /// Whether to run cluster discovery at all.
    pub fn cluster_mode(mut self, cluster_mode: bool) -> Self {
        self.config = self.config.cluster_mode(cluster_mode);
        self
    }

    /// Channels/patterns/sharded channels to (re-)subscribe to on every
    /// pub/sub connection.
    pub fn subscriptions(mut self, subscriptions: SubscriptionConfig) -> Self {
        self.config = self.config.subscription_config(subscriptions);
        self
    }

    /// Callback invoked for every delivered pub/sub message. Required to
    /// receive pushes at all; without it, push frames are decoded and
    /// discarded.
    pub fn on_message(mut self, callback: impl Fn(PushMessage) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(callback));
        self
    }

    /// Bound on undelivered pub/sub messages before the oldest is dropped.
    /// Default: 1024.
    pub fn push_queue_capacity(mut self, capacity: usize) -> Self {
        self.push_queue_capacity = capacity;
        self
    }

    /// Runs initial topology discovery and returns a ready [`Client`].
    pub async fn build(self) -> Result<Client> {
        let config = self.config.build();

        let subscriptions = self
            .on_message
            .map(|callback| SubscriptionManager::new(self.push_queue_capacity, move |msg| callback(msg)));
        if let (Some(mgr), Some(seed)) = (subscriptions.as_ref(), config.subscription_config.as_ref()) {
            for channel in &seed.exact {
                mgr.add(SubscriptionKind::Exact, channel.clone());
            }
            for pattern in &seed.patterns {
                mgr.add(SubscriptionKind::Pattern, pattern.clone());
            }
            for channel in &seed.sharded {
                mgr.add(SubscriptionKind::Sharded, channel.clone());
            }
        }
        let push_tx = subscriptions.as_ref().map(|mgr| mgr.push_sink());

        let engine = RequestEngine::connect(config, push_tx, subscriptions.clone()).await?;
        let refresh_task = spawn_periodic_refresh(engine.clone());

        Ok(Client { inner: Arc::new(ClientInner { engine, subscriptions, refresh_task }) })
    }
}

fn spawn_periodic_refresh(engine: RequestEngine) -> Option<JoinHandle<()>> {
    let interval = match engine.periodic_checks() {
        PeriodicChecks::Disabled => return None,
        PeriodicChecks::Enabled { interval } => interval,
    };
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let _ = engine.refresh_topology().await;
        }
    }))
}

struct ClientInner {
    engine: RequestEngine,
    subscriptions: Option<Arc<SubscriptionManager>>,
    refresh_task: Option<JoinHandle<()>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        self.engine.close();
    }
}

/// A connected, cluster-aware Valkey/Redis client. Cheap to clone: every
/// clone shares the same topology, node connections, and pub/sub state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Starts a builder seeded with `addresses` as the discovery seeds.
    pub fn builder(addresses: Vec<NodeAddress>) -> ClientBuilder {
        ClientBuilder::new(addresses)
    }

    /// The current topology snapshot.
    pub fn topology(&self) -> Arc<TopologyMap> {
        self.inner.engine.topology()
    }

    /// Forces a topology refresh.
    pub async fn refresh_topology(&self) -> Result<Arc<TopologyMap>> {
        self.inner.engine.refresh_topology().await
    }

    /// Executes a single command, routed per `hint`.
    pub async fn execute(&self, cmd: Command, hint: RoutingHint, deadline: Option<Instant>) -> Result<Value> {
        self.inner.engine.execute(cmd, hint, deadline).await
    }

    /// Runs a batch (atomic `MULTI`/`EXEC`, or a non-atomic pipeline).
    pub async fn execute_batch(&self, batch: Batch, options: BatchOptions) -> Result<Vec<Value>> {
        self.inner.engine.execute_batch(batch, options).await
    }

    /// Evaluates a Lua script by its source body, transparently managing the
    /// `EVALSHA`/`SCRIPT LOAD` cache.
    pub async fn execute_script(
        &self,
        script_body: &str,
        keys: Vec<Vec<u8>>,
        args: Vec<Vec<u8>>,
        hint: RoutingHint,
        deadline: Option<Instant>,
    ) -> Result<Value> {
        self.inner.engine.execute_script(script_body, keys, args, hint, deadline).await
    }

    /// Advances a cluster-wide key iteration by one round.
    pub async fn cluster_scan(
        &self,
        cursor: ClusterScanCursor,
        options: ScanOptions,
        deadline: Option<Instant>,
    ) -> Result<(ClusterScanCursor, Vec<Vec<u8>>)> {
        self.inner.engine.cluster_scan(cursor, options, deadline).await
    }

    /// Starts a fresh cluster-wide key iteration over the current topology.
    pub fn new_scan_cursor(&self) -> ClusterScanCursor {
        ClusterScanCursor::new(&self.topology())
    }

    /// Adds `channel` to the exact subscription set and issues `SUBSCRIBE`
    /// on a pub/sub connection, requiring [`ClientBuilder::on_message`] to
    /// have been set.
    pub async fn subscribe(&self, channel: impl Into<String>) -> Result<()> {
        self.manage_subscription(SubscriptionKind::Exact, "SUBSCRIBE", channel.into()).await
    }

    /// Adds `pattern` to the pattern subscription set and issues
    /// `PSUBSCRIBE`.
    pub async fn psubscribe(&self, pattern: impl Into<String>) -> Result<()> {
        self.manage_subscription(SubscriptionKind::Pattern, "PSUBSCRIBE", pattern.into()).await
    }

    /// Adds `channel` to the sharded subscription set and issues
    /// `SSUBSCRIBE`.
    pub async fn ssubscribe(&self, channel: impl Into<String>) -> Result<()> {
        self.manage_subscription(SubscriptionKind::Sharded, "SSUBSCRIBE", channel.into()).await
    }

    /// Removes `channel_or_pattern` from the named subscription set and
    /// issues `UNSUBSCRIBE`/`PUNSUBSCRIBE`/`SUNSUBSCRIBE`, matching `kind`.
    pub async fn unsubscribe(&self, kind: SubscriptionKind, channel_or_pattern: impl Into<String>) -> Result<()> {
        let verb = match kind {
            SubscriptionKind::Exact => "UNSUBSCRIBE",
            SubscriptionKind::Pattern => "PUNSUBSCRIBE",
            SubscriptionKind::Sharded => "SUNSUBSCRIBE",
        };
        let channel = channel_or_pattern.into();
        let mgr = self.subscription_manager()?;
        mgr.remove(kind, &channel);
        let cmd = Command::new(verb).arg(channel).build().map_err(|e| {
            crate::errors::ClientError::InvalidConfig(e.to_string())
        })?;
        self.execute(cmd, RoutingHint::RandomNode, None).await?;
        Ok(())
    }

    async fn manage_subscription(&self, kind: SubscriptionKind, verb: &'static str, channel: String) -> Result<()> {
        let mgr = self.subscription_manager()?;
        mgr.add(kind, channel.clone());
        let cmd = Command::new(verb).arg(channel).build().map_err(|e| {
            crate::errors::ClientError::InvalidConfig(e.to_string())
        })?;
        self.execute(cmd, RoutingHint::RandomNode, None).await?;
        Ok(())
    }

    /// How many pub/sub messages have been dropped because the delivery
    /// queue was full.
    pub fn dropped_message_count(&self) -> Result<u64> {
        Ok(self.subscription_manager()?.dropped_count())
    }

    fn subscription_manager(&self) -> Result<&Arc<SubscriptionManager>> {
        self.inner.subscriptions.as_ref().ok_or_else(|| {
            crate::errors::ClientError::InvalidConfig(
                "pub/sub requires ClientBuilder::on_message to be set".into(),
            )
        })
    }

    /// Stops accepting new calls, aborts the periodic refresh task, and
    /// closes every node connection.
    pub fn close(&self) {
        self.inner.engine.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_is_constructible_without_connecting() {
        let builder = Client::builder(vec![NodeAddress::new("localhost", 6379)])
            .cluster_mode(false)
            .database_id(1)
            .push_queue_capacity(4);
        assert_eq!(builder.push_queue_capacity, 4);
    }
}
