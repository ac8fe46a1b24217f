//! Client configuration via a fluent builder, one method per option.

use std::time::Duration;

use crate::topology::NodeAddress;

/// Wire protocol preference for the initial `HELLO` handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// Prefer RESP3, falling back to RESP2 if the server refuses `HELLO 3`.
    #[default]
    Resp3,
    /// RESP2 only.
    Resp2,
}

/// Where read-only commands may be routed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReadFrom {
    /// Always route to the slot's primary.
    #[default]
    Primary,
    /// Prefer a replica, falling back to the primary if none is Ready.
    PreferReplica,
    /// Prefer a replica in the given availability zone.
    AzAffinity(String),
}

/// Username/password credentials presented during handshake.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Username, or `None` for the default user (pre-ACL `AUTH password`).
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

/// Reconnect backoff parameters: full-jitter exponential between `min` and
/// `max`, scaled by `factor` each attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Floor of the backoff range.
    pub min: Duration,
    /// Ceiling of the backoff range.
    pub max: Duration,
    /// Multiplier applied to the previous delay before jitter.
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig { min: Duration::from_millis(100), max: Duration::from_secs(10), factor: 2.0 }
    }
}

/// Periodic topology-refresh cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicChecks {
    /// No background refresh; topology only changes on event-driven
    /// triggers.
    Disabled,
    /// Refresh every `interval`.
    Enabled {
        /// How often to refresh.
        interval: Duration,
    },
}

impl Default for PeriodicChecks {
    fn default() -> Self {
        PeriodicChecks::Enabled { interval: Duration::from_secs(10) }
    }
}

/// Subscription set to (re-)establish on every connection used for pub/sub,
/// including after a reconnect.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionConfig {
    /// Exact channel names.
    pub exact: Vec<String>,
    /// Glob patterns.
    pub patterns: Vec<String>,
    /// Cluster-sharded channel names.
    pub sharded: Vec<String>,
}

/// Fully resolved client configuration. Build one with [`ClientConfigBuilder`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) addresses: Vec<NodeAddress>,
    pub(crate) use_tls: bool,
    pub(crate) credentials: Credentials,
    pub(crate) request_timeout: Duration,
    pub(crate) connection_timeout: Duration,
    pub(crate) reconnect_backoff: BackoffConfig,
    pub(crate) read_from: ReadFrom,
    pub(crate) database_id: u32,
    pub(crate) client_name: Option<String>,
    pub(crate) protocol: ProtocolVersion,
    pub(crate) subscription_config: Option<SubscriptionConfig>,
    pub(crate) periodic_checks: PeriodicChecks,
    pub(crate) cluster_mode: bool,
}

impl ClientConfig {
    /// Starts a builder seeded with `addresses` as the discovery seeds.
    pub fn builder(addresses: Vec<NodeAddress>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig {
                addresses,
                use_tls: false,
                credentials: Credentials::default(),
                request_timeout: Duration::from_millis(250),
                connection_timeout: Duration::from_millis(250),
                reconnect_backoff: BackoffConfig::default(),
                read_from: ReadFrom::default(),
                database_id: 0,
                client_name: None,
                protocol: ProtocolVersion::default(),
                subscription_config: None,
                periodic_checks: PeriodicChecks::default(),
                cluster_mode: true,
            },
        }
    }

    /// The seed addresses given at construction.
    pub fn addresses(&self) -> &[NodeAddress] {
        &self.addresses
    }

    /// `true` if this configuration targets a cluster (as opposed to a
    /// single standalone node).
    pub fn is_cluster_mode(&self) -> bool {
        self.cluster_mode
    }

    /// Per-attempt request timeout, used as the default deadline when a
    /// caller does not supply one.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// Fluent builder for [`ClientConfig`], one method per recognized option.
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Connect over TLS. Default: `false`.
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.config.use_tls = use_tls;
        self
    }

    /// Credentials presented during handshake.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    /// Per-attempt request timeout. Default: 250 ms.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Dial timeout. Default: 250 ms.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Reconnect backoff bounds. Default: 100 ms .. 10 s, factor 2.0.
    pub fn reconnect_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.reconnect_backoff = backoff;
        self
    }

    /// Where to route read-only commands. Default: `Primary`.
    pub fn read_from(mut self, read_from: ReadFrom) -> Self {
        self.config.read_from = read_from;
        self
    }

    /// Standalone-mode database index selected via `SELECT` at handshake.
    pub fn database_id(mut self, database_id: u32) -> Self {
        self.config.database_id = database_id;
        self
    }

    /// Client name set via `CLIENT SETNAME` at handshake.
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = Some(name.into());
        self
    }

    /// Preferred wire protocol version. Default: RESP3 with RESP2 fallback.
    pub fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Subscriptions to establish (and re-establish after reconnect) on
    /// every pub/sub connection.
    pub fn subscription_config(mut self, subscriptions: SubscriptionConfig) -> Self {
        self.config.subscription_config = Some(subscriptions);
        self
    }

    /// Background topology-refresh cadence. Default: every 10 s.
    pub fn periodic_checks(mut self, checks: PeriodicChecks) -> Self {
        self.config.periodic_checks = checks;
        self
    }

    /// Whether to run cluster discovery at all. `false` skips discovery
    /// entirely and uses a single synthetic slot→seed mapping.
    pub fn cluster_mode(mut self, cluster_mode: bool) -> Self {
        self.config.cluster_mode = cluster_mode;
        self
    }

    /// Finalizes the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ClientConfig::builder(vec![NodeAddress::new("localhost", 6379)]).build();
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.connection_timeout, Duration::from_millis(250));
        assert_eq!(config.reconnect_backoff, BackoffConfig::default());
        assert_eq!(config.read_from, ReadFrom::Primary);
        assert_eq!(config.protocol, ProtocolVersion::Resp3);
        assert_eq!(config.periodic_checks, PeriodicChecks::Enabled { interval: Duration::from_secs(10) });
        assert!(config.cluster_mode);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = ClientConfig::builder(vec![NodeAddress::new("localhost", 7000)])
            .use_tls(true)
            .database_id(3)
            .cluster_mode(false)
            .client_name("tester")
            .build();
        assert!(config.use_tls);
        assert_eq!(config.database_id, 3);
        assert!(!config.cluster_mode);
        assert_eq!(config.client_name.as_deref(), Some("tester"));
    }
}
