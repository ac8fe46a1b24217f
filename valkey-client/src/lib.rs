//! A Valkey cluster-aware client: topology discovery, request routing,
//! MOVED/ASK redirection, pipelining, transactions and Lua scripts, cluster
//! `SCAN`, and Pub/Sub push delivery, all built on [`valkey_protocol`].
//!
//! The entry point is [`Client`], built via [`ClientBuilder`]:
//!
//! ```no_run
//! # async fn run() -> Result<(), valkey_client::ClientError> {
//! let addr = valkey_client::NodeAddress::new("127.0.0.1", 7000);
//! let client = valkey_client::Client::builder(vec![addr]).build().await?;
//! client.set("key", "value").await?;
//! # Ok(())
//! # }
//! ```

mod batch;
mod client;
mod cluster_scan;
mod commands;
mod config;
mod connection;
mod errors;
mod node_client;
mod request_engine;
mod router;
mod subscription;
mod topology;
mod verb_meta;

pub use batch::{Batch, BatchOptions, RetryStrategy};
pub use client::{Client, ClientBuilder};
pub use cluster_scan::{ClusterScanCursor, ScanOptions};
pub use config::{
    BackoffConfig, ClientConfig, ClientConfigBuilder, Credentials, PeriodicChecks, ProtocolVersion, ReadFrom,
    SubscriptionConfig,
};
pub use errors::{ClientError, Result, RpcError, ServerError};
pub use router::{Destination, RoutingHint};
pub use subscription::{PushMessage, SubscriptionKind, SubscriptionSnapshot};
pub use topology::{NodeAddress, NodeId, NodeRole, TopologyMap};

pub use valkey_protocol::{Command, CommandError, DecodeError, KeySpec, Value};
