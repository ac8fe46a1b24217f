//! A connection multiplexer to one node address: reconnect with full-jitter
//! exponential backoff, and suspension until a Connection is Ready.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};
use valkey_protocol::{Command, Value};

use crate::config::{BackoffConfig, ClientConfig};
use crate::connection::{Connection, PushFrame};
use crate::errors::{ClientError, Result};
use crate::subscription::SubscriptionManager;
use crate::topology::NodeAddress;

fn full_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis().min(u64::MAX as u128) as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// A multiplexer over (by default, one) Connection to a single node.
///
/// Holds no connection itself; a background task owns the dial/handshake/
/// reconnect loop and publishes the live `Connection` (or `None`, while
/// reconnecting) through a `watch` channel that `send`/`send_many` await.
pub struct NodeClient {
    addr: NodeAddress,
    state_rx: watch::Receiver<Option<Connection>>,
    closed: Arc<AtomicBool>,
}

impl NodeClient {
    /// Spawns the reconnect-supervisor task and returns a handle to it.
    pub fn spawn(
        addr: NodeAddress,
        config: Arc<ClientConfig>,
        push_tx: Option<mpsc::UnboundedSender<PushFrame>>,
        subscriptions: Option<Arc<SubscriptionManager>>,
    ) -> NodeClient {
        let (tx, rx) = watch::channel(None);
        let closed = Arc::new(AtomicBool::new(false));
        let closed_task = closed.clone();
        let supervised_addr = addr.clone();

        tokio::spawn(async move {
            let backoff: BackoffConfig = config.reconnect_backoff;
            let mut delay = backoff.min;

            while !closed_task.load(Ordering::Acquire) {
                let snapshot = subscriptions.as_ref().map(|mgr| mgr.snapshot()).unwrap_or_default();
                match Connection::connect(supervised_addr.clone(), config.clone(), push_tx.clone(), snapshot).await {
                    Ok(conn) => {
                        info!(target: "valkey_client::node_client", node = %supervised_addr, "connected");
                        delay = backoff.min;
                        let _ = tx.send(Some(conn.clone()));
                        while conn.is_ready() && !closed_task.load(Ordering::Acquire) {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                        let _ = tx.send(None);
                    }
                    Err(e) => {
                        warn!(target: "valkey_client::node_client", node = %supervised_addr, error = %e, "dial failed");
                    }
                }
                if closed_task.load(Ordering::Acquire) {
                    break;
                }
                tokio::time::sleep(full_jitter(delay)).await;
                delay = delay.mul_f64(backoff.factor).min(backoff.max);
            }
        });

        NodeClient { addr, state_rx: rx, closed }
    }

    /// This NodeClient's node address.
    pub fn address(&self) -> &NodeAddress {
        &self.addr
    }

    /// Sends a single command, suspending until a Connection is Ready or
    /// `deadline` elapses.
    pub async fn send(&self, command: Command, deadline: Option<Instant>) -> Result<Value> {
        let conn = self.ready_connection(deadline).await?;
        conn.send(command).await
    }

    /// Sends a sequence of commands as one flush, suspending until a
    /// Connection is Ready or `deadline` elapses.
    pub async fn send_many(&self, commands: Vec<Command>, deadline: Option<Instant>) -> Result<Vec<Value>> {
        let conn = self.ready_connection(deadline).await?;
        conn.send_many(commands).await
    }

    async fn ready_connection(&self, deadline: Option<Instant>) -> Result<Connection> {
        let mut rx = self.state_rx.clone();
        loop {
            if let Some(conn) = rx.borrow().clone() {
                if conn.is_ready() {
                    return Ok(conn);
                }
            }
            match deadline {
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ClientError::NodeUnavailable);
                    }
                    if tokio::time::timeout(remaining, rx.changed()).await.is_err() {
                        return Err(ClientError::NodeUnavailable);
                    }
                }
                None => {
                    rx.changed().await.map_err(|_| ClientError::NodeUnavailable)?;
                }
            }
        }
    }

    /// Stops the reconnect supervisor; in-flight sends already holding a
    /// `Connection` still complete or fail on their own.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_jitter_never_exceeds_its_bound() {
        for _ in 0..100 {
            let d = full_jitter(Duration::from_millis(250));
            assert!(d <= Duration::from_millis(250));
        }
    }

    #[test]
    fn full_jitter_of_zero_is_zero() {
        assert_eq!(full_jitter(Duration::from_millis(0)), Duration::from_millis(0));
    }
}
