//! The per-attempt routing/redirection/retry state machine, plus the batch,
//! script, and cluster-scan orchestration built on top of it. This is the
//! one component every public operation eventually calls through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_channel::mpsc;
use rand::Rng;
use sha1::{Digest, Sha1};
use tokio::time::Instant;
use tracing::debug;
use valkey_protocol::{Command, Value};

use crate::batch::{Batch, BatchOptions};
use crate::cluster_scan::{ClusterScanCursor, ScanOptions};
use crate::config::ClientConfig;
use crate::connection::{Connection, PushFrame};
use crate::errors::{ClientError, Result};
use crate::node_client::NodeClient;
use crate::router::{self, Destination, RoutingHint};
use crate::subscription::{SubscriptionManager, SubscriptionSnapshot};
use crate::topology::{parse_cluster_shards, parse_cluster_slots, NodeAddress, NodeId, TopologyHolder, TopologyMap};
use crate::verb_meta::{lookup, ResponseAggregation};

/// The classified result of one network attempt, before either state
/// machine (single-command or script) decides what to do about it.
enum Classified {
    Ok(Value),
    /// `MOVED`/`ASK`; `asking` distinguishes the two (`ASK` does not imply a
    /// topology change, `MOVED` does).
    Redirect { asking: bool, addr: NodeAddress },
    /// `TRYAGAIN`/`CLUSTERDOWN`/`LOADING`/`MASTERDOWN`: transient, worth a
    /// topology refresh and a backoff before retrying.
    RefreshRetry(ClientError),
    /// `NOSCRIPT`, meaningful only to [`RequestEngine::execute_script`].
    NoScript,
    ServerError(ClientError),
    ConnError(ClientError),
}

async fn classify_attempt(node: &NodeClient, cmd: Command, asking: bool, deadline: Instant) -> Classified {
    let to_send =
        if asking { vec![Command::new("ASKING").build().unwrap(), cmd] } else { vec![cmd] };

    match node.send_many(to_send, Some(deadline)).await {
        Ok(mut values) => {
            let value = values.pop().expect("one reply per sent command");
            match value.as_error() {
                None => Classified::Ok(value),
                Some(("MOVED", message)) => match parse_redirect_addr(message) {
                    Ok(addr) => Classified::Redirect { asking: false, addr },
                    Err(e) => Classified::ServerError(e),
                },
                Some(("ASK", message)) => match parse_redirect_addr(message) {
                    Ok(addr) => Classified::Redirect { asking: true, addr },
                    Err(e) => Classified::ServerError(e),
                },
                Some((kind @ ("TRYAGAIN" | "CLUSTERDOWN" | "LOADING" | "MASTERDOWN"), message)) => {
                    Classified::RefreshRetry(ClientError::request_error(kind, message))
                }
                Some(("NOSCRIPT", _)) => Classified::NoScript,
                Some((kind, message)) => Classified::ServerError(ClientError::request_error(kind, message)),
            }
        }
        Err(e) => Classified::ConnError(e),
    }
}

/// Parses a `MOVED`/`ASK` error message's `"<slot> <host>:<port>"` tail.
fn parse_redirect_addr(message: &str) -> Result<NodeAddress> {
    let hostport = message
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| ClientError::InvalidConfig(format!("malformed redirection message: {message}")))?;
    let (host, port) = hostport
        .rsplit_once(':')
        .ok_or_else(|| ClientError::InvalidConfig(format!("malformed redirection address: {hostport}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ClientError::InvalidConfig(format!("malformed redirection port: {port}")))?;
    Ok(NodeAddress::new(host.to_string(), port))
}

fn sha1_hex(body: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

fn aggregate(agg: ResponseAggregation, results: Vec<Result<Value>>) -> Result<Value> {
    match agg {
        ResponseAggregation::None | ResponseAggregation::First => {
            results.into_iter().next().unwrap_or(Err(ClientError::NodeUnavailable))
        }
        ResponseAggregation::AllSucceeded => {
            let mut last = Value::Status("OK".into());
            for r in results {
                last = r?;
            }
            Ok(last)
        }
        ResponseAggregation::Sum => {
            let mut total = 0i64;
            for r in results {
                match r? {
                    Value::Int(n) => total += n,
                    other => {
                        return Err(ClientError::InvalidConfig(format!(
                            "expected an integer reply to sum, got {other:?}"
                        )))
                    }
                }
            }
            Ok(Value::Int(total))
        }
        ResponseAggregation::ArrayConcat => {
            let mut items = Vec::new();
            for r in results {
                match r? {
                    Value::Array(v) | Value::Set(v) => items.extend(v),
                    other => items.push(other),
                }
            }
            Ok(Value::Array(items))
        }
        ResponseAggregation::MapMerge => {
            let mut merged: Vec<(Value, Value)> = Vec::new();
            for r in results {
                let pairs = match r? {
                    Value::Map(pairs) => pairs,
                    Value::Array(items) => {
                        items.chunks(2).filter_map(|c| match c { [k, v] => Some((k.clone(), v.clone())), _ => None }).collect()
                    }
                    other => {
                        return Err(ClientError::InvalidConfig(format!(
                            "expected a map-shaped reply to merge, got {other:?}"
                        )))
                    }
                };
                for (k, v) in pairs {
                    match merged.iter_mut().find(|(existing, _)| *existing == k) {
                        Some(entry) => entry.1 = v,
                        None => merged.push((k, v)),
                    }
                }
            }
            Ok(Value::Map(merged))
        }
        ResponseAggregation::LogicalAnd => {
            let mut all_true = true;
            for r in results {
                all_true &= match r? {
                    Value::Bool(b) => b,
                    Value::Int(n) => n != 0,
                    Value::Status(s) => s.eq_ignore_ascii_case("OK"),
                    _ => false,
                };
            }
            Ok(Value::Bool(all_true))
        }
    }
}

async fn discover_from_seed(seed: NodeAddress, config: Arc<ClientConfig>) -> Result<TopologyMap> {
    let conn = Connection::connect(seed.clone(), config, None, SubscriptionSnapshot::default()).await?;
    let shards = Command::new("CLUSTER").arg("SHARDS").build().unwrap();
    match conn.send(shards).await {
        Ok(value) => parse_cluster_shards(&value, 0),
        Err(_) => {
            let slots = Command::new("CLUSTER").arg("SLOTS").build().unwrap();
            let value = conn.send(slots).await?;
            parse_cluster_slots(&value, 0)
        }
    }
}

async fn discover_topology(config: Arc<ClientConfig>) -> Result<TopologyMap> {
    if !config.is_cluster_mode() {
        let seed = config
            .addresses()
            .first()
            .cloned()
            .ok_or_else(|| ClientError::InvalidConfig("no seed addresses configured".into()))?;
        return Ok(TopologyMap::standalone(NodeId(seed.to_string()), seed));
    }

    let mut last_err = None;
    for seed in config.addresses() {
        match discover_from_seed(seed.clone(), config.clone()).await {
            Ok(map) => return Ok(map),
            Err(e) => {
                debug!(target: "valkey_client::request_engine", seed = %seed, error = %e, "discovery seed failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or(ClientError::NodeUnavailable))
}

/// How long a node may sit outside every slot's primary/replica set before
/// its connection is torn down, absorbing brief topology flaps without
/// reconnect churn.
const NODE_EVICTION_GRACE: Duration = Duration::from_secs(60);

struct NodeEntry {
    client: Arc<NodeClient>,
    /// When this address first stopped appearing in the topology, or `None`
    /// while it's still live.
    absent_since: Option<Instant>,
}

struct Inner {
    config: Arc<ClientConfig>,
    topology: TopologyHolder,
    nodes: StdMutex<HashMap<NodeAddress, NodeEntry>>,
    script_cache: StdMutex<HashMap<NodeAddress, std::collections::HashSet<String>>>,
    push_tx: Option<mpsc::UnboundedSender<PushFrame>>,
    subscriptions: Option<Arc<SubscriptionManager>>,
    closed: AtomicBool,
}

/// Orchestrates routing, node dispatch, and redirection/retry for every
/// public operation. Cheap to clone: all state lives behind an `Arc`.
#[derive(Clone)]
pub struct RequestEngine {
    inner: Arc<Inner>,
}

impl RequestEngine {
    /// Builds an engine for `config`, running initial topology discovery
    /// (or synthesizing a standalone map) before returning.
    pub async fn connect(
        config: ClientConfig,
        push_tx: Option<mpsc::UnboundedSender<PushFrame>>,
        subscriptions: Option<Arc<SubscriptionManager>>,
    ) -> Result<RequestEngine> {
        let config = Arc::new(config);
        let discover_config = config.clone();
        let topology = TopologyHolder::new(TopologyMap::empty(), move || {
            let config = discover_config.clone();
            Box::pin(discover_topology(config))
        });

        let engine = RequestEngine {
            inner: Arc::new(Inner {
                config,
                topology,
                nodes: StdMutex::new(HashMap::new()),
                script_cache: StdMutex::new(HashMap::new()),
                push_tx,
                subscriptions,
                closed: AtomicBool::new(false),
            }),
        };

        engine.inner.topology.refresh().await?;
        Ok(engine)
    }

    /// The current topology snapshot.
    pub fn topology(&self) -> Arc<TopologyMap> {
        self.inner.topology.current()
    }

    /// The configured background topology-refresh cadence.
    pub fn periodic_checks(&self) -> crate::config::PeriodicChecks {
        self.inner.config.periodic_checks
    }

    /// Forces a topology refresh, coalescing with any already in flight,
    /// then evicts any node connection that has sat outside the fresh
    /// topology for longer than [`NODE_EVICTION_GRACE`].
    pub async fn refresh_topology(&self) -> Result<Arc<TopologyMap>> {
        let topology = self.inner.topology.refresh().await?;
        self.prune_stale_nodes(&topology);
        Ok(topology)
    }

    fn prune_stale_nodes(&self, topology: &TopologyMap) {
        let live: std::collections::HashSet<NodeAddress> =
            topology.all_nodes().into_iter().map(|(_, addr)| addr).collect();
        let now = Instant::now();
        let mut nodes = self.inner.nodes.lock().unwrap();
        nodes.retain(|addr, entry| {
            if live.contains(addr) {
                entry.absent_since = None;
                return true;
            }
            let since = *entry.absent_since.get_or_insert(now);
            if now.duration_since(since) >= NODE_EVICTION_GRACE {
                entry.client.close();
                false
            } else {
                true
            }
        });
    }

    /// Stops accepting new calls and closes every node connection this
    /// engine opened. In-flight calls fail on their own once their
    /// connection drains.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        for entry in self.inner.nodes.lock().unwrap().values() {
            entry.client.close();
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ClientError::ClientClosed);
        }
        Ok(())
    }

    fn resolve_deadline(&self, deadline: Option<Instant>) -> Instant {
        deadline.unwrap_or_else(|| Instant::now() + self.inner.config.request_timeout())
    }

    fn node_client(&self, addr: &NodeAddress) -> Arc<NodeClient> {
        let mut nodes = self.inner.nodes.lock().unwrap();
        if let Some(existing) = nodes.get_mut(addr) {
            existing.absent_since = None;
            return existing.client.clone();
        }
        let client = Arc::new(NodeClient::spawn(
            addr.clone(),
            self.inner.config.clone(),
            self.inner.push_tx.clone(),
            self.inner.subscriptions.clone(),
        ));
        nodes.insert(addr.clone(), NodeEntry { client: client.clone(), absent_since: None });
        client
    }

    /// Full-jitter exponential backoff with a 5ms floor, doubling per
    /// `attempt` up to the configured reconnect ceiling, never sleeping past
    /// `deadline`.
    async fn retry_backoff(&self, attempt: u32, deadline: Instant) {
        let floor_ms = 5u64;
        let cap_ms = self.inner.config.reconnect_backoff.max.as_millis().min(u64::MAX as u128) as u64;
        let exp_ms = floor_ms.saturating_mul(1u64 << attempt.min(20));
        let ceiling = exp_ms.min(cap_ms).max(floor_ms);
        let jittered = rand::thread_rng().gen_range(floor_ms..=ceiling);
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(Duration::from_millis(jittered).min(remaining)).await;
    }

    /// Executes a single command, resolving `hint` against the current
    /// topology and following `MOVED`/`ASK` redirects and transient-error
    /// retries until the deadline elapses.
    pub async fn execute(&self, cmd: Command, hint: RoutingHint, deadline: Option<Instant>) -> Result<Value> {
        self.check_open()?;
        let deadline = self.resolve_deadline(deadline);
        self.execute_single(cmd, hint, deadline).await
    }

    async fn execute_single(&self, cmd: Command, mut hint: RoutingHint, deadline: Instant) -> Result<Value> {
        let started = Instant::now();
        let mut server_retries = 3u32;
        let mut conn_retries = 3u32;
        let mut redirect_retries = 3u32;
        let mut asking = false;
        let mut last_err: Option<ClientError> = None;

        loop {
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout { elapsed: started.elapsed(), last_cause: last_err.map(Box::new) });
            }

            let topology = self.inner.topology.current();
            let addr = match router::resolve(&cmd, &hint, &topology, &self.inner.config.read_from)? {
                Destination::Single(addr) => addr,
                Destination::FanOut(addrs) => return self.execute_fanout(&cmd, addrs, deadline).await,
            };
            let node = self.node_client(&addr);
            let attempt_asking = std::mem::take(&mut asking);

            match classify_attempt(&node, cmd.clone(), attempt_asking, deadline).await {
                Classified::Ok(value) => return Ok(value),
                Classified::Redirect { asking: is_ask, addr: target } => {
                    if !is_ask {
                        self.inner.topology.refresh().await.ok();
                    }
                    if redirect_retries == 0 {
                        return Err(ClientError::RedirectionError(target));
                    }
                    redirect_retries -= 1;
                    last_err = Some(ClientError::RedirectionError(target.clone()));
                    hint = RoutingHint::ByAddress(target.host, target.port);
                    asking = is_ask;
                }
                Classified::RefreshRetry(e) => {
                    if server_retries == 0 {
                        return Err(e);
                    }
                    server_retries -= 1;
                    self.inner.topology.refresh().await.ok();
                    last_err = Some(e);
                    self.retry_backoff(3 - server_retries, deadline).await;
                }
                Classified::NoScript => {
                    return Err(ClientError::request_error("NOSCRIPT", "No matching script"));
                }
                Classified::ServerError(e) => return Err(e),
                Classified::ConnError(e) => {
                    if conn_retries == 0 {
                        return Err(e);
                    }
                    conn_retries -= 1;
                    last_err = Some(e);
                    self.retry_backoff(3 - conn_retries, deadline).await;
                }
            }
        }
    }

    async fn execute_fanout(&self, cmd: &Command, addrs: Vec<NodeAddress>, deadline: Instant) -> Result<Value> {
        let meta = lookup(cmd.verb());
        let mut futures = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let node = self.node_client(&addr);
            let cmd = cmd.clone();
            futures.push(async move { node.send(cmd, Some(deadline)).await });
        }
        let results = futures_util::future::join_all(futures).await;
        aggregate(meta.response_aggregation, results)
    }

    /// Runs `batch` (atomic via `MULTI`/`EXEC`, or a non-atomic pipeline),
    /// returning one reply per accumulated command, in order.
    pub async fn execute_batch(&self, batch: Batch, options: BatchOptions) -> Result<Vec<Value>> {
        self.check_open()?;
        batch.validate()?;
        options.validate_for(batch.is_atomic())?;
        let deadline = self.resolve_deadline(
            options.timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms as u64)),
        );
        if batch.is_atomic() {
            self.execute_atomic_batch(&batch, &options, deadline).await
        } else {
            self.execute_pipeline(&batch, &options, deadline).await
        }
    }

    async fn execute_atomic_batch(&self, batch: &Batch, options: &BatchOptions, deadline: Instant) -> Result<Vec<Value>> {
        let hint = options.route.clone().unwrap_or_default();
        let mut redirect_retries = 3u32;
        let started = Instant::now();

        loop {
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout { elapsed: started.elapsed(), last_cause: None });
            }

            let topology = self.inner.topology.current();
            let addr = router::resolve_atomic_batch(batch.commands(), &hint, &topology, &self.inner.config.read_from)?;
            let node = self.node_client(&addr);

            let mut wire = Vec::with_capacity(batch.watch_keys().len() + batch.commands().len() + 2);
            for key in batch.watch_keys() {
                wire.push(Command::new("WATCH").arg(key.clone()).build().unwrap());
            }
            wire.push(Command::new("MULTI").build().unwrap());
            wire.extend(batch.commands().iter().cloned());
            wire.push(Command::new("EXEC").build().unwrap());

            match node.send_many(wire, Some(deadline)).await {
                Ok(mut replies) => {
                    let exec_reply = replies.pop().expect("EXEC reply is always the last element");
                    return match exec_reply {
                        // A watched key was modified: EXEC returns a null array, not an
                        // error. Surfaced the same way to the caller.
                        Value::Nil => Ok(vec![Value::Nil]),
                        Value::Array(items) | Value::Set(items) => Ok(items),
                        other => Err(ClientError::InvalidConfig(format!(
                            "EXEC returned an unexpected reply shape: {other:?}"
                        ))),
                    };
                }
                Err(ClientError::RequestError(e)) if e.kind == "MOVED" => {
                    self.inner.topology.refresh().await.ok();
                    if redirect_retries == 0 {
                        return Err(ClientError::RequestError(e));
                    }
                    redirect_retries -= 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute_pipeline(&self, batch: &Batch, options: &BatchOptions, deadline: Instant) -> Result<Vec<Value>> {
        let commands = batch.commands().to_vec();
        let mut results: Vec<Option<Value>> = vec![None; commands.len()];
        let mut pending: Vec<usize> = (0..commands.len()).collect();
        let mut server_retries = 3u32;
        let mut conn_retries = 3u32;
        let mut rounds_left = 10u32;
        let started = Instant::now();

        while !pending.is_empty() {
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout { elapsed: started.elapsed(), last_cause: None });
            }
            if rounds_left == 0 {
                return Err(ClientError::InvalidConfig(
                    "pipeline exceeded its redirection/retry round budget".into(),
                ));
            }
            rounds_left -= 1;

            let topology = self.inner.topology.current();
            let hint = options.route.clone().unwrap_or_default();
            let mut groups: HashMap<NodeAddress, Vec<usize>> = HashMap::new();
            for idx in pending.drain(..) {
                match router::resolve(&commands[idx], &hint, &topology, &self.inner.config.read_from)? {
                    Destination::Single(addr) => groups.entry(addr).or_default().push(idx),
                    Destination::FanOut(_) => {
                        return Err(ClientError::InvalidConfig(
                            "pipeline commands must resolve to a single node".into(),
                        ))
                    }
                }
            }

            let mut group_futures = Vec::with_capacity(groups.len());
            for (addr, idxs) in groups {
                let node = self.node_client(&addr);
                let cmds: Vec<Command> = idxs.iter().map(|&i| commands[i].clone()).collect();
                group_futures.push(async move { (idxs, node.send_many(cmds, Some(deadline)).await) });
            }
            let group_results = futures_util::future::join_all(group_futures).await;

            let mut needs_refresh = false;
            let mut server_retry_used = false;
            let mut conn_retry_used = false;

            for (idxs, outcome) in group_results {
                match outcome {
                    Ok(values) => {
                        for (i, value) in idxs.into_iter().zip(values) {
                            match value.as_error() {
                                Some(("MOVED", _)) => {
                                    needs_refresh = true;
                                    pending.push(i);
                                }
                                Some((kind, _message))
                                    if matches!(kind, "TRYAGAIN" | "CLUSTERDOWN" | "LOADING" | "MASTERDOWN")
                                        && options.retry_strategy.retry_server_error
                                        && server_retries > 0 =>
                                {
                                    needs_refresh = true;
                                    server_retry_used = true;
                                    pending.push(i);
                                }
                                Some((kind, message)) => {
                                    if options.raise_on_error {
                                        return Err(ClientError::request_error(kind, message));
                                    }
                                    results[i] = Some(value);
                                }
                                None => results[i] = Some(value),
                            }
                        }
                    }
                    Err(e) => {
                        if options.retry_strategy.retry_connection_error && conn_retries > 0 {
                            conn_retry_used = true;
                            pending.extend(idxs);
                        } else if options.raise_on_error {
                            return Err(e);
                        } else {
                            for i in idxs {
                                results[i] = Some(Value::Error("CONNECTION".into(), e.to_string()));
                            }
                        }
                    }
                }
            }

            if needs_refresh {
                self.inner.topology.refresh().await.ok();
            }
            if server_retry_used {
                server_retries -= 1;
            }
            if conn_retry_used {
                conn_retries -= 1;
            }
            if !pending.is_empty() {
                self.retry_backoff(10 - rounds_left, deadline).await;
            }
        }

        Ok(results.into_iter().map(|v| v.unwrap_or(Value::Nil)).collect())
    }

    /// Evaluates a Lua script by hash, loading it via `SCRIPT LOAD` and
    /// retrying once on `NOSCRIPT`.
    pub async fn execute_script(
        &self,
        script_body: &str,
        keys: Vec<Vec<u8>>,
        args: Vec<Vec<u8>>,
        hint: RoutingHint,
        deadline: Option<Instant>,
    ) -> Result<Value> {
        self.check_open()?;
        let deadline = self.resolve_deadline(deadline);
        let hash = sha1_hex(script_body);

        let mut hint = match hint {
            RoutingHint::Default if !keys.is_empty() => {
                let slot = valkey_protocol::common_slot(keys.iter().map(|k| k.as_slice()))
                    .map_err(|(a, b)| ClientError::CrossSlot(a, b))?
                    .expect("non-empty keys always produce a slot");
                RoutingHint::SlotId(slot)
            }
            RoutingHint::Default => RoutingHint::RandomNode,
            other => other,
        };

        let mut evalsha = Command::new("EVALSHA").arg(hash.clone()).arg(keys.len().to_string());
        evalsha = evalsha.args(keys);
        evalsha = evalsha.args(args);
        let evalsha_cmd = evalsha.build().map_err(|e| ClientError::InvalidConfig(e.to_string()))?;

        let started = Instant::now();
        let mut server_retries = 3u32;
        let mut conn_retries = 3u32;
        let mut redirect_retries = 3u32;
        let mut asking = false;
        let mut reloaded = false;
        let mut last_err: Option<ClientError> = None;

        loop {
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout { elapsed: started.elapsed(), last_cause: last_err.map(Box::new) });
            }

            let topology = self.inner.topology.current();
            let addr = match router::resolve(&evalsha_cmd, &hint, &topology, &self.inner.config.read_from)? {
                Destination::Single(addr) => addr,
                Destination::FanOut(_) => {
                    return Err(ClientError::InvalidConfig("scripts must route to a single node".into()))
                }
            };
            let node = self.node_client(&addr);
            let attempt_asking = std::mem::take(&mut asking);

            match classify_attempt(&node, evalsha_cmd.clone(), attempt_asking, deadline).await {
                Classified::Ok(value) => return Ok(value),
                Classified::Redirect { asking: is_ask, addr: target } => {
                    if !is_ask {
                        self.inner.topology.refresh().await.ok();
                    }
                    if redirect_retries == 0 {
                        return Err(ClientError::RedirectionError(target));
                    }
                    redirect_retries -= 1;
                    last_err = Some(ClientError::RedirectionError(target.clone()));
                    hint = RoutingHint::ByAddress(target.host, target.port);
                    asking = is_ask;
                }
                Classified::RefreshRetry(e) => {
                    if server_retries == 0 {
                        return Err(e);
                    }
                    server_retries -= 1;
                    self.inner.topology.refresh().await.ok();
                    last_err = Some(e);
                    self.retry_backoff(3 - server_retries, deadline).await;
                }
                Classified::NoScript => {
                    if reloaded {
                        return Err(ClientError::request_error("NOSCRIPT", "script reload did not take"));
                    }
                    reloaded = true;
                    self.load_script(&node, &addr, script_body, &hash).await?;
                }
                Classified::ServerError(e) => return Err(e),
                Classified::ConnError(e) => {
                    if conn_retries == 0 {
                        return Err(e);
                    }
                    conn_retries -= 1;
                    last_err = Some(e);
                    self.retry_backoff(3 - conn_retries, deadline).await;
                }
            }
        }
    }

    async fn load_script(&self, node: &NodeClient, addr: &NodeAddress, body: &str, hash: &str) -> Result<()> {
        let cmd = Command::new("SCRIPT").arg("LOAD").arg(body.to_string()).build().unwrap();
        node.send(cmd, None).await?;
        self.inner.script_cache.lock().unwrap().entry(addr.clone()).or_default().insert(hash.to_string());
        Ok(())
    }

    /// Advances a cluster-wide key iteration by one `SCAN` call against the
    /// cursor's next not-yet-finished node.
    pub async fn cluster_scan(
        &self,
        mut cursor: ClusterScanCursor,
        options: ScanOptions,
        deadline: Option<Instant>,
    ) -> Result<(ClusterScanCursor, Vec<Vec<u8>>)> {
        self.check_open()?;
        let deadline = self.resolve_deadline(deadline);

        let Some(node_id) = cursor.next_node() else {
            return Ok((cursor, Vec::new()));
        };
        let topology = self.inner.topology.current();
        let Some(addr) = topology.address_of(&node_id) else {
            cursor.record_result(node_id, 0);
            return Ok((cursor, Vec::new()));
        };
        let node = self.node_client(addr);

        let mut builder = Command::new("SCAN").arg(cursor.cursor_for(&node_id).to_string());
        if let Some(pattern) = &options.match_pattern {
            builder = builder.arg("MATCH").arg(pattern.clone());
        }
        if let Some(count) = options.count {
            builder = builder.arg("COUNT").arg(count.to_string());
        }
        if let Some(type_filter) = &options.type_filter {
            builder = builder.arg("TYPE").arg(type_filter.clone());
        }
        let cmd = builder.build().map_err(|e| ClientError::InvalidConfig(e.to_string()))?;

        let reply = node.send(cmd, Some(deadline)).await?;
        let items = reply.as_sequence().ok_or_else(|| ClientError::InvalidConfig("SCAN did not return an array".into()))?;
        let [cursor_value, keys_value] = items else {
            return Err(ClientError::InvalidConfig(
                "SCAN reply did not have the expected two-element shape".into(),
            ));
        };
        let next_cursor: u64 = cursor_value
            .as_bytes()
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ClientError::InvalidConfig("SCAN cursor was not a numeric bulk string".into()))?;
        let keys: Vec<Vec<u8>> = keys_value
            .as_sequence()
            .unwrap_or(&[])
            .iter()
            .filter_map(|v| v.as_bytes().map(|b| b.to_vec()))
            .collect();

        cursor.record_result(node_id, next_cursor);
        Ok((cursor, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_hex_matches_known_vector() {
        // SHA1("redis.call('get', KEYS[1])") computed independently.
        assert_eq!(sha1_hex(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn parse_redirect_addr_reads_host_and_port() {
        let addr = parse_redirect_addr("3999 127.0.0.1:6381").unwrap();
        assert_eq!(addr, NodeAddress::new("127.0.0.1", 6381));
    }

    #[test]
    fn parse_redirect_addr_rejects_malformed_message() {
        assert!(parse_redirect_addr("only-one-token").is_err());
        assert!(parse_redirect_addr("3999 no-port-here").is_err());
    }

    #[test]
    fn aggregate_sum_adds_integers() {
        let results = vec![Ok(Value::Int(2)), Ok(Value::Int(3))];
        assert_eq!(aggregate(ResponseAggregation::Sum, results).unwrap(), Value::Int(5));
    }

    #[test]
    fn aggregate_sum_propagates_first_error() {
        let err = ClientError::request_error("ERR", "boom");
        let results = vec![Ok(Value::Int(2)), Err(err)];
        assert!(aggregate(ResponseAggregation::Sum, results).is_err());
    }

    #[test]
    fn aggregate_array_concat_flattens_every_node() {
        let results = vec![
            Ok(Value::Array(vec![Value::bulk(b"a".to_vec())])),
            Ok(Value::Array(vec![Value::bulk(b"b".to_vec())])),
        ];
        match aggregate(ResponseAggregation::ArrayConcat, results).unwrap() {
            Value::Array(items) => assert_eq!(items.len(), 2),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn aggregate_map_merge_prefers_last_writer() {
        let first = Value::Map(vec![(Value::bulk(b"maxmemory".to_vec()), Value::bulk(b"100".to_vec()))]);
        let second = Value::Map(vec![(Value::bulk(b"maxmemory".to_vec()), Value::bulk(b"200".to_vec()))]);
        match aggregate(ResponseAggregation::MapMerge, vec![Ok(first), Ok(second)]).unwrap() {
            Value::Map(pairs) => {
                assert_eq!(pairs.len(), 1);
                assert_eq!(pairs[0].1, Value::bulk(b"200".to_vec()));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn aggregate_all_succeeded_requires_every_node_to_succeed() {
        let err = ClientError::request_error("ERR", "boom");
        let results = vec![Ok(Value::Status("OK".into())), Err(err)];
        assert!(aggregate(ResponseAggregation::AllSucceeded, results).is_err());
    }
}
