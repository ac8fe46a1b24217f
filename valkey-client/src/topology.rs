//! The cluster topology snapshot: slot ownership, node addresses, and the
//! atomically-swapped holder that lets every in-flight request read a
//! consistent view without locking.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex as AsyncMutex;
use valkey_protocol::{Value, SLOT_COUNT};

use crate::errors::{ClientError, Result};

/// A cluster node's stable identity, learned from `CLUSTER SHARDS`/`CLUSTER
/// SLOTS`. Stays constant across reconnects even as `host`/`port` change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reachable `(host, port)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl NodeAddress {
    /// Builds an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        NodeAddress { host: host.into(), port }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Which role a node plays for a slot range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Owns the slot range and serves writes.
    Primary,
    /// Mirrors a primary; may serve reads if the client opts in.
    Replica,
}

/// An immutable point-in-time view of cluster (or standalone) topology.
///
/// `version` is monotonically increasing across refreshes; a request that
/// captured a given `Arc<TopologyMap>` keeps it alive (and readable) for
/// its whole attempt even after a newer snapshot replaces it in the
/// holder.
#[derive(Debug, Clone)]
pub struct TopologyMap {
    /// Monotonically increasing snapshot version.
    pub version: u64,
    slots: Vec<Option<NodeId>>,
    primaries: HashMap<NodeId, NodeAddress>,
    replicas: HashMap<NodeId, Vec<NodeAddress>>,
}

impl TopologyMap {
    /// An empty map at version 0 — the initial state before first
    /// discovery completes.
    pub fn empty() -> Self {
        TopologyMap {
            version: 0,
            slots: vec![None; SLOT_COUNT as usize],
            primaries: HashMap::new(),
            replicas: HashMap::new(),
        }
    }

    /// A synthetic single-node map for standalone mode: every slot maps to
    /// the one seed address.
    pub fn standalone(id: NodeId, addr: NodeAddress) -> Self {
        let mut primaries = HashMap::new();
        primaries.insert(id.clone(), addr);
        TopologyMap {
            version: 1,
            slots: vec![Some(id); SLOT_COUNT as usize],
            primaries,
            replicas: HashMap::new(),
        }
    }

    /// The node id owning `slot`, if any.
    pub fn owner(&self, slot: u16) -> Option<&NodeId> {
        self.slots.get(slot as usize).and_then(|o| o.as_ref())
    }

    /// The primary address serving `slot`.
    pub fn primary_for_slot(&self, slot: u16) -> Option<&NodeAddress> {
        self.owner(slot).and_then(|id| self.primaries.get(id))
    }

    /// The replica addresses mirroring the primary for `slot`.
    pub fn replicas_for_slot(&self, slot: u16) -> &[NodeAddress] {
        self.owner(slot)
            .and_then(|id| self.replicas.get(id))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Every known primary, as `(id, address)` pairs.
    pub fn primaries(&self) -> impl Iterator<Item = (&NodeId, &NodeAddress)> {
        self.primaries.iter()
    }

    /// Every known node (primaries and replicas), as `(id, address)` pairs.
    pub fn all_nodes(&self) -> Vec<(NodeId, NodeAddress)> {
        let mut nodes: Vec<(NodeId, NodeAddress)> =
            self.primaries.iter().map(|(id, addr)| (id.clone(), addr.clone())).collect();
        for (id, addrs) in &self.replicas {
            for addr in addrs {
                nodes.push((id.clone(), addr.clone()));
            }
        }
        nodes
    }

    /// The address registered for `id`, checking primaries then replicas.
    pub fn address_of(&self, id: &NodeId) -> Option<&NodeAddress> {
        self.primaries
            .get(id)
            .or_else(|| self.replicas.get(id).and_then(|addrs| addrs.first()))
    }

    /// `true` if `addr` names a node present in this snapshot, in either
    /// role.
    pub fn contains_address(&self, addr: &NodeAddress) -> bool {
        self.primaries.values().any(|a| a == addr)
            || self.replicas.values().any(|addrs| addrs.contains(addr))
    }

    fn builder(version: u64) -> TopologyMapBuilder {
        TopologyMapBuilder {
            version,
            slots: vec![None; SLOT_COUNT as usize],
            primaries: HashMap::new(),
            replicas: HashMap::new(),
        }
    }
}

struct TopologyMapBuilder {
    version: u64,
    slots: Vec<Option<NodeId>>,
    primaries: HashMap<NodeId, NodeAddress>,
    replicas: HashMap<NodeId, Vec<NodeAddress>>,
}

impl TopologyMapBuilder {
    fn add_range(&mut self, id: &NodeId, start: u16, end: u16) {
        for slot in start..=end {
            self.slots[slot as usize] = Some(id.clone());
        }
    }

    fn add_node(&mut self, id: NodeId, addr: NodeAddress, role: NodeRole) {
        match role {
            NodeRole::Primary => {
                self.primaries.insert(id, addr);
            }
            NodeRole::Replica => {
                self.replicas.entry(id).or_default().push(addr);
            }
        }
    }

    fn build(self) -> TopologyMap {
        TopologyMap {
            version: self.version,
            slots: self.slots,
            primaries: self.primaries,
            replicas: self.replicas,
        }
    }
}

fn bulk_string(value: &Value) -> Option<String> {
    value.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned())
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(n) => Some(*n),
        other => bulk_string(other).and_then(|s| s.parse().ok()),
    }
}

/// `CLUSTER SHARDS` response → `TopologyMap`.
///
/// Each shard element is a flat `[slots: [start, end, ...], nodes: [..]]`
/// sequence (RESP2) or an equivalent map (RESP3, normalized to the same
/// shape by the decoder's `Array` fallback); this parser accepts either by
/// reading the sequence as alternating field-name/value pairs.
pub fn parse_cluster_shards(reply: &Value, version: u64) -> Result<TopologyMap> {
    let shards = reply
        .as_sequence()
        .ok_or_else(|| ClientError::InvalidConfig("CLUSTER SHARDS did not return an array".into()))?;

    let mut builder = TopologyMap::builder(version);
    for shard in shards {
        let fields = shard.as_sequence().ok_or_else(|| {
            ClientError::InvalidConfig("CLUSTER SHARDS shard entry was not an array".into())
        })?;
        let mut slot_ranges: Vec<(u16, u16)> = Vec::new();
        let mut nodes: &[Value] = &[];
        let mut i = 0;
        while i + 1 < fields.len() {
            if let Some(key) = bulk_string(&fields[i]) {
                match key.as_str() {
                    "slots" => {
                        if let Some(seq) = fields[i + 1].as_sequence() {
                            let nums: Vec<u16> =
                                seq.iter().filter_map(|v| as_int(v).map(|n| n as u16)).collect();
                            for pair in nums.chunks(2) {
                                if let [start, end] = pair {
                                    slot_ranges.push((*start, *end));
                                }
                            }
                        }
                    }
                    "nodes" => {
                        if let Some(seq) = fields[i + 1].as_sequence() {
                            nodes = seq;
                        }
                    }
                    _ => {}
                }
            }
            i += 2;
        }

        for node in nodes {
            let node_fields = node.as_sequence().unwrap_or(&[]);
            let mut id = None;
            let mut host = None;
            let mut port = None;
            let mut role = NodeRole::Replica;
            let mut j = 0;
            while j + 1 < node_fields.len() {
                if let Some(key) = bulk_string(&node_fields[j]) {
                    match key.as_str() {
                        "id" => id = bulk_string(&node_fields[j + 1]),
                        "ip" | "endpoint" => host = bulk_string(&node_fields[j + 1]),
                        "port" => port = as_int(&node_fields[j + 1]),
                        "role" => {
                            role = match bulk_string(&node_fields[j + 1]).as_deref() {
                                Some("master") => NodeRole::Primary,
                                _ => NodeRole::Replica,
                            }
                        }
                        _ => {}
                    }
                }
                j += 2;
            }
            if let (Some(id), Some(host), Some(port)) = (id, host, port) {
                let node_id = NodeId(id);
                let addr = NodeAddress::new(host, port as u16);
                if role == NodeRole::Primary {
                    for (start, end) in &slot_ranges {
                        builder.add_range(&node_id, *start, *end);
                    }
                }
                builder.add_node(node_id, addr, role);
            }
        }
    }

    Ok(builder.build())
}

/// `CLUSTER SLOTS` response → `TopologyMap`, the pre-7.0 fallback format:
/// each element is `[start, end, [primary_ip, primary_port, primary_id?],
/// [replica_ip, replica_port, replica_id?], ...]`.
pub fn parse_cluster_slots(reply: &Value, version: u64) -> Result<TopologyMap> {
    let ranges = reply
        .as_sequence()
        .ok_or_else(|| ClientError::InvalidConfig("CLUSTER SLOTS did not return an array".into()))?;

    let mut builder = TopologyMap::builder(version);
    for range in ranges {
        let fields = range.as_sequence().ok_or_else(|| {
            ClientError::InvalidConfig("CLUSTER SLOTS range entry was not an array".into())
        })?;
        if fields.len() < 3 {
            continue;
        }
        let start = as_int(&fields[0]).unwrap_or(0) as u16;
        let end = as_int(&fields[1]).unwrap_or(0) as u16;

        for (idx, node) in fields[2..].iter().enumerate() {
            let parts = node.as_sequence().unwrap_or(&[]);
            if parts.len() < 2 {
                continue;
            }
            let host = bulk_string(&parts[0]).unwrap_or_default();
            let port = as_int(&parts[1]).unwrap_or(0) as u16;
            let id = parts
                .get(2)
                .and_then(bulk_string)
                .unwrap_or_else(|| format!("{host}:{port}"));
            let node_id = NodeId(id);
            let addr = NodeAddress::new(host, port);
            let role = if idx == 0 { NodeRole::Primary } else { NodeRole::Replica };
            if role == NodeRole::Primary {
                builder.add_range(&node_id, start, end);
            }
            builder.add_node(node_id, addr, role);
        }
    }

    Ok(builder.build())
}

type DiscoverFuture = Pin<Box<dyn Future<Output = Result<TopologyMap>> + Send>>;

/// Atomically-swapped holder around the current [`TopologyMap`], with
/// refresh coalescing: concurrent callers of [`TopologyHolder::refresh`]
/// that all observe the same stale version share one in-flight discovery.
pub struct TopologyHolder {
    current: ArcSwap<TopologyMap>,
    refresh_lock: AsyncMutex<()>,
    discover: Box<dyn Fn() -> DiscoverFuture + Send + Sync>,
}

impl TopologyHolder {
    /// Builds a holder seeded with `initial`, whose refreshes are driven by
    /// `discover` (typically a closure that issues `CLUSTER SHARDS`/`CLUSTER
    /// SLOTS` against the NodeClient table and parses the reply).
    pub fn new(
        initial: TopologyMap,
        discover: impl Fn() -> DiscoverFuture + Send + Sync + 'static,
    ) -> Self {
        TopologyHolder {
            current: ArcSwap::from_pointee(initial),
            refresh_lock: AsyncMutex::new(()),
            discover: Box::new(discover),
        }
    }

    /// The current snapshot. Cheap: bumps a reference count, no locking.
    pub fn current(&self) -> Arc<TopologyMap> {
        self.current.load_full()
    }

    /// Triggers a refresh, coalescing with any refresh already in flight.
    ///
    /// If another caller's refresh has already replaced the snapshot past
    /// the version this caller observed, returns that newer snapshot
    /// without driving a second discovery round.
    pub async fn refresh(&self) -> Result<Arc<TopologyMap>> {
        let seen_version = self.current().version;
        let _guard = self.refresh_lock.lock().await;
        let now = self.current();
        if now.version > seen_version {
            return Ok(now);
        }
        let mut fresh = (self.discover)().await?;
        fresh.version = now.version + 1;
        self.current.store(Arc::new(fresh));
        Ok(self.current())
    }
}

impl fmt::Debug for TopologyHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyHolder").field("version", &self.current().version).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_map_routes_every_slot_to_the_seed() {
        let id = NodeId("standalone".into());
        let addr = NodeAddress::new("127.0.0.1", 6379);
        let map = TopologyMap::standalone(id, addr.clone());
        assert_eq!(map.primary_for_slot(0), Some(&addr));
        assert_eq!(map.primary_for_slot(16383), Some(&addr));
    }

    #[test]
    fn empty_map_has_no_owners() {
        let map = TopologyMap::empty();
        assert_eq!(map.primary_for_slot(0), None);
        assert_eq!(map.version, 0);
    }

    fn bulk(s: &str) -> Value {
        Value::bulk(s.as_bytes().to_vec())
    }

    #[test]
    fn parses_cluster_slots_reply() {
        let reply = Value::Array(vec![Value::Array(vec![
            Value::Int(0),
            Value::Int(5460),
            Value::Array(vec![bulk("10.0.0.1"), Value::Int(6379), bulk("node-a")]),
            Value::Array(vec![bulk("10.0.0.2"), Value::Int(6379), bulk("node-b")]),
        ])]);
        let map = parse_cluster_slots(&reply, 2).unwrap();
        assert_eq!(map.version, 2);
        assert_eq!(map.primary_for_slot(0), Some(&NodeAddress::new("10.0.0.1", 6379)));
        assert_eq!(map.replicas_for_slot(0), &[NodeAddress::new("10.0.0.2", 6379)]);
        assert_eq!(map.primary_for_slot(5461), None);
    }

    #[test]
    fn parses_cluster_shards_reply() {
        let shard = Value::Array(vec![
            bulk("slots"),
            Value::Array(vec![Value::Int(0), Value::Int(16383)]),
            bulk("nodes"),
            Value::Array(vec![Value::Array(vec![
                bulk("id"),
                bulk("node-a"),
                bulk("ip"),
                bulk("10.0.0.1"),
                bulk("port"),
                Value::Int(6379),
                bulk("role"),
                bulk("master"),
            ])]),
        ]);
        let reply = Value::Array(vec![shard]);
        let map = parse_cluster_shards(&reply, 1).unwrap();
        assert_eq!(map.primary_for_slot(100), Some(&NodeAddress::new("10.0.0.1", 6379)));
        assert_eq!(map.owner(100), Some(&NodeId("node-a".into())));
    }

    #[tokio::test]
    async fn refresh_coalesces_concurrent_callers() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let holder = Arc::new(TopologyHolder::new(TopologyMap::empty(), move || {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(TopologyMap::standalone(NodeId("a".into()), NodeAddress::new("h", 1)))
            })
        }));

        let h1 = holder.clone();
        let h2 = holder.clone();
        let (r1, r2) = tokio::join!(h1.refresh(), h2.refresh());
        r1.unwrap();
        r2.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
