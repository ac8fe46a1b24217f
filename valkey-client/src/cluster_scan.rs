//! Opaque progress token for cluster-wide key iteration: orchestrates a
//! per-node `SCAN` sub-cursor while pinning the topology version the
//! iteration started at.

use std::collections::{HashSet, VecDeque};

use crate::topology::{NodeId, TopologyMap};

/// Options accepted by `cluster_scan`.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// `MATCH` glob pattern.
    pub match_pattern: Option<String>,
    /// `COUNT` hint.
    pub count: Option<u64>,
    /// `TYPE` filter.
    pub type_filter: Option<String>,
}

/// "Iterate every key across all primaries exactly once, ignoring topology
/// changes" — the token the engine threads through repeated `cluster_scan`
/// calls.
///
/// If the topology changes mid-scan, slots that moved onto a node already
/// marked finished are not guaranteed to be revisited — this mirrors plain
/// `SCAN`'s best-effort guarantee under concurrent rehashing.
#[derive(Debug, Clone)]
pub struct ClusterScanCursor {
    topology_version: u64,
    order: VecDeque<NodeId>,
    sub_cursors: std::collections::HashMap<NodeId, u64>,
    finished: HashSet<NodeId>,
}

impl ClusterScanCursor {
    /// Starts a fresh iteration over every primary in `topology`.
    pub fn new(topology: &TopologyMap) -> Self {
        let ids: Vec<NodeId> = topology.primaries().map(|(id, _)| id.clone()).collect();
        ClusterScanCursor {
            topology_version: topology.version,
            sub_cursors: ids.iter().map(|id| (id.clone(), 0)).collect(),
            order: ids.into(),
            finished: HashSet::new(),
        }
    }

    /// The topology version this iteration is pinned to.
    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    /// `true` once every node has reported a `0` sub-cursor.
    pub fn is_finished(&self) -> bool {
        !self.sub_cursors.is_empty() && self.finished.len() == self.sub_cursors.len()
    }

    /// The next not-yet-finished node to issue `SCAN` against, round-robin
    /// over the nodes still in progress.
    pub fn next_node(&mut self) -> Option<NodeId> {
        let len = self.order.len();
        for _ in 0..len {
            let id = self.order.pop_front()?;
            self.order.push_back(id.clone());
            if !self.finished.contains(&id) {
                return Some(id);
            }
        }
        None
    }

    /// The sub-cursor to send for `node`'s next `SCAN` call.
    pub fn cursor_for(&self, node: &NodeId) -> u64 {
        *self.sub_cursors.get(node).unwrap_or(&0)
    }

    /// Records the sub-cursor `SCAN` against `node` returned. A `0` cursor
    /// marks that node finished.
    pub fn record_result(&mut self, node: NodeId, next_cursor: u64) {
        if next_cursor == 0 {
            self.finished.insert(node.clone());
        }
        self.sub_cursors.insert(node, next_cursor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_node_topology() -> TopologyMap {
        let shard = |id: &str, start: i64, end: i64| {
            valkey_protocol::Value::Array(vec![
                bulk_value("slots"),
                valkey_protocol::Value::Array(vec![
                    valkey_protocol::Value::Int(start),
                    valkey_protocol::Value::Int(end),
                ]),
                bulk_value("nodes"),
                valkey_protocol::Value::Array(vec![valkey_protocol::Value::Array(vec![
                    bulk_value("id"),
                    bulk_value(id),
                    bulk_value("ip"),
                    bulk_value("10.0.0.1"),
                    bulk_value("port"),
                    valkey_protocol::Value::Int(6379),
                    bulk_value("role"),
                    bulk_value("master"),
                ])]),
            ])
        };
        let reply = valkey_protocol::Value::Array(vec![
            shard("a", 0, 5460),
            shard("b", 5461, 10922),
            shard("c", 10923, 16383),
        ]);
        crate::topology::parse_cluster_shards(&reply, 1).unwrap()
    }

    fn bulk_value(s: &str) -> valkey_protocol::Value {
        valkey_protocol::Value::bulk(s.as_bytes().to_vec())
    }

    #[test]
    fn starts_unfinished_with_one_pending_node_each() {
        let topology = three_node_topology();
        let cursor = ClusterScanCursor::new(&topology);
        assert!(!cursor.is_finished());
        assert_eq!(cursor.topology_version(), topology.version);
    }

    #[test]
    fn finishes_once_every_node_reports_zero() {
        let topology = three_node_topology();
        let mut cursor = ClusterScanCursor::new(&topology);
        let ids: Vec<NodeId> = (0..3).filter_map(|_| cursor.next_node()).collect();
        // dedupe while preserving discovery order of the three distinct nodes
        let mut seen = HashSet::new();
        for id in ids {
            if seen.insert(id.clone()) {
                cursor.record_result(id, 0);
            }
        }
        assert!(cursor.is_finished());
        assert!(cursor.next_node().is_none());
    }

    #[test]
    fn unfinished_node_is_revisited() {
        let topology = three_node_topology();
        let mut cursor = ClusterScanCursor::new(&topology);
        let first = cursor.next_node().unwrap();
        cursor.record_result(first.clone(), 42);
        assert_eq!(cursor.cursor_for(&first), 42);
        assert!(!cursor.finished.contains(&first));
    }
}
