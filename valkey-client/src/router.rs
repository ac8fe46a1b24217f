//! Resolves a [`Command`] (or batch of commands) plus a [`RoutingHint`]
//! against a [`TopologyMap`] snapshot into one or more target nodes.

use rand::seq::IteratorRandom;
use valkey_protocol::{key_slot, Command};

use crate::config::ReadFrom;
use crate::errors::{ClientError, Result};
use crate::topology::{NodeAddress, TopologyMap};
use crate::verb_meta::{lookup, RequestPolicy};

/// Caller-supplied routing preference, resolved against a command's key(s)
/// and the verb metadata table when left at `Default`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoutingHint {
    /// Resolve using the verb's key(s) and request policy.
    #[default]
    Default,
    /// Any primary, chosen uniformly at random.
    RandomNode,
    /// Fan out to every primary.
    AllPrimaries,
    /// Fan out to every node, primaries and replicas.
    AllNodes,
    /// Route to the primary of a specific slot.
    SlotId(u16),
    /// Route to the primary owning the slot `key` hashes to.
    SlotKey(Vec<u8>),
    /// Route to a specific known address.
    ByAddress(String, u16),
}

/// The resolved destination(s) for one routed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A single target node.
    Single(NodeAddress),
    /// Fan out to every listed node.
    FanOut(Vec<NodeAddress>),
}

fn random_primary(topology: &TopologyMap) -> Result<NodeAddress> {
    topology
        .primaries()
        .choose(&mut rand::thread_rng())
        .map(|(_, addr)| addr.clone())
        .ok_or(ClientError::NodeUnavailable)
}

fn route_for_slot(topology: &TopologyMap, slot: u16, read_from: &ReadFrom) -> Result<NodeAddress> {
    match read_from {
        ReadFrom::Primary => {
            topology.primary_for_slot(slot).cloned().ok_or(ClientError::NodeUnavailable)
        }
        ReadFrom::PreferReplica | ReadFrom::AzAffinity(_) => {
            let replicas = topology.replicas_for_slot(slot);
            replicas
                .first()
                .cloned()
                .or_else(|| topology.primary_for_slot(slot).cloned())
                .ok_or(ClientError::NodeUnavailable)
        }
    }
}

/// Computes the single hash slot for `cmd`'s keys, failing with
/// [`ClientError::CrossSlot`] if they disagree.
pub fn command_slot(cmd: &Command) -> Result<Option<u16>> {
    valkey_protocol::common_slot(cmd.keys()).map_err(|(a, b)| ClientError::CrossSlot(a, b))
}

/// Resolves the destination for a single command, honoring `hint` first and
/// falling back to the verb metadata table's default policy.
pub fn resolve(
    cmd: &Command,
    hint: &RoutingHint,
    topology: &TopologyMap,
    read_from: &ReadFrom,
) -> Result<Destination> {
    match hint {
        RoutingHint::ByAddress(host, port) => {
            let addr = NodeAddress::new(host.clone(), *port);
            if topology.contains_address(&addr) {
                Ok(Destination::Single(addr))
            } else {
                Err(ClientError::UnknownNode(addr))
            }
        }
        RoutingHint::SlotId(slot) => Ok(Destination::Single(route_for_slot(topology, *slot, read_from)?)),
        RoutingHint::SlotKey(key) => {
            let slot = key_slot(key);
            Ok(Destination::Single(route_for_slot(topology, slot, read_from)?))
        }
        RoutingHint::RandomNode => Ok(Destination::Single(random_primary(topology)?)),
        RoutingHint::AllPrimaries => {
            Ok(Destination::FanOut(topology.primaries().map(|(_, addr)| addr.clone()).collect()))
        }
        RoutingHint::AllNodes => {
            Ok(Destination::FanOut(topology.all_nodes().into_iter().map(|(_, addr)| addr).collect()))
        }
        RoutingHint::Default => resolve_default(cmd, topology, read_from),
    }
}

fn resolve_default(cmd: &Command, topology: &TopologyMap, read_from: &ReadFrom) -> Result<Destination> {
    let meta = lookup(cmd.verb());
    if let Some(slot) = command_slot(cmd)? {
        return Ok(Destination::Single(route_for_slot(topology, slot, read_from)?));
    }

    match meta.default_request_policy {
        RequestPolicy::Default | RequestPolicy::RandomNode => {
            Ok(Destination::Single(random_primary(topology)?))
        }
        RequestPolicy::Replica => Ok(Destination::Single(random_primary(topology)?)),
        RequestPolicy::AllPrimaries => {
            Ok(Destination::FanOut(topology.primaries().map(|(_, addr)| addr.clone()).collect()))
        }
        RequestPolicy::AllNodes => {
            Ok(Destination::FanOut(topology.all_nodes().into_iter().map(|(_, addr)| addr).collect()))
        }
    }
}

/// Resolves the single destination for an atomic batch: the one slot every
/// watched/command key must share, or a random primary for a keyless batch.
pub fn resolve_atomic_batch(
    commands: &[Command],
    hint: &RoutingHint,
    topology: &TopologyMap,
    read_from: &ReadFrom,
) -> Result<NodeAddress> {
    let all_keys = commands.iter().flat_map(|c| c.keys());
    let slot = valkey_protocol::common_slot(all_keys).map_err(|(a, b)| ClientError::CrossSlot(a, b))?;

    let resolved_slot_addr = match slot {
        Some(slot) => Some(route_for_slot(topology, slot, read_from)?),
        None => None,
    };

    match (hint, resolved_slot_addr) {
        (RoutingHint::Default, Some(addr)) => Ok(addr),
        (RoutingHint::Default, None) => random_primary(topology),
        (RoutingHint::ByAddress(host, port), addr) => {
            let hinted = NodeAddress::new(host.clone(), *port);
            if let Some(addr) = addr {
                if addr != hinted {
                    return Err(ClientError::InvalidConfig(format!(
                        "routing hint {hinted} disagrees with batch slot owner {addr}"
                    )));
                }
            }
            if topology.contains_address(&hinted) {
                Ok(hinted)
            } else {
                Err(ClientError::UnknownNode(hinted))
            }
        }
        (RoutingHint::SlotId(s), addr) => {
            let hinted = route_for_slot(topology, *s, read_from)?;
            if let Some(addr) = addr {
                if addr != hinted {
                    return Err(ClientError::InvalidConfig(
                        "routing hint slot disagrees with batch's computed slot".into(),
                    ));
                }
            }
            Ok(hinted)
        }
        (other, _) => Err(ClientError::InvalidConfig(format!(
            "routing hint {other:?} is not valid for an atomic batch"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use valkey_protocol::Command;

    fn topology_with_two_primaries() -> TopologyMap {
        let shard_a = valkey_protocol::Value::Array(vec![
            bulk_value("slots"),
            valkey_protocol::Value::Array(vec![valkey_protocol::Value::Int(0), valkey_protocol::Value::Int(8191)]),
            bulk_value("nodes"),
            valkey_protocol::Value::Array(vec![valkey_protocol::Value::Array(vec![
                bulk_value("id"),
                bulk_value("node-a"),
                bulk_value("ip"),
                bulk_value("10.0.0.1"),
                bulk_value("port"),
                valkey_protocol::Value::Int(6379),
                bulk_value("role"),
                bulk_value("master"),
            ])]),
        ]);
        let shard_b = valkey_protocol::Value::Array(vec![
            bulk_value("slots"),
            valkey_protocol::Value::Array(vec![valkey_protocol::Value::Int(8192), valkey_protocol::Value::Int(16383)]),
            bulk_value("nodes"),
            valkey_protocol::Value::Array(vec![valkey_protocol::Value::Array(vec![
                bulk_value("id"),
                bulk_value("node-b"),
                bulk_value("ip"),
                bulk_value("10.0.0.2"),
                bulk_value("port"),
                valkey_protocol::Value::Int(6379),
                bulk_value("role"),
                bulk_value("master"),
            ])]),
        ]);
        let reply = valkey_protocol::Value::Array(vec![shard_a, shard_b]);
        crate::topology::parse_cluster_shards(&reply, 1).unwrap()
    }

    fn bulk_value(s: &str) -> valkey_protocol::Value {
        valkey_protocol::Value::bulk(s.as_bytes().to_vec())
    }

    #[test]
    fn slot_key_hint_routes_to_owning_primary() {
        let topology = topology_with_two_primaries();
        let cmd = Command::new("GET").arg("foo").build().unwrap();
        let hint = RoutingHint::SlotKey(b"bar".to_vec());
        let dest = resolve(&cmd, &hint, &topology, &ReadFrom::Primary).unwrap();
        assert!(matches!(dest, Destination::Single(_)));
    }

    #[test]
    fn default_routes_get_by_its_key() {
        let topology = topology_with_two_primaries();
        let cmd = Command::new("GET").arg("{a}1").build().unwrap();
        let dest = resolve(&cmd, &RoutingHint::Default, &topology, &ReadFrom::Primary).unwrap();
        let slot = key_slot(b"{a}1");
        let expected = topology.primary_for_slot(slot).unwrap().clone();
        assert_eq!(dest, Destination::Single(expected));
    }

    #[test]
    fn keyless_verb_with_all_primaries_policy_fans_out() {
        let topology = topology_with_two_primaries();
        let cmd = Command::new("DBSIZE").build().unwrap();
        let dest = resolve(&cmd, &RoutingHint::Default, &topology, &ReadFrom::Primary).unwrap();
        match dest {
            Destination::FanOut(addrs) => assert_eq!(addrs.len(), 2),
            _ => panic!("expected fan-out"),
        }
    }

    #[test]
    fn cross_slot_keys_fail_before_dispatch() {
        let cmd = Command::new("MGET").args(["{a}1", "{b}2"]).key_spec(valkey_protocol::KeySpec::range_to_end(1, 1)).build().unwrap();
        assert!(matches!(command_slot(&cmd), Err(ClientError::CrossSlot(_, _))));
    }

    #[test]
    fn atomic_batch_routes_by_shared_slot() {
        let topology = topology_with_two_primaries();
        let cmds = vec![
            Command::new("SET").args(["{a}1", "v"]).key_spec(valkey_protocol::KeySpec::single(1)).build().unwrap(),
            Command::new("GET").arg("{a}1").key_spec(valkey_protocol::KeySpec::single(1)).build().unwrap(),
        ];
        let addr = resolve_atomic_batch(&cmds, &RoutingHint::Default, &topology, &ReadFrom::Primary).unwrap();
        let slot = key_slot(b"{a}1");
        assert_eq!(addr, topology.primary_for_slot(slot).unwrap().clone());
    }

    #[test]
    fn atomic_batch_cross_slot_fails() {
        let topology = topology_with_two_primaries();
        let cmds = vec![
            Command::new("SET").args(["{a}1", "v"]).key_spec(valkey_protocol::KeySpec::single(1)).build().unwrap(),
            Command::new("SET").args(["{b}2", "v"]).key_spec(valkey_protocol::KeySpec::single(1)).build().unwrap(),
        ];
        let err = resolve_atomic_batch(&cmds, &RoutingHint::Default, &topology, &ReadFrom::Primary).unwrap_err();
        assert!(matches!(err, ClientError::CrossSlot(_, _)));
    }
}
