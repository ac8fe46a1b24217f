//! The verb metadata table the Router and aggregator consume: one record
//! per command verb, keyed by its ASCII-uppercase name.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use valkey_protocol::KeySpec;

/// Default routing behavior for a verb when the caller supplied no
/// explicit [`crate::router::RoutingHint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPolicy {
    /// Route by key (or to a random primary if the verb has no key).
    Default,
    /// Any primary, chosen uniformly at random.
    RandomNode,
    /// Fan out to every primary.
    AllPrimaries,
    /// Fan out to every node, primaries and replicas.
    AllNodes,
    /// Route like a read: honor `read_from` (primary, replica, AZ affinity).
    Replica,
}

/// How a fan-out verb's per-node replies combine into one caller-visible
/// result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAggregation {
    /// No fan-out; the single reply is the result.
    None,
    /// Take the first node's reply.
    First,
    /// Succeed only if every node succeeded (e.g. `FLUSHALL`).
    AllSucceeded,
    /// Sum numeric replies (e.g. `DBSIZE`).
    Sum,
    /// Concatenate array replies (e.g. `KEYS`).
    ArrayConcat,
    /// Merge map replies, last writer wins on key collision (e.g. `CONFIG
    /// GET`).
    MapMerge,
    /// Logical AND of boolean-ish replies.
    LogicalAnd,
}

/// The per-verb record consumed by the Router.
#[derive(Debug, Clone, Copy)]
pub struct VerbMeta {
    /// Which argv positions carry routable keys.
    pub key_spec: KeySpec,
    /// Default routing behavior absent an explicit hint.
    pub default_request_policy: RequestPolicy,
    /// How fan-out replies combine.
    pub response_aggregation: ResponseAggregation,
    /// `true` for subscription-management verbs (`SUBSCRIBE`, ...).
    pub is_subscription: bool,
    /// `true` for verbs that may block server-side (`BLPOP`, ...): the
    /// per-command timeout still applies, but a long block is expected
    /// rather than treated as a stall.
    pub is_blocking: bool,
}

impl VerbMeta {
    const fn keyed(key_spec: KeySpec) -> VerbMeta {
        VerbMeta {
            key_spec,
            default_request_policy: RequestPolicy::Default,
            response_aggregation: ResponseAggregation::None,
            is_subscription: false,
            is_blocking: false,
        }
    }

    const fn blocking(key_spec: KeySpec) -> VerbMeta {
        VerbMeta { is_blocking: true, ..Self::keyed(key_spec) }
    }

    const fn keyless(policy: RequestPolicy, aggregation: ResponseAggregation) -> VerbMeta {
        VerbMeta {
            key_spec: KeySpec::NONE,
            default_request_policy: policy,
            response_aggregation: aggregation,
            is_subscription: false,
            is_blocking: false,
        }
    }

    const fn subscription() -> VerbMeta {
        VerbMeta { is_subscription: true, ..Self::keyless(RequestPolicy::Default, ResponseAggregation::None) }
    }
}

/// Fallback metadata for a verb absent from the table: single-keyed at
/// argv index 1, default policy, no fan-out.
pub const UNKNOWN_VERB: VerbMeta = VerbMeta::keyed(KeySpec::single(1));

static TABLE: Lazy<HashMap<&'static str, VerbMeta>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // Strings.
    m.insert("GET", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("SET", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("SETEX", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("INCR", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("APPEND", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("MGET", VerbMeta::keyed(KeySpec::range_to_end(1, 1)));
    m.insert("MSET", VerbMeta::keyed(KeySpec::range_to_end(1, 2)));

    // Hashes.
    m.insert("HSET", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("HGET", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("HGETALL", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("HDEL", VerbMeta::keyed(KeySpec::single(1)));

    // Lists.
    m.insert("LPUSH", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("RPUSH", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("LRANGE", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("LPOP", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("BLPOP", VerbMeta::blocking(KeySpec::range_to_end(1, 1)));

    // Sets.
    m.insert("SADD", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("SMEMBERS", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("SREM", VerbMeta::keyed(KeySpec::single(1)));

    // Sorted sets.
    m.insert("ZADD", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("ZRANGE", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("ZSCORE", VerbMeta::keyed(KeySpec::single(1)));

    // Generic.
    m.insert("DEL", VerbMeta::keyed(KeySpec::range_to_end(1, 1)));
    m.insert("EXISTS", VerbMeta::keyed(KeySpec::range_to_end(1, 1)));
    m.insert("EXPIRE", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("TTL", VerbMeta::keyed(KeySpec::single(1)));
    m.insert("TYPE", VerbMeta::keyed(KeySpec::single(1)));

    // Connection / server.
    m.insert("PING", VerbMeta::keyless(RequestPolicy::RandomNode, ResponseAggregation::First));
    m.insert("ECHO", VerbMeta::keyless(RequestPolicy::RandomNode, ResponseAggregation::None));
    m.insert("SELECT", VerbMeta::keyless(RequestPolicy::AllNodes, ResponseAggregation::AllSucceeded));
    m.insert("DBSIZE", VerbMeta::keyless(RequestPolicy::AllPrimaries, ResponseAggregation::Sum));
    m.insert("FLUSHDB", VerbMeta::keyless(RequestPolicy::AllPrimaries, ResponseAggregation::AllSucceeded));
    m.insert("INFO", VerbMeta::keyless(RequestPolicy::AllPrimaries, ResponseAggregation::MapMerge));
    m.insert("RANDOMKEY", VerbMeta::keyless(RequestPolicy::RandomNode, ResponseAggregation::None));
    m.insert(
        "CONFIG",
        VerbMeta::keyless(RequestPolicy::AllPrimaries, ResponseAggregation::MapMerge),
    );

    // Pub/sub.
    m.insert("SUBSCRIBE", VerbMeta::subscription());
    m.insert("PSUBSCRIBE", VerbMeta::subscription());
    m.insert("SSUBSCRIBE", VerbMeta::subscription());
    m.insert("PUBLISH", VerbMeta::keyed(KeySpec::single(1)));

    // Scripting.
    m.insert("EVALSHA", VerbMeta::keyed(KeySpec::single(2)));
    m.insert("SCRIPT", VerbMeta::keyless(RequestPolicy::AllPrimaries, ResponseAggregation::AllSucceeded));

    m
});

/// Looks up the metadata for `verb` (case-insensitive), falling back to
/// [`UNKNOWN_VERB`] for anything not in the table.
pub fn lookup(verb: &[u8]) -> VerbMeta {
    let upper = String::from_utf8_lossy(verb).to_ascii_uppercase();
    TABLE.get(upper.as_str()).copied().unwrap_or(UNKNOWN_VERB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_single_keyed() {
        let meta = lookup(b"GET");
        assert_eq!(meta.key_spec.key_indices(2), vec![1]);
    }

    #[test]
    fn mset_interleaves_keys() {
        let meta = lookup(b"mset");
        assert_eq!(meta.key_spec.key_indices(5), vec![1, 3]);
    }

    #[test]
    fn dbsize_sums_across_primaries() {
        let meta = lookup(b"DBSIZE");
        assert_eq!(meta.default_request_policy, RequestPolicy::AllPrimaries);
        assert_eq!(meta.response_aggregation, ResponseAggregation::Sum);
    }

    #[test]
    fn unknown_verb_falls_back_to_single_key() {
        let meta = lookup(b"SOMETHINGNEW");
        assert_eq!(meta.key_spec.key_indices(2), vec![1]);
    }

    #[test]
    fn blpop_is_marked_blocking() {
        assert!(lookup(b"BLPOP").is_blocking);
    }
}
