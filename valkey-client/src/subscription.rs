//! Exact/pattern/sharded subscription sets and push-frame dispatch to a
//! user callback over a bounded, drop-oldest queue.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use futures_channel::mpsc;
use futures_util::StreamExt;
use tokio::sync::Notify;
use tracing::trace;
use valkey_protocol::Value;

use crate::connection::PushFrame;

/// Which subscription set a push frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// An exact-channel `SUBSCRIBE`.
    Exact,
    /// A glob-pattern `PSUBSCRIBE`.
    Pattern,
    /// A cluster-sharded `SSUBSCRIBE`.
    Sharded,
}

/// A delivered pub/sub message, handed to the user callback.
#[derive(Debug, Clone)]
pub struct PushMessage {
    /// `"message"`, `"pmessage"`, or `"smessage"`.
    pub kind: String,
    /// The channel the message was published on.
    pub channel: Option<String>,
    /// The pattern that matched, for `pmessage` deliveries.
    pub pattern: Option<String>,
    /// The message payload.
    pub payload: Option<Value>,
}

fn value_as_string(value: &Value) -> Option<String> {
    value.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned())
}

impl PushMessage {
    fn from_frame(frame: PushFrame) -> Option<PushMessage> {
        match frame.kind.as_str() {
            "message" | "smessage" => {
                let mut it = frame.items.into_iter();
                let channel = it.next().and_then(|v| value_as_string(&v));
                let payload = it.next();
                Some(PushMessage { kind: frame.kind, channel, pattern: None, payload })
            }
            "pmessage" => {
                let mut it = frame.items.into_iter();
                let pattern = it.next().and_then(|v| value_as_string(&v));
                let channel = it.next().and_then(|v| value_as_string(&v));
                let payload = it.next();
                Some(PushMessage { kind: frame.kind, channel, pattern, payload })
            }
            // subscribe/unsubscribe acknowledgements carry no payload callers
            // need; surfaced anyway so a callback can track confirmations.
            _ => {
                let mut it = frame.items.into_iter();
                let channel = it.next().and_then(|v| value_as_string(&v));
                Some(PushMessage { kind: frame.kind, channel, pattern: None, payload: None })
            }
        }
    }
}

struct DispatchQueue {
    inner: Mutex<VecDeque<PushMessage>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl DispatchQueue {
    fn new(capacity: usize) -> Self {
        DispatchQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, msg: PushMessage) {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(target: "valkey_client::subscription", "dispatch queue full, dropped oldest message");
        }
        queue.push_back(msg);
        drop(queue);
        self.notify.notify_one();
    }

    async fn pop(&self) -> PushMessage {
        loop {
            if let Some(msg) = self.inner.lock().unwrap().pop_front() {
                return msg;
            }
            self.notify.notified().await;
        }
    }
}

/// Maintains the exact/pattern/sharded channel sets and fans incoming
/// [`PushFrame`]s out to a user callback.
///
/// Subscription sets are copy-on-write: [`SubscriptionManager::snapshot`]
/// is what a reconnecting Connection replays as its subscribe handshake.
pub struct SubscriptionManager {
    exact: ArcSwap<HashSet<String>>,
    patterns: ArcSwap<HashSet<String>>,
    sharded: ArcSwap<HashSet<String>>,
    queue: Arc<DispatchQueue>,
    push_tx: mpsc::UnboundedSender<PushFrame>,
}

/// An immutable snapshot of what should be subscribed on a (re)connecting
/// transport.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSnapshot {
    /// Exact channel names.
    pub exact: Vec<String>,
    /// Glob patterns.
    pub patterns: Vec<String>,
    /// Sharded channel names.
    pub sharded: Vec<String>,
}

impl SubscriptionManager {
    /// Builds a manager whose dispatch queue holds up to `queue_capacity`
    /// undelivered messages before dropping the oldest, and whose
    /// deliveries are handed to `callback`.
    pub fn new(
        queue_capacity: usize,
        callback: impl Fn(PushMessage) + Send + Sync + 'static,
    ) -> Arc<SubscriptionManager> {
        let (push_tx, mut push_rx) = mpsc::unbounded();
        let queue = Arc::new(DispatchQueue::new(queue_capacity.max(1)));

        let manager = Arc::new(SubscriptionManager {
            exact: ArcSwap::from_pointee(HashSet::new()),
            patterns: ArcSwap::from_pointee(HashSet::new()),
            sharded: ArcSwap::from_pointee(HashSet::new()),
            queue: queue.clone(),
            push_tx,
        });

        tokio::spawn(async move {
            while let Some(frame) = push_rx.next().await {
                if let Some(msg) = PushMessage::from_frame(frame) {
                    queue.push(msg);
                }
            }
        });

        let dispatch_queue = manager.queue.clone();
        tokio::spawn(async move {
            loop {
                let msg = dispatch_queue.pop().await;
                callback(msg);
            }
        });

        manager
    }

    /// A sink new Connections should be constructed with, so their push
    /// frames feed this manager.
    pub fn push_sink(&self) -> mpsc::UnboundedSender<PushFrame> {
        self.push_tx.clone()
    }

    /// Adds `channel` to the named set. Returns `true` if it was newly
    /// added.
    pub fn add(&self, kind: SubscriptionKind, channel: String) -> bool {
        let set = self.set_for(kind);
        let mut next = (**set.load()).clone();
        let added = next.insert(channel);
        if added {
            set.store(Arc::new(next));
        }
        added
    }

    /// Removes `channel` from the named set. Returns `true` if it was
    /// present.
    pub fn remove(&self, kind: SubscriptionKind, channel: &str) -> bool {
        let set = self.set_for(kind);
        let mut next = (**set.load()).clone();
        let removed = next.remove(channel);
        if removed {
            set.store(Arc::new(next));
        }
        removed
    }

    fn set_for(&self, kind: SubscriptionKind) -> &ArcSwap<HashSet<String>> {
        match kind {
            SubscriptionKind::Exact => &self.exact,
            SubscriptionKind::Pattern => &self.patterns,
            SubscriptionKind::Sharded => &self.sharded,
        }
    }

    /// The current subscription state, for a (re)connecting Connection to
    /// replay.
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            exact: self.exact.load().iter().cloned().collect(),
            patterns: self.patterns.load().iter().cloned().collect(),
            sharded: self.sharded.load().iter().cloned().collect(),
        }
    }

    /// How many messages have been dropped from the dispatch queue because
    /// it was full.
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn message_frame_parses_channel_and_payload() {
        let frame = PushFrame {
            kind: "message".into(),
            items: vec![Value::bulk(b"chan".to_vec()), Value::bulk(b"hello".to_vec())],
        };
        let msg = PushMessage::from_frame(frame).unwrap();
        assert_eq!(msg.channel.as_deref(), Some("chan"));
        assert!(msg.payload.is_some());
    }

    #[test]
    fn pmessage_frame_parses_pattern_then_channel() {
        let frame = PushFrame {
            kind: "pmessage".into(),
            items: vec![
                Value::bulk(b"ch*".to_vec()),
                Value::bulk(b"chan1".to_vec()),
                Value::bulk(b"hi".to_vec()),
            ],
        };
        let msg = PushMessage::from_frame(frame).unwrap();
        assert_eq!(msg.pattern.as_deref(), Some("ch*"));
        assert_eq!(msg.channel.as_deref(), Some("chan1"));
    }

    #[tokio::test]
    async fn add_and_remove_update_the_snapshot() {
        let manager = SubscriptionManager::new(16, |_| {});
        assert!(manager.add(SubscriptionKind::Exact, "chan".into()));
        assert!(!manager.add(SubscriptionKind::Exact, "chan".into()));
        assert_eq!(manager.snapshot().exact, vec!["chan".to_string()]);
        assert!(manager.remove(SubscriptionKind::Exact, "chan"));
        assert!(manager.snapshot().exact.is_empty());
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_and_counts_it() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = delivered.clone();
        let manager = SubscriptionManager::new(2, move |_| {
            delivered_clone.fetch_add(1, Ordering::SeqCst);
            // Hold the dispatcher back so the queue actually backs up.
            std::thread::sleep(Duration::from_millis(50));
        });

        let sink = manager.push_sink();
        for i in 0..5 {
            sink.unbounded_send(PushFrame {
                kind: "message".into(),
                items: vec![Value::bulk(b"c".to_vec()), Value::bulk(format!("{i}").into_bytes())],
            })
            .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(manager.dropped_count() > 0);
    }
}
