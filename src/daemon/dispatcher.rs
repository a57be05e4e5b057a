//! Typed message bus between sources, merger, store, sync and hooks.
//!
//! One topic per event kind rather than a single untyped bus. Delivery is
//! fire-and-forget for publishers; backpressure is a per-subscriber bounded
//! queue. Non-essential subscribers (hooks, event-stream clients) drop their
//! oldest event when the queue fills; the store subscriber blocks the
//! publisher with a warning instead, since losing a batch loses data.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::{BookmarkRecord, NodeTree};

use super::sync::SyncRecord;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

const BLOCK_WARN_AFTER: Duration = Duration::from_millis(500);

/// What to do when a subscriber's queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Drop the subscriber's oldest queued event to make room.
    DropOldest,
    /// Block the publisher until there is room, warning once.
    Block,
}

/// A successful reload of one source.
#[derive(Clone, Debug)]
pub struct SourceReloaded {
    pub source_id: String,
    pub tree: NodeTree,
}

/// Ordered upserts (lexicographic by URL) from one merge pass.
#[derive(Clone, Debug)]
pub struct UpsertBatch {
    pub source_id: String,
    pub items: Vec<crate::core::Bookmark>,
}

/// URLs no source contributes anymore.
#[derive(Clone, Debug)]
pub struct DeleteBatch {
    pub source_id: String,
    pub urls: Vec<String>,
}

/// A marktab action matched a committed record.
#[derive(Clone, Debug)]
pub struct HookFired {
    pub action: String,
    pub bookmark: BookmarkRecord,
}

/// Records arriving from a sync peer.
#[derive(Clone, Debug)]
pub struct SyncIncoming {
    pub records: Vec<SyncRecord>,
}

/// A committed store mutation, for the event-stream endpoint.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreCommitted {
    Upsert { record: BookmarkRecord },
    Delete { url: String, version: u64 },
}

struct Subscriber<T> {
    name: &'static str,
    policy: DeliveryPolicy,
    sender: Sender<T>,
    // crossbeam receivers are multi-consumer; this clone lets DropOldest
    // evict the head of a full queue from the publishing side
    drain: Receiver<T>,
}

/// One event kind's fan-out point.
pub struct Topic<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

impl<T: Clone + Send> Topic<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(
        &self,
        name: &'static str,
        capacity: usize,
        policy: DeliveryPolicy,
    ) -> Receiver<T> {
        let (sender, receiver) = bounded(capacity.max(1));
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.push(Subscriber {
            name,
            policy,
            sender,
            drain: receiver.clone(),
        });
        receiver
    }

    /// Deliver to every live subscriber; disconnected ones are pruned.
    pub fn publish(&self, event: T) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|sub| deliver(sub, event.clone()));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<T: Clone + Send> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver<T: Clone>(sub: &Subscriber<T>, event: T) -> bool {
    match sub.sender.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Disconnected(_)) => false,
        Err(TrySendError::Full(event)) => match sub.policy {
            DeliveryPolicy::DropOldest => {
                let _ = sub.drain.try_recv();
                tracing::debug!(subscriber = sub.name, "queue full, dropped oldest event");
                match sub.sender.try_send(event) {
                    Ok(()) => true,
                    Err(TrySendError::Disconnected(_)) => false,
                    // another event raced in; the queue is still bounded, drop this one
                    Err(TrySendError::Full(_)) => true,
                }
            }
            DeliveryPolicy::Block => {
                match sub.sender.send_timeout(event, BLOCK_WARN_AFTER) {
                    Ok(()) => true,
                    Err(crossbeam::channel::SendTimeoutError::Timeout(event)) => {
                        tracing::warn!(
                            subscriber = sub.name,
                            "queue full, blocking publisher"
                        );
                        sub.sender.send(event).is_ok()
                    }
                    Err(crossbeam::channel::SendTimeoutError::Disconnected(_)) => false,
                }
            }
        },
    }
}

/// All topics the engine publishes on.
pub struct Dispatcher {
    pub source_reloaded: Topic<SourceReloaded>,
    pub upserts: Topic<UpsertBatch>,
    pub deletes: Topic<DeleteBatch>,
    pub hooks: Topic<HookFired>,
    pub sync_incoming: Topic<SyncIncoming>,
    pub committed: Topic<StoreCommitted>,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            source_reloaded: Topic::new(),
            upserts: Topic::new(),
            deletes: Topic::new(),
            hooks: Topic::new(),
            sync_incoming: Topic::new(),
            committed: Topic::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_order() {
        let topic: Topic<u32> = Topic::new();
        let rx = topic.subscribe("test", 8, DeliveryPolicy::Block);
        topic.publish(1);
        topic.publish(2);
        assert_eq!(rx.recv().unwrap(), 1);
        assert_eq!(rx.recv().unwrap(), 2);
    }

    #[test]
    fn drop_oldest_keeps_the_newest_events() {
        let topic: Topic<u32> = Topic::new();
        let rx = topic.subscribe("hooks", 2, DeliveryPolicy::DropOldest);
        topic.publish(1);
        topic.publish(2);
        topic.publish(3);
        assert_eq!(rx.recv().unwrap(), 2);
        assert_eq!(rx.recv().unwrap(), 3);
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let topic: Topic<u32> = Topic::new();
        let rx = topic.subscribe("gone", 2, DeliveryPolicy::DropOldest);
        drop(rx);
        topic.publish(1);
        assert_eq!(topic.subscriber_count(), 0);
    }

    #[test]
    fn block_policy_waits_for_the_consumer() {
        let topic: Topic<u32> = Topic::new();
        let rx = topic.subscribe("store", 1, DeliveryPolicy::Block);
        topic.publish(1);

        let consumer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let mut got = Vec::new();
            while let Ok(v) = rx.recv_timeout(Duration::from_secs(2)) {
                got.push(v);
                if got.len() == 2 {
                    break;
                }
            }
            got
        });

        // queue is full; this blocks until the consumer drains
        topic.publish(2);
        assert_eq!(consumer.join().unwrap(), vec![1, 2]);
    }
}
