//! Typed in-process publish/subscribe bus.
//!
//! One `Bus` instance is constructed in `main` and handed to every component
//! as an `Arc`, replacing the source's process-wide singleton. Each topic is
//! single-typed — `subscribe::<T>("teleop_input")` and
//! `publish::<T>("teleop_input", ...)` must agree on `T` for the life of the
//! bus — but a single `Bus` can carry several topics of different types,
//! since subscriber handles are stored behind `Box<dyn Any + Send>` and
//! downcast on access.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

const DEFAULT_CAPACITY: usize = 100;

struct TopicStats {
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Default for TopicStats {
    fn default() -> Self {
        Self { published: AtomicU64::new(0), dropped: AtomicU64::new(0) }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TopicCounters {
    pub published: u64,
    pub dropped: u64,
}

/// One subscriber's sending half, erased to `Any` so the registry can hold
/// subscribers of different payload types under different topic keys.
struct ErasedSender {
    sender: Box<dyn Any + Send + Sync>,
    /// The payload type this sender was created for; checked against the
    /// publisher's type on every `publish` call in test builds only, since a
    /// mismatch here is a wiring bug caught by tests, not a condition a
    /// running process should recover from.
    #[cfg(test)]
    type_name: &'static str,
}

/// A subscriber's receiving half. Holding this keeps the subscription alive;
/// dropping it is equivalent to `unsubscribe`.
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<T, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

#[derive(Default)]
struct Topic {
    subscribers: Vec<ErasedSender>,
    stats: TopicStats,
}

/// Typed pub/sub broker. Publishers never block on a slow subscriber: a full
/// subscriber queue drops the newest message for that subscriber only, and
/// increments that topic's drop counter. Other subscribers are unaffected.
#[derive(Default)]
pub struct Bus {
    topics: RwLock<HashMap<&'static str, Topic>>,
}

impl Bus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to `topic`, creating a bounded FIFO of `DEFAULT_CAPACITY`.
    pub async fn subscribe<T>(&self, topic: &'static str) -> Subscription<T>
    where
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<T>(DEFAULT_CAPACITY);
        let erased = ErasedSender {
            sender: Box::new(tx),
            #[cfg(test)]
            type_name: std::any::type_name::<T>(),
        };
        let mut topics = self.topics.write().await;
        let entry = topics.entry(topic).or_default();
        #[cfg(test)]
        {
            for existing in &entry.subscribers {
                assert_eq!(
                    existing.type_name,
                    erased.type_name,
                    "bus topic {topic:?} reused at two different types"
                );
            }
        }
        entry.subscribers.push(erased);
        Subscription { receiver: rx }
    }

    /// Enqueue `value` to every current subscriber of `topic`. Non-blocking:
    /// a subscriber whose queue is full has this message dropped for it
    /// specifically.
    pub async fn publish<T>(&self, topic: &'static str, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        let topics = self.topics.read().await;
        let Some(entry) = topics.get(topic) else {
            return;
        };
        entry.stats.published.fetch_add(1, Ordering::Relaxed);
        for subscriber in &entry.subscribers {
            let Some(tx) = subscriber.sender.downcast_ref::<mpsc::Sender<T>>() else {
                continue;
            };
            if tx.try_send(value.clone()).is_err() {
                entry.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Best-effort removal: drop the subscription handle itself instead.
    /// Retained for symmetry with the distilled contract; internally a
    /// dropped `Subscription` already stops receiving and the stale sender
    /// simply fails every future `try_send` (which is indistinguishable from
    /// a dropped message and correctly counted).
    pub async fn unsubscribe<T>(&self, _topic: &'static str, _subscription: Subscription<T>) {}

    pub async fn stats(&self, topic: &str) -> TopicCounters {
        let topics = self.topics.read().await;
        match topics.get(topic) {
            Some(t) => TopicCounters {
                published: t.stats.published.load(Ordering::Relaxed),
                dropped: t.stats.dropped.load(Ordering::Relaxed),
            },
            None => TopicCounters::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers() {
        let bus = Bus::new();
        let mut a = bus.subscribe::<u32>("topic").await;
        let mut b = bus.subscribe::<u32>("topic").await;

        bus.publish("topic", 42u32).await;

        assert_eq!(a.recv().await, Some(42));
        assert_eq!(b.recv().await, Some(42));
    }

    #[tokio::test]
    async fn publish_to_topic_with_no_subscribers_is_a_noop() {
        let bus = Bus::new();
        bus.publish("nobody-listening", 1u32).await;
        assert_eq!(bus.stats("nobody-listening").await.published, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_newest_for_that_subscriber_only() {
        let bus = Bus::new();
        let mut slow = bus.subscribe::<u32>("t").await;
        let mut fast = bus.subscribe::<u32>("t").await;

        for i in 0..(DEFAULT_CAPACITY as u32 + 5) {
            bus.publish("t", i).await;
        }

        // `fast` drains immediately below, so nothing should have been
        // dropped for it; `slow` never drains, so its queue fills and the
        // trailing publishes are dropped for it.
        let mut fast_count = 0;
        while fast.try_recv().is_ok() {
            fast_count += 1;
        }
        assert_eq!(fast_count, DEFAULT_CAPACITY + 5);

        let stats = bus.stats("t").await;
        assert_eq!(stats.published, DEFAULT_CAPACITY as u64 + 5);
        assert_eq!(stats.dropped, 5);

        let mut slow_count = 0;
        while slow.try_recv().is_ok() {
            slow_count += 1;
        }
        assert_eq!(slow_count, DEFAULT_CAPACITY);
    }

    #[tokio::test]
    async fn dropping_subscription_stops_delivery() {
        let bus = Bus::new();
        let sub = bus.subscribe::<u32>("t").await;
        drop(sub);
        // Publish must not panic or block even though the receiver is gone.
        bus.publish("t", 1u32).await;
        let stats = bus.stats("t").await;
        assert_eq!(stats.published, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    #[should_panic(expected = "reused at two different types")]
    fn mismatched_subscribe_type_panics_in_test_builds() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let bus = Bus::new();
            let _a = bus.subscribe::<u32>("shared").await;
            let _b = bus.subscribe::<u64>("shared").await;
        });
    }
}
