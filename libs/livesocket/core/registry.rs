//! Topic registry
//!
//! Maps topic names to independent multicast streams and remembers which
//! topics are wanted, so a fresh connection can be brought back to the same
//! subscription set.
//!
//! ```text
//! inbound Envelope ─> route(topic) ─> TopicStream (broadcast) ─┬─> TopicReceiver (consumer 1)
//!                                                             ├─> TopicReceiver (consumer 2)
//!                                                             └─> ...
//! ```
//!
//! Each consumer owns its own receiver: a slow consumer lags and skips
//! messages on its own receiver without affecting anyone else.

use crate::codec::{Envelope, Payload};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Shared state behind one topic's stream
#[derive(Debug)]
struct TopicChannel {
    topic: String,
    /// `None` once the topic was unsubscribed; receivers then see end-of-stream
    sender: RwLock<Option<broadcast::Sender<Payload>>>,
}

/// Handle to a topic's stream
///
/// Cloning the handle does not create a new stream. Every call to
/// [`TopicStream::subscribe`] yields a new replay-free receiver that sees only
/// payloads routed after it was created.
#[derive(Debug, Clone)]
pub struct TopicStream {
    inner: Arc<TopicChannel>,
}

impl TopicStream {
    fn new(topic: &str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(TopicChannel {
                topic: topic.to_string(),
                sender: RwLock::new(Some(sender)),
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Attach a new consumer
    pub fn subscribe(&self) -> TopicReceiver {
        let receiver = match self.inner.sender.read().as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                // closed stream: hand out a receiver that ends immediately
                let (_sender, receiver) = broadcast::channel(1);
                receiver
            }
        };
        TopicReceiver {
            topic: self.inner.topic.clone(),
            receiver,
        }
    }

    /// Whether both handles refer to the same stream
    pub fn same_stream(a: &TopicStream, b: &TopicStream) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.sender.read().is_none()
    }

    fn push(&self, payload: Payload) -> usize {
        match self.inner.sender.read().as_ref() {
            // Err only means nobody is listening right now
            Some(sender) => sender.send(payload).unwrap_or(0),
            None => 0,
        }
    }

    fn close(&self) {
        self.inner.sender.write().take();
    }
}

/// One consumer's view of a topic stream
#[derive(Debug)]
pub struct TopicReceiver {
    topic: String,
    receiver: broadcast::Receiver<Payload>,
}

impl TopicReceiver {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next payload
    ///
    /// Returns `None` once the topic has been unsubscribed (or the client
    /// dropped). If this consumer fell behind, the skipped payloads are
    /// logged and reception continues with the oldest retained one.
    pub async fn recv(&mut self) -> Option<Payload> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Consumer lagging, payloads skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<Payload> {
        loop {
            match self.receiver.try_recv() {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Consumer lagging, payloads skipped");
                }
                Err(_) => return None,
            }
        }
    }

    /// Wait for the next payload that deserializes as `T`
    ///
    /// Payloads of a different shape are logged and skipped.
    pub async fn recv_as<T: DeserializeOwned>(&mut self) -> Option<T> {
        loop {
            let payload = self.recv().await?;
            match serde_json::from_value::<T>(payload) {
                Ok(value) => return Some(value),
                Err(e) => debug!(topic = %self.topic, error = %e, "Payload shape mismatch, skipped"),
            }
        }
    }
}

#[derive(Debug, Default)]
struct Topics {
    /// Wanted topics
    streams: HashMap<String, TopicStream>,
    /// Subscribe frame written on the current connection. Only the connection
    /// task changes this set, so it may still hold a topic the caller already
    /// removed from `streams`.
    on_wire: HashSet<String>,
}

/// Topic name -> stream, plus the wanted-set used for resubscription
#[derive(Debug)]
pub struct TopicRegistry {
    topics: RwLock<Topics>,
    capacity: usize,
}

impl TopicRegistry {
    /// # Arguments
    /// * `capacity` - per-topic broadcast buffer; a consumer further behind lags
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(Topics::default()),
            capacity: capacity.max(1),
        }
    }

    /// Return the topic's stream, creating and marking it wanted on first use
    ///
    /// The boolean is `true` when the topic was newly registered.
    pub fn subscribe(&self, topic: &str) -> (TopicStream, bool) {
        if let Some(stream) = self.topics.read().streams.get(topic) {
            return (stream.clone(), false);
        }

        let mut topics = self.topics.write();
        // another caller may have won the race between the two locks
        if let Some(stream) = topics.streams.get(topic) {
            return (stream.clone(), false);
        }
        let stream = TopicStream::new(topic, self.capacity);
        topics.streams.insert(topic.to_string(), stream.clone());
        debug!(topic, "Topic registered");
        (stream, true)
    }

    /// Close the topic's stream and forget it
    ///
    /// Returns `false` (and does nothing) for unknown topics. The wire state
    /// is left to the connection task, see [`clear_on_wire`](Self::clear_on_wire).
    pub fn unsubscribe(&self, topic: &str) -> bool {
        match self.topics.write().streams.remove(topic) {
            Some(stream) => {
                stream.close();
                debug!(topic, "Topic removed");
                true
            }
            None => false,
        }
    }

    /// Deliver an envelope's payload to its topic stream
    ///
    /// Returns `false` if the topic is not registered; the envelope is dropped.
    pub fn route(&self, envelope: Envelope) -> bool {
        self.deliver(&envelope.topic, envelope.payload)
    }

    /// Push a payload to `topic`'s stream; `false` if the topic is unknown
    pub fn deliver(&self, topic: &str, payload: Payload) -> bool {
        let stream = match self.topics.read().streams.get(topic) {
            Some(stream) => stream.clone(),
            None => return false,
        };
        stream.push(payload);
        true
    }

    /// Mark `topic` as subscribed on the current connection
    ///
    /// Returns `true` if the caller should write the subscribe frame: the
    /// topic is still wanted and has not been sent on this connection yet.
    pub fn mark_on_wire(&self, topic: &str) -> bool {
        let mut topics = self.topics.write();
        topics.streams.contains_key(topic) && topics.on_wire.insert(topic.to_string())
    }

    /// Drop `topic` from the current connection's subscriptions
    ///
    /// Returns `true` if its subscribe frame had gone out, i.e. the caller
    /// should write the unsubscribe frame. The topic may be wanted again by
    /// now; [`mark_on_wire`](Self::mark_on_wire) then reports it as pending.
    pub fn clear_on_wire(&self, topic: &str) -> bool {
        self.topics.write().on_wire.remove(topic)
    }

    /// All wanted topics not yet subscribed on the current connection,
    /// marked as subscribed. Order is unspecified.
    pub fn take_pending(&self) -> Vec<String> {
        let mut guard = self.topics.write();
        let topics = &mut *guard;
        let pending: Vec<String> = topics
            .streams
            .keys()
            .filter(|topic| !topics.on_wire.contains(*topic))
            .cloned()
            .collect();
        topics.on_wire.extend(pending.iter().cloned());
        pending
    }

    /// Forget wire state after the connection is lost; wanted topics stay
    pub fn reset_wire_state(&self) {
        self.topics.write().on_wire.clear();
    }

    pub fn wanted_topics(&self) -> Vec<String> {
        self.topics.read().streams.keys().cloned().collect()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.read().streams.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.read().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.read().streams.is_empty()
    }

    /// Close every stream; used when the owning client goes away
    pub fn close_all(&self) {
        let mut topics = self.topics.write();
        topics.on_wire.clear();
        for (_, stream) in topics.streams.drain() {
            stream.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_subscribe_is_identity_stable() {
        let registry = TopicRegistry::new(16);
        let (first, created) = registry.subscribe("A");
        assert!(created);

        for _ in 0..5 {
            let (again, created) = registry.subscribe("A");
            assert!(!created);
            assert!(TopicStream::same_stream(&first, &again));
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_route_reaches_every_consumer() {
        let registry = TopicRegistry::new(16);
        let (stream, _) = registry.subscribe("kline:BTCUSDT");
        let mut a = stream.subscribe();
        let mut b = stream.subscribe();

        assert!(registry.route(Envelope::new("kline:BTCUSDT", json!({"close": 100}))));

        assert_eq!(a.recv().await, Some(json!({"close": 100})));
        assert_eq!(b.recv().await, Some(json!({"close": 100})));
    }

    #[test]
    fn test_receivers_are_replay_free() {
        let registry = TopicRegistry::new(16);
        let (stream, _) = registry.subscribe("A");
        let mut early = stream.subscribe();

        registry.route(Envelope::new("A", json!(1)));
        let mut late = stream.subscribe();
        registry.route(Envelope::new("A", json!(2)));

        assert_eq!(early.try_recv(), Some(json!(1)));
        assert_eq!(early.try_recv(), Some(json!(2)));
        assert_eq!(late.try_recv(), Some(json!(2)));
        assert_eq!(late.try_recv(), None);
    }

    #[test]
    fn test_route_preserves_order_per_topic() {
        let registry = TopicRegistry::new(64);
        let (stream, _) = registry.subscribe("A");
        let mut rx = stream.subscribe();

        for i in 0..20 {
            registry.route(Envelope::new("A", json!(i)));
        }
        let received: Vec<_> = std::iter::from_fn(|| rx.try_recv()).collect();
        let expected: Vec<_> = (0..20).map(|i| json!(i)).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_slow_consumer_does_not_affect_others() {
        let registry = TopicRegistry::new(4);
        let (stream, _) = registry.subscribe("A");
        let mut slow = stream.subscribe();
        let mut fast = stream.subscribe();

        for i in 0..10 {
            registry.route(Envelope::new("A", json!(i)));
            assert_eq!(fast.try_recv(), Some(json!(i)));
        }

        // the slow consumer lost the oldest payloads but still sees the tail
        let tail: Vec<_> = std::iter::from_fn(|| slow.try_recv()).collect();
        assert_eq!(tail, vec![json!(6), json!(7), json!(8), json!(9)]);
    }

    #[test]
    fn test_unknown_topic_is_dropped() {
        let registry = TopicRegistry::new(16);
        assert!(!registry.route(Envelope::new("nobody", json!(1))));
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_stream() {
        let registry = TopicRegistry::new(16);
        let (stream, _) = registry.subscribe("A");
        let mut rx = stream.subscribe();

        assert!(registry.unsubscribe("A"));
        assert!(stream.is_closed());
        assert_eq!(rx.recv().await, None);
        assert!(!registry.contains("A"));

        // a later subscribe starts a fresh stream
        let (fresh, created) = registry.subscribe("A");
        assert!(created);
        assert!(!TopicStream::same_stream(&stream, &fresh));
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let registry = TopicRegistry::new(16);
        assert!(!registry.unsubscribe("A"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_wire_state_tracking() {
        let registry = TopicRegistry::new(16);
        registry.subscribe("A");
        registry.subscribe("B");

        let pending: HashSet<_> = registry.take_pending().into_iter().collect();
        assert_eq!(pending, HashSet::from(["A".to_string(), "B".to_string()]));
        assert!(registry.take_pending().is_empty());
        assert!(!registry.mark_on_wire("A"));

        registry.reset_wire_state();
        assert!(registry.mark_on_wire("A"));
        assert_eq!(registry.take_pending(), vec!["B".to_string()]);
        assert!(!registry.mark_on_wire("unknown"));
    }

    #[test]
    fn test_wire_state_survives_resubscribe_before_unsubscribe_is_sent() {
        let registry = TopicRegistry::new(16);
        registry.subscribe("A");
        assert!(registry.mark_on_wire("A"));

        // caller unsubscribes and subscribes again before the connection task
        // gets to the unsubscribe
        registry.unsubscribe("A");
        registry.subscribe("A");
        assert!(!registry.mark_on_wire("A"));

        assert!(registry.clear_on_wire("A"));
        assert!(registry.mark_on_wire("A"));
        assert!(!registry.clear_on_wire("B"));
    }

    #[test]
    fn test_unsubscribed_topic_is_not_pending() {
        let registry = TopicRegistry::new(16);
        registry.subscribe("A");
        registry.unsubscribe("A");

        assert!(!registry.mark_on_wire("A"));
        assert!(registry.take_pending().is_empty());
        assert!(!registry.clear_on_wire("A"));
    }

    #[tokio::test]
    async fn test_recv_as_skips_mismatched_payloads() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Tick {
            close: f64,
        }

        let registry = TopicRegistry::new(16);
        let (stream, _) = registry.subscribe("A");
        let mut rx = stream.subscribe();

        registry.route(Envelope::new("A", json!("garbage")));
        registry.route(Envelope::new("A", json!({"close": 101.5})));

        assert_eq!(rx.recv_as::<Tick>().await, Some(Tick { close: 101.5 }));
    }
}
