//! Topic publish-subscribe bus
//!
//! Modules exchange events by topic instead of holding references to each
//! other, keeping container ownership a tree. Payloads are opaque bytes;
//! delivery is per-subscriber FIFO. Dropped subscribers are pruned on the
//! next publish to their topic.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

/// An event delivered over the bus
#[derive(Debug, Clone)]
pub struct BusEvent {
    /// Topic the event was published under
    pub topic: String,
    /// Opaque payload
    pub payload: Bytes,
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<String, Vec<Sender<BusEvent>>>>,
}

/// Cheaply clonable handle to the container's bus.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a topic; events published afterwards arrive on the
    /// returned receiver.
    pub fn subscribe(&self, topic: &str) -> Receiver<BusEvent> {
        let (tx, rx) = channel();
        self.inner
            .topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Publish a payload to every live subscriber of a topic.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(&self, topic: &str, payload: Bytes) -> usize {
        let mut topics = self.inner.topics.lock();
        let Some(subscribers) = topics.get_mut(topic) else {
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|tx| {
            let event = BusEvent {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            match tx.send(event) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        delivered
    }

    /// Number of live subscribers for a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map_or(0, |subs| subs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_subscribe() {
        let bus = Bus::new();
        let rx = bus.subscribe("block");

        assert_eq!(bus.publish("block", Bytes::from_static(b"b1")), 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.topic, "block");
        assert_eq!(&event.payload[..], b"b1");
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus = Bus::new();
        let blocks = bus.subscribe("block");
        let txs = bus.subscribe("tx");

        bus.publish("tx", Bytes::from_static(b"t1"));

        assert!(blocks.try_recv().is_err());
        assert_eq!(&txs.try_recv().unwrap().payload[..], b"t1");
    }

    #[test]
    fn test_fan_out_and_pruning() {
        let bus = Bus::new();
        let a = bus.subscribe("peer");
        let b = bus.subscribe("peer");
        assert_eq!(bus.publish("peer", Bytes::from_static(b"p")), 2);

        drop(b);
        assert_eq!(bus.publish("peer", Bytes::from_static(b"q")), 1);
        assert_eq!(bus.subscriber_count("peer"), 1);

        drop(a);
        assert_eq!(bus.publish("peer", Bytes::from_static(b"r")), 0);
        assert_eq!(bus.subscriber_count("peer"), 0);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = Bus::new();
        assert_eq!(bus.publish("nobody", Bytes::new()), 0);
    }
}
