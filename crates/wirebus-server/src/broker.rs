//! Topic pub/sub boundary.
//!
//! [`Broker`] is the seam a production deployment fills with an external
//! bus; [`MemoryBroker`] is the in-process implementation used by the
//! bundled server and the tests. Per-topic ordering is guaranteed:
//! publishes to one topic reach each subscriber in publish order.
//! Delivery is at-most-once; a subscriber that went away is pruned on
//! the next publish touching its topics.

use std::collections::HashMap;

use metrics::counter;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use crate::metrics::{BROKER_DROPPED_TOTAL, BROKER_PUBLISHED_TOTAL};

/// One message delivered to a subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Raw text payload, already wire-encoded.
    pub payload: String,
}

/// Receiving half of a subscription. Dropping it unsubscribes.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<BrokerMessage>,
}

impl Subscription {
    /// Next message across all subscribed topics. `None` once the
    /// broker itself is gone.
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        self.receiver.recv().await
    }
}

/// Topic pub/sub abstraction.
pub trait Broker: Send + Sync {
    /// Publish `payload` to every current subscriber of `topic`.
    fn publish(&self, topic: &str, payload: &str);

    /// Subscribe to a set of topics. The subscription sees every
    /// subsequent publish to any of them.
    fn subscribe(&self, topics: &[String]) -> Subscription;
}

type SubscriberTable = HashMap<String, Vec<mpsc::UnboundedSender<BrokerMessage>>>;

/// In-process broker backed by unbounded channels.
#[derive(Default)]
pub struct MemoryBroker {
    topics: RwLock<SubscriberTable>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }
}

impl Broker for MemoryBroker {
    fn publish(&self, topic: &str, payload: &str) {
        let mut table = self.topics.write();
        let Some(senders) = table.get_mut(topic) else {
            counter!(BROKER_DROPPED_TOTAL).increment(1);
            return;
        };
        let mut delivered = 0u64;
        senders.retain(|sender| {
            let message = BrokerMessage {
                topic: topic.to_owned(),
                payload: payload.to_owned(),
            };
            if sender.send(message).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        if senders.is_empty() {
            let _ = table.remove(topic);
        }
        trace!(topic, delivered, "published");
        if delivered == 0 {
            counter!(BROKER_DROPPED_TOTAL).increment(1);
        } else {
            counter!(BROKER_PUBLISHED_TOTAL).increment(delivered);
        }
    }

    fn subscribe(&self, topics: &[String]) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut table = self.topics.write();
        for topic in topics {
            table.entry(topic.clone()).or_default().push(sender.clone());
        }
        Subscription { receiver }
    }
}
