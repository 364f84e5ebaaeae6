//! Typed Notification Channels
//!
//! Explicit subscribe/unsubscribe event channels. Each subscriber owns the
//! receiving half of an unbounded channel; the notifier keeps the sending
//! halves keyed by [`SubscriptionId`].
//!
//! Subscriptions are never implicit: the subscriber holds the id and must
//! hand it back to unsubscribe. Closed receivers are pruned on the next
//! notification.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Handle returned by `subscribe`, required to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Single-topic notifier.
#[derive(Debug)]
pub struct Notifier<E> {
    next_id: u64,
    subscribers: BTreeMap<SubscriptionId, UnboundedSender<E>>,
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            subscribers: BTreeMap::new(),
        }
    }
}

impl<E: Clone> Notifier<E> {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> (SubscriptionId, UnboundedReceiver<E>) {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = unbounded_channel();
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    /// Remove a subscriber. Returns false if the id was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Deliver an event to every live subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub fn notify(&mut self, event: &E) -> usize {
        self.subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
        self.subscribers.len()
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Notifiers keyed by topic (usually an entity id).
///
/// Subscription ids are unique across all topics.
#[derive(Debug)]
pub struct TopicNotifier<K, E> {
    next_id: u64,
    topics: BTreeMap<K, BTreeMap<SubscriptionId, UnboundedSender<E>>>,
}

impl<K, E> Default for TopicNotifier<K, E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            topics: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy, E: Clone> TopicNotifier<K, E> {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one topic.
    pub fn subscribe(&mut self, topic: K) -> (SubscriptionId, UnboundedReceiver<E>) {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = unbounded_channel();
        self.topics.entry(topic).or_default().insert(id, tx);
        (id, rx)
    }

    /// Unsubscribe from a topic. Returns false if nothing was removed.
    pub fn unsubscribe(&mut self, topic: K, id: SubscriptionId) -> bool {
        let Some(subs) = self.topics.get_mut(&topic) else {
            return false;
        };
        let removed = subs.remove(&id).is_some();
        if subs.is_empty() {
            self.topics.remove(&topic);
        }
        removed
    }

    /// Deliver an event to subscribers of `topic`.
    pub fn notify(&mut self, topic: K, event: &E) -> usize {
        let Some(subs) = self.topics.get_mut(&topic) else {
            return 0;
        };
        subs.retain(|_, tx| tx.send(event.clone()).is_ok());
        let delivered = subs.len();
        if subs.is_empty() {
            self.topics.remove(&topic);
        }
        delivered
    }

    /// Subscriber count for one topic.
    pub fn subscriber_count(&self, topic: K) -> usize {
        self.topics.get(&topic).map(|s| s.len()).unwrap_or(0)
    }

    /// Drop every subscription of a topic (e.g. the entity was destroyed).
    pub fn clear_topic(&mut self, topic: K) {
        self.topics.remove(&topic);
    }
}

// =============================================================================
// TESTS
// =============================================================================
