use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod message_types;

pub use events::ChangeEvent;

/// Unique identifier for a change-feed subscriber
///
/// Each subscription gets its own ID so a closing observer removes exactly
/// its own channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a subscriber listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every change inside one conversation
    Conversation(Uuid),
    /// Membership changes that concern one user
    User(Uuid),
}

/// Subscriber entry with ID and channel
struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<ChangeEvent>,
}

/// In-process fanout of change notifications.
///
/// Broadcasting holds the write lock for the whole topic, so every
/// subscriber of a topic sees that topic's events in publish order.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    // topic -> list of subscribers
    inner: Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber to a topic
    ///
    /// Returns the subscriber id (for cleanup) and the event receiver.
    pub async fn add_subscriber(
        &self,
        topic: Topic,
    ) -> (SubscriberId, UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();

        let mut guard = self.inner.write().await;
        guard.entry(topic).or_default().push(Subscriber {
            id: subscriber_id,
            sender: tx,
        });

        tracing::debug!(
            ?topic,
            ?subscriber_id,
            total = guard.get(&topic).map(|v| v.len()).unwrap_or(0),
            "added subscriber"
        );

        (subscriber_id, rx)
    }

    /// Remove a specific subscriber from a topic
    pub async fn remove_subscriber(&self, topic: Topic, subscriber_id: SubscriberId) {
        let mut guard = self.inner.write().await;

        if let Some(subscribers) = guard.get_mut(&topic) {
            subscribers.retain(|s| s.id != subscriber_id);
            if subscribers.is_empty() {
                guard.remove(&topic);
                tracing::debug!(?topic, "removed empty topic from registry");
            }
        }
    }

    /// Deliver an event to every subscriber of a topic
    ///
    /// Subscribers whose receiver is gone are dropped on the way.
    pub async fn broadcast(&self, topic: Topic, event: ChangeEvent) {
        let mut guard = self.inner.write().await;
        if let Some(subscribers) = guard.get_mut(&topic) {
            let before = subscribers.len();
            subscribers.retain(|subscriber| subscriber.sender.send(event.clone()).is_ok());

            let after = subscribers.len();
            if before != after {
                tracing::debug!(
                    ?topic,
                    cleaned = before - after,
                    active = after,
                    "dead subscribers cleaned up"
                );
            }
            if subscribers.is_empty() {
                guard.remove(&topic);
            }
        }
    }

    /// Get subscriber count for a topic (for debugging/metrics)
    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        let guard = self.inner.read().await;
        guard.get(&topic).map(|v| v.len()).unwrap_or(0)
    }
}
