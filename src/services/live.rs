//! Live observers over the change feed.
//!
//! `BadgeTracker` and `ConversationView` hold just enough state to recompute
//! their output synchronously from each `ChangeEvent`. The `spawn_*` drivers
//! load the initial state from the store, follow the registry and publish
//! every new snapshot through a `watch` channel. A driver stops and
//! unsubscribes as soon as its receiver is dropped.

use crate::error::AppResult;
use crate::models::{MessageKey, WatermarkRow};
use crate::services::aggregator::{self, SeenBy};
use crate::services::read_service::ReadService;
use crate::store::ReceiptStore;
use crate::websocket::{ChangeEvent, ConnectionRegistry, SubscriberId, Topic};
use futures::stream::{SelectAll, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// Unseen counts of one viewer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BadgeSnapshot {
    pub total: u64,
    pub conversations: BTreeMap<Uuid, u64>,
}

#[derive(Debug, Default)]
struct Ledger {
    watermark: Option<MessageKey>,
    // messages from others newer than `watermark`
    unseen: BTreeSet<MessageKey>,
}

impl Ledger {
    fn is_past_watermark(&self, key: &MessageKey) -> bool {
        self.watermark.map_or(true, |w| key.is_newer_than(&w))
    }
}

/// Per-viewer unseen counters for every conversation they belong to
#[derive(Debug)]
pub struct BadgeTracker {
    viewer: Uuid,
    ledgers: HashMap<Uuid, Ledger>,
}

impl BadgeTracker {
    pub fn new(viewer: Uuid) -> Self {
        Self {
            viewer,
            ledgers: HashMap::new(),
        }
    }

    pub fn is_tracking(&self, conversation_id: Uuid) -> bool {
        self.ledgers.contains_key(&conversation_id)
    }

    /// Start (or restart) tracking a conversation from loaded state
    pub fn track(
        &mut self,
        conversation_id: Uuid,
        watermark: Option<MessageKey>,
        unseen: impl IntoIterator<Item = MessageKey>,
    ) {
        let mut ledger = Ledger {
            watermark,
            unseen: BTreeSet::new(),
        };
        let fresh: Vec<MessageKey> = unseen
            .into_iter()
            .filter(|k| ledger.is_past_watermark(k))
            .collect();
        ledger.unseen.extend(fresh);
        self.ledgers.insert(conversation_id, ledger);
    }

    /// Apply one event; returns whether any count changed
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::MessageCreated {
                conversation_id,
                message_id,
                sender_id,
                created_at,
            } => {
                if *sender_id == self.viewer {
                    return false;
                }
                let Some(ledger) = self.ledgers.get_mut(conversation_id) else {
                    return false;
                };
                let key = MessageKey::new(*created_at, *message_id);
                ledger.is_past_watermark(&key) && ledger.unseen.insert(key)
            }
            ChangeEvent::WatermarkAdvanced {
                conversation_id,
                user_id,
                message_id,
                message_created_at,
            } => {
                if *user_id != self.viewer {
                    return false;
                }
                let Some(ledger) = self.ledgers.get_mut(conversation_id) else {
                    return false;
                };
                let key = MessageKey::new(*message_created_at, *message_id);
                if !ledger.is_past_watermark(&key) {
                    return false;
                }
                ledger.watermark = Some(key);
                let before = ledger.unseen.len();
                let mut newer = ledger.unseen.split_off(&key);
                newer.remove(&key);
                ledger.unseen = newer;
                ledger.unseen.len() != before
            }
            ChangeEvent::MemberLeft {
                conversation_id,
                user_id,
            } if *user_id == self.viewer => self
                .ledgers
                .remove(conversation_id)
                .is_some_and(|l| !l.unseen.is_empty()),
            ChangeEvent::ConversationDeleted { conversation_id } => self
                .ledgers
                .remove(conversation_id)
                .is_some_and(|l| !l.unseen.is_empty()),
            _ => false,
        }
    }

    pub fn snapshot(&self) -> BadgeSnapshot {
        let conversations: BTreeMap<Uuid, u64> = self
            .ledgers
            .iter()
            .map(|(id, ledger)| (*id, ledger.unseen.len() as u64))
            .collect();
        BadgeSnapshot {
            total: conversations.values().sum(),
            conversations,
        }
    }
}

/// Seen-by receipt for one of the viewer's messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReceipt {
    pub message_id: Uuid,
    pub seen_by: SeenBy,
}

/// Seen-by labels of one conversation, newest message first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeenBySnapshot {
    pub conversation_id: Uuid,
    pub receipts: Vec<MessageReceipt>,
    /// Set once the conversation is gone or the viewer left it
    pub closed: bool,
}

/// The viewer's own messages and every member's watermark in one
/// conversation
#[derive(Debug)]
pub struct ConversationView {
    conversation_id: Uuid,
    viewer: Uuid,
    own_messages: BTreeSet<MessageKey>,
    rows: Vec<WatermarkRow>,
    closed: bool,
}

impl ConversationView {
    pub fn new(
        conversation_id: Uuid,
        viewer: Uuid,
        own_messages: impl IntoIterator<Item = MessageKey>,
        rows: Vec<WatermarkRow>,
    ) -> Self {
        Self {
            conversation_id,
            viewer,
            own_messages: own_messages.into_iter().collect(),
            rows,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Apply one event; returns whether any label may have changed
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        if event.conversation_id() != self.conversation_id || self.closed {
            return false;
        }
        match event {
            ChangeEvent::MessageCreated {
                message_id,
                sender_id,
                created_at,
                ..
            } => {
                if *sender_id == self.viewer {
                    self.own_messages
                        .insert(MessageKey::new(*created_at, *message_id));
                }
                // nobody has seen a brand new message yet
                false
            }
            ChangeEvent::WatermarkAdvanced {
                user_id,
                message_id,
                message_created_at,
                ..
            } => {
                let key = MessageKey::new(*message_created_at, *message_id);
                let Some(row) = self.rows.iter_mut().find(|r| r.member_id == *user_id) else {
                    return false;
                };
                if row.last_seen().is_some_and(|current| !key.is_newer_than(&current)) {
                    return false;
                }
                row.last_seen_message_id = Some(key.id);
                row.last_seen_message_at = Some(key.created_at);
                *user_id != self.viewer
            }
            ChangeEvent::MemberJoined {
                user_id, username, ..
            } => {
                if !self.rows.iter().any(|r| r.member_id == *user_id) {
                    self.rows.push(WatermarkRow {
                        member_id: *user_id,
                        username: username.clone(),
                        last_seen_message_id: None,
                        last_seen_message_at: None,
                    });
                }
                false
            }
            ChangeEvent::MemberLeft { user_id, .. } => {
                if *user_id == self.viewer {
                    self.closed = true;
                    return true;
                }
                let before = self.rows.len();
                self.rows.retain(|r| r.member_id != *user_id);
                self.rows.len() != before
            }
            ChangeEvent::ConversationDeleted { .. } => {
                self.closed = true;
                true
            }
        }
    }

    pub fn snapshot(&self) -> SeenBySnapshot {
        let receipts = if self.closed {
            Vec::new()
        } else {
            self.own_messages
                .iter()
                .rev()
                .filter_map(|key| {
                    aggregator::seen_by(key.id, &self.rows, self.viewer).map(|seen_by| {
                        MessageReceipt {
                            message_id: key.id,
                            seen_by,
                        }
                    })
                })
                .collect()
        };
        SeenBySnapshot {
            conversation_id: self.conversation_id,
            receipts,
            closed: self.closed,
        }
    }
}

/// Registry subscriptions owned by one driver task
struct Subscriptions {
    registry: ConnectionRegistry,
    owned: Vec<(Topic, SubscriberId)>,
    streams: SelectAll<UnboundedReceiverStream<ChangeEvent>>,
}

impl Subscriptions {
    fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            owned: Vec::new(),
            streams: SelectAll::new(),
        }
    }

    async fn follow(&mut self, topic: Topic) {
        let (id, rx) = self.registry.add_subscriber(topic).await;
        self.owned.push((topic, id));
        self.streams.push(UnboundedReceiverStream::new(rx));
    }

    /// Drop every subscription to `topic`; its streams end once drained
    async fn unfollow(&mut self, topic: Topic) {
        let mut kept = Vec::with_capacity(self.owned.len());
        for (owned_topic, id) in self.owned.drain(..) {
            if owned_topic == topic {
                self.registry.remove_subscriber(topic, id).await;
            } else {
                kept.push((owned_topic, id));
            }
        }
        self.owned = kept;
    }

    async fn next(&mut self) -> Option<ChangeEvent> {
        self.streams.next().await
    }

    async fn close(self) {
        for (topic, id) in self.owned {
            self.registry.remove_subscriber(topic, id).await;
        }
    }
}

async fn load_ledger(
    store: &dyn ReceiptStore,
    tracker: &mut BadgeTracker,
    conversation_id: Uuid,
    viewer: Uuid,
) -> AppResult<()> {
    let Some(member) = store.member(conversation_id, viewer).await? else {
        return Ok(());
    };
    let unseen = store.unseen_keys(conversation_id, viewer).await?;
    tracker.track(conversation_id, member.last_seen, unseen);
    Ok(())
}

/// Follow every conversation of `viewer` and publish badge snapshots.
///
/// Subscriptions are made before the initial load, so no event can fall
/// between the two; replayed events are absorbed by the forward-only ledger.
pub async fn spawn_badge_tracker(
    store: Arc<dyn ReceiptStore>,
    registry: ConnectionRegistry,
    viewer: Uuid,
) -> AppResult<watch::Receiver<BadgeSnapshot>> {
    let mut subscriptions = Subscriptions::new(registry);
    subscriptions.follow(Topic::User(viewer)).await;

    let conversations = store.conversations_for(viewer).await?;
    let mut tracker = BadgeTracker::new(viewer);
    for summary in &conversations {
        let conversation_id = summary.conversation.id;
        subscriptions
            .follow(Topic::Conversation(conversation_id))
            .await;
        load_ledger(store.as_ref(), &mut tracker, conversation_id, viewer).await?;
    }

    let (tx, rx) = watch::channel(tracker.snapshot());
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = tx.closed() => break,
                event = subscriptions.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let mut changed = tracker.apply(&event);
            match &event {
                ChangeEvent::MemberLeft {
                    conversation_id,
                    user_id,
                } if *user_id == viewer => {
                    subscriptions
                        .unfollow(Topic::Conversation(*conversation_id))
                        .await;
                }
                ChangeEvent::ConversationDeleted { conversation_id } => {
                    subscriptions
                        .unfollow(Topic::Conversation(*conversation_id))
                        .await;
                }
                ChangeEvent::MemberJoined {
                    conversation_id,
                    user_id,
                    ..
                } if *user_id == viewer && !tracker.is_tracking(*conversation_id) => {
                    subscriptions
                        .follow(Topic::Conversation(*conversation_id))
                        .await;
                    match load_ledger(store.as_ref(), &mut tracker, *conversation_id, viewer).await
                    {
                        Ok(()) => changed = true,
                        Err(e) => tracing::warn!(
                            %conversation_id,
                            error = %e,
                            "failed to load joined conversation into badge"
                        ),
                    }
                }
                _ => {}
            }

            if changed && tx.send(tracker.snapshot()).is_err() {
                break;
            }
        }
        subscriptions.close().await;
        tracing::debug!(%viewer, "badge tracker stopped");
    });

    Ok(rx)
}

/// Follow one conversation and publish seen-by snapshots for the viewer's
/// own messages (the newest `page_limit` of them at start).
pub async fn spawn_conversation_view(
    store: Arc<dyn ReceiptStore>,
    registry: ConnectionRegistry,
    viewer: Uuid,
    conversation_id: Uuid,
    page_limit: usize,
) -> AppResult<watch::Receiver<SeenBySnapshot>> {
    ReadService::require_member(store.as_ref(), conversation_id, viewer).await?;

    let mut subscriptions = Subscriptions::new(registry);
    subscriptions
        .follow(Topic::Conversation(conversation_id))
        .await;

    let own = store
        .recent_messages(conversation_id, page_limit)
        .await?
        .into_iter()
        .filter(|feed| feed.message.sender_id == viewer)
        .map(|feed| feed.message.key());
    let rows = store.watermarks(conversation_id).await?;
    let mut view = ConversationView::new(conversation_id, viewer, own, rows);

    let (tx, rx) = watch::channel(view.snapshot());
    tokio::spawn(async move {
        while !view.is_closed() {
            let event = tokio::select! {
                _ = tx.closed() => break,
                event = subscriptions.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if view.apply(&event) && tx.send(view.snapshot()).is_err() {
                break;
            }
        }
        subscriptions.close().await;
        tracing::debug!(%viewer, %conversation_id, "conversation view stopped");
    });

    Ok(rx)
}
