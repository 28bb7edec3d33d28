use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Total order of messages inside a conversation.
///
/// Messages are ordered by creation time; two messages created at the same
/// instant are ordered by id. Watermarks compare through this key only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl MessageKey {
    pub fn new(created_at: DateTime<Utc>, id: Uuid) -> Self {
        Self { created_at, id }
    }

    /// True if `self` sorts strictly after `other`
    pub fn is_newer_than(&self, other: &MessageKey) -> bool {
        self > other
    }
}

impl Ord for MessageKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for MessageKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Message struct matching database schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.created_at, self.id)
    }
}

/// Message joined with its sender's profile, newest-first in feeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedMessage {
    pub message: Message,
    pub sender_name: String,
    pub sender_image: Option<String>,
}

/// Feed entry as seen by one viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub message: Message,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub sender_image: Option<String>,
    pub is_current_user: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_by: Option<crate::services::aggregator::SeenBy>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
}
