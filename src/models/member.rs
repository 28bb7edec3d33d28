//! Conversation membership and the per-member read watermark

use super::MessageKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's membership in a conversation, including their watermark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    /// Last message this member has seen; `None` until the first mark-read
    pub last_seen: Option<MessageKey>,
}

impl Member {
    pub fn last_seen_message_id(&self) -> Option<Uuid> {
        self.last_seen.map(|k| k.id)
    }

    /// Whether moving the watermark to `candidate` would advance it
    pub fn would_advance(&self, candidate: &MessageKey) -> bool {
        match &self.last_seen {
            None => true,
            Some(current) => candidate.is_newer_than(current),
        }
    }
}

/// One row of the watermark listing for a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkRow {
    pub member_id: Uuid,
    pub username: String,
    pub last_seen_message_id: Option<Uuid>,
    /// Creation time of the watermark message, used to keep rows forward-only
    /// when they are updated from change events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_message_at: Option<DateTime<Utc>>,
}

impl WatermarkRow {
    pub fn last_seen(&self) -> Option<MessageKey> {
        match (self.last_seen_message_at, self.last_seen_message_id) {
            (Some(at), Some(id)) => Some(MessageKey::new(at, id)),
            _ => None,
        }
    }
}
