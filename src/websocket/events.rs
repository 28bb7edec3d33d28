//! Change notifications published after a write has been committed.

use super::{ConnectionRegistry, Topic};
use crate::models::{Message, MessageKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    MessageCreated {
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        created_at: DateTime<Utc>,
    },
    WatermarkAdvanced {
        conversation_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
        message_created_at: DateTime<Utc>,
    },
    MemberJoined {
        conversation_id: Uuid,
        user_id: Uuid,
        username: String,
    },
    MemberLeft {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    ConversationDeleted {
        conversation_id: Uuid,
    },
}

impl ChangeEvent {
    pub fn message_created(message: &Message) -> Self {
        ChangeEvent::MessageCreated {
            conversation_id: message.conversation_id,
            message_id: message.id,
            sender_id: message.sender_id,
            created_at: message.created_at,
        }
    }

    pub fn watermark_advanced(conversation_id: Uuid, user_id: Uuid, key: MessageKey) -> Self {
        ChangeEvent::WatermarkAdvanced {
            conversation_id,
            user_id,
            message_id: key.id,
            message_created_at: key.created_at,
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        match self {
            ChangeEvent::MessageCreated {
                conversation_id, ..
            }
            | ChangeEvent::WatermarkAdvanced {
                conversation_id, ..
            }
            | ChangeEvent::MemberJoined {
                conversation_id, ..
            }
            | ChangeEvent::MemberLeft {
                conversation_id, ..
            }
            | ChangeEvent::ConversationDeleted { conversation_id } => *conversation_id,
        }
    }
}

/// Publish an event on its conversation topic
pub async fn publish(registry: &ConnectionRegistry, event: ChangeEvent) {
    let topic = Topic::Conversation(event.conversation_id());
    tracing::trace!(?event, "publishing change event");
    registry.broadcast(topic, event).await;
}

/// Publish a membership event on the conversation topic and on the personal
/// topic of every affected user, so observers that do not follow the
/// conversation yet still hear about it.
pub async fn publish_to_users(
    registry: &ConnectionRegistry,
    event: ChangeEvent,
    user_ids: &[Uuid],
) {
    for user_id in user_ids {
        registry.broadcast(Topic::User(*user_id), event.clone()).await;
    }
    publish(registry, event).await;
}
