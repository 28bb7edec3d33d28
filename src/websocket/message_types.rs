use crate::services::live::{BadgeSnapshot, MessageReceipt, SeenBySnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Inbound WebSocket events from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    /// Same as `POST /conversations/{id}/read`
    #[serde(rename = "mark_read")]
    MarkRead {
        conversation_id: Uuid,
        message_id: Uuid,
    },
}

/// Outbound WebSocket events from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsOutboundEvent {
    /// Global badge and per-conversation unseen counts
    #[serde(rename = "badge")]
    Badge {
        total: u64,
        conversations: BTreeMap<Uuid, u64>,
    },
    #[serde(rename = "seen_by")]
    SeenBy {
        conversation_id: Uuid,
        receipts: Vec<MessageReceipt>,
        closed: bool,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl From<BadgeSnapshot> for WsOutboundEvent {
    fn from(snapshot: BadgeSnapshot) -> Self {
        WsOutboundEvent::Badge {
            total: snapshot.total,
            conversations: snapshot.conversations,
        }
    }
}

impl From<SeenBySnapshot> for WsOutboundEvent {
    fn from(snapshot: SeenBySnapshot) -> Self {
        WsOutboundEvent::SeenBy {
            conversation_id: snapshot.conversation_id,
            receipts: snapshot.receipts,
            closed: snapshot.closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_read_wire_format() {
        let conversation_id = Uuid::new_v4();
        let message_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"mark_read","conversation_id":"{conversation_id}","message_id":"{message_id}"}}"#
        );
        let evt: WsInboundEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            evt,
            WsInboundEvent::MarkRead {
                conversation_id,
                message_id
            }
        );
    }

    #[test]
    fn test_badge_serializes_with_tag() {
        let evt = WsOutboundEvent::from(BadgeSnapshot::default());
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "badge");
        assert_eq!(json["total"], 0);
    }
}
