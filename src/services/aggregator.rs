//! Read-side derivations over already-fetched messages and watermarks.
//!
//! Everything here is a pure function. Missing or partial data never
//! produces an error: it yields no label or a zero count instead.

use crate::models::{ConversationSummary, Message, MessageView, WatermarkRow};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const UNKNOWN_NAME: &str = "Someone";

/// "Seen by ..." receipt for a single message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenBy {
    pub label: String,
    /// Every viewer's display name, for the expanded list
    pub names: Vec<String>,
}

impl SeenBy {
    /// Build the label from display names; `None` when nobody has seen it
    pub fn from_names(names: Vec<String>) -> Option<Self> {
        let label = match names.as_slice() {
            [] => return None,
            [only] => format!("Seen by {only}"),
            [first, second] => format!("Seen by {first} and {second}"),
            [first, second, rest @ ..] => {
                format!("Seen by {first}, {second}, and {} more", rest.len())
            }
        };
        Some(Self { label, names })
    }
}

impl fmt::Display for SeenBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// First whitespace-separated token of a username
pub fn display_name(username: &str) -> String {
    username
        .split_whitespace()
        .next()
        .unwrap_or(UNKNOWN_NAME)
        .to_string()
}

/// Seen-by label for `message_id`, counting every member except `viewer`
/// whose watermark sits exactly on that message.
pub fn seen_by(message_id: Uuid, rows: &[WatermarkRow], viewer: Uuid) -> Option<SeenBy> {
    let names = rows
        .iter()
        .filter(|row| row.member_id != viewer)
        .filter(|row| row.last_seen_message_id == Some(message_id))
        .map(|row| display_name(&row.username))
        .collect();
    SeenBy::from_names(names)
}

/// Attach seen-by labels to the viewer's own messages in a feed
pub fn annotate_seen_by(views: &mut [MessageView], rows: &[WatermarkRow], viewer: Uuid) {
    for view in views.iter_mut() {
        view.seen_by = if view.is_current_user {
            seen_by(view.message.id, rows, viewer)
        } else {
            None
        };
    }
}

/// Messages newer than the viewer's watermark that someone else wrote.
///
/// `messages` may be in any order. An unset watermark counts every message
/// from others; a watermark pointing at a message missing from `messages`
/// counts nothing.
pub fn unseen_count(messages: &[Message], watermark: Option<Uuid>, viewer: Uuid) -> u64 {
    let floor = match watermark {
        None => None,
        Some(id) => match messages.iter().find(|m| m.id == id) {
            Some(m) => Some(m.key()),
            None => return 0,
        },
    };

    messages
        .iter()
        .filter(|m| m.sender_id != viewer)
        .filter(|m| floor.map_or(true, |f| m.key().is_newer_than(&f)))
        .count() as u64
}

/// Global badge: sum of per-conversation unseen counts
pub fn total_unseen(summaries: &[ConversationSummary]) -> u64 {
    summaries.iter().map(|s| s.unseen_count).sum()
}
