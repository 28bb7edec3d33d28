use super::ReceiptStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationSummary, FeedMessage, Member, Message, MessageKey, NewConversation,
    NewMessage, UserProfile, WatermarkRow,
};
use crate::services::aggregator;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserProfile>,
    conversations: HashMap<Uuid, Conversation>,
    // conversation_id -> members in join order
    members: HashMap<Uuid, Vec<Member>>,
    messages: HashMap<Uuid, Message>,
    // conversation_id -> ordered message keys
    timeline: HashMap<Uuid, BTreeSet<MessageKey>>,
}

impl Inner {
    fn username(&self, user_id: Uuid) -> String {
        self.users
            .get(&user_id)
            .map(|u| u.username.clone())
            .unwrap_or_default()
    }

    fn conversation_messages(&self, conversation_id: Uuid) -> Vec<Message> {
        self.timeline
            .get(&conversation_id)
            .map(|keys| {
                keys.iter()
                    .rev()
                    .filter_map(|k| self.messages.get(&k.id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Process-local store guarded by a single `RwLock`.
///
/// Every write takes the write lock, so a compare-and-advance on a watermark
/// is atomic with respect to every other operation.
#[derive(Default, Clone)]
pub struct MemoryReceiptStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReceiptStore for MemoryReceiptStore {
    async fn upsert_user(&self, profile: UserProfile) -> AppResult<UserProfile> {
        let mut guard = self.inner.write().await;
        guard.users.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let guard = self.inner.read().await;
        Ok(guard.conversations.get(&id).cloned())
    }

    async fn create_conversation(&self, new: NewConversation) -> AppResult<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            name: new.name,
            is_group: new.is_group,
            created_at: now,
        };

        let members = new
            .member_ids
            .iter()
            .map(|user_id| Member {
                conversation_id: conversation.id,
                user_id: *user_id,
                joined_at: now,
                last_seen: None,
            })
            .collect();

        let mut guard = self.inner.write().await;
        guard.conversations.insert(conversation.id, conversation.clone());
        guard.members.insert(conversation.id, members);
        guard.timeline.insert(conversation.id, BTreeSet::new());
        Ok(conversation)
    }

    async fn delete_conversation(&self, id: Uuid) -> AppResult<bool> {
        let mut guard = self.inner.write().await;
        if guard.conversations.remove(&id).is_none() {
            return Ok(false);
        }
        guard.members.remove(&id);
        if let Some(keys) = guard.timeline.remove(&id) {
            for key in keys {
                guard.messages.remove(&key.id);
            }
        }
        Ok(true)
    }

    async fn member(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<Option<Member>> {
        let guard = self.inner.read().await;
        Ok(guard
            .members
            .get(&conversation_id)
            .and_then(|members| members.iter().find(|m| m.user_id == user_id))
            .cloned())
    }

    async fn member_ids(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let guard = self.inner.read().await;
        Ok(guard
            .members
            .get(&conversation_id)
            .map(|members| members.iter().map(|m| m.user_id).collect())
            .unwrap_or_default())
    }

    async fn remove_member(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let mut guard = self.inner.write().await;
        let Some(members) = guard.members.get_mut(&conversation_id) else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|m| m.user_id != user_id);
        Ok(members.len() != before)
    }

    async fn watermarks(&self, conversation_id: Uuid) -> AppResult<Vec<WatermarkRow>> {
        let guard = self.inner.read().await;
        Ok(guard
            .members
            .get(&conversation_id)
            .map(|members| {
                members
                    .iter()
                    .map(|m| WatermarkRow {
                        member_id: m.user_id,
                        username: guard.username(m.user_id),
                        last_seen_message_id: m.last_seen.map(|k| k.id),
                        last_seen_message_at: m.last_seen.map(|k| k.created_at),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let guard = self.inner.read().await;
        Ok(guard.messages.get(&id).cloned())
    }

    async fn insert_message(&self, new: NewMessage) -> AppResult<Message> {
        let mut guard = self.inner.write().await;
        if !guard.conversations.contains_key(&new.conversation_id) {
            return Err(AppError::NotFound("conversation".into()));
        }

        let mut created_at = Utc::now();
        if let Some(newest) = guard
            .timeline
            .get(&new.conversation_id)
            .and_then(|keys| keys.last())
        {
            if created_at <= newest.created_at {
                created_at = newest.created_at + Duration::microseconds(1);
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content: new.content,
            created_at,
        };
        guard
            .timeline
            .entry(message.conversation_id)
            .or_default()
            .insert(message.key());
        guard.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<FeedMessage>> {
        let guard = self.inner.read().await;
        Ok(guard
            .conversation_messages(conversation_id)
            .into_iter()
            .take(limit)
            .map(|message| {
                let sender = guard.users.get(&message.sender_id);
                FeedMessage {
                    sender_name: sender.map(|u| u.username.clone()).unwrap_or_default(),
                    sender_image: sender.and_then(|u| u.image_url.clone()),
                    message,
                }
            })
            .collect())
    }

    async fn unseen_keys(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Vec<MessageKey>> {
        let guard = self.inner.read().await;
        let Some(member) = guard
            .members
            .get(&conversation_id)
            .and_then(|members| members.iter().find(|m| m.user_id == user_id))
        else {
            return Ok(Vec::new());
        };

        Ok(guard
            .timeline
            .get(&conversation_id)
            .map(|keys| {
                keys.iter()
                    .filter(|k| member.last_seen.map_or(true, |w| k.is_newer_than(&w)))
                    .filter(|k| {
                        guard
                            .messages
                            .get(&k.id)
                            .is_some_and(|m| m.sender_id != user_id)
                    })
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn advance_watermark(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        target: MessageKey,
    ) -> AppResult<bool> {
        let mut guard = self.inner.write().await;
        let member = guard
            .members
            .get_mut(&conversation_id)
            .and_then(|members| members.iter_mut().find(|m| m.user_id == user_id))
            .ok_or(AppError::Unauthorized)?;

        if !member.would_advance(&target) {
            return Ok(false);
        }
        member.last_seen = Some(target);
        Ok(true)
    }

    async fn conversations_for(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let guard = self.inner.read().await;
        let mut summaries: Vec<ConversationSummary> = guard
            .members
            .iter()
            .filter_map(|(conversation_id, members)| {
                let member = members.iter().find(|m| m.user_id == user_id)?;
                let conversation = guard.conversations.get(conversation_id)?.clone();
                let messages = guard.conversation_messages(*conversation_id);
                let unseen_count =
                    aggregator::unseen_count(&messages, member.last_seen_message_id(), user_id);
                Some(ConversationSummary {
                    conversation,
                    last_message_id: messages.first().map(|m| m.id),
                    unseen_count,
                })
            })
            .collect();

        summaries.sort_by_key(|s| {
            std::cmp::Reverse(
                s.last_message_id
                    .and_then(|id| guard.messages.get(&id))
                    .map(|m| m.created_at)
                    .unwrap_or(s.conversation.created_at),
            )
        });
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (MemoryReceiptStore, Uuid, Uuid, Uuid) {
        let store = MemoryReceiptStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = store
            .create_conversation(NewConversation {
                name: None,
                is_group: false,
                member_ids: vec![alice, bob],
            })
            .await
            .unwrap();
        (store, conversation.id, alice, bob)
    }

    async fn send(store: &MemoryReceiptStore, conversation_id: Uuid, sender: Uuid) -> Message {
        store
            .insert_message(NewMessage {
                conversation_id,
                sender_id: sender,
                content: "hi".into(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_messages_are_strictly_ordered() {
        let (store, conversation_id, alice, _) = seeded().await;
        let first = send(&store, conversation_id, alice).await;
        let second = send(&store, conversation_id, alice).await;
        assert!(second.key().is_newer_than(&first.key()));

        let feed = store.recent_messages(conversation_id, 10).await.unwrap();
        assert_eq!(feed[0].message.id, second.id);
        assert_eq!(feed[1].message.id, first.id);
    }

    #[tokio::test]
    async fn test_advance_is_forward_only() {
        let (store, conversation_id, alice, bob) = seeded().await;
        let older = send(&store, conversation_id, alice).await;
        let newer = send(&store, conversation_id, alice).await;

        assert!(store
            .advance_watermark(conversation_id, bob, newer.key())
            .await
            .unwrap());
        assert!(!store
            .advance_watermark(conversation_id, bob, older.key())
            .await
            .unwrap());
        assert!(!store
            .advance_watermark(conversation_id, bob, newer.key())
            .await
            .unwrap());

        let member = store.member(conversation_id, bob).await.unwrap().unwrap();
        assert_eq!(member.last_seen_message_id(), Some(newer.id));
    }

    #[tokio::test]
    async fn test_unseen_keys_skip_own_messages() {
        let (store, conversation_id, alice, bob) = seeded().await;
        send(&store, conversation_id, alice).await;
        send(&store, conversation_id, bob).await;
        let last = send(&store, conversation_id, alice).await;

        assert_eq!(
            store.unseen_keys(conversation_id, bob).await.unwrap().len(),
            2
        );
        store
            .advance_watermark(conversation_id, bob, last.key())
            .await
            .unwrap();
        assert!(store
            .unseen_keys(conversation_id, bob)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (store, conversation_id, alice, _) = seeded().await;
        let message = send(&store, conversation_id, alice).await;

        assert!(store.delete_conversation(conversation_id).await.unwrap());
        assert!(store.message(message.id).await.unwrap().is_none());
        assert!(store.member_ids(conversation_id).await.unwrap().is_empty());
        assert!(!store.delete_conversation(conversation_id).await.unwrap());
    }
}
