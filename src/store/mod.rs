//! Persistence boundary for conversations, messages and watermarks.
//!
//! Services only talk to `ReceiptStore`. The PostgreSQL implementation is
//! used in production; the in-memory one backs tests and local runs.

use crate::error::AppResult;
use crate::models::{
    Conversation, ConversationSummary, FeedMessage, Member, Message, MessageKey, NewConversation,
    NewMessage, UserProfile, WatermarkRow,
};
use async_trait::async_trait;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryReceiptStore;
pub use postgres::PgReceiptStore;

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Insert or refresh the cached display data for a user
    async fn upsert_user(&self, profile: UserProfile) -> AppResult<UserProfile>;

    async fn conversation(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    /// Create a conversation and its members (all watermarks unset)
    async fn create_conversation(&self, new: NewConversation) -> AppResult<Conversation>;

    /// Delete a conversation with its members and messages.
    /// Returns false if it did not exist.
    async fn delete_conversation(&self, id: Uuid) -> AppResult<bool>;

    async fn member(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<Option<Member>>;

    async fn member_ids(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>>;

    /// Remove one member (and with it their watermark).
    /// Returns false if they were not a member.
    async fn remove_member(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool>;

    /// Watermark of every member, caller included, in join order
    async fn watermarks(&self, conversation_id: Uuid) -> AppResult<Vec<WatermarkRow>>;

    async fn message(&self, id: Uuid) -> AppResult<Option<Message>>;

    /// Append a message. Its creation time is never earlier than the
    /// newest message already in the conversation.
    async fn insert_message(&self, new: NewMessage) -> AppResult<Message>;

    /// Newest-first page of a conversation's messages
    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<FeedMessage>>;

    /// Keys of messages from others that are newer than `user_id`'s watermark
    async fn unseen_keys(&self, conversation_id: Uuid, user_id: Uuid)
        -> AppResult<Vec<MessageKey>>;

    /// Compare-and-advance the watermark of one member.
    ///
    /// Writes `target` only if the watermark is unset or strictly older than
    /// `target`, as one atomic step. Returns whether the watermark moved.
    async fn advance_watermark(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        target: MessageKey,
    ) -> AppResult<bool>;

    /// Every conversation of `user_id` with its unseen count, most recently
    /// active first
    async fn conversations_for(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>>;
}
