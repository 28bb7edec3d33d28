use crate::error::{AppError, AppResult};
use crate::models::{Message, MessageView, NewMessage};
use crate::services::aggregator;
use crate::services::read_service::ReadService;
use crate::store::ReceiptStore;
use crate::websocket::{events, ChangeEvent, ConnectionRegistry};
use uuid::Uuid;

pub const MAX_CONTENT_LEN: usize = 4000;

pub struct MessageService;

impl MessageService {
    /// Append a message from a member and notify the conversation
    pub async fn send(
        store: &dyn ReceiptStore,
        registry: &ConnectionRegistry,
        sender_id: Uuid,
        conversation_id: Uuid,
        content: String,
    ) -> AppResult<Message> {
        if content.trim().is_empty() {
            return Err(AppError::BadRequest("message content cannot be empty".into()));
        }
        if content.chars().count() > MAX_CONTENT_LEN {
            return Err(AppError::BadRequest(format!(
                "message content too long (max {MAX_CONTENT_LEN})"
            )));
        }

        ReadService::require_member(store, conversation_id, sender_id).await?;

        let message = store
            .insert_message(NewMessage {
                conversation_id,
                sender_id,
                content,
            })
            .await?;

        tracing::debug!(%conversation_id, message_id = %message.id, %sender_id, "message stored");
        events::publish(registry, ChangeEvent::message_created(&message)).await;
        Ok(message)
    }

    /// Newest-first feed as seen by `viewer`, with seen-by labels on the
    /// viewer's own messages
    pub async fn feed(
        store: &dyn ReceiptStore,
        viewer: Uuid,
        conversation_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<MessageView>> {
        ReadService::require_member(store, conversation_id, viewer).await?;

        let messages = store.recent_messages(conversation_id, limit).await?;
        let rows = store.watermarks(conversation_id).await?;

        let mut views: Vec<MessageView> = messages
            .into_iter()
            .map(|feed| MessageView {
                sender_id: feed.message.sender_id,
                is_current_user: feed.message.sender_id == viewer,
                sender_name: feed.sender_name,
                sender_image: feed.sender_image,
                message: feed.message,
                seen_by: None,
            })
            .collect();
        aggregator::annotate_seen_by(&mut views, &rows, viewer);
        Ok(views)
    }
}
