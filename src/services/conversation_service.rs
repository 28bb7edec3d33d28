use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationSummary, NewConversation, UserProfile};
use crate::services::aggregator;
use crate::services::read_service::ReadService;
use crate::store::ReceiptStore;
use crate::websocket::{events, ChangeEvent, ConnectionRegistry};
use serde::Serialize;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 255;
const MAX_USERNAME_LEN: usize = 64;

/// Conversation list plus the global badge total
#[derive(Debug, Clone, Serialize)]
pub struct ConversationList {
    pub conversations: Vec<ConversationSummary>,
    pub unseen_total: u64,
}

pub struct ConversationService;

impl ConversationService {
    /// Every conversation of `user_id` with unseen counts and their sum
    pub async fn list(store: &dyn ReceiptStore, user_id: Uuid) -> AppResult<ConversationList> {
        let conversations = store.conversations_for(user_id).await?;
        let unseen_total = aggregator::total_unseen(&conversations);
        Ok(ConversationList {
            conversations,
            unseen_total,
        })
    }

    /// Create a direct or group conversation.
    ///
    /// A name makes it a group, which needs at least one other member.
    /// Without a name there must be exactly one other member.
    pub async fn create(
        store: &dyn ReceiptStore,
        registry: &ConnectionRegistry,
        creator_id: Uuid,
        name: Option<String>,
        member_ids: Vec<Uuid>,
    ) -> AppResult<Conversation> {
        let mut all_members = vec![creator_id];
        for member_id in member_ids {
            if !all_members.contains(&member_id) {
                all_members.push(member_id);
            }
        }

        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if all_members.len() < 2 {
            return Err(AppError::BadRequest(
                "a conversation needs at least one other member".into(),
            ));
        }
        match &name {
            None if all_members.len() > 2 => {
                return Err(AppError::BadRequest("group name cannot be empty".into()))
            }
            Some(n) if n.chars().count() > MAX_NAME_LEN => {
                return Err(AppError::BadRequest(format!(
                    "group name too long (max {MAX_NAME_LEN})"
                )))
            }
            _ => {}
        }
        let is_group = name.is_some();

        let conversation = store
            .create_conversation(NewConversation {
                name,
                is_group,
                member_ids: all_members.clone(),
            })
            .await?;

        tracing::info!(
            conversation_id = %conversation.id,
            %creator_id,
            members = all_members.len(),
            is_group,
            "conversation created"
        );

        let watermarks = store.watermarks(conversation.id).await?;
        for row in watermarks {
            events::publish_to_users(
                registry,
                ChangeEvent::MemberJoined {
                    conversation_id: conversation.id,
                    user_id: row.member_id,
                    username: row.username,
                },
                &[row.member_id],
            )
            .await;
        }

        Ok(conversation)
    }

    /// Leave a group conversation; the caller's watermark goes with them
    pub async fn leave(
        store: &dyn ReceiptStore,
        registry: &ConnectionRegistry,
        caller: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<()> {
        ReadService::require_member(store, conversation_id, caller).await?;
        let conversation = store
            .conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("conversation".into()))?;
        if !conversation.is_group {
            return Err(AppError::InvalidState(
                "direct conversations cannot be left, delete them instead".into(),
            ));
        }

        if store.remove_member(conversation_id, caller).await? {
            tracing::info!(%conversation_id, user_id = %caller, "member left conversation");
            events::publish_to_users(
                registry,
                ChangeEvent::MemberLeft {
                    conversation_id,
                    user_id: caller,
                },
                &[caller],
            )
            .await;
        }
        Ok(())
    }

    /// Delete a direct conversation with both members, their watermarks and
    /// all messages. Groups are left, not deleted.
    pub async fn delete(
        store: &dyn ReceiptStore,
        registry: &ConnectionRegistry,
        caller: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<()> {
        ReadService::require_member(store, conversation_id, caller).await?;
        let conversation = store
            .conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("conversation".into()))?;
        if conversation.is_group {
            return Err(AppError::InvalidState(
                "group conversations cannot be deleted, leave them instead".into(),
            ));
        }
        let member_ids = store.member_ids(conversation_id).await?;

        if store.delete_conversation(conversation_id).await? {
            tracing::info!(%conversation_id, deleted_by = %caller, "conversation deleted");
            events::publish_to_users(
                registry,
                ChangeEvent::ConversationDeleted { conversation_id },
                &member_ids,
            )
            .await;
        }
        Ok(())
    }

    /// Store the caller's display name and avatar
    pub async fn upsert_profile(
        store: &dyn ReceiptStore,
        user_id: Uuid,
        username: String,
        image_url: Option<String>,
    ) -> AppResult<UserProfile> {
        let username = username.trim().to_string();
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            return Err(AppError::BadRequest(format!(
                "username must be 1-{MAX_USERNAME_LEN} characters"
            )));
        }
        store
            .upsert_user(UserProfile {
                id: user_id,
                username,
                image_url,
            })
            .await
    }
}
