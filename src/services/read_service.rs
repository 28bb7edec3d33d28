//! Watermark reads and the mark-read write path.

use crate::error::{AppError, AppResult};
use crate::models::{Member, WatermarkRow};
use crate::store::ReceiptStore;
use crate::websocket::{events, ChangeEvent, ConnectionRegistry};
use uuid::Uuid;

/// Result of a mark-read call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReadOutcome {
    /// The watermark moved to the requested message
    Advanced,
    /// The watermark was already at or past the requested message
    Unchanged,
}

pub struct ReadService;

impl ReadService {
    /// Resolve the caller's membership.
    ///
    /// `NotFound` if the conversation does not exist, `Unauthorized` if the
    /// caller is not a member of it.
    pub async fn require_member(
        store: &dyn ReceiptStore,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Member> {
        if store.conversation(conversation_id).await?.is_none() {
            return Err(AppError::NotFound("conversation".into()));
        }
        store
            .member(conversation_id, user_id)
            .await?
            .ok_or(AppError::Unauthorized)
    }

    /// Watermark of every member of a conversation, caller included
    pub async fn watermarks(
        store: &dyn ReceiptStore,
        caller: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<Vec<WatermarkRow>> {
        Self::require_member(store, conversation_id, caller).await?;
        store.watermarks(conversation_id).await
    }

    /// Move the caller's watermark to `message_id` if that is newer than
    /// where it is now.
    ///
    /// Repeating the call, or calling it with an older message, leaves the
    /// watermark untouched, so delivery order and retries do not matter.
    pub async fn mark_read(
        store: &dyn ReceiptStore,
        registry: &ConnectionRegistry,
        caller: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<MarkReadOutcome> {
        Self::require_member(store, conversation_id, caller).await?;

        let message = store
            .message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("message".into()))?;
        if message.conversation_id != conversation_id {
            return Err(AppError::InvalidState(
                "message does not belong to this conversation".into(),
            ));
        }

        let key = message.key();
        if !store.advance_watermark(conversation_id, caller, key).await? {
            tracing::debug!(
                %conversation_id,
                user_id = %caller,
                %message_id,
                "mark-read ignored, watermark already at or past message"
            );
            return Ok(MarkReadOutcome::Unchanged);
        }

        tracing::debug!(%conversation_id, user_id = %caller, %message_id, "watermark advanced");
        events::publish(
            registry,
            ChangeEvent::watermark_advanced(conversation_id, caller, key),
        )
        .await;
        Ok(MarkReadOutcome::Advanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewConversation, NewMessage};
    use crate::store::MemoryReceiptStore;
    use crate::websocket::Topic;

    struct Fixture {
        store: MemoryReceiptStore,
        registry: ConnectionRegistry,
        conversation_id: Uuid,
        alice: Uuid,
        bob: Uuid,
    }

    async fn fixture() -> Fixture {
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
        Fixture {
            store,
            registry: ConnectionRegistry::new(),
            conversation_id: conversation.id,
            alice,
            bob,
        }
    }

    async fn send(f: &Fixture, sender: Uuid) -> Uuid {
        f.store
            .insert_message(NewMessage {
                conversation_id: f.conversation_id,
                sender_id: sender,
                content: "hello".into(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let f = fixture().await;
        let m = send(&f, f.alice).await;

        let first = ReadService::mark_read(&f.store, &f.registry, f.bob, f.conversation_id, m)
            .await
            .unwrap();
        let second = ReadService::mark_read(&f.store, &f.registry, f.bob, f.conversation_id, m)
            .await
            .unwrap();

        assert_eq!(first, MarkReadOutcome::Advanced);
        assert_eq!(second, MarkReadOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_only_advances_publish() {
        let f = fixture().await;
        let older = send(&f, f.alice).await;
        let newer = send(&f, f.alice).await;
        let (_, mut rx) = f
            .registry
            .add_subscriber(Topic::Conversation(f.conversation_id))
            .await;

        ReadService::mark_read(&f.store, &f.registry, f.bob, f.conversation_id, newer)
            .await
            .unwrap();
        ReadService::mark_read(&f.store, &f.registry, f.bob, f.conversation_id, older)
            .await
            .unwrap();

        match rx.recv().await {
            Some(ChangeEvent::WatermarkAdvanced { message_id, .. }) => assert_eq!(message_id, newer),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_taxonomy() {
        let f = fixture().await;
        let m = send(&f, f.alice).await;
        let outsider = Uuid::new_v4();

        let err = ReadService::mark_read(&f.store, &f.registry, outsider, f.conversation_id, m)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Unauthorized);

        let err = ReadService::mark_read(&f.store, &f.registry, f.bob, Uuid::new_v4(), m)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = ReadService::mark_read(
            &f.store,
            &f.registry,
            f.bob,
            f.conversation_id,
            Uuid::new_v4(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let other = f
            .store
            .create_conversation(NewConversation {
                name: None,
                is_group: false,
                member_ids: vec![f.alice, f.bob],
            })
            .await
            .unwrap();
        let err = ReadService::mark_read(&f.store, &f.registry, f.bob, other.id, m)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_watermarks_include_caller() {
        let f = fixture().await;
        let rows = ReadService::watermarks(&f.store, f.alice, f.conversation_id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.last_seen_message_id.is_none()));

        let err = ReadService::watermarks(&f.store, Uuid::new_v4(), f.conversation_id)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Unauthorized);
    }
}
