use super::ReceiptStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationSummary, FeedMessage, Member, Message, MessageKey, NewConversation,
    NewMessage, UserProfile, WatermarkRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

/// `ReceiptStore` over PostgreSQL (tokio-postgres + deadpool)
#[derive(Clone)]
pub struct PgReceiptStore {
    db: Pool,
}

impl PgReceiptStore {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

fn conversation_from_row(row: &Row) -> Conversation {
    Conversation {
        id: row.get("id"),
        name: row.get("name"),
        is_group: row.get("is_group"),
        created_at: row.get("created_at"),
    }
}

fn message_from_row(row: &Row) -> Message {
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        content: row.get("content"),
        created_at: row.get("created_at"),
    }
}

fn watermark_key(row: &Row) -> Option<MessageKey> {
    let id: Option<Uuid> = row.get("last_seen_message_id");
    let at: Option<DateTime<Utc>> = row.get("last_seen_message_at");
    match (at, id) {
        (Some(at), Some(id)) => Some(MessageKey::new(at, id)),
        _ => None,
    }
}

#[async_trait]
impl ReceiptStore for PgReceiptStore {
    async fn upsert_user(&self, profile: UserProfile) -> AppResult<UserProfile> {
        let client = self.db.get().await?;
        client
            .execute(
                r#"
                INSERT INTO users (id, username, image_url)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE
                SET username = EXCLUDED.username,
                    image_url = EXCLUDED.image_url,
                    updated_at = NOW()
                "#,
                &[&profile.id, &profile.username, &profile.image_url],
            )
            .await?;
        Ok(profile)
    }

    async fn conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let client = self.db.get().await?;
        let row = client
            .query_opt(
                "SELECT id, name, is_group, created_at FROM conversations WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn create_conversation(&self, new: NewConversation) -> AppResult<Conversation> {
        let mut client = self.db.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                r#"
                INSERT INTO conversations (id, name, is_group)
                VALUES ($1, $2, $3)
                RETURNING id, name, is_group, created_at
                "#,
                &[&Uuid::new_v4(), &new.name, &new.is_group],
            )
            .await?;
        let conversation = conversation_from_row(&row);

        for user_id in &new.member_ids {
            tx.execute(
                // clock_timestamp() keeps join order inside one transaction
                "INSERT INTO conversation_members (conversation_id, user_id, joined_at) VALUES ($1, $2, clock_timestamp())",
                &[&conversation.id, user_id],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(conversation)
    }

    async fn delete_conversation(&self, id: Uuid) -> AppResult<bool> {
        let client = self.db.get().await?;
        // members and messages go with it (ON DELETE CASCADE)
        let deleted = client
            .execute("DELETE FROM conversations WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }

    async fn member(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<Option<Member>> {
        let client = self.db.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT conversation_id, user_id, joined_at,
                       last_seen_message_id, last_seen_message_at
                FROM conversation_members
                WHERE conversation_id = $1 AND user_id = $2
                "#,
                &[&conversation_id, &user_id],
            )
            .await?;

        Ok(row.map(|row| Member {
            conversation_id: row.get("conversation_id"),
            user_id: row.get("user_id"),
            joined_at: row.get("joined_at"),
            last_seen: watermark_key(&row),
        }))
    }

    async fn member_ids(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                "SELECT user_id FROM conversation_members WHERE conversation_id = $1 ORDER BY joined_at ASC",
                &[&conversation_id],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }

    async fn remove_member(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let client = self.db.get().await?;
        let removed = client
            .execute(
                "DELETE FROM conversation_members WHERE conversation_id = $1 AND user_id = $2",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(removed > 0)
    }

    async fn watermarks(&self, conversation_id: Uuid) -> AppResult<Vec<WatermarkRow>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                r#"
                SELECT cm.user_id,
                       COALESCE(u.username, '') AS username,
                       cm.last_seen_message_id,
                       cm.last_seen_message_at
                FROM conversation_members cm
                LEFT JOIN users u ON u.id = cm.user_id
                WHERE cm.conversation_id = $1
                ORDER BY cm.joined_at ASC, cm.user_id ASC
                "#,
                &[&conversation_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| WatermarkRow {
                member_id: row.get("user_id"),
                username: row.get("username"),
                last_seen_message_id: row.get("last_seen_message_id"),
                last_seen_message_at: row.get("last_seen_message_at"),
            })
            .collect())
    }

    async fn message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let client = self.db.get().await?;
        let row = client
            .query_opt(
                "SELECT id, conversation_id, sender_id, content, created_at FROM messages WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(message_from_row))
    }

    async fn insert_message(&self, new: NewMessage) -> AppResult<Message> {
        let client = self.db.get().await?;
        // Keep creation time monotonic within the conversation even if the
        // database clock steps backwards.
        let row = client
            .query_opt(
                r#"
                INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
                SELECT $1::uuid, c.id, $3::uuid, $4::text, GREATEST(
                    clock_timestamp(),
                    COALESCE(
                        (SELECT MAX(m.created_at) FROM messages m WHERE m.conversation_id = c.id)
                            + INTERVAL '1 microsecond',
                        clock_timestamp()
                    )
                )
                FROM conversations c
                WHERE c.id = $2
                RETURNING id, conversation_id, sender_id, content, created_at
                "#,
                &[&Uuid::new_v4(), &new.conversation_id, &new.sender_id, &new.content],
            )
            .await?
            .ok_or_else(|| AppError::NotFound("conversation".into()))?;
        Ok(message_from_row(&row))
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<FeedMessage>> {
        let client = self.db.get().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = client
            .query(
                r#"
                SELECT m.id, m.conversation_id, m.sender_id, m.content, m.created_at,
                       COALESCE(u.username, '') AS sender_name,
                       u.image_url AS sender_image
                FROM messages m
                LEFT JOIN users u ON u.id = m.sender_id
                WHERE m.conversation_id = $1
                ORDER BY m.created_at DESC, m.id DESC
                LIMIT $2
                "#,
                &[&conversation_id, &limit],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| FeedMessage {
                message: message_from_row(row),
                sender_name: row.get("sender_name"),
                sender_image: row.get("sender_image"),
            })
            .collect())
    }

    async fn unseen_keys(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Vec<MessageKey>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                r#"
                SELECT m.id, m.created_at
                FROM messages m
                JOIN conversation_members cm
                  ON cm.conversation_id = m.conversation_id
                 AND cm.user_id = $2
                WHERE m.conversation_id = $1
                  AND m.sender_id <> $2
                  AND (
                    cm.last_seen_message_at IS NULL
                    OR (m.created_at, m.id) > (cm.last_seen_message_at, cm.last_seen_message_id)
                  )
                ORDER BY m.created_at ASC, m.id ASC
                "#,
                &[&conversation_id, &user_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| MessageKey::new(row.get("created_at"), row.get("id")))
            .collect())
    }

    async fn advance_watermark(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        target: MessageKey,
    ) -> AppResult<bool> {
        let client = self.db.get().await?;
        // Single-row conditional update: concurrent writers re-check the
        // predicate against the latest row version, so the watermark can
        // only move forward.
        let updated = client
            .execute(
                r#"
                UPDATE conversation_members
                SET last_seen_message_id = $3,
                    last_seen_message_at = $4
                WHERE conversation_id = $1
                  AND user_id = $2
                  AND (
                    last_seen_message_at IS NULL
                    OR (last_seen_message_at, last_seen_message_id) < ($4::timestamptz, $3::uuid)
                  )
                "#,
                &[&conversation_id, &user_id, &target.id, &target.created_at],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn conversations_for(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                r#"
                SELECT c.id, c.name, c.is_group, c.created_at,
                       last_msg.id AS last_message_id,
                       (
                         SELECT COUNT(*)
                         FROM messages m
                         WHERE m.conversation_id = c.id
                           AND m.sender_id <> cm.user_id
                           AND (
                             cm.last_seen_message_at IS NULL
                             OR (m.created_at, m.id) > (cm.last_seen_message_at, cm.last_seen_message_id)
                           )
                       ) AS unseen_count
                FROM conversation_members cm
                JOIN conversations c ON c.id = cm.conversation_id
                LEFT JOIN LATERAL (
                    SELECT m.id, m.created_at
                    FROM messages m
                    WHERE m.conversation_id = c.id
                    ORDER BY m.created_at DESC, m.id DESC
                    LIMIT 1
                ) last_msg ON TRUE
                WHERE cm.user_id = $1
                ORDER BY COALESCE(last_msg.created_at, c.created_at) DESC
                "#,
                &[&user_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let unseen: i64 = row.get("unseen_count");
                ConversationSummary {
                    conversation: conversation_from_row(row),
                    last_message_id: row.get("last_message_id"),
                    unseen_count: u64::try_from(unseen).unwrap_or(0),
                }
            })
            .collect())
    }
}
