use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Conversation, Message, RecallScope};

use super::{ConversationListRow, MessageRecord, NewConversation, StorageGateway};

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn conversation_from_row(row: &PgRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        title: row.get("title"),
        created_by: row.get("created_by"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &PgRow) -> Message {
    let scope: String = row.get("recall_scope");
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        body: row.get("body"),
        read_at: row.get("read_at"),
        is_recalled: row.get("is_recalled"),
        recall_scope: RecallScope::parse(&scope).unwrap_or(RecallScope::None),
        recalled_at: row.get("recalled_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const CONVERSATION_COLUMNS: &str =
    "id, organization_id, title, created_by, deleted_at, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, body, read_at, is_recalled, \
     recall_scope, recalled_at, created_at, updated_at";

#[async_trait]
impl StorageGateway for PostgresStorage {
    async fn create_conversation(
        &self,
        new: NewConversation<'_>,
    ) -> Result<Conversation, AppError> {
        let id = Uuid::new_v4();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Storage(format!("tx: {e}")))?;

        let row = sqlx::query(&format!(
            "INSERT INTO conversations (id, organization_id, title, created_by) \
             VALUES ($1, $2, $3, $4) RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(id)
        .bind(new.organization_id)
        .bind(new.title)
        .bind(new.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::Storage(format!("insert conversation: {e}")))?;

        for user_id in new.participants {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id) \
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Storage(format!("insert participant {user_id}: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Storage(format!("commit: {e}")))?;

        Ok(conversation_from_row(&row))
    }

    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("find conversation: {e}")))?;

        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn find_direct_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<Uuid>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT c.id
            FROM conversations c
            WHERE c.deleted_at IS NULL
              AND COALESCE(c.title, '') = ''
              AND EXISTS (SELECT 1 FROM conversation_participants WHERE conversation_id = c.id AND user_id = $1)
              AND EXISTS (SELECT 1 FROM conversation_participants WHERE conversation_id = c.id AND user_id = $2)
              AND (SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = c.id) = 2
            LIMIT 1
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("find direct conversation: {e}")))?;

        Ok(row.map(|r| r.get(0)))
    }

    async fn set_conversation_title(&self, id: Uuid, title: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE conversations SET title = $2, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(title)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("set title: {e}")))?;
        Ok(())
    }

    async fn soft_delete_conversation(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE conversations SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("delete conversation: {e}")))?;
        Ok(())
    }

    async fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query(
            "SELECT user_id FROM conversation_participants \
             WHERE conversation_id = $1 ORDER BY joined_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("list participants: {e}")))?;

        Ok(rows.into_iter().map(|r| r.get("user_id")).collect())
    }

    async fn is_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let row = sqlx::query(
            r#"
            SELECT 1
            FROM conversation_participants cp
            JOIN conversations c ON c.id = cp.conversation_id
            WHERE cp.conversation_id = $1
              AND cp.user_id = $2
              AND c.deleted_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("is_participant: {e}")))?;
        Ok(row.is_some())
    }

    async fn count_participants(&self, conversation_id: Uuid) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("count participants: {e}")))?;
        Ok(count)
    }

    async fn insert_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id) \
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("insert participant: {e}")))?;
        Ok(())
    }

    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            "DELETE FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("remove participant: {e}")))?;
        Ok(())
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Result<Message, AppError> {
        let id = Uuid::new_v4();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Storage(format!("tx: {e}")))?;

        let row = sqlx::query(&format!(
            "INSERT INTO messages (id, conversation_id, sender_id, body) \
             VALUES ($1, $2, $3, $4) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(body)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::Storage(format!("insert msg: {e}")))?;

        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Storage(format!("touch conversation: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::Storage(format!("commit: {e}")))?;

        Ok(message_from_row(&row))
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("find message: {e}")))?;

        Ok(row.as_ref().map(message_from_row))
    }

    async fn apply_recall(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        scope: RecallScope,
        replacement: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Storage(format!("tx: {e}")))?;

        // The is_recalled guard makes the transition first-writer-wins; a
        // racing recall sees zero rows and reports the conflict upward.
        let updated = sqlx::query(
            "UPDATE messages \
             SET is_recalled = TRUE, recall_scope = $2, recalled_at = NOW(), \
                 updated_at = NOW(), body = COALESCE($3, body) \
             WHERE id = $1 AND is_recalled = FALSE",
        )
        .bind(message_id)
        .bind(scope.as_str())
        .bind(replacement)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Storage(format!("recall msg: {e}")))?
        .rows_affected();

        if updated == 0 {
            tx.rollback()
                .await
                .map_err(|e| AppError::Storage(format!("rollback: {e}")))?;
            return Ok(false);
        }

        if scope == RecallScope::SelfOnly {
            sqlx::query(
                "INSERT INTO message_user_deletions (message_id, user_id) \
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(message_id)
            .bind(sender_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Storage(format!("insert deletion marker: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Storage(format!("commit: {e}")))?;

        Ok(true)
    }

    async fn insert_deletion_marker(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO message_user_deletions (message_id, user_id) \
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(message_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("insert deletion marker: {e}")))?;
        Ok(())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE messages SET read_at = NOW() \
             WHERE conversation_id = $1 AND sender_id <> $2 AND read_at IS NULL",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("mark read: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn mark_messages_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE messages SET read_at = NOW() \
             WHERE conversation_id = $1 AND sender_id <> $2 AND read_at IS NULL \
               AND id = ANY($3)",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .bind(message_ids.to_vec())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("mark messages read: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn count_unread(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM messages m
            WHERE m.conversation_id = $1
              AND m.sender_id <> $2
              AND m.read_at IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM message_user_deletions d
                  WHERE d.message_id = m.id AND d.user_id = $2
              )
            "#,
        )
        .bind(conversation_id)
        .bind(viewer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("count unread: {e}")))?;
        Ok(count)
    }

    async fn find_last_visible_message(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> Result<Option<Message>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages m
            WHERE m.conversation_id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM message_user_deletions d
                  WHERE d.message_id = m.id AND d.user_id = $2
              )
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT 1
            "#
        ))
        .bind(conversation_id)
        .bind(viewer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("last visible message: {e}")))?;

        Ok(row.as_ref().map(message_from_row))
    }

    async fn list_conversations(
        &self,
        viewer_id: Uuid,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ConversationListRow>, i64), AppError> {
        let filter = r#"
            FROM conversations c
            JOIN conversation_participants cp ON cp.conversation_id = c.id
            WHERE cp.user_id = $1
              AND c.deleted_at IS NULL
              AND ($2::text IS NULL
                   OR c.title ILIKE '%' || $2 || '%'
                   OR EXISTS (
                       SELECT 1
                       FROM conversation_participants p
                       JOIN users u ON u.id = p.user_id
                       WHERE p.conversation_id = c.id
                         AND u.display_name ILIKE '%' || $2 || '%'
                   ))
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {filter}"))
            .bind(viewer_id)
            .bind(search)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Storage(format!("count conversations: {e}")))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT c.id, c.organization_id, c.title, c.created_by, c.deleted_at,
                   c.created_at, c.updated_at,
                   (SELECT COUNT(*) FROM messages m
                    WHERE m.conversation_id = c.id
                      AND m.sender_id <> $1
                      AND m.read_at IS NULL
                      AND NOT EXISTS (
                          SELECT 1 FROM message_user_deletions d
                          WHERE d.message_id = m.id AND d.user_id = $1
                      )) AS unread_count,
                   (SELECT MAX(m.created_at) FROM messages m
                    WHERE m.conversation_id = c.id) AS last_message_at
            {filter}
            ORDER BY c.updated_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(viewer_id)
        .bind(search)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("list conversations: {e}")))?;

        let out = rows
            .iter()
            .map(|row| {
                let unread_count: i64 = row.get("unread_count");
                let last_message_at: Option<DateTime<Utc>> = row.get("last_message_at");
                ConversationListRow {
                    conversation: conversation_from_row(row),
                    unread_count,
                    last_message_at,
                }
            })
            .collect();

        Ok((out, total))
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<MessageRecord>, i64), AppError> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM messages m
            WHERE m.conversation_id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM message_user_deletions d
                  WHERE d.message_id = m.id AND d.user_id = $2
              )
            "#,
        )
        .bind(conversation_id)
        .bind(viewer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("count messages: {e}")))?;

        let rows = sqlx::query(
            r#"
            SELECT m.id, m.conversation_id, m.sender_id, m.body, m.read_at,
                   m.is_recalled, m.recall_scope, m.recalled_at, m.created_at,
                   m.updated_at,
                   COALESCE(u.display_name, '') AS sender_name,
                   EXISTS (
                       SELECT 1 FROM message_user_deletions d
                       WHERE d.message_id = m.id AND d.user_id = $2
                   ) AS deleted_for_me
            FROM messages m
            LEFT JOIN users u ON u.id = m.sender_id
            WHERE m.conversation_id = $1
            ORDER BY m.created_at ASC, m.id ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(conversation_id)
        .bind(viewer_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Storage(format!("list messages: {e}")))?;

        let out = rows
            .iter()
            .map(|row| {
                let sender_name: String = row.get("sender_name");
                let deleted_for_me: bool = row.get("deleted_for_me");
                MessageRecord {
                    message: message_from_row(row),
                    sender_name,
                    deleted_for_me,
                }
            })
            .collect();

        Ok((out, total))
    }
}
