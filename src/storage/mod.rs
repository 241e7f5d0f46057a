//! Persistence boundary for conversations, participants, messages and
//! per-viewer deletion markers.
//!
//! The gateway owns transactional atomicity: every mutating operation below
//! either fully applies or leaves no trace. Callers never hold a transaction
//! handle; they rely on these operations being all-or-nothing and perform
//! cache invalidation only after one returns.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Conversation, Message, RecallScope};

#[derive(Debug, Clone)]
pub struct NewConversation<'a> {
    pub organization_id: Uuid,
    pub title: Option<&'a str>,
    pub created_by: Uuid,
    pub participants: &'a [Uuid],
}

/// One conversation in a user's listing, annotated for that viewer.
#[derive(Debug, Clone)]
pub struct ConversationListRow {
    pub conversation: Conversation,
    pub unread_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// One message in a conversation page, annotated for the viewer.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub message: Message,
    pub sender_name: String,
    pub deleted_for_me: bool,
}

#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Conversation row plus every initial participant row, one transaction.
    async fn create_conversation(
        &self,
        new: NewConversation<'_>,
    ) -> Result<Conversation, AppError>;

    /// `None` for unknown ids and for soft-deleted conversations alike.
    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>, AppError>;

    /// Existing untitled 1:1 between the two users, if any.
    async fn find_direct_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<Uuid>, AppError>;

    async fn set_conversation_title(&self, id: Uuid, title: &str) -> Result<(), AppError>;

    /// Tombstones the conversation; message rows are left in place.
    async fn soft_delete_conversation(&self, id: Uuid) -> Result<(), AppError>;

    async fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Uuid>, AppError>;

    async fn is_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError>;

    async fn count_participants(&self, conversation_id: Uuid) -> Result<i64, AppError>;

    async fn insert_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError>;

    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError>;

    /// Message insert plus the conversation `updated_at` touch, one
    /// transaction, so recency ordering can never drift from the data.
    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Result<Message, AppError>;

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>, AppError>;

    /// Conditional recall transition. Returns `false` when the message was
    /// already recalled (two racing recalls settle here, not at the caller).
    /// A self-scoped recall also writes the sender's deletion marker in the
    /// same transaction. `replacement`, when given, overwrites the body.
    async fn apply_recall(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        scope: RecallScope,
        replacement: Option<&str>,
    ) -> Result<bool, AppError>;

    async fn insert_deletion_marker(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError>;

    /// Stamps `read_at` on every unread message not authored by the reader.
    /// Idempotent; returns how many rows changed.
    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> Result<u64, AppError>;

    /// Explicit-list variant of the above, same idempotency.
    async fn mark_messages_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<u64, AppError>;

    /// Unread messages from others, excluding the viewer's deletion-marked
    /// messages. Recalled messages count normally.
    async fn count_unread(&self, conversation_id: Uuid, viewer_id: Uuid)
        -> Result<i64, AppError>;

    /// Newest message not deletion-marked for the viewer. Recalled-for-all
    /// messages are returned; the presentation swaps their body.
    async fn find_last_visible_message(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> Result<Option<Message>, AppError>;

    /// Non-deleted conversations the viewer participates in, most recently
    /// active first, with unread annotations and an optional title/member
    /// name search. Returns the page and the total row count.
    async fn list_conversations(
        &self,
        viewer_id: Uuid,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ConversationListRow>, i64), AppError>;

    /// Message page, oldest first with id as tiebreak. Rows carry the
    /// viewer's deletion-marker flag; the total excludes marked rows.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<MessageRecord>, i64), AppError>;
}
