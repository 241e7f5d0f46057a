use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::cache::{self, CacheLayer};
use crate::error::AppError;
use crate::models::message::{Message, RecallScope, RECALLED_BODY};
use crate::models::page::{PageMeta, Paginated};
use crate::services::membership_guard::MembershipGuard;
use crate::services::notifier::{emit, Notification, NotificationEmitter};
use crate::storage::StorageGateway;

/// Domain cap on a message body. The looser transport-boundary limit lives
/// in the sanitize layer and is deliberately not shared.
pub const MESSAGE_BODY_MAX_CHARS: usize = 5_000;

pub const MESSAGES_MAX_PAGE_SIZE: i64 = 200;

/// A message as presented to one viewer. The stored body never leaves the
/// gateway unfiltered: a recall for everyone is rendered as the placeholder,
/// and a self-scoped recall is reported only through `is_deleted_for_me` on
/// the sender's own view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub body: String,
    pub is_recalled: bool,
    pub is_deleted_for_me: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct MessageService;

impl MessageService {
    /// Validates, writes atomically, then invalidates caches and fans out
    /// notifications. The insert and the conversation recency touch are one
    /// storage transaction; everything after the write is best-effort.
    pub async fn send_message(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        notifier: &dyn NotificationEmitter,
        sender_id: Uuid,
        conversation_id: Uuid,
        body: &str,
    ) -> Result<Message, AppError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::EmptyMessage);
        }
        let length = body.chars().count();
        if length > MESSAGE_BODY_MAX_CHARS {
            return Err(AppError::MessageTooLong {
                length,
                max: MESSAGE_BODY_MAX_CHARS,
            });
        }

        MembershipGuard::require_participant(storage, conversation_id, sender_id).await?;

        let message = storage
            .insert_message(conversation_id, sender_id, body)
            .await
            .map_err(|e| {
                error!(conversation_id = %conversation_id, error = %e, "message insert failed");
                e
            })?;

        let participants = match storage.list_participants(conversation_id).await {
            Ok(participants) => participants,
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "participant lookup after send failed, caches left to TTL"
                );
                Vec::new()
            }
        };

        cache
            .invalidate_conversation(conversation_id, &participants)
            .await;

        for user_id in participants.iter().filter(|u| **u != sender_id) {
            emit(
                notifier,
                Notification::new_message(*user_id, sender_id, conversation_id),
            )
            .await;
        }

        Ok(message)
    }

    /// Recall state machine. Both transitions are terminal: a recall for
    /// everyone rewrites the stored body to the placeholder, a self-scoped
    /// recall leaves the body and writes the sender's deletion marker. Two
    /// racing recalls are settled by the gateway's conditional update.
    pub async fn recall_message(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        actor_id: Uuid,
        message_id: Uuid,
        scope: RecallScope,
    ) -> Result<(), AppError> {
        if scope == RecallScope::None {
            return Err(AppError::BadRequest(
                "recall scope must be 'self' or 'all'".into(),
            ));
        }

        let message = storage
            .find_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if message.sender_id != actor_id {
            return Err(AppError::Unauthorized);
        }
        if message.is_recalled {
            return Err(AppError::AlreadyRecalled);
        }

        let replacement = (scope == RecallScope::All).then_some(RECALLED_BODY);
        let applied = storage
            .apply_recall(message_id, actor_id, scope, replacement)
            .await?;
        if !applied {
            return Err(AppError::AlreadyRecalled);
        }

        cache.invalidate_message_views(message.conversation_id).await;
        Ok(())
    }

    /// Hides a message from the caller's own reads. Other participants are
    /// unaffected and the message row itself does not change. Idempotent:
    /// re-deleting an already hidden message succeeds.
    pub async fn delete_message_for_me(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        actor_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), AppError> {
        let message = storage
            .find_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;
        MembershipGuard::require_participant(storage, message.conversation_id, actor_id)
            .await
            .map_err(AppError::masked)?;

        storage.insert_deletion_marker(message_id, actor_id).await?;
        cache.invalidate_message_views(message.conversation_id).await;
        Ok(())
    }

    /// Stamps every unread message from other senders. Idempotent: a second
    /// call finds nothing to update and succeeds. Recall state is ignored,
    /// read tracking is orthogonal to it.
    pub async fn mark_conversation_read(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        reader_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<u64, AppError> {
        MembershipGuard::require_participant(storage, conversation_id, reader_id).await?;

        let updated = storage
            .mark_conversation_read(conversation_id, reader_id)
            .await?;
        if updated > 0 {
            Self::invalidate_after_read(storage, cache, conversation_id).await;
        }
        Ok(updated)
    }

    /// Explicit-list twin of `mark_conversation_read`; the two do not
    /// interact and may be issued concurrently.
    pub async fn mark_messages_read(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        reader_id: Uuid,
        conversation_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        MembershipGuard::require_participant(storage, conversation_id, reader_id).await?;

        let updated = storage
            .mark_messages_read(conversation_id, reader_id, message_ids)
            .await?;
        if updated > 0 {
            Self::invalidate_after_read(storage, cache, conversation_id).await;
        }
        Ok(updated)
    }

    // read_at is a single flip per message, so one reader's mark-as-read
    // moves every participant's unread counts.
    async fn invalidate_after_read(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        conversation_id: Uuid,
    ) {
        let participants = match storage.list_participants(conversation_id).await {
            Ok(participants) => participants,
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "participant lookup after mark-read failed, caches left to TTL"
                );
                Vec::new()
            }
        };
        cache
            .invalidate_conversation(conversation_id, &participants)
            .await;
    }

    /// Message page for one viewer, oldest first. Non-participants get
    /// `NotFound`. Rows carry the viewer's delete-for-me flag so the caller
    /// decides whether to render or skip; the total already excludes them.
    pub async fn get_conversation_messages(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        viewer_id: Uuid,
        conversation_id: Uuid,
        page: i64,
        limit: i64,
    ) -> Result<Paginated<MessageView>, AppError> {
        let page = page.max(1);
        let limit = limit.clamp(1, MESSAGES_MAX_PAGE_SIZE);

        MembershipGuard::require_participant(storage, conversation_id, viewer_id)
            .await
            .map_err(AppError::masked)?;

        let key = cache::conversation_messages_key(conversation_id, page, limit, viewer_id);
        if let Some(hit) = cache.get_json::<Paginated<MessageView>>(&key).await {
            return Ok(hit);
        }

        let (rows, total) = storage
            .list_messages(conversation_id, viewer_id, limit, (page - 1) * limit)
            .await?;

        let data = rows
            .into_iter()
            .map(|record| MessageView {
                id: record.message.id,
                conversation_id: record.message.conversation_id,
                sender_id: record.message.sender_id,
                sender_name: record.sender_name,
                body: record.message.rendered_body().to_string(),
                is_recalled: record.message.recalled_for_everyone(),
                is_deleted_for_me: record.deleted_for_me,
                read_at: record.message.read_at,
                created_at: record.message.created_at,
            })
            .collect();

        let result = Paginated {
            data,
            meta: PageMeta::new(total, limit, page),
        };
        cache.put_json(&key, &result).await;
        Ok(result)
    }
}
