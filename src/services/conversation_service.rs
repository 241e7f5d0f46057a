use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::cache::{self, CacheLayer};
use crate::error::AppError;
use crate::models::page::{PageMeta, Paginated};
use crate::services::membership_guard::MembershipGuard;
use crate::services::notifier::{emit, Notification, NotificationEmitter};
use crate::storage::{NewConversation, StorageGateway};

pub const TITLE_MAX_CHARS: usize = 255;
pub const LIST_MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub title: Option<String>,
    pub unread_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub is_recalled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDetail {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: Option<String>,
    pub participants: Vec<Uuid>,
    pub unread_count: i64,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ConversationService;

impl ConversationService {
    /// Creates (or reuses) the untitled 1:1 between two users. Reuse keeps
    /// repeat "start chat" taps from fragmenting history across rows.
    pub async fn create_direct_conversation(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        notifier: &dyn NotificationEmitter,
        organization_id: Uuid,
        initiator_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Uuid, AppError> {
        if initiator_id == recipient_id {
            return Err(AppError::BadRequest(
                "cannot start a conversation with yourself".into(),
            ));
        }

        if let Some(existing) = storage
            .find_direct_conversation(initiator_id, recipient_id)
            .await?
        {
            return Ok(existing);
        }

        let conversation = storage
            .create_conversation(NewConversation {
                organization_id,
                title: None,
                created_by: initiator_id,
                participants: &[initiator_id, recipient_id],
            })
            .await?;

        cache.invalidate_lists(&[initiator_id, recipient_id]).await;
        emit(
            notifier,
            Notification::added_to_conversation(recipient_id, initiator_id, conversation.id),
        )
        .await;

        Ok(conversation.id)
    }

    pub async fn create_group_conversation(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        notifier: &dyn NotificationEmitter,
        organization_id: Uuid,
        creator_id: Uuid,
        title: &str,
        member_ids: &[Uuid],
    ) -> Result<Uuid, AppError> {
        let title = validate_title(title)?;

        let mut all_members = vec![creator_id];
        for member_id in member_ids {
            if !all_members.contains(member_id) {
                all_members.push(*member_id);
            }
        }

        let conversation = storage
            .create_conversation(NewConversation {
                organization_id,
                title: Some(title),
                created_by: creator_id,
                participants: &all_members,
            })
            .await?;

        cache.invalidate_lists(&all_members).await;
        for member_id in all_members.iter().filter(|m| **m != creator_id) {
            emit(
                notifier,
                Notification::added_to_conversation(*member_id, creator_id, conversation.id),
            )
            .await;
        }

        Ok(conversation.id)
    }

    /// Titling a 1:1 also makes it group-eligible.
    pub async fn set_title(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        actor_id: Uuid,
        conversation_id: Uuid,
        title: &str,
    ) -> Result<(), AppError> {
        let title = validate_title(title)?;
        MembershipGuard::require_participant(storage, conversation_id, actor_id).await?;

        storage.set_conversation_title(conversation_id, title).await?;

        let participants = Self::participants_best_effort(storage, conversation_id).await;
        cache
            .invalidate_conversation(conversation_id, &participants)
            .await;
        Ok(())
    }

    pub async fn add_participant(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        notifier: &dyn NotificationEmitter,
        actor_id: Uuid,
        conversation_id: Uuid,
        new_user_id: Uuid,
    ) -> Result<(), AppError> {
        MembershipGuard::require_participant(storage, conversation_id, actor_id).await?;

        if !MembershipGuard::is_group_eligible(storage, conversation_id).await? {
            return Err(AppError::NotGroupConversation);
        }
        if storage.is_participant(conversation_id, new_user_id).await? {
            return Err(AppError::AlreadyMember);
        }

        storage.insert_participant(conversation_id, new_user_id).await?;

        let participants = Self::participants_best_effort(storage, conversation_id).await;
        cache
            .invalidate_conversation(conversation_id, &participants)
            .await;
        emit(
            notifier,
            Notification::added_to_conversation(new_user_id, actor_id, conversation_id),
        )
        .await;

        Ok(())
    }

    /// Leaving is always allowed; removing someone else only from groups.
    pub async fn remove_participant(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        notifier: &dyn NotificationEmitter,
        actor_id: Uuid,
        conversation_id: Uuid,
        member_id: Uuid,
    ) -> Result<(), AppError> {
        MembershipGuard::require_participant(storage, conversation_id, actor_id).await?;

        if member_id != actor_id
            && !MembershipGuard::is_group_eligible(storage, conversation_id).await?
        {
            return Err(AppError::NotGroupConversation);
        }
        if !storage.is_participant(conversation_id, member_id).await? {
            return Err(AppError::NotFound);
        }

        // capture before removal so the removed user's caches are dropped too
        let participants = Self::participants_best_effort(storage, conversation_id).await;

        storage.remove_participant(conversation_id, member_id).await?;

        cache
            .invalidate_conversation(conversation_id, &participants)
            .await;
        if member_id != actor_id {
            emit(
                notifier,
                Notification::removed_from_conversation(member_id, actor_id, conversation_id),
            )
            .await;
        }

        Ok(())
    }

    /// Soft delete: flips the tombstone, message rows stay for audit.
    pub async fn delete_conversation(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        actor_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<(), AppError> {
        MembershipGuard::require_participant(storage, conversation_id, actor_id).await?;

        let participants = Self::participants_best_effort(storage, conversation_id).await;
        storage.soft_delete_conversation(conversation_id).await?;

        cache
            .invalidate_conversation(conversation_id, &participants)
            .await;
        Ok(())
    }

    /// Paginated listing for one user, most recently active first, each row
    /// annotated with that user's unread count. Searches bypass the cache:
    /// the fixed key shapes carry no search term.
    pub async fn list_conversations(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        viewer_id: Uuid,
        page: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<Paginated<ConversationSummary>, AppError> {
        let page = page.max(1);
        let limit = limit.clamp(1, LIST_MAX_PAGE_SIZE);
        let search = search.map(str::trim).filter(|s| !s.is_empty());

        let key = cache::conversation_list_key(viewer_id, page, limit);
        if search.is_none() {
            if let Some(hit) = cache
                .get_json::<Paginated<ConversationSummary>>(&key)
                .await
            {
                return Ok(hit);
            }
        }

        let (rows, total) = storage
            .list_conversations(viewer_id, search, limit, (page - 1) * limit)
            .await?;

        let data = rows
            .into_iter()
            .map(|row| ConversationSummary {
                id: row.conversation.id,
                title: row.conversation.title,
                unread_count: row.unread_count,
                last_message_at: row.last_message_at,
                updated_at: row.conversation.updated_at,
            })
            .collect();

        let result = Paginated {
            data,
            meta: PageMeta::new(total, limit, page),
        };
        if search.is_none() {
            cache.put_json(&key, &result).await;
        }
        Ok(result)
    }

    /// Per-viewer detail. Non-participants get `NotFound`, never a
    /// permission error, so conversation ids cannot be enumerated. The last
    /// message resolves against the viewer's own deletion markers and
    /// renders a recalled-for-all body as the placeholder.
    pub async fn get_conversation_detail(
        storage: &dyn StorageGateway,
        cache: &CacheLayer,
        viewer_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<ConversationDetail, AppError> {
        MembershipGuard::require_participant(storage, conversation_id, viewer_id)
            .await
            .map_err(AppError::masked)?;

        let key = cache::conversation_detail_key(conversation_id, viewer_id);
        if let Some(hit) = cache.get_json::<ConversationDetail>(&key).await {
            return Ok(hit);
        }

        let conversation = storage
            .find_conversation(conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let participants = storage.list_participants(conversation_id).await?;
        let unread_count = storage.count_unread(conversation_id, viewer_id).await?;
        let last_message = storage
            .find_last_visible_message(conversation_id, viewer_id)
            .await?
            .map(|m| LastMessage {
                id: m.id,
                sender_id: m.sender_id,
                body: m.rendered_body().to_string(),
                is_recalled: m.recalled_for_everyone(),
                created_at: m.created_at,
            });

        let detail = ConversationDetail {
            id: conversation.id,
            organization_id: conversation.organization_id,
            title: conversation.title,
            participants,
            unread_count,
            last_message,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        };
        cache.put_json(&key, &detail).await;
        Ok(detail)
    }

    async fn participants_best_effort(
        storage: &dyn StorageGateway,
        conversation_id: Uuid,
    ) -> Vec<Uuid> {
        match storage.list_participants(conversation_id).await {
            Ok(participants) => participants,
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "participant lookup failed, caches left to TTL"
                );
                Vec::new()
            }
        }
    }
}

fn validate_title(title: &str) -> Result<&str, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("title cannot be empty".into()));
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(AppError::BadRequest(format!(
            "title too long (max {TITLE_MAX_CHARS})"
        )));
    }
    Ok(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_are_trimmed_and_bounded() {
        assert_eq!(validate_title("  Team  ").unwrap(), "Team");
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"x".repeat(256)).is_err());
        assert!(validate_title(&"x".repeat(255)).is_ok());
    }
}
