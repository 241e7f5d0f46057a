use uuid::Uuid;

use crate::error::AppError;
use crate::storage::StorageGateway;

/// Head-count at which an untitled conversation becomes a group.
pub const GROUP_MIN_PARTICIPANTS: i64 = 3;

pub struct MembershipGuard;

impl MembershipGuard {
    pub async fn is_participant(
        storage: &dyn StorageGateway,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        storage.is_participant(conversation_id, user_id).await
    }

    /// Verifies the conversation is live and the user holds a participant
    /// row. The two failure kinds are distinct here; query surfaces collapse
    /// them with `AppError::masked` so conversation ids cannot be probed.
    pub async fn require_participant(
        storage: &dyn StorageGateway,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        if storage.find_conversation(conversation_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        if !storage.is_participant(conversation_id, user_id).await? {
            return Err(AppError::NotParticipant);
        }
        Ok(())
    }

    /// A conversation accepts new participants when it carries a title or
    /// already has three or more members. Plain 1:1 chats stay closed.
    pub async fn is_group_eligible(
        storage: &dyn StorageGateway,
        conversation_id: Uuid,
    ) -> Result<bool, AppError> {
        let conversation = storage
            .find_conversation(conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if conversation.has_title() {
            return Ok(true);
        }
        Ok(storage.count_participants(conversation_id).await? >= GROUP_MIN_PARTICIPANTS)
    }
}
