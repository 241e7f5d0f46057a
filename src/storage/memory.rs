//! In-process gateway with the same atomic-commit semantics as the Postgres
//! implementation: every operation runs to completion under one lock, so a
//! failure can never leave a half-applied write behind.
//!
//! Used by the test suite and by single-node tooling that has no database.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Conversation, Message, RecallScope};

use super::{ConversationListRow, MessageRecord, NewConversation, StorageGateway};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, String>,
    conversations: HashMap<Uuid, Conversation>,
    /// conversation id -> participant ids in join order
    participants: HashMap<Uuid, Vec<Uuid>>,
    /// insertion order doubles as the (created_at, id) sort order
    messages: Vec<Message>,
    /// (message id, user id) delete-for-me markers
    deletions: HashSet<(Uuid, Uuid)>,
    /// recency counter standing in for updated_at ordering, so listings stay
    /// deterministic when two touches land on the same timestamp
    touch_seq: u64,
    touches: HashMap<Uuid, u64>,
    fail_next_write: bool,
}

impl Inner {
    fn touch(&mut self, conversation_id: Uuid) {
        self.touch_seq += 1;
        self.touches.insert(conversation_id, self.touch_seq);
        if let Some(c) = self.conversations.get_mut(&conversation_id) {
            c.updated_at = Utc::now();
        }
    }

    fn take_write_fault(&mut self) -> Result<(), AppError> {
        if self.fail_next_write {
            self.fail_next_write = false;
            return Err(AppError::Storage("injected write failure".into()));
        }
        Ok(())
    }

    fn live_conversation(&self, id: Uuid) -> Option<&Conversation> {
        self.conversations.get(&id).filter(|c| !c.is_deleted())
    }

    fn has_marker(&self, message_id: Uuid, user_id: Uuid) -> bool {
        self.deletions.contains(&(message_id, user_id))
    }

    fn unread_for(&self, conversation_id: Uuid, viewer_id: Uuid) -> i64 {
        self.messages
            .iter()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && m.sender_id != viewer_id
                    && m.read_at.is_none()
                    && !self.has_marker(m.id, viewer_id)
            })
            .count() as i64
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a display name for search and message annotation. The users
    /// table belongs to the identity service in production; fixtures seed it
    /// here.
    pub fn add_user(&self, id: Uuid, display_name: &str) {
        self.lock().users.insert(id, display_name.to_string());
    }

    /// Makes the next mutating operation fail before touching any state.
    pub fn fail_next_write(&self) {
        self.lock().fail_next_write = true;
    }
}

#[async_trait]
impl StorageGateway for MemoryStorage {
    async fn create_conversation(
        &self,
        new: NewConversation<'_>,
    ) -> Result<Conversation, AppError> {
        let mut inner = self.lock();
        inner.take_write_fault()?;

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            organization_id: new.organization_id,
            title: new.title.map(str::to_string),
            created_by: new.created_by,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut members = Vec::new();
        for user_id in new.participants {
            if !members.contains(user_id) {
                members.push(*user_id);
            }
        }
        inner.participants.insert(conversation.id, members);
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        inner.touch(conversation.id);
        Ok(conversation)
    }

    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>, AppError> {
        Ok(self.lock().live_conversation(id).cloned())
    }

    async fn find_direct_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<Uuid>, AppError> {
        let inner = self.lock();
        let found = inner
            .conversations
            .values()
            .filter(|c| !c.is_deleted() && !c.has_title())
            .find(|c| {
                inner
                    .participants
                    .get(&c.id)
                    .map_or(false, |p| p.len() == 2 && p.contains(&a) && p.contains(&b))
            })
            .map(|c| c.id);
        Ok(found)
    }

    async fn set_conversation_title(&self, id: Uuid, title: &str) -> Result<(), AppError> {
        let mut inner = self.lock();
        inner.take_write_fault()?;
        if let Some(c) = inner.conversations.get_mut(&id).filter(|c| !c.is_deleted()) {
            c.title = Some(title.to_string());
            inner.touch(id);
        }
        Ok(())
    }

    async fn soft_delete_conversation(&self, id: Uuid) -> Result<(), AppError> {
        let mut inner = self.lock();
        inner.take_write_fault()?;
        if let Some(c) = inner.conversations.get_mut(&id).filter(|c| !c.is_deleted()) {
            c.deleted_at = Some(Utc::now());
            inner.touch(id);
        }
        Ok(())
    }

    async fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        Ok(self
            .lock()
            .participants
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let inner = self.lock();
        if inner.live_conversation(conversation_id).is_none() {
            return Ok(false);
        }
        Ok(inner
            .participants
            .get(&conversation_id)
            .map_or(false, |p| p.contains(&user_id)))
    }

    async fn count_participants(&self, conversation_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .lock()
            .participants
            .get(&conversation_id)
            .map_or(0, |p| p.len() as i64))
    }

    async fn insert_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let mut inner = self.lock();
        inner.take_write_fault()?;
        let members = inner.participants.entry(conversation_id).or_default();
        if !members.contains(&user_id) {
            members.push(user_id);
        }
        Ok(())
    }

    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let mut inner = self.lock();
        inner.take_write_fault()?;
        if let Some(members) = inner.participants.get_mut(&conversation_id) {
            members.retain(|m| *m != user_id);
        }
        Ok(())
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Result<Message, AppError> {
        let mut inner = self.lock();
        inner.take_write_fault()?;

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            body: body.to_string(),
            read_at: None,
            is_recalled: false,
            recall_scope: RecallScope::None,
            recalled_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.messages.push(message.clone());
        inner.touch(conversation_id);
        Ok(message)
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>, AppError> {
        Ok(self.lock().messages.iter().find(|m| m.id == id).cloned())
    }

    async fn apply_recall(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        scope: RecallScope,
        replacement: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut inner = self.lock();
        inner.take_write_fault()?;

        let Some(message) = inner.messages.iter_mut().find(|m| m.id == message_id) else {
            return Ok(false);
        };
        if message.is_recalled {
            return Ok(false);
        }

        let now = Utc::now();
        message.is_recalled = true;
        message.recall_scope = scope;
        message.recalled_at = Some(now);
        message.updated_at = now;
        if let Some(body) = replacement {
            message.body = body.to_string();
        }

        if scope == RecallScope::SelfOnly {
            inner.deletions.insert((message_id, sender_id));
        }
        Ok(true)
    }

    async fn insert_deletion_marker(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let mut inner = self.lock();
        inner.take_write_fault()?;
        inner.deletions.insert((message_id, user_id));
        Ok(())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> Result<u64, AppError> {
        let mut inner = self.lock();
        inner.take_write_fault()?;

        let now = Utc::now();
        let mut updated = 0;
        for message in inner.messages.iter_mut().filter(|m| {
            m.conversation_id == conversation_id
                && m.sender_id != reader_id
                && m.read_at.is_none()
        }) {
            message.read_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }

    async fn mark_messages_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        let mut inner = self.lock();
        inner.take_write_fault()?;

        let now = Utc::now();
        let mut updated = 0;
        for message in inner.messages.iter_mut().filter(|m| {
            m.conversation_id == conversation_id
                && m.sender_id != reader_id
                && m.read_at.is_none()
                && message_ids.contains(&m.id)
        }) {
            message.read_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }

    async fn count_unread(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> Result<i64, AppError> {
        Ok(self.lock().unread_for(conversation_id, viewer_id))
    }

    async fn find_last_visible_message(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> Result<Option<Message>, AppError> {
        let inner = self.lock();
        Ok(inner
            .messages
            .iter()
            .rev()
            .find(|m| {
                m.conversation_id == conversation_id && !inner.has_marker(m.id, viewer_id)
            })
            .cloned())
    }

    async fn list_conversations(
        &self,
        viewer_id: Uuid,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ConversationListRow>, i64), AppError> {
        let inner = self.lock();
        let needle = search.map(str::to_lowercase);

        let mut matches: Vec<&Conversation> = inner
            .conversations
            .values()
            .filter(|c| !c.is_deleted())
            .filter(|c| {
                inner
                    .participants
                    .get(&c.id)
                    .map_or(false, |p| p.contains(&viewer_id))
            })
            .filter(|c| match &needle {
                None => true,
                Some(q) => {
                    let title_hit = c
                        .title
                        .as_deref()
                        .map_or(false, |t| t.to_lowercase().contains(q));
                    let member_hit = inner.participants.get(&c.id).map_or(false, |p| {
                        p.iter().any(|u| {
                            inner
                                .users
                                .get(u)
                                .map_or(false, |name| name.to_lowercase().contains(q))
                        })
                    });
                    title_hit || member_hit
                }
            })
            .collect();

        matches.sort_by_key(|c| std::cmp::Reverse(inner.touches.get(&c.id).copied().unwrap_or(0)));

        let total = matches.len() as i64;
        let rows = matches
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|c| ConversationListRow {
                conversation: c.clone(),
                unread_count: inner.unread_for(c.id, viewer_id),
                last_message_at: inner
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.conversation_id == c.id)
                    .map(|m| m.created_at),
            })
            .collect();

        Ok((rows, total))
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<MessageRecord>, i64), AppError> {
        let inner = self.lock();

        let total = inner
            .messages
            .iter()
            .filter(|m| {
                m.conversation_id == conversation_id && !inner.has_marker(m.id, viewer_id)
            })
            .count() as i64;

        let rows = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|m| MessageRecord {
                message: m.clone(),
                sender_name: inner.users.get(&m.sender_id).cloned().unwrap_or_default(),
                deleted_for_me: inner.has_marker(m.id, viewer_id),
            })
            .collect();

        Ok((rows, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RECALLED_BODY;

    fn new_conversation<'a>(org: Uuid, creator: Uuid, participants: &'a [Uuid]) -> NewConversation<'a> {
        NewConversation {
            organization_id: org,
            title: None,
            created_by: creator,
            participants,
        }
    }

    #[tokio::test]
    async fn injected_failure_leaves_no_partial_state() {
        let storage = MemoryStorage::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = storage
            .create_conversation(new_conversation(Uuid::new_v4(), a, &[a, b]))
            .await
            .unwrap();

        storage.fail_next_write();
        let err = storage.insert_message(conv.id, a, "hello").await;
        assert!(matches!(err, Err(AppError::Storage(_))));

        let (rows, total) = storage.list_messages(conv.id, a, 50, 0).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 0);

        // the fault is one-shot
        storage.insert_message(conv.id, a, "hello").await.unwrap();
    }

    #[tokio::test]
    async fn second_recall_loses_the_race() {
        let storage = MemoryStorage::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = storage
            .create_conversation(new_conversation(Uuid::new_v4(), a, &[a, b]))
            .await
            .unwrap();
        let msg = storage.insert_message(conv.id, a, "hello").await.unwrap();

        let first = storage
            .apply_recall(msg.id, a, RecallScope::All, Some(RECALLED_BODY))
            .await
            .unwrap();
        let second = storage
            .apply_recall(msg.id, a, RecallScope::All, Some(RECALLED_BODY))
            .await
            .unwrap();
        assert!(first);
        assert!(!second);

        let stored = storage.find_message(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.body, RECALLED_BODY);
    }
}
