use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    Conversation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: Uuid,
    pub actor_id: Uuid,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    pub related_entity_type: String,
    pub related_entity_id: Uuid,
}

impl Notification {
    pub fn new_message(recipient_id: Uuid, actor_id: Uuid, conversation_id: Uuid) -> Self {
        Self {
            recipient_id,
            actor_id,
            title: "New message".into(),
            body: "You have a new message".into(),
            kind: NotificationKind::Message,
            related_entity_type: "conversation".into(),
            related_entity_id: conversation_id,
        }
    }

    pub fn added_to_conversation(
        recipient_id: Uuid,
        actor_id: Uuid,
        conversation_id: Uuid,
    ) -> Self {
        Self {
            recipient_id,
            actor_id,
            title: "Added to conversation".into(),
            body: "You were added to a conversation".into(),
            kind: NotificationKind::Conversation,
            related_entity_type: "conversation".into(),
            related_entity_id: conversation_id,
        }
    }

    pub fn removed_from_conversation(
        recipient_id: Uuid,
        actor_id: Uuid,
        conversation_id: Uuid,
    ) -> Self {
        Self {
            recipient_id,
            actor_id,
            title: "Removed from conversation".into(),
            body: "You were removed from a conversation".into(),
            kind: NotificationKind::Conversation,
            related_entity_type: "conversation".into(),
            related_entity_id: conversation_id,
        }
    }
}

/// Delivery (push, email, in-app feed) belongs to the notification service;
/// this is the seam the commands talk to.
#[async_trait]
pub trait NotificationEmitter: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), String>;
}

/// Default emitter: records the event in the log stream.
pub struct TracingEmitter;

#[async_trait]
impl NotificationEmitter for TracingEmitter {
    async fn notify(&self, notification: Notification) -> Result<(), String> {
        tracing::info!(
            recipient = %notification.recipient_id,
            actor = %notification.actor_id,
            kind = ?notification.kind,
            "notification emitted"
        );
        Ok(())
    }
}

/// Notifications are a best-effort side channel; a failed delivery must never
/// fail the command that produced it.
pub async fn emit(emitter: &dyn NotificationEmitter, notification: Notification) {
    let recipient = notification.recipient_id;
    if let Err(e) = emitter.notify(notification).await {
        warn!(recipient = %recipient, error = %e, "notification delivery failed");
    }
}
