use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conversation::Conversation;

/// Replacement body shown for a message recalled for everyone. The text is
/// fixed product copy and must match what clients already display.
pub const RECALLED_BODY: &str = "Tin nhắn này đã bị thu hồi.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecallScope {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "self")]
    SelfOnly,
    #[serde(rename = "all")]
    All,
}

impl RecallScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecallScope::None => "none",
            RecallScope::SelfOnly => "self",
            RecallScope::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<RecallScope> {
        match value {
            "none" => Some(RecallScope::None),
            "self" => Some(RecallScope::SelfOnly),
            "all" => Some(RecallScope::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    /// Set once, by the first non-sender read. Orthogonal to recall state.
    pub read_at: Option<DateTime<Utc>>,
    pub is_recalled: bool,
    pub recall_scope: RecallScope,
    pub recalled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Body as presented to any reader. A recall for everyone swaps in the
    /// placeholder; a self-scoped recall leaves the stored body alone.
    pub fn rendered_body(&self) -> &str {
        if self.is_recalled && self.recall_scope == RecallScope::All {
            RECALLED_BODY
        } else {
            &self.body
        }
    }

    /// Whether readers other than the sender should be told this message was
    /// recalled. A self-scoped recall is the sender's private action.
    pub fn recalled_for_everyone(&self) -> bool {
        self.is_recalled && self.recall_scope == RecallScope::All
    }
}

/// Visibility of a message for one viewer. A recall for everyone keeps the
/// message visible (only the body swaps), so the outcome is decided by the
/// conversation tombstone and the viewer's own deletion marker.
pub fn message_visible(conversation: &Conversation, deleted_for_viewer: bool) -> bool {
    !conversation.is_deleted() && !deleted_for_viewer
}
