use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// A non-empty title makes the conversation group-capable.
    pub title: Option<String>,
    pub created_by: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_title(&self) -> bool {
        self.title
            .as_deref()
            .map_or(false, |t| !t.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(title: Option<&str>) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            title: title.map(str::to_string),
            created_by: Uuid::new_v4(),
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn blank_title_does_not_count() {
        assert!(!conversation(None).has_title());
        assert!(!conversation(Some("   ")).has_title());
        assert!(conversation(Some("Team")).has_title());
    }
}
