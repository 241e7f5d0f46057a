//! Read-through cache for conversation lists, details and message pages.
//!
//! Writers never update entries in place: every mutation deletes the
//! affected keys and lets the next reader repopulate. Cache trouble is a
//! logged degradation, never an error for the caller; a failed delete means
//! stale reads until the TTL runs out.

pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError>;
    async fn delete(&self, keys: &[String]) -> Result<(), CacheError>;
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}

// Key shapes are load-bearing: invalidation deletes by these patterns, so
// every producer and invalidator must agree on them exactly.

pub fn conversation_list_key(user_id: Uuid, page: i64, limit: i64) -> String {
    format!("user:{user_id}:conversations:page:{page}:limit:{limit}")
}

pub fn conversation_list_pattern(user_id: Uuid) -> String {
    format!("user:{user_id}:conversations:*")
}

pub fn conversation_detail_key(conversation_id: Uuid, viewer_id: Uuid) -> String {
    format!("conversation:{conversation_id}:detail:user:{viewer_id}")
}

pub fn conversation_detail_pattern(conversation_id: Uuid) -> String {
    format!("conversation:{conversation_id}:detail:*")
}

pub fn conversation_messages_key(
    conversation_id: Uuid,
    page: i64,
    limit: i64,
    viewer_id: Uuid,
) -> String {
    format!("conversation:{conversation_id}:messages:page:{page}:limit:{limit}:user:{viewer_id}")
}

pub fn conversation_messages_pattern(conversation_id: Uuid) -> String {
    format!("conversation:{conversation_id}:messages:*")
}

#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    ttl_seconds: u64,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache encode failed");
                return;
            }
        };
        if let Err(e) = self.store.set_ex(key, &raw, self.ttl_seconds).await {
            warn!(key, error = %e, "cache write failed");
        }
    }

    pub async fn delete_pattern(&self, pattern: &str) {
        let keys = match self.store.keys_matching(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern, error = %e, "cache key scan failed, stale entries remain until TTL");
                return;
            }
        };
        if keys.is_empty() {
            return;
        }
        if let Err(e) = self.store.delete(&keys).await {
            warn!(pattern, error = %e, "cache invalidation failed, stale entries remain until TTL");
        }
    }

    /// Drops the conversation-list pages of the given users.
    pub async fn invalidate_lists(&self, user_ids: &[Uuid]) {
        for user_id in user_ids {
            self.delete_pattern(&conversation_list_pattern(*user_id))
                .await;
        }
    }

    /// Drops detail and message-page entries for one conversation. Used by
    /// recall, where listings are unaffected (timestamps do not move).
    pub async fn invalidate_message_views(&self, conversation_id: Uuid) {
        self.delete_pattern(&conversation_detail_pattern(conversation_id))
            .await;
        self.delete_pattern(&conversation_messages_pattern(conversation_id))
            .await;
    }

    /// Drops every cached view a mutation in this conversation can touch:
    /// detail, message pages, and each participant's listing.
    pub async fn invalidate_conversation(&self, conversation_id: Uuid, participant_ids: &[Uuid]) {
        self.invalidate_message_views(conversation_id).await;
        self.invalidate_lists(participant_ids).await;
    }
}
