#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use messaging_core::cache::memory::MemoryCacheStore;
use messaging_core::cache::{CacheError, CacheLayer, CacheStore};
use messaging_core::services::conversation_service::ConversationService;
use messaging_core::services::notifier::{Notification, NotificationEmitter};
use messaging_core::storage::memory::MemoryStorage;

pub const CACHE_TTL_SECONDS: u64 = 300;

/// Captures emitted notifications instead of delivering them.
pub struct RecordingEmitter {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn recipients(&self) -> Vec<Uuid> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.recipient_id)
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl NotificationEmitter for RecordingEmitter {
    async fn notify(&self, notification: Notification) -> Result<(), String> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Cache store whose reads and writes work but whose invalidation path is
/// broken, for exercising the stale-until-TTL window.
pub struct BrokenInvalidationStore {
    inner: MemoryCacheStore,
}

impl BrokenInvalidationStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryCacheStore::new(),
        }
    }
}

#[async_trait]
impl CacheStore for BrokenInvalidationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        self.inner.set_ex(key, value, ttl_seconds).await
    }

    async fn delete(&self, _keys: &[String]) -> Result<(), CacheError> {
        Err(CacheError::Other("delete refused".into()))
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.inner.keys_matching(pattern).await
    }
}

pub struct TestEnv {
    pub storage: Arc<MemoryStorage>,
    pub cache_store: Arc<MemoryCacheStore>,
    pub cache: CacheLayer,
    pub notifier: RecordingEmitter,
    pub org: Uuid,
}

impl TestEnv {
    pub fn new() -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let cache_store = Arc::new(MemoryCacheStore::new());
        let cache = CacheLayer::new(cache_store.clone(), CACHE_TTL_SECONDS);
        Self {
            storage,
            cache_store,
            cache,
            notifier: RecordingEmitter::new(),
            org: Uuid::new_v4(),
        }
    }

    pub fn user(&self, display_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.storage.add_user(id, display_name);
        id
    }

    pub async fn direct(&self, a: Uuid, b: Uuid) -> Uuid {
        ConversationService::create_direct_conversation(
            self.storage.as_ref(),
            &self.cache,
            &self.notifier,
            self.org,
            a,
            b,
        )
        .await
        .unwrap()
    }

    pub async fn group(&self, creator: Uuid, title: &str, members: &[Uuid]) -> Uuid {
        ConversationService::create_group_conversation(
            self.storage.as_ref(),
            &self.cache,
            &self.notifier,
            self.org,
            creator,
            title,
            members,
        )
        .await
        .unwrap()
    }
}
