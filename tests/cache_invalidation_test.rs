mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{BrokenInvalidationStore, RecordingEmitter, TestEnv, CACHE_TTL_SECONDS};
use messaging_core::cache::{
    conversation_detail_key, conversation_list_key, conversation_messages_key, CacheLayer,
};
use messaging_core::models::RecallScope;
use messaging_core::services::conversation_service::ConversationService;
use messaging_core::services::message_service::MessageService;
use messaging_core::storage::memory::MemoryStorage;
use messaging_core::storage::StorageGateway;
use uuid::Uuid;

#[tokio::test]
async fn detail_reads_are_served_from_cache() {
    let env = TestEnv::new();
    let (u1, u2) = (env.user("An"), env.user("Bình"));
    let conv = env.direct(u1, u2).await;

    let first = ConversationService::get_conversation_detail(
        env.storage.as_ref(),
        &env.cache,
        u2,
        conv,
    )
    .await
    .unwrap();
    assert_eq!(first.unread_count, 0);

    // write through the gateway directly: no invalidation happens, so a
    // repeat read must still see the memoized answer
    env.storage.insert_message(conv, u1, "hello").await.unwrap();

    let second = ConversationService::get_conversation_detail(
        env.storage.as_ref(),
        &env.cache,
        u2,
        conv,
    )
    .await
    .unwrap();
    assert_eq!(second.unread_count, 0);
    assert!(second.last_message.is_none());
}

#[tokio::test]
async fn send_drops_every_affected_cache_family() {
    let env = TestEnv::new();
    let (u1, u2) = (env.user("An"), env.user("Bình"));
    let conv = env.direct(u1, u2).await;

    // prime one entry per family, for both participants where it applies
    for viewer in [u1, u2] {
        ConversationService::list_conversations(
            env.storage.as_ref(),
            &env.cache,
            viewer,
            1,
            20,
            None,
        )
        .await
        .unwrap();
        ConversationService::get_conversation_detail(
            env.storage.as_ref(),
            &env.cache,
            viewer,
            conv,
        )
        .await
        .unwrap();
        MessageService::get_conversation_messages(
            env.storage.as_ref(),
            &env.cache,
            viewer,
            conv,
            1,
            50,
        )
        .await
        .unwrap();
    }
    for viewer in [u1, u2] {
        assert!(env
            .cache_store
            .contains_key(&conversation_list_key(viewer, 1, 20)));
        assert!(env
            .cache_store
            .contains_key(&conversation_detail_key(conv, viewer)));
        assert!(env
            .cache_store
            .contains_key(&conversation_messages_key(conv, 1, 50, viewer)));
    }

    MessageService::send_message(
        env.storage.as_ref(),
        &env.cache,
        &env.notifier,
        u1,
        conv,
        "hello",
    )
    .await
    .unwrap();

    for viewer in [u1, u2] {
        assert!(!env
            .cache_store
            .contains_key(&conversation_list_key(viewer, 1, 20)));
        assert!(!env
            .cache_store
            .contains_key(&conversation_detail_key(conv, viewer)));
        assert!(!env
            .cache_store
            .contains_key(&conversation_messages_key(conv, 1, 50, viewer)));
    }

    let fresh = ConversationService::get_conversation_detail(
        env.storage.as_ref(),
        &env.cache,
        u2,
        conv,
    )
    .await
    .unwrap();
    assert_eq!(fresh.unread_count, 1);
}

#[tokio::test]
async fn recall_spares_list_caches() {
    let env = TestEnv::new();
    let (u1, u2) = (env.user("An"), env.user("Bình"));
    let conv = env.direct(u1, u2).await;

    let msg = MessageService::send_message(
        env.storage.as_ref(),
        &env.cache,
        &env.notifier,
        u1,
        conv,
        "hello",
    )
    .await
    .unwrap();

    ConversationService::list_conversations(env.storage.as_ref(), &env.cache, u2, 1, 20, None)
        .await
        .unwrap();
    ConversationService::get_conversation_detail(env.storage.as_ref(), &env.cache, u2, conv)
        .await
        .unwrap();
    MessageService::get_conversation_messages(env.storage.as_ref(), &env.cache, u2, conv, 1, 50)
        .await
        .unwrap();

    MessageService::recall_message(
        env.storage.as_ref(),
        &env.cache,
        u1,
        msg.id,
        RecallScope::All,
    )
    .await
    .unwrap();

    // listings show timestamps only, so recall leaves them cached
    assert!(env
        .cache_store
        .contains_key(&conversation_list_key(u2, 1, 20)));
    assert!(!env
        .cache_store
        .contains_key(&conversation_detail_key(conv, u2)));
    assert!(!env
        .cache_store
        .contains_key(&conversation_messages_key(conv, 1, 50, u2)));
}

#[tokio::test]
async fn mark_read_refreshes_unread_views() {
    let env = TestEnv::new();
    let (u1, u2) = (env.user("An"), env.user("Bình"));
    let conv = env.direct(u1, u2).await;

    MessageService::send_message(
        env.storage.as_ref(),
        &env.cache,
        &env.notifier,
        u1,
        conv,
        "hello",
    )
    .await
    .unwrap();

    let before = ConversationService::get_conversation_detail(
        env.storage.as_ref(),
        &env.cache,
        u2,
        conv,
    )
    .await
    .unwrap();
    assert_eq!(before.unread_count, 1);

    MessageService::mark_conversation_read(env.storage.as_ref(), &env.cache, u2, conv)
        .await
        .unwrap();

    let after = ConversationService::get_conversation_detail(
        env.storage.as_ref(),
        &env.cache,
        u2,
        conv,
    )
    .await
    .unwrap();
    assert_eq!(after.unread_count, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_invalidation_degrades_to_the_ttl_window() {
    // a cache whose deletes always fail: commands still succeed, readers see
    // stale data until the TTL expires, then recover
    let storage = Arc::new(MemoryStorage::new());
    let cache = CacheLayer::new(Arc::new(BrokenInvalidationStore::new()), CACHE_TTL_SECONDS);
    let notifier = RecordingEmitter::new();

    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    storage.add_user(u1, "An");
    storage.add_user(u2, "Bình");
    let conv = ConversationService::create_direct_conversation(
        storage.as_ref(),
        &cache,
        &notifier,
        Uuid::new_v4(),
        u1,
        u2,
    )
    .await
    .unwrap();

    let primed =
        ConversationService::get_conversation_detail(storage.as_ref(), &cache, u2, conv)
            .await
            .unwrap();
    assert_eq!(primed.unread_count, 0);

    MessageService::send_message(storage.as_ref(), &cache, &notifier, u1, conv, "hello")
        .await
        .unwrap();

    let stale = ConversationService::get_conversation_detail(storage.as_ref(), &cache, u2, conv)
        .await
        .unwrap();
    assert_eq!(stale.unread_count, 0);
    assert!(stale.last_message.is_none());

    tokio::time::advance(Duration::from_secs(CACHE_TTL_SECONDS + 1)).await;

    let fresh = ConversationService::get_conversation_detail(storage.as_ref(), &cache, u2, conv)
        .await
        .unwrap();
    assert_eq!(fresh.unread_count, 1);
    assert_eq!(fresh.last_message.unwrap().body, "hello");
}
