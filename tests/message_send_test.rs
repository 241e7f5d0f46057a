mod common;

use common::TestEnv;
use messaging_core::error::AppError;
use messaging_core::services::conversation_service::ConversationService;
use messaging_core::services::message_service::{MessageService, MESSAGE_BODY_MAX_CHARS};
use messaging_core::storage::StorageGateway;
use uuid::Uuid;

#[tokio::test]
async fn empty_and_whitespace_bodies_are_rejected() {
    let env = TestEnv::new();
    let (u1, u2) = (env.user("An"), env.user("Bình"));
    let conv = env.direct(u1, u2).await;

    for body in ["", "   ", "\n\t"] {
        let err = MessageService::send_message(
            env.storage.as_ref(),
            &env.cache,
            &env.notifier,
            u1,
            conv,
            body,
        )
        .await
        .unwrap_err();
        assert_eq!(err, AppError::EmptyMessage);
    }

    let (rows, total) = env.storage.list_messages(conv, u1, 50, 0).await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn oversized_body_is_rejected_before_any_write() {
    let env = TestEnv::new();
    let (u1, u2) = (env.user("An"), env.user("Bình"));
    let conv = env.direct(u1, u2).await;

    let body = "x".repeat(6_000);
    let err = MessageService::send_message(
        env.storage.as_ref(),
        &env.cache,
        &env.notifier,
        u1,
        conv,
        &body,
    )
    .await
    .unwrap_err();

    assert_eq!(
        err,
        AppError::MessageTooLong {
            length: 6_000,
            max: MESSAGE_BODY_MAX_CHARS
        }
    );
    let (rows, _) = env.storage.list_messages(conv, u1, 50, 0).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn a_body_at_the_cap_is_accepted() {
    let env = TestEnv::new();
    let (u1, u2) = (env.user("An"), env.user("Bình"));
    let conv = env.direct(u1, u2).await;

    let body = "x".repeat(MESSAGE_BODY_MAX_CHARS);
    MessageService::send_message(
        env.storage.as_ref(),
        &env.cache,
        &env.notifier,
        u1,
        conv,
        &body,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn non_participants_cannot_send() {
    let env = TestEnv::new();
    let (u1, u2, u3) = (env.user("An"), env.user("Bình"), env.user("Chi"));
    let conv = env.direct(u1, u2).await;

    let err = MessageService::send_message(
        env.storage.as_ref(),
        &env.cache,
        &env.notifier,
        u3,
        conv,
        "hello",
    )
    .await
    .unwrap_err();
    assert_eq!(err, AppError::NotParticipant);
}

#[tokio::test]
async fn unknown_and_deleted_conversations_reject_sends() {
    let env = TestEnv::new();
    let (u1, u2) = (env.user("An"), env.user("Bình"));

    let err = MessageService::send_message(
        env.storage.as_ref(),
        &env.cache,
        &env.notifier,
        u1,
        Uuid::new_v4(),
        "hello",
    )
    .await
    .unwrap_err();
    assert_eq!(err, AppError::NotFound);

    let conv = env.direct(u1, u2).await;
    ConversationService::delete_conversation(env.storage.as_ref(), &env.cache, u1, conv)
        .await
        .unwrap();

    let err = MessageService::send_message(
        env.storage.as_ref(),
        &env.cache,
        &env.notifier,
        u1,
        conv,
        "hello",
    )
    .await
    .unwrap_err();
    assert_eq!(err, AppError::NotFound);
}

#[tokio::test]
async fn send_trims_body_and_notifies_everyone_else() {
    let env = TestEnv::new();
    let (u1, u2, u3) = (env.user("An"), env.user("Bình"), env.user("Chi"));
    let conv = env.group(u1, "Team", &[u2, u3]).await;
    env.notifier.clear();

    let message = MessageService::send_message(
        env.storage.as_ref(),
        &env.cache,
        &env.notifier,
        u1,
        conv,
        "  hello  ",
    )
    .await
    .unwrap();
    assert_eq!(message.body, "hello");

    let mut recipients = env.notifier.recipients();
    recipients.sort();
    let mut expected = vec![u2, u3];
    expected.sort();
    assert_eq!(recipients, expected);
}

#[tokio::test]
async fn send_moves_conversation_to_the_top_of_the_list() {
    let env = TestEnv::new();
    let (u1, u2, u3) = (env.user("An"), env.user("Bình"), env.user("Chi"));
    let older = env.direct(u1, u2).await;
    let newer = env.direct(u1, u3).await;

    MessageService::send_message(
        env.storage.as_ref(),
        &env.cache,
        &env.notifier,
        u1,
        older,
        "ping",
    )
    .await
    .unwrap();

    let page = ConversationService::list_conversations(
        env.storage.as_ref(),
        &env.cache,
        u1,
        1,
        20,
        None,
    )
    .await
    .unwrap();
    let order: Vec<_> = page.data.iter().map(|c| c.id).collect();
    assert_eq!(order, vec![older, newer]);
}

#[tokio::test]
async fn failed_send_leaves_nothing_behind() {
    let env = TestEnv::new();
    let (u1, u2, u3) = (env.user("An"), env.user("Bình"), env.user("Chi"));
    let first = env.direct(u1, u2).await;
    let second = env.direct(u1, u3).await;
    env.notifier.clear();

    let before: Vec<_> = ConversationService::list_conversations(
        env.storage.as_ref(),
        &env.cache,
        u1,
        1,
        20,
        None,
    )
    .await
    .unwrap()
    .data
    .iter()
    .map(|c| c.id)
    .collect();
    assert_eq!(before, vec![second, first]);

    env.storage.fail_next_write();
    let err = MessageService::send_message(
        env.storage.as_ref(),
        &env.cache,
        &env.notifier,
        u1,
        first,
        "hello",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Storage(_)));

    // no message row, no recency change, no notification
    let (rows, total) = env.storage.list_messages(first, u1, 50, 0).await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(total, 0);

    let after: Vec<_> = env
        .storage
        .list_conversations(u1, None, 20, 0)
        .await
        .unwrap()
        .0
        .iter()
        .map(|r| r.conversation.id)
        .collect();
    assert_eq!(after, before);
    assert!(env.notifier.recipients().is_empty());
}
