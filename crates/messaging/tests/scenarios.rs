use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use integrations::{NotificationService, UploadFile};
use messaging::{
    create_dialog, forward_message, get_dialog, get_message, get_messages, get_unread_count,
    mark_messages_as_read, remove_participant, send_message, send_message_with_attachments,
    update_message, CreateDialogRequest, MessagingConfig, MessagingContext, NotificationQueue,
    SendMessageRequest,
};
use shared::{
    domain::{DialogId, DialogRole, MessageId, MessageStatus, MessageType, UserId},
    error::ErrorCode,
};
use storage::Storage;

async fn setup(names: &[&str]) -> (MessagingContext, Vec<UserId>) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let mut users = Vec::new();
    for name in names {
        users.push(storage.create_user(name, "model").await.expect("user"));
    }
    let ctx = MessagingContext::with_storage(
        storage,
        NotificationQueue::disabled(),
        MessagingConfig::default(),
    );
    (ctx, users)
}

async fn dialog(ctx: &MessagingContext, creator: UserId, others: &[UserId]) -> DialogId {
    create_dialog(
        ctx,
        creator,
        CreateDialogRequest {
            participant_ids: others.to_vec(),
            is_group: others.len() > 1,
            ..CreateDialogRequest::default()
        },
    )
    .await
    .expect("dialog")
    .dialog_id
}

async fn age_message(ctx: &MessagingContext, message_id: MessageId, minutes: i64) {
    sqlx::query("UPDATE messages SET created_at = ? WHERE id = ?")
        .bind(Utc::now() - Duration::minutes(minutes))
        .bind(message_id.0)
        .execute(ctx.storage.pool())
        .await
        .expect("age message");
}

#[tokio::test]
async fn group_creation_assigns_owner_and_members() {
    let (ctx, u) = setup(&["u1", "u2", "u3"]).await;
    let dialog_id = dialog(&ctx, u[0], &[u[1], u[2]]).await;

    let view = get_dialog(&ctx, u[0], dialog_id).await.expect("dialog");
    assert_eq!(view.participants.len(), 3);
    let roles: Vec<_> = view.participants.iter().map(|p| (p.user_id, p.role)).collect();
    assert_eq!(
        roles,
        vec![
            (u[0], DialogRole::Owner),
            (u[1], DialogRole::Member),
            (u[2], DialogRole::Member),
        ]
    );
}

#[tokio::test]
async fn non_members_are_denied_everywhere() {
    let (ctx, u) = setup(&["u1", "u2", "u4"]).await;
    let dialog_id = dialog(&ctx, u[0], &[u[1]]).await;
    let sent = send_message(&ctx, u[0], SendMessageRequest::text(dialog_id, "hi"))
        .await
        .expect("send");
    assert_eq!(sent.status, MessageStatus::Sent);

    let outsider = u[2];
    let errors = [
        get_dialog(&ctx, outsider, dialog_id).await.map(drop),
        get_message(&ctx, outsider, sent.message_id).await.map(drop),
        get_messages(&ctx, outsider, dialog_id, None, None).await.map(drop),
        send_message(&ctx, outsider, SendMessageRequest::text(dialog_id, "x"))
            .await
            .map(drop),
        update_message(&ctx, outsider, sent.message_id, "x").await.map(drop),
        mark_messages_as_read(&ctx, outsider, dialog_id).await.map(drop),
        get_unread_count(&ctx, outsider, dialog_id).await.map(drop),
        messaging::delete_message(&ctx, outsider, sent.message_id).await,
        messaging::add_reaction(&ctx, outsider, sent.message_id, "👀")
            .await
            .map(drop),
        messaging::leave_dialog(&ctx, outsider, dialog_id).await,
    ];
    for result in errors {
        assert_eq!(result.expect_err("outsider").code, ErrorCode::AccessDenied);
    }
}

#[tokio::test]
async fn edits_follow_the_fifteen_minute_window() {
    let (ctx, u) = setup(&["u1", "u2"]).await;
    let dialog_id = dialog(&ctx, u[0], &[u[1]]).await;
    let message = send_message(&ctx, u[0], SendMessageRequest::text(dialog_id, "v1"))
        .await
        .expect("send");

    age_message(&ctx, message.message_id, 20).await;
    let err = update_message(&ctx, u[0], message.message_id, "v2")
        .await
        .expect_err("t+20");
    assert_eq!(err.message, "message can only be edited within 15 minutes");

    age_message(&ctx, message.message_id, 5).await;
    let edited = update_message(&ctx, u[0], message.message_id, "v2")
        .await
        .expect("t+5");
    assert_eq!(edited.status, MessageStatus::Edited);

    let err = update_message(&ctx, u[1], message.message_id, "v3")
        .await
        .expect_err("other user");
    assert_eq!(err.code, ErrorCode::AccessDenied);
}

#[tokio::test]
async fn owner_removal_always_fails() {
    let (ctx, u) = setup(&["u1", "u2", "u3"]).await;
    let dialog_id = dialog(&ctx, u[0], &[u[1], u[2]]).await;
    messaging::update_participant_role(&ctx, u[0], dialog_id, u[1], DialogRole::Admin)
        .await
        .expect("promote");

    for actor in &u {
        assert!(remove_participant(&ctx, *actor, dialog_id, u[0]).await.is_err());
    }
    assert!(messaging::is_member(&ctx, dialog_id, u[0])
        .await
        .expect("membership"));
}

#[tokio::test]
async fn attachments_bind_to_their_message() {
    let (ctx, u) = setup(&["u1", "u2"]).await;
    let dialog_id = dialog(&ctx, u[0], &[u[1]]).await;
    let files: Vec<_> = (0..4)
        .map(|n| UploadFile {
            filename: format!("shot-{n}.jpg"),
            mime_type: Some("image/jpeg".into()),
            bytes: vec![n as u8 + 1; 32],
        })
        .collect();

    let mut request = SendMessageRequest::text(dialog_id, "polaroids");
    request.message_type = MessageType::Image;
    let sent = send_message_with_attachments(&ctx, u[0], request, files)
        .await
        .expect("send");

    let fetched = get_message(&ctx, u[1], sent.message_id).await.expect("get");
    assert_eq!(fetched.attachments.len(), 4);
    let bound: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM uploads WHERE entity_type = 'message' AND entity_id = ?",
    )
    .bind(sent.message_id.0)
    .fetch_one(ctx.storage.pool())
    .await
    .expect("count");
    assert_eq!(bound, 4);
}

#[tokio::test]
async fn mark_as_read_is_idempotent() {
    let (ctx, u) = setup(&["u1", "u2"]).await;
    let dialog_id = dialog(&ctx, u[0], &[u[1]]).await;
    for text in ["a", "b", "c"] {
        send_message(&ctx, u[0], SendMessageRequest::text(dialog_id, text))
            .await
            .expect("send");
    }
    assert_eq!(get_unread_count(&ctx, u[1], dialog_id).await.expect("count"), 3);

    assert_eq!(mark_messages_as_read(&ctx, u[1], dialog_id).await.expect("first"), 3);
    assert_eq!(get_unread_count(&ctx, u[1], dialog_id).await.expect("count"), 0);
    assert_eq!(mark_messages_as_read(&ctx, u[1], dialog_id).await.expect("second"), 0);
    assert_eq!(get_unread_count(&ctx, u[1], dialog_id).await.expect("count"), 0);
    assert_eq!(
        messaging::get_total_unread_count(&ctx, u[1]).await.expect("total"),
        0
    );
}

#[tokio::test]
async fn forwarding_skips_the_dialog_without_access() {
    let (ctx, u) = setup(&["u1", "u2", "u3", "u4"]).await;
    let source = dialog(&ctx, u[0], &[u[1]]).await;
    let a = dialog(&ctx, u[0], &[u[2]]).await;
    let b = dialog(&ctx, u[0], &[u[3]]).await;
    let c = dialog(&ctx, u[2], &[u[3]]).await;
    let original = send_message(&ctx, u[1], SendMessageRequest::text(source, "fwd me"))
        .await
        .expect("send");

    forward_message(&ctx, u[0], original.message_id, &[a, b, c])
        .await
        .expect("forward");

    for (target, reader, expected) in [(a, u[2], 1), (b, u[3], 1), (c, u[2], 0)] {
        let messages = get_messages(&ctx, reader, target, None, None)
            .await
            .expect("messages");
        assert_eq!(messages.len(), expected);
        if let Some(forwarded) = messages.first() {
            assert_eq!(forwarded.message_type, MessageType::Forward);
            assert_eq!(forwarded.content, "fwd me");
        }
    }
}

struct Collecting(Mutex<Vec<UserId>>);

#[async_trait]
impl NotificationService for Collecting {
    async fn create_new_message_notification(
        &self,
        recipient_id: UserId,
        _sender_display_name: &str,
        _dialog_id: DialogId,
    ) -> anyhow::Result<()> {
        self.0.lock().expect("lock").push(recipient_id);
        Ok(())
    }
}

#[tokio::test]
async fn notifications_follow_commit() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let sender = storage.create_user("u1", "employer").await.expect("user");
    let reader = storage.create_user("u2", "model").await.expect("user");
    let (queue, worker) = NotificationQueue::channel(8);
    let collected = Arc::new(Collecting(Mutex::new(Vec::new())));
    let handle = worker.spawn(storage.clone(), collected.clone());
    let ctx = MessagingContext::with_storage(storage, queue, MessagingConfig::default());

    let dialog_id = dialog(&ctx, sender, &[reader]).await;
    send_message(&ctx, sender, SendMessageRequest::text(dialog_id, "callback"))
        .await
        .expect("send");
    drop(ctx);
    handle.await.expect("worker");

    assert_eq!(*collected.0.lock().expect("lock"), vec![reader]);
}
