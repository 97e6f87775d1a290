use super::*;
use crate::{
    messages::{send_message_with_attachments, SendMessageRequest},
    participants::transfer_ownership,
    send_message,
    test_support::{context_with_users, count_rows, direct, file, group},
};
use shared::{
    domain::{MessageSender, MessageType},
    error::ErrorCode,
};

#[tokio::test]
async fn creator_owns_dialog_and_others_are_members() {
    let (ctx, users) = context_with_users(&["u1", "u2", "u3"]).await;

    let view = create_dialog(
        &ctx,
        users[0],
        CreateDialogRequest {
            participant_ids: vec![users[1], users[2], users[1], users[0]],
            is_group: true,
            title: Some("  Lookbook shoot ".into()),
            ..CreateDialogRequest::default()
        },
    )
    .await
    .expect("create dialog");

    assert_eq!(view.participants.len(), 3);
    assert_eq!(view.participant(users[0]).expect("u1").role, DialogRole::Owner);
    assert_eq!(view.participant(users[1]).expect("u2").role, DialogRole::Member);
    assert_eq!(view.participant(users[2]).expect("u3").role, DialogRole::Member);
    let owners = view
        .participants
        .iter()
        .filter(|p| p.role == DialogRole::Owner)
        .count();
    assert_eq!(owners, 1);
    assert_eq!(view.title.as_deref(), Some("Lookbook shoot"));
    assert!(view.last_message.is_none());
}

#[tokio::test]
async fn unknown_participant_creates_nothing() {
    let (ctx, users) = context_with_users(&["u1"]).await;

    let err = create_dialog(
        &ctx,
        users[0],
        CreateDialogRequest {
            participant_ids: vec![UserId(9_999)],
            ..CreateDialogRequest::default()
        },
    )
    .await
    .expect_err("unknown user");

    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(count_rows(&ctx, "dialogs").await, 0);
    assert_eq!(count_rows(&ctx, "dialog_participants").await, 0);
}

#[tokio::test]
async fn participant_insert_failure_rolls_back_the_dialog() {
    let (ctx, users) = context_with_users(&["u1", "u2", "u3"]).await;
    sqlx::query(&format!(
        "CREATE TRIGGER reject_participant BEFORE INSERT ON dialog_participants
         WHEN NEW.user_id = {}
         BEGIN SELECT RAISE(ABORT, 'participant rejected'); END",
        users[2].0
    ))
    .execute(ctx.storage.pool())
    .await
    .expect("trigger");

    let err = create_dialog(
        &ctx,
        users[0],
        CreateDialogRequest {
            participant_ids: vec![users[1], users[2]],
            is_group: true,
            ..CreateDialogRequest::default()
        },
    )
    .await
    .expect_err("third insert fails");

    assert_eq!(err.code, ErrorCode::Internal);
    assert_eq!(count_rows(&ctx, "dialogs").await, 0);
    assert_eq!(count_rows(&ctx, "dialog_participants").await, 0);
}

#[tokio::test]
async fn non_member_cannot_read_dialog() {
    let (ctx, users) = context_with_users(&["u1", "u2", "outsider"]).await;
    let dialog_id = direct(&ctx, users[0], users[1]).await;

    let err = get_dialog(&ctx, users[2], dialog_id)
        .await
        .expect_err("outsider");
    assert_eq!(err.code, ErrorCode::AccessDenied);

    let err = get_dialog(&ctx, users[2], DialogId(4_242))
        .await
        .expect_err("missing dialog");
    assert_eq!(err.code, ErrorCode::AccessDenied);
}

#[tokio::test]
async fn user_dialogs_skip_dialogs_that_fail_to_build() {
    let (ctx, users) = context_with_users(&["u1", "u2", "u3"]).await;
    let kept = direct(&ctx, users[0], users[1]).await;
    direct(&ctx, users[0], users[2]).await;
    ctx.storage.delete_user(users[2]).await.expect("delete user");

    let dialogs = get_user_dialogs(&ctx, users[0], None, 0)
        .await
        .expect("user dialogs");

    assert_eq!(dialogs.len(), 1);
    assert_eq!(dialogs[0].dialog_id, kept);
}

#[tokio::test]
async fn user_dialogs_are_ordered_by_activity() {
    let (ctx, users) = context_with_users(&["u1", "u2", "u3"]).await;
    let older = direct(&ctx, users[0], users[1]).await;
    let newer = direct(&ctx, users[0], users[2]).await;
    send_message(&ctx, users[1], SendMessageRequest::text(older, "ping"))
        .await
        .expect("send");

    let dialogs = get_user_dialogs(&ctx, users[0], None, 0)
        .await
        .expect("user dialogs");
    let ids: Vec<_> = dialogs.iter().map(|d| d.dialog_id).collect();
    assert_eq!(ids, vec![older, newer]);
    assert_eq!(dialogs[0].unread_count, 1);
    assert_eq!(
        dialogs[0].last_message.as_ref().map(|m| m.content.as_str()),
        Some("ping")
    );
}

#[tokio::test]
async fn finds_direct_dialog_between_users() {
    let (ctx, users) = context_with_users(&["u1", "u2", "u3"]).await;
    let dialog_id = direct(&ctx, users[0], users[1]).await;
    group(&ctx, users[0], &[users[1], users[2]]).await;

    let found = get_dialog_between_users(&ctx, users[1], users[0])
        .await
        .expect("direct dialog");
    assert_eq!(found.dialog_id, dialog_id);

    let err = get_dialog_between_users(&ctx, users[0], users[2])
        .await
        .expect_err("no direct dialog");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn casting_chats_are_not_direct_dialogs() {
    let (ctx, users) = context_with_users(&["employer", "model"]).await;
    let casting_id = ctx
        .storage
        .create_casting("Catalogue", Some(users[0]))
        .await
        .expect("casting");
    create_casting_dialog(&ctx, casting_id, users[0], users[1])
        .await
        .expect("casting dialog");

    let err = get_dialog_between_users(&ctx, users[0], users[1])
        .await
        .expect_err("casting chat only");
    assert_eq!(err.code, ErrorCode::NotFound);

    let dialog_id = direct(&ctx, users[0], users[1]).await;
    let found = get_dialog_between_users(&ctx, users[1], users[0])
        .await
        .expect("direct dialog");
    assert_eq!(found.dialog_id, dialog_id);
    assert_eq!(found.casting_id, None);
}

#[tokio::test]
async fn casting_dialog_greets_and_is_reused() {
    let (ctx, users) = context_with_users(&["employer", "model"]).await;
    let casting_id = ctx
        .storage
        .create_casting("Summer campaign", Some(users[0]))
        .await
        .expect("casting");

    let first = create_casting_dialog(&ctx, casting_id, users[0], users[1])
        .await
        .expect("casting dialog");
    assert!(!first.is_group);
    assert_eq!(first.casting_id, Some(casting_id));
    assert_eq!(first.title.as_deref(), Some("Summer campaign"));
    let greeting = first.last_message.as_ref().expect("greeting");
    assert_eq!(greeting.message_type, MessageType::System);
    assert_eq!(greeting.sender_id, None);
    assert_eq!(greeting.sender_name, shared::domain::SYSTEM_SENDER_NAME);
    assert_eq!(greeting.content, "Chat created for casting 'Summer campaign'");

    let second = create_casting_dialog(&ctx, casting_id, users[0], users[1])
        .await
        .expect("reused dialog");
    assert_eq!(second.dialog_id, first.dialog_id);
    assert_eq!(count_rows(&ctx, "dialogs").await, 1);
    assert_eq!(count_rows(&ctx, "messages").await, 1);
}

#[tokio::test]
async fn casting_dialog_requires_known_casting_and_two_people() {
    let (ctx, users) = context_with_users(&["employer", "model"]).await;

    let err = create_casting_dialog(&ctx, CastingId(77), users[0], users[1])
        .await
        .expect_err("missing casting");
    assert_eq!(err.code, ErrorCode::NotFound);

    let casting_id = ctx
        .storage
        .create_casting("Solo", None)
        .await
        .expect("casting");
    let err = create_casting_dialog(&ctx, casting_id, users[0], users[0])
        .await
        .expect_err("same user twice");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn dialog_with_messages_marks_everything_read() {
    let (ctx, users) = context_with_users(&["u1", "u2"]).await;
    let dialog_id = direct(&ctx, users[0], users[1]).await;
    for text in ["one", "two", "three"] {
        send_message(&ctx, users[0], SendMessageRequest::text(dialog_id, text))
            .await
            .expect("send");
    }

    let page = get_dialog_with_messages(&ctx, users[1], dialog_id, Some(2), None)
        .await
        .expect("dialog with messages");
    let contents: Vec<_> = page.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["two", "three"]);
    assert_eq!(page.dialog.unread_count, 0);
    assert!(page.messages.iter().all(|m| m.read_by.contains(&users[1])));
    assert!(page
        .dialog
        .participant(users[1])
        .expect("reader")
        .last_seen_at
        .is_some());
}

#[tokio::test]
async fn update_requires_moderator() {
    let (ctx, users) = context_with_users(&["owner", "member"]).await;
    let dialog_id = group(&ctx, users[0], &[users[1]]).await;

    let err = update_dialog(
        &ctx,
        users[1],
        dialog_id,
        DialogUpdate {
            title: Some("hijacked".into()),
            image_url: None,
        },
    )
    .await
    .expect_err("member cannot update");
    assert_eq!(err.code, ErrorCode::AccessDenied);

    let err = update_dialog(&ctx, users[0], dialog_id, DialogUpdate::default())
        .await
        .expect_err("empty update");
    assert_eq!(err.code, ErrorCode::Validation);

    let view = update_dialog(
        &ctx,
        users[0],
        dialog_id,
        DialogUpdate {
            title: None,
            image_url: Some("/img/crew.png".into()),
        },
    )
    .await
    .expect("owner update");
    assert_eq!(view.title.as_deref(), Some("crew"));
    assert_eq!(view.image_url.as_deref(), Some("/img/crew.png"));
}

#[tokio::test]
async fn delete_cascades_to_messages_and_attachments() {
    let (ctx, users) = context_with_users(&["owner", "member"]).await;
    let dialog_id = group(&ctx, users[0], &[users[1]]).await;
    let message = send_message_with_attachments(
        &ctx,
        users[1],
        SendMessageRequest::text(dialog_id, "headshots"),
        vec![file("a.png", "image/png"), file("b.png", "image/png")],
    )
    .await
    .expect("send with attachments");
    crate::add_reaction(&ctx, users[0], message.message_id, "🔥")
        .await
        .expect("react");
    crate::mark_messages_as_read(&ctx, users[0], dialog_id)
        .await
        .expect("mark read");

    let err = delete_dialog(&ctx, users[1], dialog_id)
        .await
        .expect_err("member cannot delete");
    assert_eq!(err.code, ErrorCode::AccessDenied);

    delete_dialog(&ctx, users[0], dialog_id)
        .await
        .expect("owner deletes");
    for table in [
        "dialogs",
        "dialog_participants",
        "messages",
        "message_reactions",
        "read_receipts",
        "uploads",
    ] {
        assert_eq!(count_rows(&ctx, table).await, 0, "{table} should be empty");
    }
}

#[tokio::test]
async fn owner_must_transfer_before_leaving() {
    let (ctx, users) = context_with_users(&["owner", "member"]).await;
    let dialog_id = group(&ctx, users[0], &[users[1]]).await;

    let err = leave_dialog(&ctx, users[0], dialog_id)
        .await
        .expect_err("owner leave");
    assert_eq!(err.code, ErrorCode::Validation);

    transfer_ownership(&ctx, users[0], dialog_id, users[1])
        .await
        .expect("transfer");
    leave_dialog(&ctx, users[0], dialog_id)
        .await
        .expect("former owner leaves");

    let view = get_dialog(&ctx, users[1], dialog_id).await.expect("dialog");
    assert_eq!(view.participants.len(), 1);
    assert_eq!(view.participants[0].role, DialogRole::Owner);
    assert!(!crate::is_member(&ctx, dialog_id, users[0])
        .await
        .expect("membership"));
}

#[tokio::test]
async fn system_greeting_is_not_attributed_to_a_user() {
    let (ctx, users) = context_with_users(&["employer", "model"]).await;
    let casting_id = ctx
        .storage
        .create_casting("Runway", Some(users[0]))
        .await
        .expect("casting");
    let dialog = create_casting_dialog(&ctx, casting_id, users[0], users[1])
        .await
        .expect("casting dialog");

    let mut conn = ctx.storage.acquire().await.expect("conn");
    let stored = messages::latest_message(&mut conn, dialog.dialog_id)
        .await
        .expect("latest")
        .expect("greeting stored");
    assert_eq!(stored.sender, MessageSender::System);
}
