use futures::future::join_all;
use messaging::{
    create_casting_dialog, create_dialog, get_messages, send_message, CreateDialogRequest,
    MessagingConfig, MessagingContext, NotificationQueue, SendMessageRequest,
};
use shared::domain::UserId;
use storage::Storage;

async fn on_disk(root: &tempfile::TempDir, names: &[&str]) -> (MessagingContext, Vec<UserId>) {
    let url = format!(
        "sqlite://{}",
        root.path().join("data").join("messaging.db").display()
    );
    let storage = Storage::new(&url).await.expect("db");
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

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_into_one_dialog_all_succeed() {
    let root = tempfile::tempdir().expect("tempdir");
    let (ctx, users) = on_disk(&root, &["employer", "model"]).await;
    let dialog_id = create_dialog(
        &ctx,
        users[0],
        CreateDialogRequest {
            participant_ids: vec![users[1]],
            ..CreateDialogRequest::default()
        },
    )
    .await
    .expect("dialog")
    .dialog_id;

    let sends = (0..20).map(|i| {
        let ctx = ctx.clone();
        let sender = users[i % 2];
        tokio::spawn(async move {
            send_message(
                &ctx,
                sender,
                SendMessageRequest::text(dialog_id, format!("message {i}")),
            )
            .await
        })
    });
    let failures: Vec<_> = join_all(sends)
        .await
        .into_iter()
        .map(|joined| joined.expect("join"))
        .filter_map(Result::err)
        .collect();
    assert!(failures.is_empty(), "failed sends: {failures:?}");

    let page = get_messages(&ctx, users[1], dialog_id, Some(50), None)
        .await
        .expect("messages");
    assert_eq!(page.len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_casting_dialog_requests_share_one_dialog() {
    let root = tempfile::tempdir().expect("tempdir");
    let (ctx, users) = on_disk(&root, &["employer", "model"]).await;
    let casting_id = ctx
        .storage
        .create_casting("Runway", Some(users[0]))
        .await
        .expect("casting");

    let opens = (0..8).map(|_| {
        let ctx = ctx.clone();
        let (employer, model) = (users[0], users[1]);
        tokio::spawn(async move { create_casting_dialog(&ctx, casting_id, employer, model).await })
    });
    let mut ids: Vec<_> = join_all(opens)
        .await
        .into_iter()
        .map(|joined| joined.expect("join").expect("casting dialog").dialog_id)
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1, "dialogs opened: {ids:?}");

    let dialogs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dialogs WHERE casting_id = ?")
        .bind(casting_id.0)
        .fetch_one(ctx.storage.pool())
        .await
        .expect("count");
    assert_eq!(dialogs, 1);
}
