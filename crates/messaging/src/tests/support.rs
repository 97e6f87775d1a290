use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::bail;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use integrations::{NotificationService, UploadFile, UploadRecord, UploadRequest, UploadService};
use shared::domain::{DialogId, MessageId, UploadId, UserId};
use sqlx::SqliteConnection;
use storage::Storage;

use crate::{
    dialogs::{create_dialog, CreateDialogRequest},
    MessagingConfig, MessagingContext, NotificationQueue, NotificationWorker,
};

pub(crate) async fn context_with_users(names: &[&str]) -> (MessagingContext, Vec<UserId>) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let users = create_users(&storage, names).await;
    let ctx = MessagingContext::with_storage(
        storage,
        NotificationQueue::disabled(),
        MessagingConfig::default(),
    );
    (ctx, users)
}

pub(crate) async fn context_with_queue(
    names: &[&str],
    capacity: usize,
) -> (MessagingContext, Vec<UserId>, NotificationWorker) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let users = create_users(&storage, names).await;
    let (queue, worker) = NotificationQueue::channel(capacity);
    let ctx = MessagingContext::with_storage(storage, queue, MessagingConfig::default());
    (ctx, users, worker)
}

async fn create_users(storage: &Storage, names: &[&str]) -> Vec<UserId> {
    let mut users = Vec::with_capacity(names.len());
    for name in names {
        users.push(storage.create_user(name, "model").await.expect("user"));
    }
    users
}

pub(crate) async fn group(ctx: &MessagingContext, owner: UserId, members: &[UserId]) -> DialogId {
    create_dialog(
        ctx,
        owner,
        CreateDialogRequest {
            participant_ids: members.to_vec(),
            is_group: true,
            title: Some("crew".into()),
            ..CreateDialogRequest::default()
        },
    )
    .await
    .expect("group dialog")
    .dialog_id
}

pub(crate) async fn direct(ctx: &MessagingContext, a: UserId, b: UserId) -> DialogId {
    create_dialog(
        ctx,
        a,
        CreateDialogRequest {
            participant_ids: vec![b],
            ..CreateDialogRequest::default()
        },
    )
    .await
    .expect("direct dialog")
    .dialog_id
}

pub(crate) async fn backdate_message(ctx: &MessagingContext, message_id: MessageId, by: Duration) {
    sqlx::query("UPDATE messages SET created_at = ? WHERE id = ?")
        .bind(Utc::now() - by)
        .bind(message_id.0)
        .execute(ctx.storage.pool())
        .await
        .expect("backdate message");
}

pub(crate) async fn count_rows(ctx: &MessagingContext, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(ctx.storage.pool())
        .await
        .expect("count rows")
}

pub(crate) fn file(name: &str, mime: &str) -> UploadFile {
    UploadFile {
        filename: name.into(),
        mime_type: Some(mime.into()),
        bytes: name.as_bytes().to_vec(),
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub(crate) calls: Mutex<Vec<(UserId, String, DialogId)>>,
    pub(crate) fail_for: Option<UserId>,
}

impl RecordingNotifier {
    pub(crate) fn recipients(&self) -> Vec<UserId> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(recipient, _, _)| *recipient)
            .collect()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn create_new_message_notification(
        &self,
        recipient_id: UserId,
        sender_display_name: &str,
        dialog_id: DialogId,
    ) -> anyhow::Result<()> {
        if self.fail_for == Some(recipient_id) {
            bail!("delivery to {recipient_id} refused");
        }
        self.calls
            .lock()
            .expect("calls lock")
            .push((recipient_id, sender_display_name.to_string(), dialog_id));
        Ok(())
    }
}

pub(crate) fn spawn_worker(
    ctx: &MessagingContext,
    worker: NotificationWorker,
    notifier: Arc<RecordingNotifier>,
) -> tokio::task::JoinHandle<()> {
    worker.spawn(ctx.storage.clone(), notifier)
}

/// Delegates to real storage for the first `succeed` uploads, then fails.
pub(crate) struct FlakyUploads {
    pub(crate) inner: Storage,
    pub(crate) succeed: usize,
    pub(crate) attempts: AtomicUsize,
}

impl FlakyUploads {
    pub(crate) fn install(ctx: &mut MessagingContext, succeed: usize) {
        ctx.uploads = Arc::new(Self {
            inner: ctx.storage.clone(),
            succeed,
            attempts: AtomicUsize::new(0),
        });
    }
}

#[async_trait]
impl UploadService for FlakyUploads {
    async fn upload(
        &self,
        conn: &mut SqliteConnection,
        request: UploadRequest,
    ) -> anyhow::Result<UploadRecord> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) >= self.succeed {
            bail!("storage backend unavailable");
        }
        self.inner.upload(conn, request).await
    }

    async fn get_by_entity(
        &self,
        conn: &mut SqliteConnection,
        entity_type: &str,
        entity_id: i64,
    ) -> anyhow::Result<Vec<UploadRecord>> {
        self.inner.get_by_entity(conn, entity_type, entity_id).await
    }

    async fn delete(
        &self,
        conn: &mut SqliteConnection,
        user_id: UserId,
        upload_id: UploadId,
    ) -> anyhow::Result<()> {
        self.inner.delete(conn, user_id, upload_id).await
    }

    async fn delete_by_entity(
        &self,
        conn: &mut SqliteConnection,
        entity_type: &str,
        entity_id: i64,
    ) -> anyhow::Result<u64> {
        self.inner.delete_by_entity(conn, entity_type, entity_id).await
    }
}
