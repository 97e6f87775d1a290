//! Binds uploaded files to messages through the Upload collaborator.
//!
//! The message row is always inserted first so the upload's entity id points
//! at a real message; linking runs on the same transaction as the insert.

use integrations::{UploadFile, UploadRecord, UploadRequest};
use shared::{
    domain::{MessageId, UserId},
    error::ApiError,
    protocol::AttachmentView,
};
use sqlx::SqliteConnection;
use storage::messages;

use crate::{access::ensure_member, config::AttachmentPolicy, internal, views, MessagingContext};

pub const ATTACHMENT_MODULE: &str = "chat";
pub const ATTACHMENT_ENTITY_TYPE: &str = "message";
pub const ATTACHMENT_USAGE: &str = "attachment";

pub(crate) fn check_files(policy: &AttachmentPolicy, files: &[UploadFile]) -> Result<(), ApiError> {
    if files.len() > policy.max_files_per_message {
        return Err(ApiError::validation(format!(
            "a message can carry at most {} attachments",
            policy.max_files_per_message
        )));
    }
    for file in files {
        if file.filename.trim().is_empty() {
            return Err(ApiError::validation("attachment filename is required"));
        }
        if file.bytes.is_empty() {
            return Err(ApiError::validation(format!(
                "attachment '{}' is empty",
                file.filename
            )));
        }
        if file.size_bytes() > policy.max_file_bytes {
            return Err(ApiError::validation(format!(
                "attachment '{}' exceeds the {} byte limit",
                file.filename, policy.max_file_bytes
            )));
        }
        let mime_type = file.mime_type.as_deref().unwrap_or("application/octet-stream");
        if !policy.allows_mime(mime_type) {
            return Err(ApiError::validation(format!(
                "attachment type '{mime_type}' is not allowed"
            )));
        }
    }
    Ok(())
}

/// Uploads every file against `message_id`. Stops at the first failure and
/// leaves rollback to the caller's transaction.
pub(crate) async fn link_attachments(
    ctx: &MessagingContext,
    conn: &mut SqliteConnection,
    uploader: UserId,
    message_id: MessageId,
    files: Vec<UploadFile>,
) -> Result<Vec<UploadRecord>, ApiError> {
    let mut records = Vec::with_capacity(files.len());
    for file in files {
        let filename = file.filename.clone();
        let record = ctx
            .uploads
            .upload(
                conn,
                UploadRequest {
                    user_id: uploader,
                    module: ATTACHMENT_MODULE.to_string(),
                    entity_type: ATTACHMENT_ENTITY_TYPE.to_string(),
                    entity_id: message_id.0,
                    usage: ATTACHMENT_USAGE.to_string(),
                    is_public: false,
                    file,
                },
            )
            .await
            .map_err(|err| internal(err.context(format!("failed to upload attachment '{filename}'"))))?;
        records.push(record);
    }
    Ok(records)
}

pub(crate) async fn remove_attachments(
    ctx: &MessagingContext,
    conn: &mut SqliteConnection,
    message_id: MessageId,
) -> Result<u64, ApiError> {
    ctx.uploads
        .delete_by_entity(conn, ATTACHMENT_ENTITY_TYPE, message_id.0)
        .await
        .map_err(internal)
}

pub(crate) async fn attachment_views(
    ctx: &MessagingContext,
    conn: &mut SqliteConnection,
    message_id: MessageId,
) -> Result<Vec<AttachmentView>, ApiError> {
    let records = ctx
        .uploads
        .get_by_entity(conn, ATTACHMENT_ENTITY_TYPE, message_id.0)
        .await
        .map_err(internal)?;
    Ok(records.iter().map(views::attachment_view).collect())
}

pub async fn get_attachments(
    ctx: &MessagingContext,
    user_id: UserId,
    message_id: MessageId,
) -> Result<Vec<AttachmentView>, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    let message = messages::find_message(&mut conn, message_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("message not found"))?;
    ensure_member(&mut conn, message.dialog_id, user_id).await?;
    attachment_views(ctx, &mut conn, message_id).await
}
