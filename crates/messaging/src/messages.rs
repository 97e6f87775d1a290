use chrono::Utc;
use integrations::UploadFile;
use shared::{
    domain::{DialogId, MessageId, MessageSender, MessageType, UserId},
    error::ApiError,
    protocol::MessageView,
};
use sqlx::SqliteConnection;
use storage::{dialogs, messages, NewMessage, StoredMessage};
use tracing::{debug, info, warn};

use crate::{
    access::ensure_member,
    attachments::{check_files, link_attachments, remove_attachments},
    internal,
    notify::NewMessageJob,
    views::ViewBuilder,
    MessagingContext,
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub dialog_id: DialogId,
    pub message_type: MessageType,
    pub content: String,
    pub reply_to_id: Option<MessageId>,
    pub forward_from_id: Option<MessageId>,
}

impl SendMessageRequest {
    pub fn text(dialog_id: DialogId, content: impl Into<String>) -> Self {
        Self {
            dialog_id,
            message_type: MessageType::Text,
            content: content.into(),
            reply_to_id: None,
            forward_from_id: None,
        }
    }
}

/// Maps a client-supplied type name onto [`MessageType`].
pub fn parse_message_type(raw: &str) -> Result<MessageType, ApiError> {
    raw.trim()
        .to_ascii_lowercase()
        .parse::<MessageType>()
        .map_err(|err| ApiError::validation(err.to_string()))
}

fn validate_request(request: &SendMessageRequest, has_files: bool) -> Result<(), ApiError> {
    match request.message_type {
        MessageType::System => {
            return Err(ApiError::validation(
                "system messages cannot be sent by users",
            ))
        }
        MessageType::Forward if request.forward_from_id.is_none() => {
            return Err(ApiError::validation(
                "forward messages must reference the forwarded message",
            ))
        }
        _ => {}
    }
    if request.content.trim().is_empty() && !has_files {
        return Err(ApiError::validation("message content is required"));
    }
    Ok(())
}

async fn find_message(
    conn: &mut SqliteConnection,
    message_id: MessageId,
) -> Result<StoredMessage, ApiError> {
    messages::find_message(conn, message_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("message not found"))
}

/// Reply targets must live in the same dialog; forwarded messages must be
/// readable by the sender.
async fn check_references(
    conn: &mut SqliteConnection,
    sender_id: UserId,
    request: &SendMessageRequest,
) -> Result<(), ApiError> {
    if let Some(reply_to_id) = request.reply_to_id {
        let target = messages::find_message(conn, reply_to_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("reply target not found"))?;
        if target.dialog_id != request.dialog_id {
            return Err(ApiError::validation(
                "reply target belongs to another dialog",
            ));
        }
    }
    if let Some(forward_from_id) = request.forward_from_id {
        let original = messages::find_message(conn, forward_from_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("forwarded message not found"))?;
        ensure_member(conn, original.dialog_id, sender_id).await?;
    }
    Ok(())
}

async fn build_view(ctx: &MessagingContext, message: StoredMessage) -> Result<MessageView, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    ViewBuilder::new(ctx).message_view(&mut conn, message).await
}

fn queue_notification(ctx: &MessagingContext, message: &StoredMessage, sender_id: UserId, sender_name: String) {
    ctx.notifications.submit(NewMessageJob {
        dialog_id: message.dialog_id,
        message_id: message.message_id,
        sender_id,
        sender_name,
    });
}

async fn create_message(
    ctx: &MessagingContext,
    sender_id: UserId,
    request: SendMessageRequest,
    files: Vec<UploadFile>,
) -> Result<MessageView, ApiError> {
    validate_request(&request, !files.is_empty())?;
    check_files(&ctx.config.attachments, &files)?;
    let attachment_count = files.len();

    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_member(&mut tx, request.dialog_id, sender_id).await?;
    check_references(&mut tx, sender_id, &request).await?;
    let sender_name = ViewBuilder::new(ctx).display_name(&mut tx, sender_id).await?;

    let now = Utc::now();
    let message = messages::insert_message(
        &mut tx,
        &NewMessage {
            dialog_id: request.dialog_id,
            sender: MessageSender::User(sender_id),
            message_type: request.message_type,
            content: request.content.trim(),
            reply_to_id: request.reply_to_id,
            forward_from_id: request.forward_from_id,
        },
        now,
    )
    .await
    .map_err(internal)?;
    if !files.is_empty() {
        link_attachments(ctx, &mut tx, sender_id, message.message_id, files).await?;
    }
    dialogs::touch_dialog(&mut tx, request.dialog_id, now)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;

    debug!(
        message_id = %message.message_id,
        dialog_id = %message.dialog_id,
        attachments = attachment_count,
        "message stored"
    );
    queue_notification(ctx, &message, sender_id, sender_name);
    build_view(ctx, message).await
}

pub async fn send_message(
    ctx: &MessagingContext,
    sender_id: UserId,
    request: SendMessageRequest,
) -> Result<MessageView, ApiError> {
    create_message(ctx, sender_id, request, Vec::new()).await
}

/// Stores the message and binds every file to it in one transaction. Any
/// failed upload rolls back the message and the uploads before it.
pub async fn send_message_with_attachments(
    ctx: &MessagingContext,
    sender_id: UserId,
    request: SendMessageRequest,
    files: Vec<UploadFile>,
) -> Result<MessageView, ApiError> {
    create_message(ctx, sender_id, request, files).await
}

/// Inserts a message authored by the system sender. No notification is
/// queued for it.
pub(crate) async fn post_system_message(
    ctx: &MessagingContext,
    dialog_id: DialogId,
    content: &str,
) -> Result<StoredMessage, ApiError> {
    let now = Utc::now();
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    let message = messages::insert_message(
        &mut tx,
        &NewMessage {
            dialog_id,
            sender: MessageSender::System,
            message_type: MessageType::System,
            content,
            reply_to_id: None,
            forward_from_id: None,
        },
        now,
    )
    .await
    .map_err(internal)?;
    dialogs::touch_dialog(&mut tx, dialog_id, now)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;
    Ok(message)
}

pub async fn get_message(
    ctx: &MessagingContext,
    user_id: UserId,
    message_id: MessageId,
) -> Result<MessageView, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    let message = find_message(&mut conn, message_id).await?;
    ensure_member(&mut conn, message.dialog_id, user_id).await?;
    ViewBuilder::new(ctx).message_view(&mut conn, message).await
}

/// A page of the dialog's history, oldest first, ending just before `before`.
pub async fn get_messages(
    ctx: &MessagingContext,
    user_id: UserId,
    dialog_id: DialogId,
    limit: Option<u32>,
    before: Option<MessageId>,
) -> Result<Vec<MessageView>, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    ensure_member(&mut conn, dialog_id, user_id).await?;
    let page = messages::list_dialog_messages(&mut conn, dialog_id, ctx.config.page_size(limit), before)
        .await
        .map_err(internal)?;
    Ok(ViewBuilder::new(ctx).message_views(&mut conn, page).await)
}

pub async fn update_message(
    ctx: &MessagingContext,
    user_id: UserId,
    message_id: MessageId,
    new_content: &str,
) -> Result<MessageView, ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    let message = find_message(&mut tx, message_id).await?;
    ensure_member(&mut tx, message.dialog_id, user_id).await?;
    if !message.sender.is(user_id) {
        return Err(ApiError::access_denied("can only edit own messages"));
    }

    let now = Utc::now();
    if now - message.created_at > ctx.config.edit_window {
        return Err(ApiError::validation(format!(
            "message can only be edited within {} minutes",
            ctx.config.edit_window.num_minutes()
        )));
    }
    let content = new_content.trim();
    if content.is_empty() {
        return Err(ApiError::validation("message content is required"));
    }

    let updated = messages::update_message_content(&mut tx, message_id, content, now)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("message not found"))?;
    tx.commit().await.map_err(internal)?;
    build_view(ctx, updated).await
}

/// Allowed for the sender and for dialog owners and admins. Attachments are
/// removed on the same transaction.
pub async fn delete_message(
    ctx: &MessagingContext,
    user_id: UserId,
    message_id: MessageId,
) -> Result<(), ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    let message = find_message(&mut tx, message_id).await?;
    let participant = ensure_member(&mut tx, message.dialog_id, user_id).await?;
    if !message.sender.is(user_id) && !participant.role.can_moderate() {
        return Err(ApiError::access_denied(
            "can only delete own messages unless owner or admin",
        ));
    }

    remove_attachments(ctx, &mut tx, message_id).await?;
    messages::delete_message(&mut tx, message_id)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;
    info!(%message_id, dialog_id = %message.dialog_id, %user_id, "message deleted");
    Ok(())
}

/// Copies the message into one target dialog. `Ok(None)` when the user is not
/// a participant of the target.
async fn forward_to(
    ctx: &MessagingContext,
    user_id: UserId,
    sender_name: &str,
    original: &StoredMessage,
    target: DialogId,
) -> Result<Option<MessageView>, ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    if dialogs::find_participant(&mut tx, target, user_id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Ok(None);
    }

    let now = Utc::now();
    let message = messages::insert_message(
        &mut tx,
        &NewMessage {
            dialog_id: target,
            sender: MessageSender::User(user_id),
            message_type: MessageType::Forward,
            content: &original.content,
            reply_to_id: None,
            forward_from_id: Some(original.message_id),
        },
        now,
    )
    .await
    .map_err(internal)?;
    dialogs::touch_dialog(&mut tx, target, now)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;

    queue_notification(ctx, &message, user_id, sender_name.to_string());
    build_view(ctx, message).await.map(Some)
}

/// Forwards a message into each target dialog the user belongs to. Targets
/// the user cannot access are skipped; a failure on one target is logged and
/// the rest still go through. Returns the last message created, if any.
pub async fn forward_message(
    ctx: &MessagingContext,
    user_id: UserId,
    original_message_id: MessageId,
    target_dialog_ids: &[DialogId],
) -> Result<Option<MessageView>, ApiError> {
    if target_dialog_ids.is_empty() {
        return Err(ApiError::validation("at least one target dialog is required"));
    }

    let (original, sender_name) = {
        let mut conn = ctx.storage.acquire().await.map_err(internal)?;
        let original = find_message(&mut conn, original_message_id).await?;
        ensure_member(&mut conn, original.dialog_id, user_id).await?;
        let sender_name = ViewBuilder::new(ctx).display_name(&mut conn, user_id).await?;
        (original, sender_name)
    };

    let mut last = None;
    let mut seen = std::collections::HashSet::new();
    for target in target_dialog_ids.iter().filter(|id| seen.insert(**id)) {
        match forward_to(ctx, user_id, &sender_name, &original, *target).await {
            Ok(Some(view)) => last = Some(view),
            Ok(None) => {
                debug!(dialog_id = %target, %user_id, "skipping forward target without access");
            }
            Err(error) => {
                warn!(
                    dialog_id = %target,
                    message_id = %original_message_id,
                    %error,
                    "failed to forward message"
                );
            }
        }
    }
    Ok(last)
}

/// Case-insensitive substring search over the most recent
/// `search_scan_limit` messages of the dialog.
pub async fn search_messages(
    ctx: &MessagingContext,
    user_id: UserId,
    dialog_id: DialogId,
    query: &str,
) -> Result<Vec<MessageView>, ApiError> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Err(ApiError::validation("search query is required"));
    }

    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    ensure_member(&mut conn, dialog_id, user_id).await?;
    let scanned = messages::list_dialog_messages(&mut conn, dialog_id, ctx.config.search_scan_limit, None)
        .await
        .map_err(internal)?;
    let matches = scanned
        .into_iter()
        .filter(|m| m.content.to_lowercase().contains(&needle))
        .collect();
    Ok(ViewBuilder::new(ctx).message_views(&mut conn, matches).await)
}

#[cfg(test)]
#[path = "tests/messages_tests.rs"]
mod tests;
