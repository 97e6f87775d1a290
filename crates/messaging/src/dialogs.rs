use std::collections::HashSet;

use chrono::Utc;
use shared::{
    domain::{CastingId, DialogId, DialogRole, MessageId, UserId},
    error::ApiError,
    protocol::{DialogView, DialogWithMessages},
};
use sqlx::SqliteConnection;
use storage::{dialogs, messages};
use tracing::{info, warn};

use crate::{
    access::{ensure_member, ensure_role, MODERATORS, OWNER_ONLY},
    attachments, internal,
    messages::post_system_message,
    views::ViewBuilder,
    MessagingContext,
};

#[derive(Debug, Clone, Default)]
pub struct CreateDialogRequest {
    pub participant_ids: Vec<UserId>,
    pub is_group: bool,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub casting_id: Option<CastingId>,
}

#[derive(Debug, Clone, Default)]
pub struct DialogUpdate {
    pub title: Option<String>,
    pub image_url: Option<String>,
}

/// Creator first, then the requested participants in order, without repeats.
fn dedup_participants(creator: UserId, requested: &[UserId]) -> Vec<UserId> {
    let mut seen = HashSet::new();
    std::iter::once(creator)
        .chain(requested.iter().copied())
        .filter(|id| seen.insert(*id))
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) async fn ensure_users_exist(
    ctx: &MessagingContext,
    conn: &mut SqliteConnection,
    user_ids: &[UserId],
) -> Result<(), ApiError> {
    for user_id in user_ids {
        let found = ctx.users.find_by_id(conn, *user_id).await.map_err(internal)?;
        if found.is_none() {
            return Err(ApiError::not_found(format!("user {user_id} not found")));
        }
    }
    Ok(())
}

/// Inserts the dialog row and one participant row per user on `conn`. The
/// first user becomes the owner.
async fn insert_dialog_with_participants(
    conn: &mut SqliteConnection,
    members: &[UserId],
    is_group: bool,
    title: Option<&str>,
    image_url: Option<&str>,
    casting_id: Option<CastingId>,
) -> Result<DialogId, ApiError> {
    let now = Utc::now();
    let dialog_id = dialogs::insert_dialog(conn, is_group, title, image_url, casting_id, now)
        .await
        .map_err(internal)?;
    for (index, user_id) in members.iter().enumerate() {
        let role = if index == 0 {
            DialogRole::Owner
        } else {
            DialogRole::Member
        };
        dialogs::insert_participant(conn, dialog_id, *user_id, role, now)
            .await
            .map_err(internal)?;
    }
    Ok(dialog_id)
}

pub(crate) async fn view_for(
    ctx: &MessagingContext,
    dialog_id: DialogId,
    viewer: UserId,
) -> Result<DialogView, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    let dialog = dialogs::find_dialog(&mut conn, dialog_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("dialog not found"))?;
    ViewBuilder::new(ctx)
        .dialog_view(&mut conn, &dialog, viewer)
        .await
}

pub async fn create_dialog(
    ctx: &MessagingContext,
    creator_id: UserId,
    request: CreateDialogRequest,
) -> Result<DialogView, ApiError> {
    let members = dedup_participants(creator_id, &request.participant_ids);
    {
        let mut conn = ctx.storage.acquire().await.map_err(internal)?;
        ensure_users_exist(ctx, &mut conn, &members).await?;
    }

    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    let dialog_id = insert_dialog_with_participants(
        &mut tx,
        &members,
        request.is_group,
        non_blank(request.title.as_deref()),
        non_blank(request.image_url.as_deref()),
        request.casting_id,
    )
    .await?;
    tx.commit().await.map_err(internal)?;

    info!(%dialog_id, %creator_id, participants = members.len(), "dialog created");
    view_for(ctx, dialog_id, creator_id).await
}

/// Opens (or reuses) the employer/model chat for a casting and greets it
/// with a system message. The greeting is best-effort.
pub async fn create_casting_dialog(
    ctx: &MessagingContext,
    casting_id: CastingId,
    employer_id: UserId,
    model_id: UserId,
) -> Result<DialogView, ApiError> {
    if employer_id == model_id {
        return Err(ApiError::validation(
            "casting dialog needs two distinct participants",
        ));
    }

    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    let casting = ctx
        .castings
        .find_casting_by_id(&mut tx, casting_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("casting {casting_id} not found")))?;
    ensure_users_exist(ctx, &mut tx, &[employer_id, model_id]).await?;

    // Reuse check runs under the write lock.
    if let Some(existing) = dialogs::find_casting_dialog(&mut tx, casting_id, employer_id, model_id)
        .await
        .map_err(internal)?
    {
        tx.rollback().await.map_err(internal)?;
        return view_for(ctx, existing.dialog_id, employer_id).await;
    }

    let dialog_id = insert_dialog_with_participants(
        &mut tx,
        &[employer_id, model_id],
        false,
        non_blank(Some(casting.title.as_str())),
        None,
        Some(casting_id),
    )
    .await?;
    tx.commit().await.map_err(internal)?;
    info!(%dialog_id, %casting_id, "casting dialog created");

    let greeting = format!("Chat created for casting '{}'", casting.title);
    if let Err(error) = post_system_message(ctx, dialog_id, &greeting).await {
        warn!(%dialog_id, %casting_id, %error, "failed to post casting greeting");
    }

    view_for(ctx, dialog_id, employer_id).await
}

pub async fn get_dialog(
    ctx: &MessagingContext,
    user_id: UserId,
    dialog_id: DialogId,
) -> Result<DialogView, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    ensure_member(&mut conn, dialog_id, user_id).await?;
    let dialog = dialogs::find_dialog(&mut conn, dialog_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("dialog not found"))?;
    ViewBuilder::new(ctx)
        .dialog_view(&mut conn, &dialog, user_id)
        .await
}

/// Dialogs the user belongs to, most recently active first. A dialog whose
/// view cannot be built is left out of the page.
pub async fn get_user_dialogs(
    ctx: &MessagingContext,
    user_id: UserId,
    limit: Option<u32>,
    offset: u32,
) -> Result<Vec<DialogView>, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    let stored = dialogs::list_dialogs_for_user(&mut conn, user_id, ctx.config.page_size(limit), offset)
        .await
        .map_err(internal)?;

    let mut builder = ViewBuilder::new(ctx);
    let mut views = Vec::with_capacity(stored.len());
    for dialog in &stored {
        match builder.dialog_view(&mut conn, dialog, user_id).await {
            Ok(view) => views.push(view),
            Err(error) => {
                warn!(dialog_id = %dialog.dialog_id, %user_id, %error, "skipping dialog that failed to build");
            }
        }
    }
    Ok(views)
}

pub async fn get_dialog_between_users(
    ctx: &MessagingContext,
    user_id: UserId,
    other_user_id: UserId,
) -> Result<DialogView, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    let dialog = dialogs::find_direct_dialog_between(&mut conn, user_id, other_user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("no direct dialog between these users"))?;
    ViewBuilder::new(ctx)
        .dialog_view(&mut conn, &dialog, user_id)
        .await
}

/// Dialog view plus a page of messages. Marks the dialog read for the caller
/// on the same transaction that loads the page.
pub async fn get_dialog_with_messages(
    ctx: &MessagingContext,
    user_id: UserId,
    dialog_id: DialogId,
    limit: Option<u32>,
    before: Option<MessageId>,
) -> Result<DialogWithMessages, ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_member(&mut tx, dialog_id, user_id).await?;
    let dialog = dialogs::find_dialog(&mut tx, dialog_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("dialog not found"))?;

    let page = messages::list_dialog_messages(&mut tx, dialog_id, ctx.config.page_size(limit), before)
        .await
        .map_err(internal)?;
    let now = Utc::now();
    messages::mark_dialog_read(&mut tx, dialog_id, user_id, now)
        .await
        .map_err(internal)?;
    dialogs::set_last_seen(&mut tx, dialog_id, user_id, now)
        .await
        .map_err(internal)?;

    let mut builder = ViewBuilder::new(ctx);
    let dialog_view = builder.dialog_view(&mut tx, &dialog, user_id).await?;
    let message_views = builder.message_views(&mut tx, page).await;
    tx.commit().await.map_err(internal)?;

    Ok(DialogWithMessages {
        dialog: dialog_view,
        messages: message_views,
    })
}

pub async fn update_dialog(
    ctx: &MessagingContext,
    actor_id: UserId,
    dialog_id: DialogId,
    update: DialogUpdate,
) -> Result<DialogView, ApiError> {
    let title = non_blank(update.title.as_deref());
    let image_url = non_blank(update.image_url.as_deref());
    if title.is_none() && image_url.is_none() {
        return Err(ApiError::validation("nothing to update"));
    }

    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_role(&mut tx, dialog_id, actor_id, MODERATORS, "update dialog").await?;
    dialogs::update_dialog(&mut tx, dialog_id, title, image_url, Utc::now())
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;

    view_for(ctx, dialog_id, actor_id).await
}

/// Removes the dialog with its participants, messages, reactions, read
/// receipts and message attachments.
pub async fn delete_dialog(
    ctx: &MessagingContext,
    actor_id: UserId,
    dialog_id: DialogId,
) -> Result<(), ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_role(&mut tx, dialog_id, actor_id, OWNER_ONLY, "delete dialog").await?;

    let message_ids = messages::list_message_ids_for_dialog(&mut tx, dialog_id)
        .await
        .map_err(internal)?;
    for message_id in &message_ids {
        attachments::remove_attachments(ctx, &mut tx, *message_id).await?;
    }
    dialogs::delete_dialog(&mut tx, dialog_id)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;

    info!(%dialog_id, %actor_id, messages = message_ids.len(), "dialog deleted");
    Ok(())
}

/// Self-removal. The owner has to hand ownership over first so the dialog
/// always keeps exactly one owner.
pub async fn leave_dialog(
    ctx: &MessagingContext,
    user_id: UserId,
    dialog_id: DialogId,
) -> Result<(), ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    let participant = ensure_member(&mut tx, dialog_id, user_id).await?;
    if participant.role == DialogRole::Owner {
        return Err(ApiError::validation(
            "dialog owner must transfer ownership before leaving",
        ));
    }
    dialogs::remove_participant(&mut tx, dialog_id, user_id)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;
    info!(%dialog_id, %user_id, "participant left dialog");
    Ok(())
}

#[cfg(test)]
#[path = "tests/dialogs_tests.rs"]
mod tests;
