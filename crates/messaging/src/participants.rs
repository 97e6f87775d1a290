//! Dialog membership, roles and per-user participant state.
//!
//! Every write runs in its own transaction, including the single-row ones.
//! Owner uniqueness is checked here before writing; the schema does not
//! enforce it.

use chrono::Utc;
use shared::{
    domain::{DialogId, DialogRole, UserId},
    error::ApiError,
    protocol::{DialogView, ParticipantView},
};
use storage::dialogs;
use tracing::info;

use crate::{
    access::{ensure_member, ensure_role, MODERATORS, OWNER_ONLY},
    dialogs::{ensure_users_exist, view_for},
    internal,
    views::ViewBuilder,
    MessagingContext,
};

/// Adds users to a dialog as plain members. Users who already belong to the
/// dialog are left as they are. The dialog keeps its `is_group` flag.
pub async fn add_participants(
    ctx: &MessagingContext,
    actor_id: UserId,
    dialog_id: DialogId,
    user_ids: &[UserId],
) -> Result<DialogView, ApiError> {
    if user_ids.is_empty() {
        return Err(ApiError::validation("no participants to add"));
    }

    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_role(&mut tx, dialog_id, actor_id, MODERATORS, "add participants").await?;
    ensure_users_exist(ctx, &mut tx, user_ids).await?;

    let now = Utc::now();
    let mut added = 0usize;
    for user_id in user_ids {
        if dialogs::insert_participant(&mut tx, dialog_id, *user_id, DialogRole::Member, now)
            .await
            .map_err(internal)?
        {
            added += 1;
        }
    }
    tx.commit().await.map_err(internal)?;

    info!(%dialog_id, %actor_id, added, "participants added");
    view_for(ctx, dialog_id, actor_id).await
}

pub async fn remove_participant(
    ctx: &MessagingContext,
    actor_id: UserId,
    dialog_id: DialogId,
    target_id: UserId,
) -> Result<(), ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_role(&mut tx, dialog_id, actor_id, MODERATORS, "remove participants").await?;
    let target = dialogs::find_participant(&mut tx, dialog_id, target_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("participant not found"))?;
    if target.role == DialogRole::Owner {
        return Err(ApiError::access_denied("cannot remove dialog owner"));
    }

    dialogs::remove_participant(&mut tx, dialog_id, target_id)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;
    info!(%dialog_id, %actor_id, %target_id, "participant removed");
    Ok(())
}

/// Switches a participant between `admin` and `member`. Ownership only moves
/// through [`transfer_ownership`].
pub async fn update_participant_role(
    ctx: &MessagingContext,
    actor_id: UserId,
    dialog_id: DialogId,
    target_id: UserId,
    new_role: DialogRole,
) -> Result<(), ApiError> {
    if new_role == DialogRole::Owner {
        return Err(ApiError::validation(
            "use ownership transfer to assign the owner role",
        ));
    }

    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_role(&mut tx, dialog_id, actor_id, OWNER_ONLY, "change participant roles").await?;
    let target = dialogs::find_participant(&mut tx, dialog_id, target_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("participant not found"))?;
    if target.role == DialogRole::Owner {
        return Err(ApiError::validation("cannot change the owner's role"));
    }

    dialogs::set_participant_role(&mut tx, dialog_id, target_id, new_role)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;
    info!(%dialog_id, %target_id, role = new_role.as_str(), "participant role updated");
    Ok(())
}

/// Hands the owner role to another participant. The previous owner stays in
/// the dialog as an admin.
pub async fn transfer_ownership(
    ctx: &MessagingContext,
    actor_id: UserId,
    dialog_id: DialogId,
    target_id: UserId,
) -> Result<(), ApiError> {
    if actor_id == target_id {
        return Err(ApiError::validation("user already owns this dialog"));
    }

    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_role(&mut tx, dialog_id, actor_id, OWNER_ONLY, "transfer ownership").await?;
    dialogs::find_participant(&mut tx, dialog_id, target_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("participant not found"))?;

    dialogs::set_participant_role(&mut tx, dialog_id, actor_id, DialogRole::Admin)
        .await
        .map_err(internal)?;
    dialogs::set_participant_role(&mut tx, dialog_id, target_id, DialogRole::Owner)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;
    info!(%dialog_id, from = %actor_id, to = %target_id, "dialog ownership transferred");
    Ok(())
}

pub async fn mute_dialog(
    ctx: &MessagingContext,
    user_id: UserId,
    dialog_id: DialogId,
    muted: bool,
) -> Result<(), ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_member(&mut tx, dialog_id, user_id).await?;
    dialogs::set_muted(&mut tx, dialog_id, user_id, muted)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)
}

/// Typing state expires on its own `typing_ttl` after the last call.
pub async fn set_typing(
    ctx: &MessagingContext,
    user_id: UserId,
    dialog_id: DialogId,
    typing: bool,
) -> Result<(), ApiError> {
    let typing_until = typing.then(|| Utc::now() + ctx.config.typing_ttl);

    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_member(&mut tx, dialog_id, user_id).await?;
    dialogs::set_typing_until(&mut tx, dialog_id, user_id, typing_until)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)
}

pub async fn update_last_seen(
    ctx: &MessagingContext,
    user_id: UserId,
    dialog_id: DialogId,
) -> Result<(), ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_member(&mut tx, dialog_id, user_id).await?;
    dialogs::set_last_seen(&mut tx, dialog_id, user_id, Utc::now())
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)
}

pub async fn list_participants(
    ctx: &MessagingContext,
    user_id: UserId,
    dialog_id: DialogId,
) -> Result<Vec<ParticipantView>, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    ensure_member(&mut conn, dialog_id, user_id).await?;
    let participants = dialogs::list_participants(&mut conn, dialog_id)
        .await
        .map_err(internal)?;
    ViewBuilder::new(ctx)
        .participant_views(&mut conn, &participants)
        .await
}

#[cfg(test)]
#[path = "tests/participants_tests.rs"]
mod tests;
