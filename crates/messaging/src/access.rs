//! Membership and role checks shared by every operation.
//!
//! A caller who is not a participant gets `AccessDenied` whether or not the
//! dialog exists.

use shared::{
    domain::{DialogId, DialogRole, UserId},
    error::ApiError,
};
use sqlx::SqliteConnection;
use storage::{dialogs, StoredParticipant};

use crate::{internal, MessagingContext};

pub async fn is_member(
    ctx: &MessagingContext,
    dialog_id: DialogId,
    user_id: UserId,
) -> Result<bool, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    let participant = dialogs::find_participant(&mut conn, dialog_id, user_id)
        .await
        .map_err(internal)?;
    Ok(participant.is_some())
}

pub async fn get_participant(
    ctx: &MessagingContext,
    dialog_id: DialogId,
    user_id: UserId,
) -> Result<StoredParticipant, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    dialogs::find_participant(&mut conn, dialog_id, user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("participant not found"))
}

pub(crate) async fn ensure_member(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    user_id: UserId,
) -> Result<StoredParticipant, ApiError> {
    dialogs::find_participant(conn, dialog_id, user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::access_denied("user is not a participant of this dialog"))
}

/// Membership plus one of `allowed` roles.
pub(crate) async fn ensure_role(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    user_id: UserId,
    allowed: &[DialogRole],
    action: &str,
) -> Result<StoredParticipant, ApiError> {
    let participant = ensure_member(conn, dialog_id, user_id).await?;
    if !allowed.contains(&participant.role) {
        return Err(ApiError::access_denied(format!(
            "insufficient role to {action}"
        )));
    }
    Ok(participant)
}

pub(crate) const MODERATORS: &[DialogRole] = &[DialogRole::Owner, DialogRole::Admin];
pub(crate) const OWNER_ONLY: &[DialogRole] = &[DialogRole::Owner];
