use chrono::Utc;
use shared::{
    domain::{DialogId, UserId},
    error::ApiError,
};
use storage::{dialogs, messages};
use tracing::debug;

use crate::{access::ensure_member, internal, MessagingContext};

/// Records a receipt for every message in the dialog the user has not read
/// yet, skipping their own. Returns the number of new receipts.
pub async fn mark_messages_as_read(
    ctx: &MessagingContext,
    user_id: UserId,
    dialog_id: DialogId,
) -> Result<u64, ApiError> {
    let now = Utc::now();
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    ensure_member(&mut tx, dialog_id, user_id).await?;
    let marked = messages::mark_dialog_read(&mut tx, dialog_id, user_id, now)
        .await
        .map_err(internal)?;
    dialogs::set_last_seen(&mut tx, dialog_id, user_id, now)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;
    debug!(%dialog_id, %user_id, marked, "dialog marked read");
    Ok(marked)
}

pub async fn get_unread_count(
    ctx: &MessagingContext,
    user_id: UserId,
    dialog_id: DialogId,
) -> Result<i64, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    ensure_member(&mut conn, dialog_id, user_id).await?;
    messages::count_unread(&mut conn, dialog_id, user_id)
        .await
        .map_err(internal)
}

/// Unread messages across every dialog the user belongs to.
pub async fn get_total_unread_count(
    ctx: &MessagingContext,
    user_id: UserId,
) -> Result<i64, ApiError> {
    let mut conn = ctx.storage.acquire().await.map_err(internal)?;
    messages::count_unread_total(&mut conn, user_id)
        .await
        .map_err(internal)
}
