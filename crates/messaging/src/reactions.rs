use chrono::Utc;
use shared::{
    domain::{MessageId, UserId},
    error::ApiError,
    protocol::ReactionView,
};
use sqlx::SqliteConnection;
use storage::{messages, StoredMessage};

use crate::{access::ensure_member, internal, views::ViewBuilder, MessagingContext};

const MAX_EMOJI_CHARS: usize = 16;

async fn readable_message(
    conn: &mut SqliteConnection,
    user_id: UserId,
    message_id: MessageId,
) -> Result<StoredMessage, ApiError> {
    let message = messages::find_message(conn, message_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("message not found"))?;
    ensure_member(conn, message.dialog_id, user_id).await?;
    Ok(message)
}

/// Sets the user's reaction on a message, replacing any earlier one.
pub async fn add_reaction(
    ctx: &MessagingContext,
    user_id: UserId,
    message_id: MessageId,
    emoji: &str,
) -> Result<ReactionView, ApiError> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(ApiError::validation("emoji is required"));
    }
    if emoji.chars().count() > MAX_EMOJI_CHARS {
        return Err(ApiError::validation("emoji is too long"));
    }

    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    readable_message(&mut tx, user_id, message_id).await?;
    let reaction = messages::upsert_reaction(&mut tx, message_id, user_id, emoji, Utc::now())
        .await
        .map_err(internal)?;
    let user_name = ViewBuilder::new(ctx).display_name(&mut tx, user_id).await?;
    tx.commit().await.map_err(internal)?;

    Ok(ReactionView {
        user_id: reaction.user_id,
        user_name,
        emoji: reaction.emoji,
        created_at: reaction.created_at,
    })
}

pub async fn remove_reaction(
    ctx: &MessagingContext,
    user_id: UserId,
    message_id: MessageId,
) -> Result<(), ApiError> {
    let mut tx = ctx.storage.begin().await.map_err(internal)?;
    readable_message(&mut tx, user_id, message_id).await?;
    let removed = messages::delete_reaction(&mut tx, message_id, user_id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err(ApiError::not_found("reaction not found"));
    }
    tx.commit().await.map_err(internal)
}
