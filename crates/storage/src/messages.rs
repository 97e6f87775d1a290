//! Message rows plus the per-message reaction and read-receipt tables.

use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::domain::{
    DialogId, MessageId, MessageSender, MessageStatus, MessageType, UserId,
};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::parse_column;

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub dialog_id: DialogId,
    pub sender: MessageSender,
    pub message_type: MessageType,
    pub content: String,
    pub reply_to_id: Option<MessageId>,
    pub forward_from_id: Option<MessageId>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub dialog_id: DialogId,
    pub sender: MessageSender,
    pub message_type: MessageType,
    pub content: &'a str,
    pub reply_to_id: Option<MessageId>,
    pub forward_from_id: Option<MessageId>,
}

#[derive(Debug, Clone)]
pub struct StoredReaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

const MESSAGE_COLUMNS: &str = "id, dialog_id, sender_user_id, message_type, content, reply_to_id, forward_from_id, status, created_at, updated_at";

fn message_from_row(r: &SqliteRow) -> Result<StoredMessage> {
    Ok(StoredMessage {
        message_id: MessageId(r.get::<i64, _>(0)),
        dialog_id: DialogId(r.get::<i64, _>(1)),
        sender: match r.get::<Option<i64>, _>(2) {
            Some(user_id) => MessageSender::User(UserId(user_id)),
            None => MessageSender::System,
        },
        message_type: parse_column(&r.get::<String, _>(3), "messages.message_type")?,
        content: r.get::<String, _>(4),
        reply_to_id: r.get::<Option<i64>, _>(5).map(MessageId),
        forward_from_id: r.get::<Option<i64>, _>(6).map(MessageId),
        status: parse_column(&r.get::<String, _>(7), "messages.status")?,
        created_at: r.get::<DateTime<Utc>, _>(8),
        updated_at: r.get::<DateTime<Utc>, _>(9),
    })
}

pub async fn insert_message(
    conn: &mut SqliteConnection,
    message: &NewMessage<'_>,
    now: DateTime<Utc>,
) -> Result<StoredMessage> {
    let row = sqlx::query(&format!(
        "INSERT INTO messages (dialog_id, sender_user_id, message_type, content, reply_to_id, forward_from_id, status, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 'sent', ?, ?)
         RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(message.dialog_id.0)
    .bind(message.sender.user_id().map(|id| id.0))
    .bind(message.message_type.as_str())
    .bind(message.content)
    .bind(message.reply_to_id.map(|id| id.0))
    .bind(message.forward_from_id.map(|id| id.0))
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    message_from_row(&row)
}

pub async fn find_message(
    conn: &mut SqliteConnection,
    message_id: MessageId,
) -> Result<Option<StoredMessage>> {
    let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"))
        .bind(message_id.0)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(message_from_row).transpose()
}

/// Newest `limit` messages older than `before`, returned oldest first.
pub async fn list_dialog_messages(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    limit: u32,
    before: Option<MessageId>,
) -> Result<Vec<StoredMessage>> {
    let mut rows = if let Some(before_id) = before {
        sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE dialog_id = ? AND id < ?
             ORDER BY id DESC
             LIMIT ?"
        ))
        .bind(dialog_id.0)
        .bind(before_id.0)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?
    } else {
        sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE dialog_id = ?
             ORDER BY id DESC
             LIMIT ?"
        ))
        .bind(dialog_id.0)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?
    };

    rows.reverse();
    rows.iter().map(message_from_row).collect()
}

pub async fn latest_message(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
) -> Result<Option<StoredMessage>> {
    Ok(list_dialog_messages(conn, dialog_id, 1, None).await?.pop())
}

pub async fn update_message_content(
    conn: &mut SqliteConnection,
    message_id: MessageId,
    content: &str,
    now: DateTime<Utc>,
) -> Result<Option<StoredMessage>> {
    let row = sqlx::query(&format!(
        "UPDATE messages SET content = ?, status = 'edited', updated_at = ?
         WHERE id = ?
         RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(content)
    .bind(now)
    .bind(message_id.0)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(message_from_row).transpose()
}

pub async fn delete_message(conn: &mut SqliteConnection, message_id: MessageId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM messages WHERE id = ?")
        .bind(message_id.0)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_message_ids_for_dialog(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
) -> Result<Vec<MessageId>> {
    let rows = sqlx::query("SELECT id FROM messages WHERE dialog_id = ? ORDER BY id ASC")
        .bind(dialog_id.0)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| MessageId(r.get::<i64, _>(0)))
        .collect())
}

/// Sets the user's reaction on a message, replacing any previous emoji.
pub async fn upsert_reaction(
    conn: &mut SqliteConnection,
    message_id: MessageId,
    user_id: UserId,
    emoji: &str,
    now: DateTime<Utc>,
) -> Result<StoredReaction> {
    let row = sqlx::query(
        "INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(message_id, user_id) DO UPDATE SET emoji = excluded.emoji, created_at = excluded.created_at
         RETURNING message_id, user_id, emoji, created_at",
    )
    .bind(message_id.0)
    .bind(user_id.0)
    .bind(emoji)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(StoredReaction {
        message_id: MessageId(row.get::<i64, _>(0)),
        user_id: UserId(row.get::<i64, _>(1)),
        emoji: row.get::<String, _>(2),
        created_at: row.get::<DateTime<Utc>, _>(3),
    })
}

pub async fn delete_reaction(
    conn: &mut SqliteConnection,
    message_id: MessageId,
    user_id: UserId,
) -> Result<bool> {
    let result = sqlx::query("DELETE FROM message_reactions WHERE message_id = ? AND user_id = ?")
        .bind(message_id.0)
        .bind(user_id.0)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_reactions(
    conn: &mut SqliteConnection,
    message_id: MessageId,
) -> Result<Vec<StoredReaction>> {
    let rows = sqlx::query(
        "SELECT message_id, user_id, emoji, created_at
         FROM message_reactions
         WHERE message_id = ?
         ORDER BY created_at ASC, user_id ASC",
    )
    .bind(message_id.0)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| StoredReaction {
            message_id: MessageId(r.get::<i64, _>(0)),
            user_id: UserId(r.get::<i64, _>(1)),
            emoji: r.get::<String, _>(2),
            created_at: r.get::<DateTime<Utc>, _>(3),
        })
        .collect())
}

/// Records a receipt for every message in the dialog the user did not send
/// and has not read yet. Returns the number of receipts written.
pub async fn mark_dialog_read(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO read_receipts (message_id, user_id, read_at)
         SELECT m.id, ?, ?
         FROM messages m
         WHERE m.dialog_id = ? AND (m.sender_user_id IS NULL OR m.sender_user_id <> ?)",
    )
    .bind(user_id.0)
    .bind(now)
    .bind(dialog_id.0)
    .bind(user_id.0)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn count_unread(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    user_id: UserId,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)
         FROM messages m
         WHERE m.dialog_id = ?
           AND (m.sender_user_id IS NULL OR m.sender_user_id <> ?)
           AND NOT EXISTS (
               SELECT 1 FROM read_receipts r WHERE r.message_id = m.id AND r.user_id = ?
           )",
    )
    .bind(dialog_id.0)
    .bind(user_id.0)
    .bind(user_id.0)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// Unread messages across every dialog the user participates in.
pub async fn count_unread_total(conn: &mut SqliteConnection, user_id: UserId) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)
         FROM messages m
         INNER JOIN dialog_participants p ON p.dialog_id = m.dialog_id AND p.user_id = ?
         WHERE (m.sender_user_id IS NULL OR m.sender_user_id <> ?)
           AND NOT EXISTS (
               SELECT 1 FROM read_receipts r WHERE r.message_id = m.id AND r.user_id = ?
           )",
    )
    .bind(user_id.0)
    .bind(user_id.0)
    .bind(user_id.0)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

pub async fn list_readers(
    conn: &mut SqliteConnection,
    message_id: MessageId,
) -> Result<Vec<UserId>> {
    let rows = sqlx::query(
        "SELECT user_id FROM read_receipts WHERE message_id = ? ORDER BY read_at ASC, user_id ASC",
    )
    .bind(message_id.0)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| UserId(r.get::<i64, _>(0)))
        .collect())
}
