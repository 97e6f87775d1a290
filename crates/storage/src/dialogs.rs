//! Dialog and participant rows.
//!
//! Every function runs on the connection it is handed, which is either a
//! pooled connection or an open transaction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::domain::{CastingId, DialogId, DialogRole, UserId};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::parse_column;

#[derive(Debug, Clone)]
pub struct StoredDialog {
    pub dialog_id: DialogId,
    pub is_group: bool,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub casting_id: Option<CastingId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredParticipant {
    pub dialog_id: DialogId,
    pub user_id: UserId,
    pub role: DialogRole,
    pub is_muted: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub typing_until: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

impl StoredParticipant {
    pub fn is_typing_at(&self, now: DateTime<Utc>) -> bool {
        self.typing_until.is_some_and(|until| until > now)
    }
}

const DIALOG_COLUMNS: &str = "d.id, d.is_group, d.title, d.image_url, d.casting_id, d.created_at, d.updated_at";

const PARTICIPANT_COLUMNS: &str =
    "dialog_id, user_id, role, is_muted, last_seen_at, typing_until, joined_at";

fn dialog_from_row(r: &SqliteRow) -> StoredDialog {
    StoredDialog {
        dialog_id: DialogId(r.get::<i64, _>(0)),
        is_group: r.get::<bool, _>(1),
        title: r.get::<Option<String>, _>(2),
        image_url: r.get::<Option<String>, _>(3),
        casting_id: r.get::<Option<i64>, _>(4).map(CastingId),
        created_at: r.get::<DateTime<Utc>, _>(5),
        updated_at: r.get::<DateTime<Utc>, _>(6),
    }
}

fn participant_from_row(r: &SqliteRow) -> Result<StoredParticipant> {
    Ok(StoredParticipant {
        dialog_id: DialogId(r.get::<i64, _>(0)),
        user_id: UserId(r.get::<i64, _>(1)),
        role: parse_column(&r.get::<String, _>(2), "dialog_participants.role")?,
        is_muted: r.get::<bool, _>(3),
        last_seen_at: r.get::<Option<DateTime<Utc>>, _>(4),
        typing_until: r.get::<Option<DateTime<Utc>>, _>(5),
        joined_at: r.get::<DateTime<Utc>, _>(6),
    })
}

pub async fn insert_dialog(
    conn: &mut SqliteConnection,
    is_group: bool,
    title: Option<&str>,
    image_url: Option<&str>,
    casting_id: Option<CastingId>,
    now: DateTime<Utc>,
) -> Result<DialogId> {
    let rec = sqlx::query(
        "INSERT INTO dialogs (is_group, title, image_url, casting_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(is_group)
    .bind(title)
    .bind(image_url)
    .bind(casting_id.map(|id| id.0))
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(DialogId(rec.get::<i64, _>(0)))
}

pub async fn find_dialog(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
) -> Result<Option<StoredDialog>> {
    let row = sqlx::query(&format!("SELECT {DIALOG_COLUMNS} FROM dialogs d WHERE d.id = ?"))
        .bind(dialog_id.0)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(dialog_from_row))
}

/// Applies the provided fields, leaving `None` fields untouched.
pub async fn update_dialog(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    title: Option<&str>,
    image_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE dialogs
         SET title = COALESCE(?, title), image_url = COALESCE(?, image_url), updated_at = ?
         WHERE id = ?",
    )
    .bind(title)
    .bind(image_url)
    .bind(now)
    .bind(dialog_id.0)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn touch_dialog(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE dialogs SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(dialog_id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Participants, messages, reactions and read receipts go with the dialog
/// through `ON DELETE CASCADE`.
pub async fn delete_dialog(conn: &mut SqliteConnection, dialog_id: DialogId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM dialogs WHERE id = ?")
        .bind(dialog_id.0)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Dialogs the user participates in, most recently active first.
pub async fn list_dialogs_for_user(
    conn: &mut SqliteConnection,
    user_id: UserId,
    limit: u32,
    offset: u32,
) -> Result<Vec<StoredDialog>> {
    let rows = sqlx::query(&format!(
        "SELECT {DIALOG_COLUMNS}
         FROM dialogs d
         INNER JOIN dialog_participants p ON p.dialog_id = d.id
         WHERE p.user_id = ?
         ORDER BY d.updated_at DESC, d.id DESC
         LIMIT ? OFFSET ?"
    ))
    .bind(user_id.0)
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(dialog_from_row).collect())
}

/// The direct (non-group, non-casting) dialog whose only participants are
/// `a` and `b`.
pub async fn find_direct_dialog_between(
    conn: &mut SqliteConnection,
    a: UserId,
    b: UserId,
) -> Result<Option<StoredDialog>> {
    let row = sqlx::query(&format!(
        "SELECT {DIALOG_COLUMNS}
         FROM dialogs d
         WHERE d.is_group = 0
           AND d.casting_id IS NULL
           AND EXISTS (SELECT 1 FROM dialog_participants p WHERE p.dialog_id = d.id AND p.user_id = ?)
           AND EXISTS (SELECT 1 FROM dialog_participants p WHERE p.dialog_id = d.id AND p.user_id = ?)
           AND (SELECT COUNT(*) FROM dialog_participants p WHERE p.dialog_id = d.id) = 2
         ORDER BY d.updated_at DESC, d.id DESC
         LIMIT 1"
    ))
    .bind(a.0)
    .bind(b.0)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(dialog_from_row))
}

/// A dialog already opened for `casting_id` between the two users.
pub async fn find_casting_dialog(
    conn: &mut SqliteConnection,
    casting_id: CastingId,
    a: UserId,
    b: UserId,
) -> Result<Option<StoredDialog>> {
    let row = sqlx::query(&format!(
        "SELECT {DIALOG_COLUMNS}
         FROM dialogs d
         WHERE d.casting_id = ?
           AND EXISTS (SELECT 1 FROM dialog_participants p WHERE p.dialog_id = d.id AND p.user_id = ?)
           AND EXISTS (SELECT 1 FROM dialog_participants p WHERE p.dialog_id = d.id AND p.user_id = ?)
         ORDER BY d.id ASC
         LIMIT 1"
    ))
    .bind(casting_id.0)
    .bind(a.0)
    .bind(b.0)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(dialog_from_row))
}

/// Inserts a participant row. Returns `false` if the user is already a
/// participant; the existing row is left unchanged.
pub async fn insert_participant(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    user_id: UserId,
    role: DialogRole,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO dialog_participants (dialog_id, user_id, role, is_muted, joined_at)
         VALUES (?, ?, ?, 0, ?)
         ON CONFLICT(dialog_id, user_id) DO NOTHING",
    )
    .bind(dialog_id.0)
    .bind(user_id.0)
    .bind(role.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn find_participant(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    user_id: UserId,
) -> Result<Option<StoredParticipant>> {
    let row = sqlx::query(&format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM dialog_participants WHERE dialog_id = ? AND user_id = ?"
    ))
    .bind(dialog_id.0)
    .bind(user_id.0)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(participant_from_row).transpose()
}

/// Participants in join order; the creator (owner) comes first.
pub async fn list_participants(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
) -> Result<Vec<StoredParticipant>> {
    let rows = sqlx::query(&format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM dialog_participants WHERE dialog_id = ? ORDER BY rowid ASC"
    ))
    .bind(dialog_id.0)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(participant_from_row).collect()
}

pub async fn remove_participant(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    user_id: UserId,
) -> Result<bool> {
    let result = sqlx::query("DELETE FROM dialog_participants WHERE dialog_id = ? AND user_id = ?")
        .bind(dialog_id.0)
        .bind(user_id.0)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_participant_role(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    user_id: UserId,
    role: DialogRole,
) -> Result<bool> {
    let result =
        sqlx::query("UPDATE dialog_participants SET role = ? WHERE dialog_id = ? AND user_id = ?")
            .bind(role.as_str())
            .bind(dialog_id.0)
            .bind(user_id.0)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_muted(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    user_id: UserId,
    muted: bool,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE dialog_participants SET is_muted = ? WHERE dialog_id = ? AND user_id = ?",
    )
    .bind(muted)
    .bind(dialog_id.0)
    .bind(user_id.0)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_typing_until(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    user_id: UserId,
    typing_until: Option<DateTime<Utc>>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE dialog_participants SET typing_until = ? WHERE dialog_id = ? AND user_id = ?",
    )
    .bind(typing_until)
    .bind(dialog_id.0)
    .bind(user_id.0)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_last_seen(
    conn: &mut SqliteConnection,
    dialog_id: DialogId,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE dialog_participants SET last_seen_at = ? WHERE dialog_id = ? AND user_id = ?",
    )
    .bind(now)
    .bind(dialog_id.0)
    .bind(user_id.0)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}
