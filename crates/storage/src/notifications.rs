use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::domain::{DialogId, NotificationId, UserId};
use sqlx::{Row, SqliteConnection};

pub const NEW_MESSAGE_KIND: &str = "new_message";

#[derive(Debug, Clone)]
pub struct StoredNotification {
    pub notification_id: NotificationId,
    pub recipient_id: UserId,
    pub kind: String,
    pub title: String,
    pub dialog_id: Option<DialogId>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

pub async fn insert_notification(
    conn: &mut SqliteConnection,
    recipient_id: UserId,
    kind: &str,
    title: &str,
    dialog_id: Option<DialogId>,
    now: DateTime<Utc>,
) -> Result<NotificationId> {
    let rec = sqlx::query(
        "INSERT INTO notifications (recipient_user_id, kind, title, dialog_id, created_at)
         VALUES (?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(recipient_id.0)
    .bind(kind)
    .bind(title)
    .bind(dialog_id.map(|id| id.0))
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(NotificationId(rec.get::<i64, _>(0)))
}

pub async fn list_notifications_for_user(
    conn: &mut SqliteConnection,
    recipient_id: UserId,
    limit: u32,
) -> Result<Vec<StoredNotification>> {
    let rows = sqlx::query(
        "SELECT id, recipient_user_id, kind, title, dialog_id, created_at, read_at
         FROM notifications
         WHERE recipient_user_id = ?
         ORDER BY id DESC
         LIMIT ?",
    )
    .bind(recipient_id.0)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| StoredNotification {
            notification_id: NotificationId(r.get::<i64, _>(0)),
            recipient_id: UserId(r.get::<i64, _>(1)),
            kind: r.get::<String, _>(2),
            title: r.get::<String, _>(3),
            dialog_id: r.get::<Option<i64>, _>(4).map(DialogId),
            created_at: r.get::<DateTime<Utc>, _>(5),
            read_at: r.get::<Option<DateTime<Utc>>, _>(6),
        })
        .collect())
}
