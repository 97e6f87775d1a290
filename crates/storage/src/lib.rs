use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use integrations::{
    CastingDirectory, CastingRecord, NotificationService, UserDirectory, UserRecord,
};
use sqlx::{
    pool::PoolConnection,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite, SqliteConnection, Transaction,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use shared::domain::{CastingId, DialogId, UserId};

pub mod dialogs;
pub mod messages;
pub mod notifications;
pub mod uploads;

pub use dialogs::{StoredDialog, StoredParticipant};
pub use messages::{NewMessage, StoredMessage, StoredReaction};
pub use notifications::StoredNotification;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Opens a write transaction with `BEGIN IMMEDIATE`. Concurrent writers
    /// wait on the busy timeout. Dropping it without `commit` rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("failed to begin transaction")
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .context("failed to acquire sqlite connection")
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, display_name: &str, role: &str) -> Result<UserId> {
        let rec = sqlx::query("INSERT INTO users (display_name, role) VALUES (?, ?) RETURNING id")
            .bind(display_name)
            .bind(role)
            .fetch_one(&self.pool)
            .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn delete_user(&self, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_casting(
        &self,
        title: &str,
        employer_user_id: Option<UserId>,
    ) -> Result<CastingId> {
        let rec =
            sqlx::query("INSERT INTO castings (title, employer_user_id) VALUES (?, ?) RETURNING id")
                .bind(title)
                .bind(employer_user_id.map(|id| id.0))
                .fetch_one(&self.pool)
                .await?;
        Ok(CastingId(rec.get::<i64, _>(0)))
    }
}

pub async fn find_user(conn: &mut SqliteConnection, user_id: UserId) -> Result<Option<UserRecord>> {
    let row = sqlx::query("SELECT id, display_name, role FROM users WHERE id = ?")
        .bind(user_id.0)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| UserRecord {
        id: UserId(r.get::<i64, _>(0)),
        display_name: r.get::<String, _>(1),
        role: r.get::<String, _>(2),
    }))
}

pub async fn find_casting(
    conn: &mut SqliteConnection,
    casting_id: CastingId,
) -> Result<Option<CastingRecord>> {
    let row = sqlx::query("SELECT id, title FROM castings WHERE id = ?")
        .bind(casting_id.0)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| CastingRecord {
        id: CastingId(r.get::<i64, _>(0)),
        title: r.get::<String, _>(1),
    }))
}

#[async_trait]
impl UserDirectory for Storage {
    async fn find_by_id(
        &self,
        conn: &mut SqliteConnection,
        user_id: UserId,
    ) -> Result<Option<UserRecord>> {
        find_user(conn, user_id).await
    }
}

#[async_trait]
impl CastingDirectory for Storage {
    async fn find_casting_by_id(
        &self,
        conn: &mut SqliteConnection,
        casting_id: CastingId,
    ) -> Result<Option<CastingRecord>> {
        find_casting(conn, casting_id).await
    }
}

#[async_trait]
impl NotificationService for Storage {
    async fn create_new_message_notification(
        &self,
        recipient_id: UserId,
        sender_display_name: &str,
        dialog_id: DialogId,
    ) -> Result<()> {
        let mut conn = self.acquire().await?;
        notifications::insert_notification(
            &mut conn,
            recipient_id,
            notifications::NEW_MESSAGE_KIND,
            &format!("New message from {sender_display_name}"),
            Some(dialog_id),
            Utc::now(),
        )
        .await?;
        Ok(())
    }
}

/// Parses an enum column, reporting the offending value on failure.
pub(crate) fn parse_column<T>(value: &str, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid value in column {column}: {err}"))
}

/// Creates the directory that will hold an on-disk SQLite database.
pub fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
