//! Boundaries to the services the messaging core consumes but does not own:
//! the user directory, the casting workflow, file uploads and notification
//! delivery.
//!
//! Collaborators that take part in a multi-row write or feed a composite
//! read receive the caller's SQLite connection, so they enlist in whatever
//! transaction the caller has open.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::domain::{CastingId, DialogId, UploadId, UserId};
use sqlx::SqliteConnection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub display_name: String,
    /// Marketplace role (employer, model, ...). Opaque to the messaging core.
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastingRecord {
    pub id: CastingId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub user_id: UserId,
    pub module: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub usage: String,
    pub is_public: bool,
    pub file: UploadFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub upload_id: UploadId,
    pub uploader_id: UserId,
    pub module: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub usage: String,
    pub is_public: bool,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn url(&self) -> String {
        format!("/uploads/{}/{}", self.module, self.storage_key)
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(
        &self,
        conn: &mut SqliteConnection,
        user_id: UserId,
    ) -> anyhow::Result<Option<UserRecord>>;
}

#[async_trait]
pub trait CastingDirectory: Send + Sync {
    async fn find_casting_by_id(
        &self,
        conn: &mut SqliteConnection,
        casting_id: CastingId,
    ) -> anyhow::Result<Option<CastingRecord>>;
}

#[async_trait]
pub trait UploadService: Send + Sync {
    async fn upload(
        &self,
        conn: &mut SqliteConnection,
        request: UploadRequest,
    ) -> anyhow::Result<UploadRecord>;

    async fn get_by_entity(
        &self,
        conn: &mut SqliteConnection,
        entity_type: &str,
        entity_id: i64,
    ) -> anyhow::Result<Vec<UploadRecord>>;

    /// Deletes an upload owned by `user_id`. Fails if the upload is missing or
    /// belongs to someone else.
    async fn delete(
        &self,
        conn: &mut SqliteConnection,
        user_id: UserId,
        upload_id: UploadId,
    ) -> anyhow::Result<()>;

    /// Removes every upload bound to an entity, regardless of uploader.
    async fn delete_by_entity(
        &self,
        conn: &mut SqliteConnection,
        entity_type: &str,
        entity_id: i64,
    ) -> anyhow::Result<u64>;
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn create_new_message_notification(
        &self,
        recipient_id: UserId,
        sender_display_name: &str,
        dialog_id: DialogId,
    ) -> anyhow::Result<()>;
}
