use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use integrations::{UploadRecord, UploadRequest, UploadService};
use shared::domain::{UploadId, UserId};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;

use crate::Storage;

const UPLOAD_COLUMNS: &str = "id, uploader_user_id, module, entity_type, entity_id, usage, is_public, filename, mime_type, size_bytes, storage_key, created_at";

fn upload_from_row(r: &SqliteRow) -> UploadRecord {
    UploadRecord {
        upload_id: UploadId(r.get::<i64, _>(0)),
        uploader_id: UserId(r.get::<i64, _>(1)),
        module: r.get::<String, _>(2),
        entity_type: r.get::<String, _>(3),
        entity_id: r.get::<i64, _>(4),
        usage: r.get::<String, _>(5),
        is_public: r.get::<bool, _>(6),
        filename: r.get::<String, _>(7),
        mime_type: r.get::<Option<String>, _>(8),
        size_bytes: r.get::<i64, _>(9).max(0) as u64,
        storage_key: r.get::<String, _>(10),
        created_at: r.get::<DateTime<Utc>, _>(11),
    }
}

#[async_trait]
impl UploadService for Storage {
    async fn upload(
        &self,
        conn: &mut SqliteConnection,
        request: UploadRequest,
    ) -> Result<UploadRecord> {
        let size_bytes = i64::try_from(request.file.bytes.len()).unwrap_or(i64::MAX);
        let storage_key = Uuid::new_v4().to_string();
        let row = sqlx::query(&format!(
            "INSERT INTO uploads (uploader_user_id, module, entity_type, entity_id, usage, is_public, filename, mime_type, size_bytes, storage_key, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {UPLOAD_COLUMNS}"
        ))
        .bind(request.user_id.0)
        .bind(&request.module)
        .bind(&request.entity_type)
        .bind(request.entity_id)
        .bind(&request.usage)
        .bind(request.is_public)
        .bind(&request.file.filename)
        .bind(request.file.mime_type.as_deref())
        .bind(size_bytes)
        .bind(&storage_key)
        .bind(&request.file.bytes)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await?;
        Ok(upload_from_row(&row))
    }

    async fn get_by_entity(
        &self,
        conn: &mut SqliteConnection,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<Vec<UploadRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE entity_type = ? AND entity_id = ? ORDER BY id ASC"
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows.iter().map(upload_from_row).collect())
    }

    async fn delete(
        &self,
        conn: &mut SqliteConnection,
        user_id: UserId,
        upload_id: UploadId,
    ) -> Result<()> {
        let owner: Option<i64> =
            sqlx::query_scalar("SELECT uploader_user_id FROM uploads WHERE id = ?")
                .bind(upload_id.0)
                .fetch_optional(&mut *conn)
                .await?;
        match owner {
            None => bail!("upload {upload_id} not found"),
            Some(owner) if owner != user_id.0 => {
                bail!("upload {upload_id} does not belong to user {user_id}")
            }
            Some(_) => {}
        }

        sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(upload_id.0)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn delete_by_entity(
        &self,
        conn: &mut SqliteConnection,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM uploads WHERE entity_type = ? AND entity_id = ?")
            .bind(entity_type)
            .bind(entity_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}
