//! Durable outbox of image uploads and deletes awaiting remote confirmation.
//!
//! Every call is a single committed statement, so listings always reflect
//! committed state even while the upload and delete reconcilers run side by side.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{ImageToDelete, ImageToUpload, NewImageToUpload};

#[derive(Clone)]
pub struct OutboxStore {
    pool: SqlitePool,
}

impl OutboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== UPLOAD QUEUE ====================

    /// Queue an image upload and return the stored record.
    pub async fn add_upload(&self, item: &NewImageToUpload) -> Result<ImageToUpload, AppError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO images_to_upload (local_path, remote_path, session, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&item.local_path)
        .bind(&item.remote_path)
        .bind(&item.session)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(ImageToUpload {
            id: result.last_insert_rowid(),
            local_path: item.local_path.clone(),
            remote_path: item.remote_path.clone(),
            session: item.session.clone(),
            created_at: now,
        })
    }

    /// Remove a queued upload. Returns false when it was already gone.
    pub async fn remove_upload(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM images_to_upload WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop every queued upload targeting `remote_path`. Returns how many were removed.
    pub async fn remove_uploads_for(&self, remote_path: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM images_to_upload WHERE remote_path = ?")
            .bind(remote_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// List every queued upload, oldest first.
    pub async fn list_uploads(&self) -> Result<Vec<ImageToUpload>, AppError> {
        let rows = sqlx::query(
            "SELECT id, local_path, remote_path, session, created_at FROM images_to_upload ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ImageToUpload {
                id: row.get("id"),
                local_path: row.get("local_path"),
                remote_path: row.get("remote_path"),
                session: row.get("session"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    // ==================== DELETE QUEUE ====================

    /// Queue a remote object for deletion.
    pub async fn add_delete(&self, remote_path: &str) -> Result<ImageToDelete, AppError> {
        let now = Utc::now().to_rfc3339();
        let result =
            sqlx::query("INSERT INTO images_to_delete (remote_path, created_at) VALUES (?, ?)")
                .bind(remote_path)
                .bind(&now)
                .execute(&self.pool)
                .await?;

        Ok(ImageToDelete {
            id: result.last_insert_rowid(),
            remote_path: remote_path.to_string(),
            created_at: now,
        })
    }

    /// Remove a queued delete. Returns false when it was already gone.
    pub async fn remove_delete(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM images_to_delete WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List every queued delete, oldest first.
    pub async fn list_deletes(&self) -> Result<Vec<ImageToDelete>, AppError> {
        let rows =
            sqlx::query("SELECT id, remote_path, created_at FROM images_to_delete ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .iter()
            .map(|row| ImageToDelete {
                id: row.get("id"),
                remote_path: row.get("remote_path"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
