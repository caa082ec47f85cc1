//! Key-value preferences stored alongside the outbox.

use sqlx::{Row, SqlitePool};

use crate::errors::AppError;

#[derive(Clone)]
pub struct PreferencesStore {
    pool: SqlitePool,
}

impl PreferencesStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT value FROM preferences WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn put(&self, key: &str, value: String) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO preferences (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> Result<bool, AppError> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    pub async fn save_bool(&self, key: &str, value: bool) -> Result<(), AppError> {
        self.put(key, value.to_string()).await
    }

    pub async fn get_u32(&self, key: &str, default: u32) -> Result<u32, AppError> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    pub async fn save_u32(&self, key: &str, value: u32) -> Result<(), AppError> {
        self.put(key, value.to_string()).await
    }
}
