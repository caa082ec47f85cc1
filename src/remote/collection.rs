//! SQLite-backed diary collection with live queries.
//!
//! Writes are committed to SQLite, mirrored into the search index and then
//! announced on a broadcast channel; every open stream re-runs its query
//! after each announcement.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use futures::StreamExt;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::{DiarySource, DiaryStream};
use crate::errors::AppError;
use crate::models::{group_by_day, DiaryEntry, DiaryGroups};
use crate::search::SearchIndex;

/// Upper bound on text matches considered for one listing.
const TEXT_MATCH_LIMIT: usize = 1_000;

const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
enum DiaryQuery {
    All,
    Day(NaiveDate),
    Text(String),
}

#[derive(Clone)]
pub struct SqliteDiaryCollection {
    pool: SqlitePool,
    search: Arc<SearchIndex>,
    offset: FixedOffset,
    changes: broadcast::Sender<()>,
}

impl SqliteDiaryCollection {
    pub fn new(pool: SqlitePool, search: Arc<SearchIndex>, offset: FixedOffset) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            pool,
            search,
            offset,
            changes,
        }
    }

    /// Rebuild the search index from every stored entry.
    pub async fn reindex(&self) -> Result<usize, AppError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, title, description, images, date_ms FROM diaries",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(remote_error)?;
        // Unreadable rows are logged by diary_from_row and left out of the index.
        let entries: Vec<DiaryEntry> = rows
            .iter()
            .filter_map(|row| diary_from_row(row).ok())
            .collect();
        self.search.rebuild(&entries).await?;
        Ok(entries.len())
    }

    fn notify(&self) {
        // No receivers just means no open listings.
        let _ = self.changes.send(());
    }

    fn live(&self, owner_id: &str, query: DiaryQuery) -> DiaryStream {
        // Subscribe before the first fetch so no change between the two is lost.
        let state = (
            self.clone(),
            owner_id.to_string(),
            query,
            self.changes.subscribe(),
            true,
        );

        futures::stream::unfold(state, |(this, owner, query, mut rx, first)| async move {
            if !first {
                match rx.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return None,
                }
                // Coalesce a burst of writes into one re-query.
                loop {
                    match rx.try_recv() {
                        Ok(()) | Err(TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
            }
            let snapshot = this.fetch(&owner, &query).await;
            Some((snapshot, (this, owner, query, rx, false)))
        })
        .boxed()
    }

    async fn fetch(&self, owner_id: &str, query: &DiaryQuery) -> Result<DiaryGroups, AppError> {
        let rows = match query {
            DiaryQuery::All => sqlx::query(
                "SELECT id, owner_id, title, description, images, date_ms FROM diaries WHERE owner_id = ?",
            )
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(remote_error)?,
            DiaryQuery::Day(day) => {
                let (start, end) = day_bounds(*day, self.offset);
                sqlx::query(
                    "SELECT id, owner_id, title, description, images, date_ms FROM diaries WHERE owner_id = ? AND date_ms >= ? AND date_ms < ?",
                )
                .bind(owner_id)
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await
                .map_err(remote_error)?
            }
            DiaryQuery::Text(text) => {
                let ids = self.search.search(owner_id, text, TEXT_MATCH_LIMIT)?;
                if ids.is_empty() {
                    return Ok(DiaryGroups::new());
                }

                let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                    "SELECT id, owner_id, title, description, images, date_ms FROM diaries WHERE owner_id = ",
                );
                builder.push_bind(owner_id);
                builder.push(" AND id IN (");
                let mut separated = builder.separated(", ");
                for id in &ids {
                    separated.push_bind(id);
                }
                separated.push_unseparated(")");

                builder
                    .build()
                    .fetch_all(&self.pool)
                    .await
                    .map_err(remote_error)?
            }
        };

        let entries = rows
            .iter()
            .map(diary_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(group_by_day(entries, self.offset))
    }

    async fn fetch_owner_entries(&self, owner_id: &str) -> Result<Vec<DiaryEntry>, AppError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, title, description, images, date_ms FROM diaries WHERE owner_id = ?",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(remote_error)?;
        rows.iter().map(diary_from_row).collect()
    }
}

#[async_trait]
impl DiarySource for SqliteDiaryCollection {
    fn subscribe_all(&self, owner_id: &str) -> DiaryStream {
        self.live(owner_id, DiaryQuery::All)
    }

    fn subscribe_by_date(&self, owner_id: &str, day: NaiveDate) -> DiaryStream {
        self.live(owner_id, DiaryQuery::Day(day))
    }

    fn subscribe_by_text(&self, owner_id: &str, text: &str) -> DiaryStream {
        self.live(owner_id, DiaryQuery::Text(text.to_string()))
    }

    async fn get_diary(&self, owner_id: &str, id: &str) -> Result<Option<DiaryEntry>, AppError> {
        let row = sqlx::query(
            "SELECT id, owner_id, title, description, images, date_ms FROM diaries WHERE id = ? AND owner_id = ?",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(remote_error)?;

        row.as_ref().map(diary_from_row).transpose()
    }

    async fn insert(&self, entry: &DiaryEntry) -> Result<DiaryEntry, AppError> {
        sqlx::query(
            "INSERT INTO diaries (id, owner_id, title, description, images, date_ms) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.owner_id)
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(serde_json::to_string(&entry.images)?)
        .bind(entry.date.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(remote_error)?;

        self.search.index_diary(entry).await?;
        self.notify();
        Ok(entry.clone())
    }

    async fn update(&self, entry: &DiaryEntry) -> Result<DiaryEntry, AppError> {
        let result = sqlx::query(
            "UPDATE diaries SET title = ?, description = ?, images = ?, date_ms = ? WHERE id = ? AND owner_id = ?",
        )
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(serde_json::to_string(&entry.images)?)
        .bind(entry.date.timestamp_millis())
        .bind(&entry.id)
        .bind(&entry.owner_id)
        .execute(&self.pool)
        .await
        .map_err(remote_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Diary {} not found", entry.id)));
        }

        self.search.index_diary(entry).await?;
        self.notify();
        Ok(entry.clone())
    }

    async fn delete(&self, owner_id: &str, id: &str) -> Result<DiaryEntry, AppError> {
        let existing = self
            .get_diary(owner_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Diary {} not found", id)))?;

        sqlx::query("DELETE FROM diaries WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(remote_error)?;

        self.search.remove_diary(id).await?;
        self.notify();
        Ok(existing)
    }

    async fn delete_all(&self, owner_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM diaries WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(remote_error)?;

        self.search.remove_owner(owner_id).await?;
        self.notify();
        Ok(result.rows_affected())
    }

    async fn transfer_ownership(&self, from_owner: &str, to_owner: &str) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE diaries SET owner_id = ? WHERE owner_id = ?")
            .bind(to_owner)
            .bind(from_owner)
            .execute(&self.pool)
            .await
            .map_err(remote_error)?;

        self.search.remove_owner(from_owner).await?;
        for entry in self.fetch_owner_entries(to_owner).await? {
            self.search.index_diary(&entry).await?;
        }
        self.notify();
        Ok(result.rows_affected())
    }
}

/// Start (inclusive) and end (exclusive) of `day` in `offset`, as UTC millis.
fn day_bounds(day: NaiveDate, offset: FixedOffset) -> (i64, i64) {
    let local_midnight = day.and_time(NaiveTime::MIN);
    let start = (local_midnight - Duration::seconds(offset.local_minus_utc() as i64)).and_utc();
    let end = start + Duration::days(1);
    (start.timestamp_millis(), end.timestamp_millis())
}

fn remote_error(err: sqlx::Error) -> AppError {
    tracing::error!("Diary collection error: {:?}", err);
    AppError::RemoteOperationFailed(format!("Diary collection error: {}", err))
}

fn diary_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DiaryEntry, AppError> {
    let id: String = row.get("id");
    let images: String = row.get("images");
    let date_ms: i64 = row.get("date_ms");

    let images = serde_json::from_str(&images).map_err(|e| {
        tracing::error!("Diary {} has unreadable images: {}", id, e);
        AppError::LocalStore(format!("Diary {} has unreadable images: {}", id, e))
    })?;
    let date = DateTime::<Utc>::from_timestamp_millis(date_ms).ok_or_else(|| {
        tracing::error!("Diary {} has out-of-range date {}", id, date_ms);
        AppError::LocalStore(format!("Diary {} has out-of-range date {}", id, date_ms))
    })?;

    Ok(DiaryEntry {
        id,
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        description: row.get("description"),
        images,
        date,
    })
}
