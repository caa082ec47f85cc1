//! Remote collaborators: the per-user diary collection and object storage.
//!
//! Everything above this module talks to the traits; the shipped
//! implementations keep the service runnable on a single machine.

mod collection;
mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use collection::*;
pub use storage::*;

use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::BoxStream;

use crate::errors::AppError;
use crate::models::{DiaryEntry, DiaryGroups};

/// A live query: the first item is the current snapshot, later items follow changes.
/// Dropping the stream ends the subscription.
pub type DiaryStream = BoxStream<'static, Result<DiaryGroups, AppError>>;

/// Per-owner diary collection with live, independently cancellable queries.
#[async_trait]
pub trait DiarySource: Send + Sync {
    fn subscribe_all(&self, owner_id: &str) -> DiaryStream;

    /// Entries whose date falls on `day`.
    fn subscribe_by_date(&self, owner_id: &str, day: NaiveDate) -> DiaryStream;

    /// Entries whose title or description matches `text`.
    fn subscribe_by_text(&self, owner_id: &str, text: &str) -> DiaryStream;

    async fn get_diary(&self, owner_id: &str, id: &str) -> Result<Option<DiaryEntry>, AppError>;

    async fn insert(&self, entry: &DiaryEntry) -> Result<DiaryEntry, AppError>;

    async fn update(&self, entry: &DiaryEntry) -> Result<DiaryEntry, AppError>;

    /// Delete one entry and return it.
    async fn delete(&self, owner_id: &str, id: &str) -> Result<DiaryEntry, AppError>;

    /// Delete every entry of the owner; returns how many were removed.
    async fn delete_all(&self, owner_id: &str) -> Result<u64, AppError>;

    /// Re-assign every entry of `from_owner` to `to_owner`.
    async fn transfer_ownership(&self, from_owner: &str, to_owner: &str) -> Result<u64, AppError>;
}

/// Remote object storage for entry images.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Whether the storage can currently be reached.
    async fn is_reachable(&self) -> bool;

    /// Open a resumable upload session for `remote_path`.
    async fn begin_upload(&self, remote_path: &str) -> Result<String, AppError>;

    /// Upload `local_path` to `remote_path`, resuming `session` where it stopped.
    async fn upload(&self, local_path: &Path, remote_path: &str, session: &str)
        -> Result<(), AppError>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, remote_path: &str) -> Result<(), AppError>;

    /// Object paths directly under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError>;
}
