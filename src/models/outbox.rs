//! Outbox records for image transfers that still have to reach remote storage.

use serde::{Deserialize, Serialize};

/// An image whose upload has not been confirmed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageToUpload {
    pub id: i64,
    pub local_path: String,
    pub remote_path: String,
    /// Resumable upload session issued by the object storage.
    pub session: String,
    pub created_at: String,
}

/// Fields for queueing a new upload.
#[derive(Debug, Clone)]
pub struct NewImageToUpload {
    pub local_path: String,
    pub remote_path: String,
    pub session: String,
}

/// A remote object that must still be deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageToDelete {
    pub id: i64,
    pub remote_path: String,
    pub created_at: String,
}

/// Snapshot of both outbox queues.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxSummary {
    pub uploads: Vec<ImageToUpload>,
    pub deletes: Vec<ImageToDelete>,
}
