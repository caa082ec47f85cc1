//! Outbox reconciliation.
//!
//! Each pass attempts every queued item once. Attempts run concurrently and
//! independently; a failure only means the item stays queued for the next
//! pass. Nothing in here returns an error to the caller.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde::Serialize;

use crate::db::OutboxStore;
use crate::errors::AppError;
use crate::models::{ImageToDelete, ImageToUpload};
use crate::remote::ObjectStorage;

/// What happened to one outbox item during a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum ReconcileStatus {
    /// Remote operation confirmed and the item was removed from the outbox.
    Completed,
    /// Still queued; carries the failure message.
    Retained(String),
    /// Another pass is already attempting this item.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub item_id: i64,
    pub remote_path: String,
    pub status: ReconcileStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub uploads: Vec<ReconcileOutcome>,
    pub deletes: Vec<ReconcileOutcome>,
}

impl ReconcileReport {
    pub fn completed(&self) -> usize {
        self.outcomes()
            .filter(|o| o.status == ReconcileStatus::Completed)
            .count()
    }

    pub fn retained(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o.status, ReconcileStatus::Retained(_)))
            .count()
    }

    fn outcomes(&self) -> impl Iterator<Item = &ReconcileOutcome> {
        self.uploads.iter().chain(self.deletes.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum OutboxKind {
    Upload,
    Delete,
}

type InFlightSet = Arc<Mutex<HashSet<(OutboxKind, i64)>>>;

/// Marks an item as being attempted until dropped.
struct InFlight {
    set: InFlightSet,
    key: (OutboxKind, i64),
}

impl InFlight {
    fn claim(set: &InFlightSet, key: (OutboxKind, i64)) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|p| p.into_inner());
        if !guard.insert(key) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            key,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(|p| p.into_inner());
        guard.remove(&self.key);
    }
}

/// Retries queued image uploads and deletes.
#[derive(Clone)]
pub struct ImageSyncRunner {
    outbox: OutboxStore,
    storage: Arc<dyn ObjectStorage>,
    in_flight: InFlightSet,
}

impl ImageSyncRunner {
    pub fn new(outbox: OutboxStore, storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            outbox,
            storage,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run upload and delete reconciliation side by side.
    pub async fn reconcile_all(&self) -> ReconcileReport {
        let (uploads, deletes) = tokio::join!(self.reconcile_uploads(), self.reconcile_deletes());
        let report = ReconcileReport { uploads, deletes };
        tracing::info!(
            completed = report.completed(),
            retained = report.retained(),
            "Image outbox reconciled"
        );
        report
    }

    /// Resume every queued upload once.
    pub async fn reconcile_uploads(&self) -> Vec<ReconcileOutcome> {
        let items = match self.outbox.list_uploads().await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("Could not read pending uploads: {}", e);
                return Vec::new();
            }
        };

        join_all(items.into_iter().map(|item| self.retry_upload(item))).await
    }

    /// Retry every queued delete once.
    pub async fn reconcile_deletes(&self) -> Vec<ReconcileOutcome> {
        let items = match self.outbox.list_deletes().await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("Could not read pending deletes: {}", e);
                return Vec::new();
            }
        };

        join_all(items.into_iter().map(|item| self.retry_delete(item))).await
    }

    async fn retry_upload(&self, item: ImageToUpload) -> ReconcileOutcome {
        let status = match InFlight::claim(&self.in_flight, (OutboxKind::Upload, item.id)) {
            None => ReconcileStatus::Skipped,
            Some(_claim) => {
                let attempt = self.resume_upload(&item).await;
                match attempt {
                    Ok(()) => match self.outbox.remove_upload(item.id).await {
                        Ok(true) => ReconcileStatus::Completed,
                        Ok(false) => self.discard_withdrawn(&item).await,
                        Err(e) => retained(&item.remote_path, e.message()),
                    },
                    Err(e) => retained(&item.remote_path, e.message()),
                }
            }
        };

        ReconcileOutcome {
            item_id: item.id,
            remote_path: item.remote_path,
            status,
        }
    }

    /// The item was withdrawn while its upload ran: its entry or image was
    /// deleted in the meantime, so the fresh object must go too.
    async fn discard_withdrawn(&self, item: &ImageToUpload) -> ReconcileStatus {
        tracing::info!("Upload of {} was withdrawn; removing the object", item.remote_path);
        if let Err(e) = self.storage.delete(&item.remote_path).await {
            tracing::warn!("Queueing delete of withdrawn {}: {}", item.remote_path, e);
            if let Err(e) = self.outbox.add_delete(&item.remote_path).await {
                tracing::error!("Could not queue delete of {}: {}", item.remote_path, e);
            }
        }
        ReconcileStatus::Completed
    }

    /// Items queued while storage was unreachable have no session yet.
    async fn resume_upload(&self, item: &ImageToUpload) -> Result<(), AppError> {
        let session = if item.session.is_empty() {
            self.storage.begin_upload(&item.remote_path).await?
        } else {
            item.session.clone()
        };
        self.storage
            .upload(Path::new(&item.local_path), &item.remote_path, &session)
            .await
    }

    async fn retry_delete(&self, item: ImageToDelete) -> ReconcileOutcome {
        let status = match InFlight::claim(&self.in_flight, (OutboxKind::Delete, item.id)) {
            None => ReconcileStatus::Skipped,
            Some(_claim) => match self.storage.delete(&item.remote_path).await {
                Ok(()) => match self.outbox.remove_delete(item.id).await {
                    Ok(_) => ReconcileStatus::Completed,
                    Err(e) => retained(&item.remote_path, e.message()),
                },
                Err(e) => retained(&item.remote_path, e.message()),
            },
        };

        ReconcileOutcome {
            item_id: item.id,
            remote_path: item.remote_path,
            status,
        }
    }
}

fn retained(remote_path: &str, reason: String) -> ReconcileStatus {
    tracing::warn!("Keeping {} queued: {}", remote_path, reason);
    ReconcileStatus::Retained(reason)
}
