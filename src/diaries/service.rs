//! Diary writes.
//!
//! Entry writes go straight to the diary source and their failures reach the
//! caller. Image transfers that fail are queued in the outbox instead, for
//! the sync runner to finish later.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use uuid::Uuid;

use crate::db::OutboxStore;
use crate::errors::AppError;
use crate::models::{
    CreateDiaryRequest, DiaryEntry, NewImage, NewImageToUpload, UpdateDiaryRequest,
};
use crate::remote::{DiarySource, ObjectStorage};

pub struct DiaryService {
    source: Arc<dyn DiarySource>,
    storage: Arc<dyn ObjectStorage>,
    outbox: OutboxStore,
    owner_id: String,
}

impl DiaryService {
    pub fn new(
        source: Arc<dyn DiarySource>,
        storage: Arc<dyn ObjectStorage>,
        outbox: OutboxStore,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            storage,
            outbox,
            owner_id: owner_id.into(),
        }
    }

    /// Remote directory holding the owner's images.
    fn images_prefix(&self) -> String {
        format!("images/{}", self.owner_id)
    }

    pub async fn get(&self, id: &str) -> Result<DiaryEntry, AppError> {
        self.source
            .get_diary(&self.owner_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Diary {} not found", id)))
    }

    pub async fn create(&self, request: CreateDiaryRequest) -> Result<DiaryEntry, AppError> {
        if request.title.trim().is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }

        let images = self.upload_images(&request.images).await?;
        let entry = DiaryEntry {
            id: Uuid::new_v4().to_string(),
            owner_id: self.owner_id.clone(),
            title: request.title,
            description: request.description,
            images,
            date: request.date.unwrap_or_else(Utc::now),
        };

        let created = self.source.insert(&entry).await?;
        tracing::info!(diary_id = %created.id, images = created.images.len(), "Diary created");
        Ok(created)
    }

    pub async fn update(
        &self,
        id: &str,
        request: UpdateDiaryRequest,
    ) -> Result<DiaryEntry, AppError> {
        let mut entry = self.get(id).await?;

        if let Some(title) = request.title {
            if title.trim().is_empty() {
                return Err(AppError::Validation("Title is required".to_string()));
            }
            entry.title = title;
        }
        if let Some(description) = request.description {
            entry.description = description;
        }
        if let Some(date) = request.date {
            entry.date = date;
        }

        let (removed, kept): (Vec<String>, Vec<String>) = entry
            .images
            .into_iter()
            .partition(|path| request.remove_images.contains(path));
        entry.images = kept;
        entry
            .images
            .extend(self.upload_images(&request.add_images).await?);

        let updated = self.source.update(&entry).await?;
        // Only drop objects once no entry points at them.
        self.delete_images(&removed).await;

        tracing::info!(diary_id = %updated.id, removed = removed.len(), "Diary updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<DiaryEntry, AppError> {
        let deleted = self.source.delete(&self.owner_id, id).await?;
        self.delete_images(&deleted.images).await;
        tracing::info!(diary_id = %deleted.id, "Diary deleted");
        Ok(deleted)
    }

    /// Delete every entry and image of the owner.
    ///
    /// Requires storage to be reachable up front; individual image deletes
    /// that fail afterwards are queued.
    pub async fn delete_all(&self) -> Result<u64, AppError> {
        if !self.storage.is_reachable().await {
            return Err(AppError::ConnectivityUnavailable);
        }

        let prefix = format!("{}/", self.images_prefix());
        let mut images: BTreeSet<String> = self
            .storage
            .list(&self.images_prefix())
            .await?
            .into_iter()
            .collect();
        // Images still waiting for upload are not in storage yet.
        images.extend(
            self.outbox
                .list_uploads()
                .await?
                .into_iter()
                .map(|item| item.remote_path)
                .filter(|path| path.starts_with(&prefix)),
        );
        let images: Vec<String> = images.into_iter().collect();
        self.delete_images(&images).await;

        let deleted = self.source.delete_all(&self.owner_id).await?;
        tracing::info!(deleted, images = images.len(), "All diaries deleted");
        Ok(deleted)
    }

    /// Move the entries of an anonymous session to the current owner.
    pub async fn transfer_from(&self, from_owner: &str) -> Result<u64, AppError> {
        if from_owner.trim().is_empty() || from_owner == self.owner_id {
            return Err(AppError::Validation(
                "Source account must differ from the current owner".to_string(),
            ));
        }
        let moved = self
            .source
            .transfer_ownership(from_owner, &self.owner_id)
            .await?;
        tracing::info!(moved, from = from_owner, "Diaries transferred");
        Ok(moved)
    }

    /// Upload attached images; failed transfers are queued and still referenced.
    async fn upload_images(&self, images: &[NewImage]) -> Result<Vec<String>, AppError> {
        let mut paths = Vec::with_capacity(images.len());
        for image in images {
            let remote_path = format!(
                "{}/{}.{}",
                self.images_prefix(),
                Uuid::new_v4(),
                image.extension()
            );
            self.upload_image(&image.local_path, &remote_path).await?;
            paths.push(remote_path);
        }
        Ok(paths)
    }

    async fn upload_image(&self, local_path: &Path, remote_path: &str) -> Result<(), AppError> {
        // Without a session the runner opens one on its next pass.
        let session = match self.storage.begin_upload(remote_path).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Could not open upload session for {}: {}", remote_path, e);
                String::new()
            }
        };

        let attempt = if session.is_empty() {
            Err(AppError::RemoteOperationFailed("No upload session".to_string()))
        } else {
            self.storage.upload(local_path, remote_path, &session).await
        };

        if let Err(e) = attempt {
            tracing::warn!("Queueing upload of {}: {}", remote_path, e);
            self.outbox
                .add_upload(&NewImageToUpload {
                    local_path: local_path.to_string_lossy().into_owned(),
                    remote_path: remote_path.to_string(),
                    session,
                })
                .await?;
        }
        Ok(())
    }

    /// Delete remote images; failures are queued for the sync runner.
    ///
    /// Pending uploads of the same paths are withdrawn first, so a later
    /// reconcile cannot bring the objects back.
    async fn delete_images(&self, paths: &[String]) {
        let attempts = paths.iter().map(|path| async move {
            match self.outbox.remove_uploads_for(path).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Withdrew {} pending upload(s) of {}", n, path),
                Err(e) => tracing::error!("Could not withdraw pending upload of {}: {}", path, e),
            }
            if let Err(e) = self.storage.delete(path).await {
                tracing::warn!("Queueing delete of {}: {}", path, e);
                if let Err(e) = self.outbox.add_delete(path).await {
                    tracing::error!("Could not queue delete of {}: {}", path, e);
                }
            }
        });
        join_all(attempts).await;
    }
}
