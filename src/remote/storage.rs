//! Directory-backed object storage with resumable uploads.
//!
//! Objects live under `root/<remote path>`. An upload session is a partial
//! file under `root/.sessions/`; resuming appends whatever the partial file
//! is still missing and then renames it into place.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use uuid::Uuid;

use super::ObjectStorage;
use crate::errors::AppError;

const SESSIONS_DIR: &str = ".sessions";

#[derive(Debug, Clone)]
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if needed.
    pub async fn init(&self) -> Result<(), AppError> {
        fs::create_dir_all(self.root.join(SESSIONS_DIR))
            .await
            .map_err(|e| io_error("create storage root", e))
    }

    /// Resolve a remote path, rejecting anything that would escape the root.
    fn resolve(&self, remote_path: &str) -> Result<PathBuf, AppError> {
        let relative = Path::new(remote_path);
        let valid = !remote_path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && !remote_path.starts_with(SESSIONS_DIR);
        if !valid {
            return Err(AppError::Validation(format!(
                "Invalid remote path: {}",
                remote_path
            )));
        }
        Ok(self.root.join(relative))
    }

    fn session_path(&self, session: &str) -> Result<PathBuf, AppError> {
        let id = Uuid::parse_str(session)
            .map_err(|_| AppError::Validation(format!("Invalid upload session: {}", session)))?;
        Ok(self.root.join(SESSIONS_DIR).join(id.to_string()))
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn is_reachable(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn begin_upload(&self, remote_path: &str) -> Result<String, AppError> {
        self.resolve(remote_path)?;
        let session = Uuid::new_v4().to_string();
        let partial = self.session_path(&session)?;
        if let Some(parent) = partial.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("open upload session", e))?;
        }
        fs::File::create(&partial)
            .await
            .map_err(|e| io_error("open upload session", e))?;
        Ok(session)
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        session: &str,
    ) -> Result<(), AppError> {
        let target = self.resolve(remote_path)?;
        let partial = self.session_path(session)?;

        let source_len = fs::metadata(local_path)
            .await
            .map_err(|e| io_error("read local image", e))?
            .len();

        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&partial)
            .await
            .map_err(|e| io_error("resume upload session", e))?;
        let mut written = out
            .metadata()
            .await
            .map_err(|e| io_error("resume upload session", e))?
            .len();

        // The local file changed under us; start over.
        if written > source_len {
            out.set_len(0)
                .await
                .map_err(|e| io_error("reset upload session", e))?;
            written = 0;
        }

        if written < source_len {
            let mut source = fs::File::open(local_path)
                .await
                .map_err(|e| io_error("read local image", e))?;
            source
                .seek(SeekFrom::Start(written))
                .await
                .map_err(|e| io_error("read local image", e))?;
            tokio::io::copy(&mut source, &mut out)
                .await
                .map_err(|e| io_error("upload image", e))?;
        }
        out.flush().await.map_err(|e| io_error("upload image", e))?;
        out.sync_all()
            .await
            .map_err(|e| io_error("upload image", e))?;
        drop(out);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("upload image", e))?;
        }
        fs::rename(&partial, &target)
            .await
            .map_err(|e| io_error("finish upload", e))?;

        tracing::debug!("Uploaded {} ({} bytes)", remote_path, source_len);
        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> Result<(), AppError> {
        let target = self.resolve(remote_path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete image", e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        let dir = self.resolve(prefix)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("list images", e)),
        };

        let prefix = prefix.trim_end_matches('/');
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("list images", e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                paths.push(format!("{}/{}", prefix, entry.file_name().to_string_lossy()));
            }
        }
        paths.sort();
        Ok(paths)
    }
}

fn io_error(action: &str, err: std::io::Error) -> AppError {
    AppError::RemoteOperationFailed(format!("Failed to {}: {}", action, err))
}
