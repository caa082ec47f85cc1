//! Instrumented in-memory collaborators for unit tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use tokio::sync::{mpsc, Semaphore};

use super::{DiarySource, DiaryStream, ObjectStorage};
use crate::errors::AppError;
use crate::models::{DiaryEntry, DiaryGroups};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Object storage that fails for chosen paths and records every call.
#[derive(Default)]
pub struct StubStorage {
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    objects: Mutex<BTreeSet<String>>,
    uploads: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl StubStorage {
    pub fn failing(paths: &[&str]) -> Self {
        let stub = Self::default();
        lock(&stub.failing).extend(paths.iter().map(|p| p.to_string()));
        stub
    }

    /// Uploads wait for a permit on `gate` before doing anything else.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn insert_object(&self, path: &str) {
        lock(&self.objects).insert(path.to_string());
    }

    pub fn objects(&self) -> Vec<String> {
        lock(&self.objects).iter().cloned().collect()
    }

    pub fn upload_calls(&self) -> Vec<String> {
        lock(&self.uploads).clone()
    }

    pub fn delete_calls(&self) -> Vec<String> {
        lock(&self.deletes).clone()
    }

    fn check(&self, path: &str) -> Result<(), AppError> {
        if self.offline.load(Ordering::SeqCst) || lock(&self.failing).contains(path) {
            return Err(AppError::RemoteOperationFailed(format!(
                "Simulated failure for {}",
                path
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for StubStorage {
    async fn is_reachable(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    async fn begin_upload(&self, remote_path: &str) -> Result<String, AppError> {
        Ok(format!("session-{}", remote_path))
    }

    async fn upload(
        &self,
        _local_path: &Path,
        remote_path: &str,
        _session: &str,
    ) -> Result<(), AppError> {
        // Recorded before the gate so tests can see an attempt that is still blocked.
        lock(&self.uploads).push(remote_path.to_string());
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.check(remote_path)?;
        lock(&self.objects).insert(remote_path.to_string());
        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> Result<(), AppError> {
        lock(&self.deletes).push(remote_path.to_string());
        self.check(remote_path)?;
        lock(&self.objects).remove(remote_path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::RemoteOperationFailed("Simulated offline".to_string()));
        }
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        Ok(lock(&self.objects)
            .iter()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect())
    }
}

/// Decrements the open-stream count when a subscription is dropped.
struct OpenStream {
    key: String,
    active: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        lock(&self.events).push(format!("close:{}", self.key));
    }
}

/// Diary source whose subscriptions are fed by the test.
///
/// Keys are `all`, `date:<YYYY-MM-DD>` and `text:<query>`. A subscription
/// first yields its canned response (if any) and then whatever `emit` pushes.
#[derive(Default)]
pub struct StubDiarySource {
    responses: Mutex<HashMap<String, Result<DiaryGroups, AppError>>>,
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<Result<DiaryGroups, AppError>>>>,
    active: Arc<AtomicUsize>,
    max_active: AtomicUsize,
    events: Arc<Mutex<Vec<String>>>,
}

impl StubDiarySource {
    pub fn respond(&self, key: &str, result: Result<DiaryGroups, AppError>) {
        lock(&self.responses).insert(key.to_string(), result);
    }

    /// Push another emission into the open subscription for `key`.
    pub fn emit(&self, key: &str, result: Result<DiaryGroups, AppError>) -> bool {
        lock(&self.senders)
            .get(key)
            .map(|tx| tx.send(result).is_ok())
            .unwrap_or(false)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    fn open(&self, key: String) -> DiaryStream {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        lock(&self.events).push(format!("open:{}", key));

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(first) = lock(&self.responses).get(&key) {
            let _ = tx.send(first.clone());
        }
        lock(&self.senders).insert(key.clone(), tx);

        let guard = OpenStream {
            key,
            active: self.active.clone(),
            events: self.events.clone(),
        };
        futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            let item = rx.recv().await?;
            Some((item, (rx, guard)))
        })
        .boxed()
    }
}

fn unused<T>() -> Result<T, AppError> {
    Err(AppError::Internal("Not used by this stub".to_string()))
}

#[async_trait]
impl DiarySource for StubDiarySource {
    fn subscribe_all(&self, _owner_id: &str) -> DiaryStream {
        self.open("all".to_string())
    }

    fn subscribe_by_date(&self, _owner_id: &str, day: NaiveDate) -> DiaryStream {
        self.open(format!("date:{}", day))
    }

    fn subscribe_by_text(&self, _owner_id: &str, text: &str) -> DiaryStream {
        self.open(format!("text:{}", text))
    }

    async fn get_diary(&self, _owner_id: &str, _id: &str) -> Result<Option<DiaryEntry>, AppError> {
        unused()
    }

    async fn insert(&self, _entry: &DiaryEntry) -> Result<DiaryEntry, AppError> {
        unused()
    }

    async fn update(&self, _entry: &DiaryEntry) -> Result<DiaryEntry, AppError> {
        unused()
    }

    async fn delete(&self, _owner_id: &str, _id: &str) -> Result<DiaryEntry, AppError> {
        unused()
    }

    async fn delete_all(&self, _owner_id: &str) -> Result<u64, AppError> {
        unused()
    }

    async fn transfer_ownership(&self, _from: &str, _to: &str) -> Result<u64, AppError> {
        unused()
    }
}
