//! Listing query coordination.
//!
//! `set_filter` is the only way the listing state changes. It stops the
//! running subscription and waits for its task to finish before opening the
//! next one, so two result streams never race for the published state.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::AppError;
use crate::models::{DiaryGroups, QueryResult, ViewFilter};
use crate::remote::{DiarySource, DiaryStream};

/// Immutable snapshot of the listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    /// Bumped on every filter change; emissions from older subscriptions are ignored.
    pub generation: u64,
    pub filter: ViewFilter,
    pub result: QueryResult<DiaryGroups>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            generation: 0,
            filter: ViewFilter::None,
            result: QueryResult::Idle,
        }
    }
}

struct ActiveSubscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveSubscription {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!("Listing subscription task panicked: {}", e);
            }
        }
    }
}

pub struct DiaryQueryCoordinator {
    source: Arc<dyn DiarySource>,
    owner_id: String,
    state: Arc<watch::Sender<ViewState>>,
    active: Mutex<Option<ActiveSubscription>>,
}

impl DiaryQueryCoordinator {
    pub fn new(source: Arc<dyn DiarySource>, owner_id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ViewState::default());
        Self {
            source,
            owner_id: owner_id.into(),
            state: Arc::new(state),
            active: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Replace the listing with a fresh query for `filter`.
    ///
    /// Returns the `Loading` snapshot that was published.
    pub async fn set_filter(&self, filter: ViewFilter) -> Result<ViewState, AppError> {
        let filter = match filter {
            ViewFilter::ByText(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(AppError::Validation("Search text is required".to_string()));
                }
                ViewFilter::ByText(text.to_string())
            }
            other => other,
        };

        // Serializes concurrent filter changes.
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.stop().await;
        }

        let loading = ViewState {
            generation: self.state.borrow().generation + 1,
            filter: filter.clone(),
            result: QueryResult::Loading,
        };
        self.state.send_replace(loading.clone());

        let stream = match &filter {
            ViewFilter::None => self.source.subscribe_all(&self.owner_id),
            ViewFilter::ByDate(day) => self.source.subscribe_by_date(&self.owner_id, *day),
            ViewFilter::ByText(text) => self.source.subscribe_by_text(&self.owner_id, text),
        };
        tracing::debug!(generation = loading.generation, ?filter, "Listing query started");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(publish_emissions(
            stream,
            self.state.clone(),
            loading.generation,
            cancel.clone(),
        ));
        *active = Some(ActiveSubscription { cancel, task });

        Ok(loading)
    }

    /// Show every entry again.
    pub async fn reset(&self) -> Result<ViewState, AppError> {
        self.set_filter(ViewFilter::None).await
    }

    /// Stop the running subscription, if any.
    pub async fn shutdown(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.stop().await;
        }
    }
}

impl Drop for DiaryQueryCoordinator {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

async fn publish_emissions(
    mut stream: DiaryStream,
    state: Arc<watch::Sender<ViewState>>,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        let Some(emission) = next else {
            break;
        };

        let result = match emission {
            Ok(groups) => QueryResult::Success(groups),
            Err(e) => {
                tracing::warn!(generation, "Listing query failed: {}", e);
                QueryResult::Error(e.message())
            }
        };

        state.send_if_modified(|current| {
            if current.generation != generation {
                return false;
            }
            current.result = result;
            true
        });
    }
}
