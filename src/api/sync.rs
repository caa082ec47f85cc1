//! Image outbox endpoints.

use axum::extract::State;

use super::{success, ApiResult};
use crate::models::OutboxSummary;
use crate::sync::ReconcileReport;
use crate::AppState;

/// GET /api/sync/outbox - Pending uploads and deletes.
pub async fn get_outbox(State(state): State<AppState>) -> ApiResult<OutboxSummary> {
    let uploads = state.outbox.list_uploads().await?;
    let deletes = state.outbox.list_deletes().await?;
    success(OutboxSummary { uploads, deletes })
}

/// POST /api/sync/reconcile - Retry every pending item once.
pub async fn reconcile_outbox(State(state): State<AppState>) -> ApiResult<ReconcileReport> {
    success(state.sync.reconcile_all().await)
}
