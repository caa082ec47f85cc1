//! Diary API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use super::{success, ApiResult};
use crate::models::{CreateDiaryRequest, DiaryEntry, TransferDiariesRequest, UpdateDiaryRequest};
use crate::AppState;

/// Number of entries affected by a bulk operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedCount {
    pub count: u64,
}

/// GET /api/diaries/:id - Get a single entry.
pub async fn get_diary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DiaryEntry> {
    success(state.diaries.get(&id).await?)
}

/// POST /api/diaries - Create an entry and upload its images.
pub async fn create_diary(
    State(state): State<AppState>,
    Json(request): Json<CreateDiaryRequest>,
) -> ApiResult<DiaryEntry> {
    success(state.diaries.create(request).await?)
}

/// PUT /api/diaries/:id - Edit an entry.
pub async fn update_diary(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateDiaryRequest>,
) -> ApiResult<DiaryEntry> {
    success(state.diaries.update(&id, request).await?)
}

/// DELETE /api/diaries/:id - Delete an entry and its images.
pub async fn delete_diary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DiaryEntry> {
    success(state.diaries.delete(&id).await?)
}

/// DELETE /api/diaries - Delete every entry of the current owner and switch
/// the daily reminder off.
pub async fn delete_all_diaries(State(state): State<AppState>) -> ApiResult<AffectedCount> {
    let count = state.diaries.delete_all().await?;
    state.reminder.disable().await?;
    success(AffectedCount { count })
}

/// POST /api/diaries/transfer - Adopt the entries of another account.
pub async fn transfer_diaries(
    State(state): State<AppState>,
    Json(request): Json<TransferDiariesRequest>,
) -> ApiResult<AffectedCount> {
    let count = state.diaries.transfer_from(&request.from_owner_id).await?;
    success(AffectedCount { count })
}
