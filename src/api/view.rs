//! Listing API endpoints.

use axum::{extract::State, Json};

use super::{success, ApiResult};
use crate::models::ViewFilter;
use crate::view::ViewState;
use crate::AppState;

/// GET /api/view - Current listing snapshot.
pub async fn get_view(State(state): State<AppState>) -> ApiResult<ViewState> {
    success(state.coordinator.current())
}

/// PUT /api/view/filter - Switch the listing to another filter.
///
/// Responds with the `Loading` snapshot; poll `GET /api/view` for the result.
pub async fn set_view_filter(
    State(state): State<AppState>,
    Json(filter): Json<ViewFilter>,
) -> ApiResult<ViewState> {
    success(state.coordinator.set_filter(filter).await?)
}

/// DELETE /api/view/filter - Clear the filter and list every entry.
pub async fn clear_view_filter(State(state): State<AppState>) -> ApiResult<ViewState> {
    success(state.coordinator.reset().await?)
}
