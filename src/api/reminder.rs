//! Reminder API endpoints.

use axum::{extract::State, Json};

use super::{success, ApiResult};
use crate::models::{ReminderSettings, UpdateReminderRequest};
use crate::AppState;

/// GET /api/reminder - Stored reminder settings.
pub async fn get_reminder(State(state): State<AppState>) -> ApiResult<ReminderSettings> {
    success(state.reminder.settings().await?)
}

/// PUT /api/reminder - Enable, disable or move the daily reminder.
pub async fn update_reminder(
    State(state): State<AppState>,
    Json(request): Json<UpdateReminderRequest>,
) -> ApiResult<ReminderSettings> {
    success(state.reminder.update(request).await?)
}
