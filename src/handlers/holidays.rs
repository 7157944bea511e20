use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::{AppError, AppResult};
use crate::services::holidays::Holiday;
use crate::AppState;

pub async fn list_holidays(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> AppResult<Json<Vec<Holiday>>> {
    if !(1900..=2200).contains(&year) {
        return Err(AppError::Validation("Year must be between 1900 and 2200".into()));
    }
    Ok(Json(state.holidays.holidays(year).await))
}

/// Drop cached holiday lists and re-expand goals against fresh data.
pub async fn refresh_holidays(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.holidays.clear_cache();
    state.planner.request_regeneration();
    tracing::info!("Holiday cache cleared");
    Json(serde_json::json!({ "cleared": true }))
}
