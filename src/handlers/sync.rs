use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::models::sync::SyncStatusResponse;
use crate::AppState;

pub async fn sync_status(State(state): State<AppState>) -> Json<SyncStatusResponse> {
    Json(state.sync.status())
}

/// Manual retry. Unlike background syncs, failures are returned to the caller.
pub async fn retry_sync(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let outcome = state.sync.retry_now().await?;
    Ok(Json(json!({
        "result": outcome,
        "status": state.sync.status(),
    })))
}
