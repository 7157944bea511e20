use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppResult;
use crate::models::diary::{DiaryEntry, DiaryQuery, UpdateDiaryRequest, UpsertDiaryRequest};
use crate::AppState;

pub async fn list_diary_entries(
    State(state): State<AppState>,
    Query(query): Query<DiaryQuery>,
) -> AppResult<Json<Vec<DiaryEntry>>> {
    Ok(Json(
        state
            .planner
            .diary_entries(query.start_date, query.end_date)
            .await,
    ))
}

/// Writing to a date that already has an entry replaces its content.
pub async fn upsert_diary_entry(
    State(state): State<AppState>,
    Json(body): Json<UpsertDiaryRequest>,
) -> AppResult<Json<DiaryEntry>> {
    body.validate()?;

    let saved = state.planner.upsert_diary(body).await?;
    state.sync.mirror(saved.mirror);
    Ok(Json(saved.value))
}

pub async fn update_diary_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<UpdateDiaryRequest>,
) -> AppResult<Json<DiaryEntry>> {
    body.validate()?;

    let updated = state.planner.update_diary(entry_id, body).await?;
    state.sync.mirror(updated.mirror);
    Ok(Json(updated.value))
}

pub async fn delete_diary_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let deleted = state.planner.delete_diary(entry_id).await?;
    state.sync.mirror(deleted.mirror);
    Ok(Json(serde_json::json!({ "deleted": true })))
}
