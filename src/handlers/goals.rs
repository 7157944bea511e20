use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppResult;
use crate::models::goal::{Goal, GoalInput, GoalSummary};
use crate::AppState;

pub async fn list_goals(State(state): State<AppState>) -> AppResult<Json<Vec<Goal>>> {
    Ok(Json(state.planner.goals().await))
}

pub async fn get_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<Uuid>,
) -> AppResult<Json<Goal>> {
    Ok(Json(state.planner.goal(goal_id).await?))
}

pub async fn create_goal(
    State(state): State<AppState>,
    Json(body): Json<GoalInput>,
) -> AppResult<Json<Goal>> {
    body.validate()?;

    let created = state.planner.add_goal(body).await?;
    state.sync.mirror(created.mirror);
    Ok(Json(created.value))
}

pub async fn update_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<Uuid>,
    Json(body): Json<GoalInput>,
) -> AppResult<Json<Goal>> {
    body.validate()?;

    let updated = state.planner.update_goal(goal_id, body).await?;
    state.sync.mirror(updated.mirror);
    Ok(Json(updated.value))
}

/// Deletes the goal along with its derived todos and completion records.
pub async fn delete_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let deleted = state.planner.delete_goal(goal_id).await?;
    state.sync.mirror(deleted.mirror);
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn goal_summary(
    State(state): State<AppState>,
    Path(goal_id): Path<Uuid>,
) -> AppResult<Json<GoalSummary>> {
    Ok(Json(state.planner.goal_summary(goal_id).await?))
}
