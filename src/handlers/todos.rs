use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::completed_task::CompletedTask;
use crate::models::todo::{CreateTodoRequest, Todo, TodoQuery, UpdateTodoRequest};
use crate::AppState;

pub async fn list_todos(
    State(state): State<AppState>,
    Query(query): Query<TodoQuery>,
) -> AppResult<Json<Vec<Todo>>> {
    if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
        if start > end {
            return Err(AppError::Validation("startDate must not be after endDate".into()));
        }
    }
    Ok(Json(state.planner.todos(query.start_date, query.end_date).await))
}

pub async fn create_todo(
    State(state): State<AppState>,
    Json(body): Json<CreateTodoRequest>,
) -> AppResult<Json<Todo>> {
    body.validate()?;

    let created = state.planner.add_todo(body).await?;
    state.sync.mirror(created.mirror);
    Ok(Json(created.value))
}

pub async fn update_todo(
    State(state): State<AppState>,
    Path(todo_id): Path<Uuid>,
    Json(body): Json<UpdateTodoRequest>,
) -> AppResult<Json<Todo>> {
    body.validate()?;

    let updated = state.planner.update_todo(todo_id, body).await?;
    state.sync.mirror(updated.mirror);
    Ok(Json(updated.value))
}

pub async fn toggle_todo(
    State(state): State<AppState>,
    Path(todo_id): Path<Uuid>,
) -> AppResult<Json<Todo>> {
    let toggled = state.planner.toggle_todo(todo_id).await?;
    state.sync.mirror(toggled.mirror);
    Ok(Json(toggled.value))
}

pub async fn delete_todo(
    State(state): State<AppState>,
    Path(todo_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let deleted = state.planner.delete_todo(todo_id).await?;
    state.sync.mirror(deleted.mirror);
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn list_completed_tasks(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<CompletedTask>>> {
    Ok(Json(state.planner.completed_tasks().await))
}
