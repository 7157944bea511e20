use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::store::remote::RemoteError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Failures of the synchronous local key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Local store lock poisoned")]
    Poisoned,
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Remote(e) if e.is_quota_exceeded() => {
                tracing::warn!(error = %e, "Remote store quota exhausted");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Remote storage quota exceeded; working from local data".into(),
                )
            }
            AppError::Remote(e) => {
                tracing::error!(error = %e, "Remote store error");
                (StatusCode::BAD_GATEWAY, e.user_message())
            }
            AppError::Store(e) => {
                tracing::error!(error = %e, "Local store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        let body = json!({
            "error": {
                "message": message,
                "code": status.as_u16(),
            }
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
