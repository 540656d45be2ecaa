//! Error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Resource errors
    #[error("{0}")]
    NotFound(String),

    // State machine violations: recoverable, the caller picks another action
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    // Policy refusals: hard, never bypassed
    #[error("export is under active legal hold")]
    LegalHoldActive,

    // Validation errors
    #[error("{0}")]
    Validation(String),

    // Database errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    // Artifact storage errors
    #[error("storage error: {0}")]
    Storage(String),

    // Generic errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InvalidStateTransition(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::LegalHoldActive => (
                StatusCode::LOCKED,
                "deletion refused: export is under active legal hold".to_string(),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Database(err) => {
                tracing::error!("Database error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error occurred".to_string(),
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Artifact storage error".to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
