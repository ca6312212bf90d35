//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cfdp_common::CfdpError;
use serde_json::json;
use thiserror::Error;

/// Result type alias for server operations
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many concurrent operations (limit {limit})")]
    TooManyOperations { limit: usize },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CFDP error: {0}")]
    Cfdp(#[from] CfdpError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A database error occurred".to_string())
            },
            AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::Validation(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Conflict(ref message) => (StatusCode::CONFLICT, message.clone()),
            AppError::TooManyOperations { limit } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("Too many concurrent operations (limit {})", limit),
            ),
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
            AppError::Io(ref e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "An IO error occurred".to_string())
            },
            AppError::Cfdp(ref e) => match e {
                CfdpError::JobNotFound(message) => (StatusCode::NOT_FOUND, message.clone()),
                CfdpError::InvalidTransition(message) => (StatusCode::CONFLICT, message.clone()),
                CfdpError::TooManyOperations { limit } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    format!("Too many concurrent operations (limit {})", limit),
                ),
                CfdpError::SourceUnavailable(message) => (StatusCode::BAD_REQUEST, message.clone()),
                _ => {
                    tracing::error!("CFDP error: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                },
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
