//! HTTP error handling and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::repository::RepositoryError;
use crate::models::IdentityError;
use crate::services::{BoardError, IngestError};

/// API error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Resource not found
    NotFound(String),
    /// Invalid request (validation error)
    BadRequest(String),
    /// Internal server error
    Internal(String),
    /// Repository error
    Repository(RepositoryError),
    Board(BoardError),
    Ingest(IngestError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", msg)),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ApiError::new("BAD_REQUEST", msg))
            }
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("INTERNAL_ERROR", msg),
            ),
            AppError::Repository(e) => match e {
                RepositoryError::NotFound { .. } => {
                    (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", e.to_string()))
                }
                e if e.is_retryable() => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError::new("STORE_UNAVAILABLE", e.to_string()),
                ),
                e => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("REPOSITORY_ERROR", e.to_string()),
                ),
            },
            AppError::Board(e) => match e {
                BoardError::CorridorNotFound(id) => (
                    StatusCode::NOT_FOUND,
                    ApiError::new("NOT_FOUND", format!("Corridor {} not found", id)),
                ),
                BoardError::Store(e) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError::new("STORE_UNAVAILABLE", "Sailing status store is unavailable")
                        .with_details(e.to_string()),
                ),
                // No partial board and no internals.
                BoardError::InvariantViolation(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("BOARD_UNAVAILABLE", "The board could not be rendered"),
                ),
            },
            AppError::Ingest(e) => {
                let status = match &e {
                    IngestError::Schema(_) | IngestError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
                    IngestError::CorridorMismatch { .. }
                    | IngestError::OperatorNotServed { .. }
                    | IngestError::NotOperatorSourced(_) => StatusCode::BAD_REQUEST,
                    IngestError::InvalidSailing { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, ApiError::new("INGEST_REJECTED", e.to_string()))
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        AppError::Repository(err)
    }
}

impl From<BoardError> for AppError {
    fn from(err: BoardError) -> Self {
        AppError::Board(err)
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        AppError::Ingest(err)
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
