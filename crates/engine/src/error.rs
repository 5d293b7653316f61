//! Error types for the ReviewFlow engine.
//!
//! One error enum covers the engine and the HTTP layer; it implements
//! `IntoResponse` so handlers can return it directly.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad or missing workflow definition. Fatal at load time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Another principal won the claim race (or no slot is open).
    #[error("Task already claimed: {0}")]
    AlreadyClaimed(String),

    /// The principal does not hold the claim it tried to act on.
    #[error("Not the owner of the claimed task: {0}")]
    NotOwner(String),

    /// A pool task already exists for the (item, step) pair.
    #[error("Duplicate step entry: {0}")]
    DuplicateStepEntry(String),

    /// A curator refused the item. The engine turns this into a REJECT
    /// transition; it never reaches a caller.
    #[error("Curation rejected: {0}")]
    CurationRejected(String),

    /// Storage failure; the surrounding transaction was rolled back.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authorization error
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The workflow item is not in a state that allows the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An external collaborator (archive, workspace, curation) failed.
    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

impl AppError {
    /// Whether the caller should refresh and retry rather than treat this as a failure.
    pub fn is_contention(&self) -> bool {
        matches!(self, AppError::AlreadyClaimed(_) | AppError::NotOwner(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retry = self.is_contention();
        let (status, error_message) = match &self {
            AppError::Configuration(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::DuplicateStepEntry(msg) => {
                tracing::error!(error = %msg, "Duplicate step entry");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error".to_string(),
                )
            }
            AppError::AlreadyClaimed(_) | AppError::NotOwner(_) => {
                tracing::debug!(error = %self, "Claim contention");
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::CurationRejected(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Persistence(msg) => {
                tracing::error!(error = %msg, "Persistence error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::InvalidState(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Serialization(e) => {
                tracing::error!(error = %e, "Serialization error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Collaborator(msg) => {
                tracing::warn!(error = %msg, "Collaborator error");
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
            "retry": retry
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Persistence(err.to_string())
    }
}

impl From<envy::Error> for AppError {
    fn from(err: envy::Error) -> Self {
        AppError::Configuration(err.to_string())
    }
}
