use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::storage::StorageError;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

use crate::validate::ValidationFailure;

/// Failures of the vault services (ingest, queue, gate, reveal).
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("upload rejected: {} problem(s)", .0.len())]
    Validation(Vec<ValidationFailure>),

    #[error("'{filename}' was already uploaded by this author in this community")]
    Duplicate { filename: String, existing_id: Option<String> },

    #[error("uploads are closed")]
    UploadsClosed,

    #[error("{0}")]
    NotFound(String),

    /// Database or queue unreachable; the caller may retry.
    #[error("infrastructure unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Internal(String),
}

impl From<DbErr> for VaultError {
    fn from(err: DbErr) -> Self {
        VaultError::Unavailable(err.to_string())
    }
}

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize)]
pub struct ErrorBody {
    /// One of: `VALIDATION_ERROR`, `DUPLICATE_FILE`, `UPLOADS_CLOSED`,
    /// `NOT_FOUND`, `SERVICE_UNAVAILABLE`, `INTERNAL_ERROR`.
    pub code: &'static str,
    pub message: String,
    /// Per-file failures for `VALIDATION_ERROR`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationFailure>>,
}

impl ErrorBody {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    Rejected(Vec<ValidationFailure>),
    Duplicate(String),
    UploadsClosed,
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("VALIDATION_ERROR", msg),
            ),
            AppError::Rejected(failures) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: format!("{} problem(s) with the upload", failures.len()),
                    details: Some(failures),
                },
            ),
            AppError::Duplicate(msg) => (StatusCode::CONFLICT, ErrorBody::new("DUPLICATE_FILE", msg)),
            AppError::UploadsClosed => (
                StatusCode::FORBIDDEN,
                ErrorBody::new("UPLOADS_CLOSED", "Uploads are not open right now"),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorBody::new("NOT_FOUND", msg)),
            AppError::Unavailable(detail) => {
                tracing::error!("Service unavailable: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorBody::new("SERVICE_UNAVAILABLE", "Please try again shortly"),
                )
            }
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("INTERNAL_ERROR", "An unexpected error occurred"),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Validation(failures) => AppError::Rejected(failures),
            e @ VaultError::Duplicate { .. } => AppError::Duplicate(e.to_string()),
            VaultError::UploadsClosed => AppError::UploadsClosed,
            VaultError::NotFound(msg) => AppError::NotFound(msg),
            VaultError::Unavailable(msg) => AppError::Unavailable(msg),
            VaultError::Storage(StorageError::NotFound(hash)) => {
                tracing::warn!(%hash, "Referenced object is missing from the content store");
                AppError::NotFound("Stored content not found".into())
            }
            VaultError::Storage(e) if e.is_transient() => AppError::Unavailable(e.to_string()),
            VaultError::Storage(e) => AppError::Internal(e.to_string()),
            VaultError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Unavailable(err.to_string())
    }
}
