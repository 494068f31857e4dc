use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failures surfaced by the backup service layer.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("another backup or restore is already running")]
    AlreadyRunning,

    #[error("backup not found: {0}")]
    ArchiveNotFound(String),

    #[error("backup failed: {0:#}")]
    Backup(#[source] anyhow::Error),

    #[error("restore failed: {0:#}")]
    Restore(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::ArchiveNotFound(name) => {
                AppError::NotFound(format!("Backup not found: {name}"))
            }
            ServiceError::AlreadyRunning => {
                AppError::Conflict("A backup or restore is already running".into())
            }
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
