//! HTTP adapters over the backup service. Auth and UI live elsewhere; these
//! handlers only translate between HTTP and the orchestrator.

use crate::error::AppError;
use crate::services::backup::BackupResult;
use crate::services::catalog::{self, BackupEntry};
use crate::services::restore::RestoreResult;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path as AxumPath, Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/restore", post(restore_upload))
        .route("/{filename}", delete(delete_backup))
        .route("/{filename}/download", get(download_backup))
        .route("/{filename}/restore", post(restore_existing))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BackupEntry>>, AppError> {
    let dir = state.config.backups_dir.clone();
    let entries = tokio::task::spawn_blocking(move || catalog::list(&dir))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(Json(entries))
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BackupResult>, AppError> {
    let result = state.backups.create_backup().await?;
    Ok(Json(result))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    AxumPath(filename): AxumPath<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let dir = state.config.backups_dir.clone();
    tokio::task::spawn_blocking(move || catalog::delete(&dir, &filename))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn download_backup(
    State(state): State<Arc<AppState>>,
    AxumPath(filename): AxumPath<String>,
) -> Result<Response, AppError> {
    let path = catalog::resolve_path(&state.config.backups_dir, &filename)?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| AppError::NotFound(format!("Backup not found: {filename}")))?;

    let headers = [
        (header::CONTENT_TYPE, "application/gzip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

async fn restore_existing(
    State(state): State<Arc<AppState>>,
    AxumPath(filename): AxumPath<String>,
) -> Result<Json<RestoreResult>, AppError> {
    let path = catalog::resolve_path(&state.config.backups_dir, &filename)?;
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(AppError::NotFound(format!("Backup not found: {filename}")));
    }
    let result = state.backups.restore_backup(&path).await?;
    Ok(Json(result))
}

/// Receive an uploaded archive and restore from it. The body is streamed to
/// a temp file first; the orchestrator consumes it on success.
async fn restore_upload(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<RestoreResult>, AppError> {
    let upload_path = std::env::temp_dir().join(format!(
        "flowstack-upload-{}.tar.gz",
        uuid::Uuid::new_v4().simple()
    ));

    let mut file = tokio::fs::File::create(&upload_path)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create upload file: {e}")))?;
    let mut stream = request.into_body().into_data_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::Internal(anyhow::anyhow!("Read error: {e}")))?;
        written += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Write error: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Flush error: {e}")))?;
    drop(file);

    if written == 0 {
        let _ = tokio::fs::remove_file(&upload_path).await;
        return Err(AppError::BadRequest("Empty restore upload".into()));
    }

    let result = state.backups.restore_backup(&upload_path).await;
    if result.is_err() {
        // Successful restores consume the archive; failed ones leave it for
        // us to clean up.
        let _ = tokio::fs::remove_file(&upload_path).await;
    }
    Ok(Json(result?))
}
