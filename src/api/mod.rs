//! HTTP boundary: routes, request/response shapes, and error mapping.
//!
//! Thin by design — every operation delegates to the [`Manager`]; the only
//! logic living here is wire-shape concerns (id validation, the archive
//! hint, the `/files/...` redirect, and streaming the ZIP body).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::error::ServiceError;
use crate::manager::Manager;
use crate::model::Task;

/// Shared application state.
pub type AppState = Arc<Manager>;

/// A task becomes "ready to archive" once it holds this many files; only
/// then does the status response advertise the archive URL.
const ARCHIVE_HINT_MIN_FILES: usize = 3;

/// Buffer between the ZIP writer and the response body stream.
const STREAM_BUFFER: usize = 64 * 1024;

/// Builds the service router.
pub fn router(manager: AppState) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/tasks", post(create_task))
        .route("/api/tasks/{id}", get(get_task_status).delete(delete_task))
        .route("/api/tasks/{id}/files", post(add_file_to_task))
        .route("/api/tasks/{id}/archive", get(download_archive))
        .route("/files/{name}", get(redirect_to_archive))
        .with_state(manager)
}

/// Standard API error response body.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
}

impl ApiError {
    fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_u16(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));
        (status, body).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::TaskNotFound => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            ServiceError::MaxFilesExceeded => Self::new(StatusCode::CONFLICT, err.to_string()),
            ServiceError::ServerBusy | ServiceError::ServerCancelled => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ServiceError::Loader(loader_error) => {
                warn!(error = %loader_error, "unhandled loader error");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

fn validate_id(id: i64) -> Result<i64, ApiError> {
    if id <= 0 {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "id must be > 0"));
    }
    Ok(id)
}

async fn ping() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateTaskResponse {
    task_id: i64,
}

async fn create_task(
    State(manager): State<AppState>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    let task_id = manager.create_task()?;
    Ok((StatusCode::CREATED, Json(CreateTaskResponse { task_id })))
}

async fn delete_task(
    State(manager): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = validate_id(id)?;
    manager.delete_task(id)?;
    Ok(Json(serde_json::json!({})))
}

#[derive(Debug, Serialize, Deserialize)]
struct AddFileRequest {
    #[serde(default)]
    url: String,
}

async fn add_file_to_task(
    State(manager): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AddFileRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = validate_id(id)?;
    if request.url.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "url is required"));
    }
    manager.add_file_to_task(id, &request.url)?;
    Ok(Json(serde_json::json!({})))
}

#[derive(Debug, Serialize, Deserialize)]
struct GetTaskResponse {
    task: Task,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    archive: Option<String>,
}

async fn get_task_status(
    State(manager): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<GetTaskResponse>, ApiError> {
    let id = validate_id(id)?;
    let task = manager.get_task_status(id).await?;

    let archive =
        (task.files.len() >= ARCHIVE_HINT_MIN_FILES).then(|| format!("/files/task_{id}.zip"));

    Ok(Json(GetTaskResponse { task, archive }))
}

async fn download_archive(
    State(manager): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let id = validate_id(id)?;

    // Existence only: probing would mark failures terminal before the
    // download gets to report them in status.json.
    manager.task_exists(id)?;

    // The slot is claimed before the 200 goes out; the spawned generation
    // task owns it from here and Drop releases it on every path.
    let slot = manager.acquire_download_slot()?;

    let (reader, writer) = tokio::io::duplex(STREAM_BUFFER);
    let generator = Arc::clone(&manager);
    tokio::spawn(async move {
        if let Err(error) = generator.process_task_with_slot(slot, id, writer).await {
            warn!(task_id = id, %error, "archive generation failed");
        }
    });

    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"task_{id}.zip\""),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(reader))).into_response())
}

async fn redirect_to_archive(Path(name): Path<String>) -> Result<Redirect, ApiError> {
    let id = name
        .strip_prefix("task_")
        .and_then(|rest| rest.strip_suffix(".zip"))
        .and_then(|digits| digits.parse::<i64>().ok())
        .filter(|&id| id > 0)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "not found"))?;

    Ok(Redirect::temporary(&format!("/api/tasks/{id}/archive")))
}
