//! Job submission and status routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::api::error::ApiResult;
use crate::api::models::{DownloadRequest, DownloadResponse, TaskStatusResponse};
use crate::api::server::AppState;
use crate::domain::{JobId, JobStatus};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/download", post(submit_download))
        .route("/status/{task_id}", get(get_status))
}

/// Start a job. Returns as soon as it is registered.
async fn submit_download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Json<DownloadResponse>> {
    let job_id = state.job_service.submit(&request.url, request.cookies)?;

    Ok(Json(DownloadResponse {
        task_id: job_id.to_string(),
        status: JobStatus::Pending.as_str().to_string(),
    }))
}

async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskStatusResponse>> {
    let snapshot = state.job_service.get_status(&JobId::from(task_id))?;
    Ok(Json(TaskStatusResponse::from(snapshot)))
}
