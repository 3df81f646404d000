//! API request and response models.

use serde::{Deserialize, Serialize};

use crate::acquisition::CredentialBlob;
use crate::domain::JobSnapshot;
use crate::logging::LogFileInfo;

/// `POST /api/download` body.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    /// Base64 or plain Netscape cookies for this job only.
    #[serde(default)]
    pub cookies: Option<CredentialBlob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub task_id: String,
    pub status: String,
}

/// `GET /api/status/{task_id}` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: String,
    pub progress: String,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub cloudinary_url: Option<String>,
}

impl From<JobSnapshot> for TaskStatusResponse {
    fn from(snapshot: JobSnapshot) -> Self {
        Self {
            task_id: snapshot.id.to_string(),
            status: snapshot.status.as_str().to_string(),
            progress: snapshot.progress_text,
            error_kind: snapshot.error.as_ref().map(|e| e.kind.as_str().to_string()),
            error: snapshot.error.map(|e| e.message),
            cloudinary_url: snapshot.result_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieUploadResponse {
    pub message: String,
    pub path: String,
    pub cookie_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub uptime_secs: u64,
    /// Pipelines still running.
    pub active_jobs: usize,
}

/// `PUT /api/logging` body.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub files: Vec<LogFileInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub message: String,
    pub version: String,
}
