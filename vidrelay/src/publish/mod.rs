//! Publishing transcoded files to external storage.

pub mod cloudinary;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cloudinary::{CloudinaryCredentials, CloudinaryPublisher};

/// Publish failure. Not retried by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PublishError(pub String);

/// Uploads a local file and returns its public URL.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, path: &Path) -> Result<String, PublishError>;
}

/// Publisher used when no storage backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredPublisher;

#[async_trait]
impl Publisher for UnconfiguredPublisher {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    async fn publish(&self, _path: &Path) -> Result<String, PublishError> {
        Err(PublishError(
            "Upload failed: CLOUDINARY_URL is not configured".to_string(),
        ))
    }
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// `cloudinary://<api_key>:<api_secret>@<cloud_name>`.
    pub cloudinary_url: Option<String>,
    /// Folder prefix for public ids.
    pub folder: String,
    pub max_upload_bytes: u64,
    pub request_timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            cloudinary_url: None,
            folder: "youtube_downloads".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
            request_timeout_secs: 600,
        }
    }
}
