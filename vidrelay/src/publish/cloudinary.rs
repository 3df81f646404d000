//! Cloudinary signed video upload.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

use super::{PublishConfig, PublishError, Publisher};
use crate::{Error, Result};

const API_BASE: &str = "https://api.cloudinary.com/v1_1";

/// Account credentials parsed from a `cloudinary://` URL.
#[derive(Clone, PartialEq, Eq)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    api_secret: String,
}

impl CloudinaryCredentials {
    pub fn new(
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Parse `cloudinary://<api_key>:<api_secret>@<cloud_name>`.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| Error::config(format!("invalid CLOUDINARY_URL: {e}")))?;
        if url.scheme() != "cloudinary" {
            return Err(Error::config("CLOUDINARY_URL must use the cloudinary:// scheme"));
        }

        let api_key = url.username();
        let api_secret = url.password().unwrap_or_default();
        let cloud_name = url.host_str().unwrap_or_default();
        if api_key.is_empty() || api_secret.is_empty() || cloud_name.is_empty() {
            return Err(Error::config(
                "CLOUDINARY_URL must include api key, api secret and cloud name",
            ));
        }

        Ok(Self::new(cloud_name, api_key, api_secret))
    }
}

impl std::fmt::Debug for CloudinaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// SHA-256 request signature over sorted `key=value` pairs.
pub fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<_> = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let to_sign = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    error: Option<UploadErrorBody>,
}

#[derive(Debug, Deserialize)]
struct UploadErrorBody {
    message: String,
}

/// [`Publisher`] that uploads to Cloudinary as a video resource.
///
/// Requests are signed with SHA-256, so the account's signature algorithm
/// must be set to SHA-256.
pub struct CloudinaryPublisher {
    client: reqwest::Client,
    credentials: CloudinaryCredentials,
    folder: String,
    max_upload_bytes: u64,
    endpoint: String,
}

impl CloudinaryPublisher {
    pub fn new(client: reqwest::Client, credentials: CloudinaryCredentials, config: &PublishConfig) -> Self {
        let endpoint = format!("{API_BASE}/{}/video/upload", credentials.cloud_name);
        Self {
            client,
            credentials,
            folder: config.folder.trim_matches('/').to_string(),
            max_upload_bytes: config.max_upload_bytes,
            endpoint,
        }
    }

    /// Override the upload endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn public_id(&self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("video");
        if self.folder.is_empty() {
            stem.to_string()
        } else {
            format!("{}/{stem}", self.folder)
        }
    }

    /// Signed form fields, excluding the file itself.
    pub fn signed_fields(&self, path: &Path, timestamp: i64) -> Vec<(&'static str, String)> {
        let params = vec![
            ("overwrite", "true".to_string()),
            ("public_id", self.public_id(path)),
            ("timestamp", timestamp.to_string()),
        ];
        let signature = sign(&params, &self.credentials.api_secret);

        let mut fields = params;
        fields.push(("api_key", self.credentials.api_key.clone()));
        fields.push(("signature", signature));
        fields
    }
}

#[async_trait]
impl Publisher for CloudinaryPublisher {
    fn name(&self) -> &'static str {
        "cloudinary"
    }

    async fn publish(&self, path: &Path) -> std::result::Result<String, PublishError> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| PublishError(format!("Upload failed: cannot read {}: {e}", path.display())))?
            .len();

        if size > self.max_upload_bytes {
            return Err(PublishError(format!(
                "File too large for upload ({:.1} MB > {:.0} MB limit)",
                size as f64 / (1024.0 * 1024.0),
                self.max_upload_bytes as f64 / (1024.0 * 1024.0)
            )));
        }

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| PublishError(format!("Upload failed: cannot open {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4")
            .to_string();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = reqwest::multipart::Part::stream_with_length(body, size)
            .file_name(file_name)
            .mime_str("video/mp4")
            .map_err(|e| PublishError(format!("Upload failed: {e}")))?;

        let mut form = reqwest::multipart::Form::new().part("file", part);
        for (key, value) in self.signed_fields(path, chrono::Utc::now().timestamp()) {
            form = form.text(key, value);
        }

        debug!(endpoint = %self.endpoint, size, "Uploading to Cloudinary");
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PublishError(format!("Upload failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PublishError(format!("Upload failed: {e}")))?;
        let parsed: Option<UploadResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|r| r.error)
                .map(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(PublishError(format!("Upload failed: {message}")));
        }

        let url = parsed
            .and_then(|r| r.secure_url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| PublishError("Upload failed: response has no secure_url".to_string()))?;

        info!(url = %url, "Uploaded to Cloudinary");
        Ok(url)
    }
}
