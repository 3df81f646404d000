//! Cookie credentials.
//!
//! A credential blob arrives either base64-encoded or as plain Netscape
//! cookies.txt text. Its contents are never logged: [`CredentialBlob`]'s
//! `Debug` prints only the length.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::JobId;
use crate::utils::fs;
use crate::{Error, Result};

const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";

/// Opaque per-job credential payload.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CredentialBlob(String);

impl CredentialBlob {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Decode into cookie text.
    ///
    /// Base64 is tried first; if the payload is not valid base64 (or does not
    /// decode to UTF-8), it is taken as plain text.
    pub fn decode(&self) -> Result<String> {
        let raw = self.0.trim();
        if raw.is_empty() {
            return Err(Error::validation("credential is empty"));
        }

        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let text = match STANDARD.decode(compact.as_bytes()) {
            Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| self.0.clone()),
            Err(_) => self.0.clone(),
        };

        if !validate_cookie_text(&text) {
            return Err(Error::validation(
                "credential is not in a recognized cookies.txt format",
            ));
        }
        Ok(text)
    }
}

impl std::fmt::Debug for CredentialBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CredentialBlob(<redacted {} bytes>)", self.0.len())
    }
}

/// Whether text looks like an exported cookie file.
pub fn validate_cookie_text(content: &str) -> bool {
    let lowered = content.to_lowercase();
    if lowered.contains("youtube.com") || lowered.contains("google.com") {
        return true;
    }
    if content.trim_start().starts_with(NETSCAPE_HEADER) {
        return true;
    }
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .any(|line| line.split('\t').count() >= 6)
}

/// Number of non-comment, non-blank lines.
pub fn count_cookies(content: &str) -> usize {
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .count()
}

/// Decode an uploaded body as UTF-8, falling back to Latin-1.
pub fn decode_upload(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Status of the stored default credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CookieStatus {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_count: Option<usize>,
}

/// The operator-managed default cookie file.
#[derive(Debug, Clone)]
pub struct CookieStore {
    path: PathBuf,
}

impl CookieStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate and persist cookie text, returning the entry count.
    pub async fn save(&self, content: &str) -> Result<usize> {
        if !validate_cookie_text(content) {
            return Err(Error::validation(
                "Invalid cookie format. Please upload a cookies.txt file exported from your browser.",
            ));
        }

        fs::ensure_parent_dir_with_op("creating cookie directory", &self.path).await?;
        write_private(&self.path, content.as_bytes()).await?;

        let count = count_cookies(content);
        info!(path = %self.path.display(), cookie_count = count, "Stored default cookies");
        Ok(count)
    }

    /// Whether a non-empty stored file exists.
    pub async fn is_available(&self) -> bool {
        fs::file_size(&self.path).await.is_some_and(|len| len > 0)
    }

    /// Report on the stored file without exposing its contents.
    pub async fn inspect(&self) -> CookieStatus {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return CookieStatus {
                    valid: false,
                    message: "No cookies file found".to_string(),
                    cookie_count: None,
                };
            }
            Err(e) => {
                return CookieStatus {
                    valid: false,
                    message: format!("Error reading cookies: {e}"),
                    cookie_count: None,
                };
            }
        };

        let content = decode_upload(&bytes);
        if !validate_cookie_text(&content) {
            return CookieStatus {
                valid: false,
                message: "Invalid cookie format".to_string(),
                cookie_count: None,
            };
        }

        CookieStatus {
            valid: true,
            message: "Cookies file is valid".to_string(),
            cookie_count: Some(count_cookies(&content)),
        }
    }
}

/// A per-job cookie file, deleted when dropped.
#[derive(Debug)]
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    /// Materialize decoded cookie text as `<dir>/<job_id>.cookies.txt`.
    pub async fn write(dir: &Path, job_id: &JobId, text: &str) -> Result<Self> {
        fs::ensure_dir_all_with_op("creating work directory", dir).await?;
        let path = dir.join(format!("{job_id}.cookies.txt"));
        write_private(&path, text.as_bytes()).await?;
        debug!(job_id = %job_id, "Wrote per-job cookie file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CookieFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove cookie file"),
        }
    }
}

async fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    tokio::fs::write(path, data)
        .await
        .map_err(|e| fs::io_error("writing cookie file", path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| fs::io_error("restricting cookie file", path, e))?;
    }
    Ok(())
}
