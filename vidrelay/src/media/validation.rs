//! Validation gate for acquired and transcoded files.
//!
//! Checks run in order and stop at the first failure:
//! 1. the file exists and is larger than the size floor,
//! 2. its first bytes do not look like an HTML or error document,
//! 3. the probe finds a video stream in a recognized container,
//! 4. the probed duration is strictly positive.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::probe::{MediaProbe, ProbeReport};

/// Gate thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Files must be strictly larger than this.
    pub min_size_bytes: u64,
    /// How many leading bytes to inspect for block-page signatures.
    pub sniff_bytes: usize,
    /// Timeout for one probe invocation.
    pub probe_timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 1024,
            sniff_bytes: 2048,
            probe_timeout_secs: 30,
        }
    }
}

/// Reason a file was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("file does not exist")]
    Missing,
    #[error("file too small ({size} bytes, floor {floor})")]
    TooSmall { size: u64, floor: u64 },
    #[error("file looks like a {0} document, not media")]
    BlockPage(&'static str),
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("no video stream found")]
    NoVideoStream,
    #[error("duration is not positive ({0}s)")]
    NoDuration(f64),
}

/// Leading-byte signatures of documents that are never media.
///
/// Matched case-insensitively against the first bytes of the file after
/// leading whitespace is skipped.
const DOCUMENT_SIGNATURES: &[(&str, &str)] = &[
    ("<!doctype html", "HTML"),
    ("<html", "HTML"),
    ("<head", "HTML"),
    ("<body", "HTML"),
    ("<?xml", "XML"),
];

/// Detect an HTML/XML/JSON error document in the head of a file.
pub fn detect_block_page(head: &[u8]) -> Option<&'static str> {
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    let trimmed = text.trim_start_matches(|c: char| c.is_whitespace() || c == '\u{feff}');

    for (signature, kind) in DOCUMENT_SIGNATURES {
        if trimmed.starts_with(signature) {
            return Some(kind);
        }
    }

    // HTML fragments sometimes follow a short preamble.
    if text.contains("<!doctype html") || text.contains("<html") {
        return Some("HTML");
    }

    if trimmed.starts_with('{') && text.contains("\"error\"") {
        return Some("JSON error");
    }

    None
}

/// The shared validation gate.
#[derive(Clone)]
pub struct ValidationGate {
    probe: Arc<dyn MediaProbe>,
    config: ValidationConfig,
}

impl ValidationGate {
    pub fn new(probe: Arc<dyn MediaProbe>, config: ValidationConfig) -> Self {
        Self { probe, config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Run every check and return the probe facts on success.
    pub async fn inspect(&self, path: &Path) -> Result<ProbeReport, ValidationFailure> {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(ValidationFailure::Missing),
        };
        if size <= self.config.min_size_bytes {
            return Err(ValidationFailure::TooSmall {
                size,
                floor: self.config.min_size_bytes,
            });
        }

        let head = read_head(path, self.config.sniff_bytes)
            .await
            .map_err(|_| ValidationFailure::Missing)?;
        if let Some(kind) = detect_block_page(&head) {
            return Err(ValidationFailure::BlockPage(kind));
        }

        let report = self
            .probe
            .probe(path)
            .await
            .map_err(|e| ValidationFailure::ProbeFailed(e.to_string()))?;

        if !report.container_recognized {
            return Err(ValidationFailure::ProbeFailed(
                "container not recognized".to_string(),
            ));
        }
        if !report.has_video_stream {
            return Err(ValidationFailure::NoVideoStream);
        }
        if report.duration_seconds.is_nan() || report.duration_seconds <= 0.0 {
            return Err(ValidationFailure::NoDuration(report.duration_seconds));
        }

        debug!(
            path = %path.display(),
            size,
            duration = report.duration_seconds,
            "Media passed validation"
        );
        Ok(report)
    }

    /// Side-effect-free pass/fail check.
    pub async fn is_valid_media(&self, path: &Path) -> bool {
        self.inspect(path).await.is_ok()
    }
}

async fn read_head(path: &Path, limit: usize) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut head).await?;
    Ok(head)
}
