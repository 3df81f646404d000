//! Transcode engine seam.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::tier::TierParams;

/// One encode or remux invocation.
#[derive(Debug, Clone)]
pub struct EncodeRequest<'a> {
    pub input: &'a Path,
    /// Where the engine must write its output.
    pub output: &'a Path,
    pub params: &'a TierParams,
    pub timeout: Duration,
}

/// Failure reported by a transcode engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EncodeError {
    pub message: String,
    pub timed_out: bool,
}

impl EncodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            message: format!("timed out after {}s", after.as_secs()),
            timed_out: true,
        }
    }
}

/// Re-encodes or remuxes a local file.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Re-encode `request.input` with the tier's codec parameters.
    async fn encode(&self, request: &EncodeRequest<'_>) -> Result<PathBuf, EncodeError>;

    /// Copy streams into a new container without re-encoding.
    async fn remux(&self, request: &EncodeRequest<'_>) -> Result<PathBuf, EncodeError>;
}
