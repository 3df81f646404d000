//! Fetch engine seam.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::browser::BrowserKind;
use super::strategy::StrategyConfig;
use crate::domain::JobId;

/// Everything a fetch engine needs for one attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub job_id: &'a JobId,
    /// 1-based attempt number within the job.
    pub attempt: u32,
    pub url: &'a str,
    pub strategy: &'a StrategyConfig,
    /// Cookie file to pass to the engine, if the strategy uses one.
    pub cookie_file: Option<&'a Path>,
    /// Browser whose cookie store the engine should read.
    pub browser: Option<BrowserKind>,
    /// Directory the output must be written to.
    pub output_dir: &'a Path,
    pub timeout: Duration,
}

impl FetchRequest<'_> {
    pub fn has_credential(&self) -> bool {
        self.cookie_file.is_some() || self.browser.is_some()
    }

    /// Filename prefix reserved for this attempt's output.
    pub fn output_prefix(&self) -> String {
        format!("{}_{}", self.job_id, self.attempt)
    }
}

/// Failure reported by a fetch engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    /// Raw diagnostic text from the tool, used for classification.
    pub message: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: None,
            timed_out: false,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            message: format!("fetch timed out after {}s", after.as_secs()),
            exit_code: None,
            timed_out: true,
        }
    }
}

/// Downloads a remote URL to a local file.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &'static str;

    /// Fetch `request.url` into `request.output_dir`, returning the produced file.
    async fn fetch(&self, request: &FetchRequest<'_>) -> Result<PathBuf, FetchError>;
}
