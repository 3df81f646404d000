//! Job lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Opaque, immutable job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job lifecycle status.
///
/// ```text
/// Pending -> Acquiring -> Transcoding -> Publishing -> Completed
///    \           \             \              \
///     +-----------+-------------+--------------+--> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Acquiring,
    Transcoding,
    Publishing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acquiring => "acquiring",
            Self::Transcoding => "transcoding",
            Self::Publishing => "publishing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "acquiring" => Some(Self::Acquiring),
            "transcoding" => Some(Self::Transcoding),
            "publishing" => Some(Self::Publishing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Completed and Failed are terminal; nothing leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `target` is reachable from `self` in one step.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        match (self, target) {
            (Pending, Acquiring) => true,
            (Acquiring, Transcoding) => true,
            (Transcoding, Publishing) => true,
            (Publishing, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Attempt to transition to a new status.
    pub fn transition_to(&self, target: JobStatus) -> Result<JobStatus, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::invalid_transition(self, target))
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified reason a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Upstream permanently denied access; not retried.
    AcquisitionFatal,
    /// Every acquisition strategy produced only retryable failures.
    AcquisitionExhausted,
    /// Every codec tier failed or produced invalid output.
    TranscodeExhausted,
    /// The publish collaborator rejected the upload.
    PublishFailed,
    /// A stage faulted in a way the pipeline did not anticipate.
    Unexpected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcquisitionFatal => "ACQUISITION_FATAL",
            Self::AcquisitionExhausted => "ACQUISITION_EXHAUSTED",
            Self::TranscodeExhausted => "TRANSCODE_EXHAUSTED",
            Self::PublishFailed => "PUBLISH_FAILED",
            Self::Unexpected => "UNEXPECTED",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    /// Human-readable description shown to polling callers.
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl std::fmt::Display) -> Self {
        Self::new(FailureKind::Unexpected, format!("Unexpected error: {message}"))
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Point-in-time view of a job, safe to hand to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub progress_text: String,
    pub error: Option<JobFailure>,
    pub result_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One recorded status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
}
