//! Write-only per-job audit trail.
//!
//! Each job gets `<audit_dir>/<job_id>.jsonl`; every line is one
//! `{step, timestamp, detail}` record. The running pipeline never reads
//! these files back, and a failed write only produces a warning.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::domain::JobId;
use crate::utils::fs;

/// Named pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStep {
    JobStarted,
    AcquireStart,
    AcquireAttempt,
    AcquireSuccess,
    AcquireFailed,
    TranscodeStart,
    TranscodeTier,
    TranscodeSuccess,
    TranscodeFailed,
    PublishStart,
    PublishSuccess,
    PublishFailed,
    UnexpectedError,
    Cleanup,
    JobFinished,
}

/// One line of the audit file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub step: AuditStep,
    pub timestamp: DateTime<Utc>,
    pub detail: Value,
}

impl AuditRecord {
    pub fn new(step: AuditStep, detail: Value) -> Self {
        Self {
            step,
            timestamp: Utc::now(),
            detail,
        }
    }
}

/// Append-only audit sink rooted at a directory.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// A sink that drops every record.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn path_for(&self, job_id: &JobId) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{job_id}.jsonl")))
    }

    /// Append one record for `job_id`.
    pub async fn record(&self, job_id: &JobId, step: AuditStep, detail: Value) {
        let Some(path) = self.path_for(job_id) else {
            return;
        };

        let record = AuditRecord::new(step, detail);
        if let Err(e) = append_line(&path, &record).await {
            warn!(job_id = %job_id, step = ?step, error = %e, "Failed to write audit record");
        }
    }
}

async fn append_line(path: &Path, record: &AuditRecord) -> crate::Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    fs::ensure_parent_dir_with_op("creating audit directory", path).await?;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| fs::io_error("opening audit file", path, e))?;

    file.write_all(&line)
        .await
        .map_err(|e| fs::io_error("writing audit file", path, e))?;
    file.flush()
        .await
        .map_err(|e| fs::io_error("flushing audit file", path, e))?;
    Ok(())
}

/// Read every record of an audit file. Used by diagnostics and tests.
pub async fn read_records(path: &Path) -> crate::Result<Vec<AuditRecord>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| fs::io_error("reading audit file", path, e))?;

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<AuditRecord>(line).map_err(crate::Error::from))
        .collect()
}
