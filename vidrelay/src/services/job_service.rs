//! Job submission and status lookup.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use url::Url;

use crate::acquisition::CredentialBlob;
use crate::domain::{JobId, JobSnapshot};
use crate::jobs::JobStateMachine;
use crate::pipeline::PipelineOrchestrator;
use crate::pipeline::orchestrator::PROGRESS_PENDING;
use crate::{Error, Result};

/// Entry point for the API layer: one spawned pipeline per submission.
pub struct JobService {
    orchestrator: Arc<PipelineOrchestrator>,
    jobs: Arc<JobStateMachine>,
    tracker: TaskTracker,
}

impl JobService {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        let jobs = orchestrator.jobs().clone();
        Self {
            orchestrator,
            jobs,
            tracker: TaskTracker::new(),
        }
    }

    /// Register a Pending job and start its pipeline. Returns immediately.
    pub fn submit(&self, url: &str, credential: Option<CredentialBlob>) -> Result<JobId> {
        let url = validate_source_url(url)?;
        let credential = credential.filter(|c| !c.is_empty());

        let job_id = JobId::generate();
        self.jobs.create(&job_id, PROGRESS_PENDING)?;
        info!(job_id = %job_id, url = %url, with_credential = credential.is_some(), "Job submitted");

        let orchestrator = self.orchestrator.clone();
        let id = job_id.clone();
        self.tracker.spawn(async move {
            orchestrator.run(id, url, credential).await;
        });

        Ok(job_id)
    }

    pub fn get_status(&self, job_id: &JobId) -> Result<JobSnapshot> {
        self.jobs.query(job_id)
    }

    pub fn jobs(&self) -> &Arc<JobStateMachine> {
        &self.jobs
    }

    /// Pipelines still running.
    pub fn active_jobs(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every pipeline spawned so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Wait up to `timeout` for running pipelines. Returns false on timeout.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let active = self.tracker.len();
        if active > 0 {
            info!(active, "Waiting for running jobs");
        }
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(active = self.tracker.len(), "Shutdown timeout reached with jobs still running");
                false
            }
        }
    }
}

/// Accept only absolute http(s) URLs with a host.
pub fn validate_source_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("URL is required"));
    }
    let url = Url::parse(trimmed).map_err(|e| Error::validation(format!("Invalid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::validation("URL must use http or https"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::validation("URL must include a host"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_source_url() {
        assert!(validate_source_url("https://www.youtube.com/watch?v=abc").is_ok());
        assert_eq!(
            validate_source_url("  http://example.com/v  ").unwrap(),
            "http://example.com/v"
        );
        assert!(validate_source_url("").is_err());
        assert!(validate_source_url("   ").is_err());
        assert!(validate_source_url("ftp://example.com/v").is_err());
        assert!(validate_source_url("not a url").is_err());
        assert!(matches!(
            validate_source_url("file:///etc/passwd"),
            Err(Error::Validation(_))
        ));
    }
}
