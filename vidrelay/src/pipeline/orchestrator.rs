//! Per-job pipeline: acquire, transcode, publish, clean up.
//!
//! Every local file the stages produce is parked in a list owned by
//! [`PipelineOrchestrator::run`]. Once the stages stop, whether they
//! returned or panicked, that list is released, and only then is the job
//! moved to its terminal status. A poller that sees `completed` or `failed`
//! therefore never sees a local file still on disk.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;
use tracing::{error, info, warn};

use super::handle::LocalFileHandle;
use crate::acquisition::{AcquisitionCoordinator, AcquisitionError, CredentialBlob};
use crate::domain::{FailureKind, JobFailure, JobId, JobStatus};
use crate::jobs::{AuditLog, AuditStep, JobStateMachine};
use crate::publish::Publisher;
use crate::transcode::TranscodeCoordinator;

pub const PROGRESS_PENDING: &str = "Initializing...";
pub const PROGRESS_ACQUIRING: &str = "Connecting to source...";
pub const PROGRESS_TRANSCODING: &str = "Converting video...";
pub const PROGRESS_PUBLISHING: &str = "Uploading video...";
pub const PROGRESS_COMPLETED: &str = "Completed successfully!";

/// Runs one job's stages and records the outcome.
pub struct PipelineOrchestrator {
    jobs: Arc<JobStateMachine>,
    acquisition: Arc<AcquisitionCoordinator>,
    transcode: Arc<TranscodeCoordinator>,
    publisher: Arc<dyn Publisher>,
    audit: AuditLog,
}

impl PipelineOrchestrator {
    pub fn new(
        jobs: Arc<JobStateMachine>,
        acquisition: Arc<AcquisitionCoordinator>,
        transcode: Arc<TranscodeCoordinator>,
        publisher: Arc<dyn Publisher>,
        audit: AuditLog,
    ) -> Self {
        Self {
            jobs,
            acquisition,
            transcode,
            publisher,
            audit,
        }
    }

    pub fn jobs(&self) -> &Arc<JobStateMachine> {
        &self.jobs
    }

    /// Drive `job_id` to a terminal status. Never panics past this call.
    pub async fn run(&self, job_id: JobId, url: String, credential: Option<CredentialBlob>) {
        self.audit
            .record(
                &job_id,
                AuditStep::JobStarted,
                json!({"url": url, "with_credential": credential.is_some()}),
            )
            .await;

        let mut held: Vec<LocalFileHandle> = Vec::new();
        let outcome = AssertUnwindSafe(self.execute(&job_id, &url, credential.as_ref(), &mut held))
            .catch_unwind()
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(job_id = %job_id, %message, "Pipeline stage panicked");
                self.audit
                    .record(&job_id, AuditStep::UnexpectedError, json!({"error": message}))
                    .await;
                Err(JobFailure::unexpected(message))
            }
        };

        self.cleanup(&job_id, held).await;

        let status = match outcome {
            Ok(result_url) => self.finish_completed(&job_id, result_url),
            Err(failure) => self.finish_failed(&job_id, failure),
        };

        self.audit
            .record(&job_id, AuditStep::JobFinished, json!({"status": status}))
            .await;
    }

    /// Run the stages in order. Produced files are pushed onto `held`.
    async fn execute(
        &self,
        job_id: &JobId,
        url: &str,
        credential: Option<&CredentialBlob>,
        held: &mut Vec<LocalFileHandle>,
    ) -> Result<String, JobFailure> {
        self.advance(job_id, JobStatus::Acquiring, PROGRESS_ACQUIRING)?;
        self.audit
            .record(job_id, AuditStep::AcquireStart, json!({"url": url}))
            .await;

        let acquired = match self.acquisition.acquire(job_id, url, credential).await {
            Ok(acquired) => acquired,
            Err(e) => {
                let kind = match &e {
                    AcquisitionError::Fatal { .. } => FailureKind::AcquisitionFatal,
                    AcquisitionError::Exhausted { .. } => FailureKind::AcquisitionExhausted,
                };
                self.audit
                    .record(
                        job_id,
                        AuditStep::AcquireFailed,
                        json!({"kind": kind, "error": e.to_string(), "attempts": e.attempts().len()}),
                    )
                    .await;
                return Err(JobFailure::new(kind, e.to_string()));
            }
        };
        self.audit
            .record(
                job_id,
                AuditStep::AcquireSuccess,
                json!({
                    "strategy": acquired.strategy,
                    "attempts": acquired.attempts.len(),
                    "file": acquired.file.path().display().to_string(),
                }),
            )
            .await;
        held.push(acquired.file);

        self.advance(job_id, JobStatus::Transcoding, PROGRESS_TRANSCODING)?;
        self.audit
            .record(job_id, AuditStep::TranscodeStart, json!({}))
            .await;

        let transcoded = match self.transcode.transcode(job_id, &held[0]).await {
            Ok(transcoded) => transcoded,
            Err(e) => {
                self.audit
                    .record(
                        job_id,
                        AuditStep::TranscodeFailed,
                        json!({"error": e.last_error, "tiers": e.tiers.len()}),
                    )
                    .await;
                return Err(JobFailure::new(FailureKind::TranscodeExhausted, e.to_string()));
            }
        };
        self.audit
            .record(
                job_id,
                AuditStep::TranscodeSuccess,
                json!({"tier": transcoded.tier, "tiers": transcoded.tiers.len()}),
            )
            .await;
        held.push(transcoded.file);

        self.advance(job_id, JobStatus::Publishing, PROGRESS_PUBLISHING)?;
        self.audit
            .record(
                job_id,
                AuditStep::PublishStart,
                json!({"publisher": self.publisher.name()}),
            )
            .await;

        // The only publish call for this job.
        match self.publisher.publish(held[1].path()).await {
            Ok(result_url) => {
                self.audit
                    .record(job_id, AuditStep::PublishSuccess, json!({"url": result_url}))
                    .await;
                Ok(result_url)
            }
            Err(e) => {
                self.audit
                    .record(job_id, AuditStep::PublishFailed, json!({"error": e.0}))
                    .await;
                Err(JobFailure::new(FailureKind::PublishFailed, e.0))
            }
        }
    }

    fn advance(&self, job_id: &JobId, status: JobStatus, progress: &str) -> Result<(), JobFailure> {
        self.jobs
            .transition(job_id, status, progress)
            .map(|_| info!(job_id = %job_id, status = %status, "Job advanced"))
            .map_err(JobFailure::unexpected)
    }

    async fn cleanup(&self, job_id: &JobId, held: Vec<LocalFileHandle>) {
        let total = held.len();
        let mut failed = 0usize;
        for handle in held {
            let path = handle.path().to_path_buf();
            if let Err(e) = handle.release().await {
                failed += 1;
                warn!(job_id = %job_id, path = %path.display(), error = %e, "Cleanup failed");
            }
        }
        self.audit
            .record(
                job_id,
                AuditStep::Cleanup,
                json!({"files": total, "failed": failed}),
            )
            .await;
    }

    fn finish_completed(&self, job_id: &JobId, result_url: String) -> JobStatus {
        match self.jobs.complete(job_id, result_url, PROGRESS_COMPLETED) {
            Ok(_) => {
                info!(job_id = %job_id, "Job completed");
                JobStatus::Completed
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to record completion");
                self.finish_failed(job_id, JobFailure::unexpected(e))
            }
        }
    }

    fn finish_failed(&self, job_id: &JobId, failure: JobFailure) -> JobStatus {
        warn!(job_id = %job_id, kind = %failure.kind, error = %failure.message, "Job failed");
        match self.jobs.fail(job_id, failure) {
            Ok(snapshot) => snapshot.status,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to record job failure");
                self.jobs
                    .query(job_id)
                    .map(|s| s.status)
                    .unwrap_or(JobStatus::Failed)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "stage panicked".to_string()
    }
}
