//! In-memory job table.
//!
//! The table is the single source of truth for job status. Each entry is
//! guarded by its DashMap shard lock, so a reader always sees a transition
//! as soon as the writer returns. Only the orchestrator owning a job writes
//! its entry; the API layer only reads.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::domain::{JobFailure, JobId, JobSnapshot, JobStatus, StatusChange};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct JobRecord {
    status: JobStatus,
    progress_text: String,
    error: Option<JobFailure>,
    result_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    history: Vec<StatusChange>,
}

impl JobRecord {
    fn new(progress_text: String) -> Self {
        let now = Utc::now();
        Self {
            status: JobStatus::Pending,
            progress_text,
            error: None,
            result_url: None,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    fn snapshot(&self, id: &JobId) -> JobSnapshot {
        JobSnapshot {
            id: id.clone(),
            status: self.status,
            progress_text: self.progress_text.clone(),
            error: self.error.clone(),
            result_url: self.result_url.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn move_to(&mut self, to: JobStatus) -> Result<()> {
        let from = self.status;
        self.status = from.transition_to(to)?;
        let now = Utc::now();
        self.updated_at = now;
        self.history.push(StatusChange { from, to, at: now });
        Ok(())
    }
}

/// Process-wide job table.
#[derive(Debug, Default)]
pub struct JobStateMachine {
    jobs: DashMap<JobId, JobRecord>,
}

impl JobStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job in `Pending`.
    pub fn create(&self, id: &JobId, progress_text: impl Into<String>) -> Result<JobSnapshot> {
        match self.jobs.entry(id.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateId(id.to_string())),
            Entry::Vacant(slot) => {
                let record = JobRecord::new(progress_text.into());
                let snapshot = record.snapshot(id);
                slot.insert(record);
                debug!(job_id = %id, "Job created");
                Ok(snapshot)
            }
        }
    }

    /// Move a job along a non-terminal edge and overwrite its progress text.
    ///
    /// Terminal states carry a payload and are only reachable through
    /// [`fail`](Self::fail) and [`complete`](Self::complete).
    pub fn transition(
        &self,
        id: &JobId,
        status: JobStatus,
        progress_text: impl Into<String>,
    ) -> Result<JobSnapshot> {
        let mut record = self.jobs.get_mut(id).ok_or_else(|| Error::unknown_job(id))?;

        if status.is_terminal() {
            return Err(Error::invalid_transition(record.status, status));
        }

        record.move_to(status)?;
        record.progress_text = progress_text.into();
        debug!(job_id = %id, status = %status, "Job transitioned");
        Ok(record.snapshot(id))
    }

    /// Move a job to `Failed`. Repeating the same failure is a no-op.
    pub fn fail(&self, id: &JobId, failure: JobFailure) -> Result<JobSnapshot> {
        let mut record = self.jobs.get_mut(id).ok_or_else(|| Error::unknown_job(id))?;

        if record.status == JobStatus::Failed {
            if record.error.as_ref() == Some(&failure) {
                return Ok(record.snapshot(id));
            }
            return Err(Error::invalid_transition(JobStatus::Failed, JobStatus::Failed));
        }

        record.move_to(JobStatus::Failed)?;
        record.progress_text = format!("Failed: {}", failure.message);
        record.error = Some(failure);
        debug!(job_id = %id, "Job failed");
        Ok(record.snapshot(id))
    }

    /// Move a job from `Publishing` to `Completed` with its public URL.
    pub fn complete(
        &self,
        id: &JobId,
        result_url: impl Into<String>,
        progress_text: impl Into<String>,
    ) -> Result<JobSnapshot> {
        let result_url = result_url.into();
        if result_url.trim().is_empty() {
            return Err(Error::validation("result URL must not be empty"));
        }

        let mut record = self.jobs.get_mut(id).ok_or_else(|| Error::unknown_job(id))?;
        record.move_to(JobStatus::Completed)?;
        record.progress_text = progress_text.into();
        record.result_url = Some(result_url);
        debug!(job_id = %id, "Job completed");
        Ok(record.snapshot(id))
    }

    /// Snapshot the current state of a job.
    pub fn query(&self, id: &JobId) -> Result<JobSnapshot> {
        self.jobs
            .get(id)
            .map(|record| record.snapshot(id))
            .ok_or_else(|| Error::unknown_job(id))
    }

    /// Every status change recorded for a job, oldest first.
    pub fn history(&self, id: &JobId) -> Result<Vec<StatusChange>> {
        self.jobs
            .get(id)
            .map(|record| record.history.clone())
            .ok_or_else(|| Error::unknown_job(id))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureKind;

    fn machine_with_job() -> (JobStateMachine, JobId) {
        let machine = JobStateMachine::new();
        let id = JobId::from("job-1");
        machine.create(&id, "Initializing...").unwrap();
        (machine, id)
    }

    #[test]
    fn test_create_starts_pending() {
        let (machine, id) = machine_with_job();
        let snapshot = machine.query(&id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Pending);
        assert_eq!(snapshot.progress_text, "Initializing...");
        assert!(snapshot.error.is_none());
        assert!(snapshot.result_url.is_none());
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let (machine, id) = machine_with_job();
        let err = machine.create(&id, "again").unwrap_err();
        assert!(matches!(err, Error::DuplicateId(_)));
        assert_eq!(machine.len(), 1);
    }

    #[test]
    fn test_unknown_job() {
        let machine = JobStateMachine::new();
        let id = JobId::from("missing");
        assert!(matches!(machine.query(&id), Err(Error::UnknownJob(_))));
        assert!(matches!(
            machine.transition(&id, JobStatus::Acquiring, "x"),
            Err(Error::UnknownJob(_))
        ));
        assert!(matches!(
            machine.fail(&id, JobFailure::unexpected("boom")),
            Err(Error::UnknownJob(_))
        ));
    }

    #[test]
    fn test_happy_path_records_history() {
        let (machine, id) = machine_with_job();
        machine.transition(&id, JobStatus::Acquiring, "a").unwrap();
        machine.transition(&id, JobStatus::Transcoding, "t").unwrap();
        machine.transition(&id, JobStatus::Publishing, "p").unwrap();
        let snapshot = machine
            .complete(&id, "https://cdn.example/v.mp4", "done")
            .unwrap();

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.result_url.as_deref(), Some("https://cdn.example/v.mp4"));
        assert_eq!(snapshot.progress_text, "done");

        let edges: Vec<_> = machine
            .history(&id)
            .unwrap()
            .into_iter()
            .map(|c| (c.from, c.to))
            .collect();
        assert_eq!(
            edges,
            vec![
                (JobStatus::Pending, JobStatus::Acquiring),
                (JobStatus::Acquiring, JobStatus::Transcoding),
                (JobStatus::Transcoding, JobStatus::Publishing),
                (JobStatus::Publishing, JobStatus::Completed),
            ]
        );
    }

    #[test]
    fn test_transition_rejects_skips_and_terminals() {
        let (machine, id) = machine_with_job();
        assert!(matches!(
            machine.transition(&id, JobStatus::Publishing, "skip"),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            machine.transition(&id, JobStatus::Failed, "no payload"),
            Err(Error::InvalidTransition { .. })
        ));
        assert_eq!(machine.query(&id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_complete_requires_publishing() {
        let (machine, id) = machine_with_job();
        machine.transition(&id, JobStatus::Acquiring, "a").unwrap();
        assert!(matches!(
            machine.complete(&id, "https://x", "done"),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_complete_rejects_empty_url() {
        let (machine, id) = machine_with_job();
        machine.transition(&id, JobStatus::Acquiring, "a").unwrap();
        machine.transition(&id, JobStatus::Transcoding, "t").unwrap();
        machine.transition(&id, JobStatus::Publishing, "p").unwrap();
        assert!(matches!(
            machine.complete(&id, "  ", "done"),
            Err(Error::Validation(_))
        ));
        assert_eq!(machine.query(&id).unwrap().status, JobStatus::Publishing);
    }

    #[test]
    fn test_fail_is_idempotent_for_same_error() {
        let (machine, id) = machine_with_job();
        machine.transition(&id, JobStatus::Acquiring, "a").unwrap();
        let failure = JobFailure::new(FailureKind::AcquisitionFatal, "Private video");

        let first = machine.fail(&id, failure.clone()).unwrap();
        let second = machine.fail(&id, failure).unwrap();
        assert_eq!(first, second);
        assert_eq!(machine.history(&id).unwrap().len(), 2);

        let other = JobFailure::new(FailureKind::PublishFailed, "different");
        assert!(matches!(
            machine.fail(&id, other),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_terminal_jobs_are_frozen() {
        let (machine, id) = machine_with_job();
        machine
            .fail(&id, JobFailure::unexpected("early fault"))
            .unwrap();

        assert!(machine.transition(&id, JobStatus::Acquiring, "x").is_err());
        assert!(machine.complete(&id, "https://x", "x").is_err());

        let a = serde_json::to_vec(&machine.query(&id).unwrap()).unwrap();
        let b = serde_json::to_vec(&machine.query(&id).unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
