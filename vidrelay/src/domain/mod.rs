//! Domain types shared by the pipeline and the API layer.

pub mod job;

pub use job::{FailureKind, JobFailure, JobId, JobSnapshot, JobStatus, StatusChange};
