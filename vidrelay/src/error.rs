//! Application-wide error types.
//!
//! Pipeline stage failures (a blocked download, an exhausted codec chain, a
//! rejected upload) are not errors in this sense: they are recorded on the
//! job as a [`JobFailure`](crate::domain::JobFailure). The variants here are
//! usage errors against the job table, configuration problems and IO faults.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Job not found: {0}")]
    UnknownJob(String),

    #[error("Job already exists: {0}")]
    DuplicateId(String),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn unknown_job(id: impl ToString) -> Self {
        Self::UnknownJob(id.to_string())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// IO error with the operation and path that produced it.
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}
