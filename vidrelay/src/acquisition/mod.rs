//! Acquisition: fetching a remote URL into a validated local file.

pub mod backoff;
pub mod browser;
pub mod classify;
pub mod coordinator;
pub mod credentials;
pub mod engine;
pub mod strategy;
pub mod ytdlp;

pub use backoff::{BackoffConfig, GlobalBackoff};
pub use browser::BrowserKind;
pub use classify::{Classification, FailureClass, classify};
pub use coordinator::{AcquisitionCoordinator, AcquisitionError, Acquired, AttemptOutcome, AttemptRecord};
pub use credentials::{CookieStatus, CookieStore, CredentialBlob};
pub use engine::{FetchEngine, FetchError, FetchRequest};
pub use strategy::{AcquisitionConfig, CredentialSource, StrategyConfig};
pub use ytdlp::YtDlpEngine;
