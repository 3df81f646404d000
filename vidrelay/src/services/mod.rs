//! Service layer: job submission and application wiring.

pub mod container;
pub mod job_service;

pub use container::ServiceContainer;
pub use job_service::JobService;
