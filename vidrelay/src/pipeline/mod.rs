//! Job pipeline orchestration.

pub mod handle;
pub mod orchestrator;

pub use handle::LocalFileHandle;
pub use orchestrator::PipelineOrchestrator;
