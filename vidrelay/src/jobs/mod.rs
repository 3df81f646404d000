//! Job table and audit trail.

pub mod audit;
pub mod state_machine;

pub use audit::{AuditLog, AuditRecord, AuditStep};
pub use state_machine::JobStateMachine;
