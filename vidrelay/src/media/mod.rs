//! Media inspection: probing and the validation gate.

pub mod probe;
pub mod validation;

pub use probe::{FfprobeProbe, MediaProbe, ProbeError, ProbeReport};
pub use validation::{ValidationConfig, ValidationFailure, ValidationGate, detect_block_page};
