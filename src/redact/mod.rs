//! Audio redaction: capacity guard and the external silencing engine.

pub mod engine;
pub mod space;

pub use engine::{EngineError, FfmpegRedactor, Redactor};
pub use space::{CapacityCheck, SpaceError, check_capacity, estimate_scratch_bytes};
