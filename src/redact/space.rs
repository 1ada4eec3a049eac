//! Scratch-space guard run before each redaction job.

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a capacity check
#[derive(Debug, Clone, Copy)]
pub struct CapacityCheck {
    pub ok: bool,
    pub required_bytes: u64,
    pub available_bytes: u64,
    pub total_bytes: u64,
}

/// Scratch estimate for a redaction run: decode + re-encode + final artifact
pub fn estimate_scratch_bytes(source_bytes: u64, multiplier: f64) -> u64 {
    (source_bytes as f64 * multiplier).ceil() as u64
}

/// Check free space in `working_dir` against `estimated_bytes`.
///
/// Runs once per job, not once per process: concurrent jobs consume space
/// incrementally, so an earlier result goes stale.
pub fn check_capacity(working_dir: &Path, estimated_bytes: u64) -> Result<CapacityCheck, SpaceError> {
    let available = fs2::available_space(working_dir)?;
    let total = fs2::total_space(working_dir)?;
    Ok(evaluate(available, total, estimated_bytes))
}

fn evaluate(available: u64, total: u64, required: u64) -> CapacityCheck {
    CapacityCheck {
        ok: available >= required,
        required_bytes: required,
        available_bytes: available,
        total_bytes: total,
    }
}
