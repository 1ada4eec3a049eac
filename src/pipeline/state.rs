//! Recording state and the per-job error taxonomy.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::detect::DetectError;
use crate::redact::{EngineError, SpaceError};
use crate::transcription::TranscriptionError;

/// Pipeline stage a recording is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Queued,
    Transcribing,
    Detecting,
    Redacting,
    Done,
    Failed,
}

impl RecordingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordingState::Done | RecordingState::Failed)
    }

    /// Transitions are strictly sequential; any non-terminal state may fail
    pub fn can_advance_to(&self, next: RecordingState) -> bool {
        use RecordingState::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Queued, Transcribing)
            | (Transcribing, Detecting)
            | (Detecting, Redacting)
            | (Redacting, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordingState::Queued => "queued",
            RecordingState::Transcribing => "transcribing",
            RecordingState::Detecting => "detecting",
            RecordingState::Redacting => "redacting",
            RecordingState::Done => "done",
            RecordingState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("insufficient scratch space: need {required} bytes, {available} available")]
    Capacity { required: u64, available: u64 },
    #[error("space check failed: {0}")]
    Space(#[from] SpaceError),
    #[error("transcription failed: {0}")]
    Transcription(#[from] TranscriptionError),
    #[error("detection failed: {0}")]
    Detection(#[from] DetectError),
    #[error("redaction failed: {0}")]
    Engine(#[from] EngineError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage failed: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    /// Human-readable reason category for the status feed
    pub fn category(&self) -> &'static str {
        match self {
            JobError::Capacity { .. } | JobError::Space(_) => "capacity",
            JobError::Transcription(_) => "transcription",
            JobError::Detection(_) => "detection",
            JobError::Engine(_) => "engine",
            JobError::Io(_) => "io",
            JobError::Persistence(_) => "persistence",
            JobError::Cancelled => "cancelled",
        }
    }
}

/// One uploaded recording tracked by the coordinator
#[derive(Debug, Clone)]
pub struct Recording {
    pub id: Uuid,
    pub filename: String,
    pub state: RecordingState,
    pub duration_secs: Option<f64>,
    pub error: Option<String>,
    pub error_category: Option<&'static str>,
    /// Redaction finished but artifacts could not be stored
    pub unsaved: bool,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Published on the completion channel as each job reaches a terminal state
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub id: Uuid,
    pub state: RecordingState,
    pub error_category: Option<&'static str>,
    pub detail: Option<String>,
}
