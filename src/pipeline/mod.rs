//! Job coordination: bounded concurrency, per-job scratch lifecycle, and the
//! completion feed.
//!
//! Each submitted recording runs its stages as one awaited sequence inside
//! its own task, with cancellation checked between stages. A semaphore
//! bounds how many jobs run the redaction engine at once; waiters are served
//! in FIFO order. Every terminal transition is published on the completion
//! channel immediately, so callers see recordings finish one by one instead
//! of when a whole batch drains.

pub mod state;

pub use state::{JobError, JobEvent, Recording, RecordingState};

use chrono::Utc;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, DbPool};
use crate::detect::Detector;
use crate::redact::{self, EngineError, Redactor};
use crate::timing;
use crate::transcription::{self, TranscriptionClient};

/// Owns all job state; recordings are only ever mutated through here
pub struct Coordinator {
    config: Config,
    db: DbPool,
    transcriber: Arc<dyn TranscriptionClient>,
    redactor: Arc<dyn Redactor>,
    detector: Arc<Detector>,
    recordings: Arc<DashMap<Uuid, Recording>>,
    cancel_tokens: Arc<DashMap<Uuid, CancellationToken>>,
    redact_slots: Arc<Semaphore>,
    events_tx: mpsc::UnboundedSender<JobEvent>,
}

impl Coordinator {
    /// Build a coordinator and the receiving end of its completion feed
    pub fn new(
        config: Config,
        db: DbPool,
        transcriber: Arc<dyn TranscriptionClient>,
        redactor: Arc<dyn Redactor>,
        detector: Arc<Detector>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<JobEvent>) {
        std::fs::create_dir_all(&config.scratch_dir).ok();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let coordinator = Arc::new(Self {
            redact_slots: Arc::new(Semaphore::new(config.pool_size)),
            config,
            db,
            transcriber,
            redactor,
            detector,
            recordings: Arc::new(DashMap::new()),
            cancel_tokens: Arc::new(DashMap::new()),
            events_tx,
        });

        (coordinator, events_rx)
    }

    /// Accept an uploaded recording and start its pipeline run
    pub fn submit(self: &Arc<Self>, source: PathBuf) -> std::io::Result<Uuid> {
        std::fs::metadata(&source)?;

        let id = Uuid::new_v4();
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        self.recordings.insert(
            id,
            Recording {
                id,
                filename: filename.clone(),
                state: RecordingState::Queued,
                duration_secs: None,
                error: None,
                error_category: None,
                unsaved: false,
                submitted_at: Utc::now(),
                finished_at: None,
            },
        );

        let cancel = CancellationToken::new();
        self.cancel_tokens.insert(id, cancel.clone());

        info!("Queued recording {} ({})", id, filename);

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = coordinator.run_stages(id, &source, &cancel).await;
            coordinator.finish(id, outcome);
        });

        Ok(id)
    }

    /// Cancel a pending or in-flight job. Returns false when the job is
    /// unknown or already finished. The failed event arrives only after the
    /// subprocess is gone and scratch files are released.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.cancel_tokens.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Snapshot of one recording's state
    pub fn status(&self, id: Uuid) -> Option<Recording> {
        self.recordings.get(&id).map(|r| r.clone())
    }

    /// Snapshot of all recordings, in submission order
    pub fn statuses(&self) -> Vec<Recording> {
        let mut all: Vec<Recording> = self.recordings.iter().map(|r| r.clone()).collect();
        all.sort_by_key(|r| r.submitted_at);
        all
    }

    fn advance(&self, id: Uuid, next: RecordingState) {
        if let Some(mut recording) = self.recordings.get_mut(&id) {
            if recording.state.can_advance_to(next) {
                info!("Recording {}: {} -> {}", id, recording.state, next);
                recording.state = next;
            } else {
                warn!(
                    "Recording {}: refused transition {} -> {}",
                    id, recording.state, next
                );
            }
        }
    }

    async fn run_stages(
        &self,
        id: Uuid,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, JobError> {
        // Scratch directory scoped to this run; dropped on every exit path
        let scratch = tempfile::tempdir_in(&self.config.scratch_dir)?;

        let source_len = tokio::fs::metadata(source).await?.len();
        let content_type = content_type_for(source);
        let original = tokio::fs::read(source).await?;
        db::store_original(&self.db, id, &original, content_type).await?;
        drop(original);

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        self.advance(id, RecordingState::Transcribing);
        let transcript = tokio::select! {
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            result = self.transcriber.transcribe(source) => result?,
        };

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        self.advance(id, RecordingState::Detecting);
        let spans = self.detector.detect(&transcript)?;
        let ranges = timing::map_spans(&transcript, &spans, &self.config.mapper);
        info!(
            "Recording {}: {} span(s) -> {} time range(s)",
            id,
            spans.len(),
            ranges.len()
        );

        // Capacity is re-checked per job; siblings eat into the same disk
        let required =
            redact::estimate_scratch_bytes(source_len, self.config.scratch_multiplier);
        let capacity = redact::check_capacity(scratch.path(), required)?;
        if !capacity.ok {
            return Err(JobError::Capacity {
                required,
                available: capacity.available_bytes,
            });
        }

        // Jobs beyond pool capacity wait here in FIFO order; they stay in
        // detecting until a slot frees up
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            permit = self.redact_slots.acquire() => {
                permit.map_err(|_| JobError::Cancelled)?
            }
        };
        self.advance(id, RecordingState::Redacting);

        let duration = self
            .redactor
            .probe_duration(source)
            .await
            .map_err(engine_error)?;
        if let Some(mut recording) = self.recordings.get_mut(&id) {
            recording.duration_secs = Some(duration);
        }

        let dest = scratch
            .path()
            .join(format!("{}-redacted.{}", id, extension_for(source)));

        let mut result = self
            .redactor
            .redact(source, &ranges, &dest, duration, cancel)
            .await;
        if let Err(ref e) = result {
            if e.is_transient() {
                warn!(
                    "Recording {}: transient engine failure ({}), retrying once",
                    id, e
                );
                result = self
                    .redactor
                    .redact(source, &ranges, &dest, duration, cancel)
                    .await;
            }
        }
        result.map_err(engine_error)?;

        // Redaction work is done; storage failures flag the job unsaved
        // rather than discarding the completed run
        let offsets: Vec<(usize, usize)> =
            spans.iter().map(|s| (s.char_start, s.char_end)).collect();
        let masked = transcription::mask_spans(&transcript.text, &offsets);
        let spans_json = serde_json::to_string(&spans).unwrap_or_else(|_| "[]".to_string());
        let redacted = tokio::fs::read(&dest).await?;

        let mut unsaved = false;
        if let Err(e) = db::store_redacted(&self.db, id, &redacted, content_type).await {
            error!("Recording {}: failed to store redacted audio: {}", id, e);
            unsaved = true;
        }
        if let Err(e) = db::store_transcript(&self.db, id, &masked, &spans_json).await {
            error!("Recording {}: failed to store redacted transcript: {}", id, e);
            unsaved = true;
        }

        Ok(unsaved)
    }

    fn finish(&self, id: Uuid, outcome: Result<bool, JobError>) {
        self.cancel_tokens.remove(&id);

        let (state, unsaved, category, detail) = match outcome {
            Ok(false) => (RecordingState::Done, false, None, None),
            Ok(true) => (
                RecordingState::Done,
                true,
                Some("persistence"),
                Some("redaction complete but artifacts were not stored".to_string()),
            ),
            Err(e) => (
                RecordingState::Failed,
                false,
                Some(e.category()),
                Some(e.to_string()),
            ),
        };

        if let Some(mut recording) = self.recordings.get_mut(&id) {
            recording.state = state;
            recording.unsaved = unsaved;
            recording.error_category = category;
            recording.error = detail.clone();
            recording.finished_at = Some(Utc::now());
        }

        match state {
            RecordingState::Done if unsaved => {
                warn!("Recording {} done, but artifacts were not stored", id)
            }
            RecordingState::Done => info!("Recording {} done", id),
            _ => error!(
                "Recording {} failed ({}): {}",
                id,
                category.unwrap_or("unknown"),
                detail.as_deref().unwrap_or("")
            ),
        }

        let _ = self.events_tx.send(JobEvent {
            id,
            state,
            error_category: category,
            detail,
        });
    }
}

fn engine_error(e: EngineError) -> JobError {
    match e {
        EngineError::Cancelled => JobError::Cancelled,
        other => JobError::Engine(other),
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

fn extension_for(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("wav")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(content_type_for(Path::new("call.wav")), "audio/wav");
        assert_eq!(content_type_for(Path::new("call.mp3")), "audio/mpeg");
        assert_eq!(
            content_type_for(Path::new("call.unknown")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_extension_fallback() {
        assert_eq!(extension_for(Path::new("call.flac")), "flac");
        assert_eq!(extension_for(Path::new("noext")), "wav");
    }
}
