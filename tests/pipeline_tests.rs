//! End-to-end pipeline tests with stubbed external collaborators.
//!
//! The transcription service and ffmpeg are replaced with in-process stubs
//! so the coordinator's state machine, bounded concurrency, completion feed,
//! and scratch lifecycle can be exercised deterministically.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use callscrub::config::Config;
use callscrub::db;
use callscrub::detect::{Detector, RuleSet};
use callscrub::pipeline::{Coordinator, RecordingState};
use callscrub::redact::{EngineError, Redactor};
use callscrub::timing::TimeRange;
use callscrub::transcription::{Transcript, TranscriptWord, TranscriptionClient, TranscriptionError};

struct FixedTranscriber {
    transcript: Transcript,
    delay: Duration,
}

#[async_trait]
impl TranscriptionClient for FixedTranscriber {
    async fn transcribe(&self, _audio_path: &Path) -> Result<Transcript, TranscriptionError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.transcript.clone())
    }
}

/// Transcriber whose delay depends on the file name, for ordering tests
struct PacedTranscriber {
    transcript: Transcript,
}

#[async_trait]
impl TranscriptionClient for PacedTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript, TranscriptionError> {
        let name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");
        let delay = if name.starts_with("slow") {
            Duration::from_millis(400)
        } else {
            Duration::from_millis(10)
        };
        tokio::time::sleep(delay).await;
        Ok(self.transcript.clone())
    }
}

struct RejectingTranscriber;

#[async_trait]
impl TranscriptionClient for RejectingTranscriber {
    async fn transcribe(&self, _audio_path: &Path) -> Result<Transcript, TranscriptionError> {
        Err(TranscriptionError::Rejected("unsupported codec".into()))
    }
}

/// Redactor stub that records concurrency and the ranges it was given
struct StubRedactor {
    active: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    last_ranges: Arc<Mutex<Vec<TimeRange>>>,
    delay: Duration,
}

impl StubRedactor {
    fn new(delay: Duration) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max_seen: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            last_ranges: Arc::new(Mutex::new(Vec::new())),
            delay,
        }
    }
}

#[async_trait]
impl Redactor for StubRedactor {
    async fn probe_duration(&self, _path: &Path) -> Result<f64, EngineError> {
        Ok(10.0)
    }

    async fn redact(
        &self,
        _source: &Path,
        ranges: &[TimeRange],
        dest: &Path,
        _duration: f64,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        *self.last_ranges.lock().unwrap() = ranges.to_vec();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {
                tokio::fs::write(dest, b"redacted-audio")
                    .await
                    .map_err(EngineError::from)
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn ssn_transcript() -> Transcript {
    let text = "my ssn is 123-45-6789 thanks".to_string();
    let words = vec![
        ("my", 2.5, 2.8, 0, 2),
        ("ssn", 2.8, 3.0, 3, 6),
        ("is", 3.0, 3.2, 7, 9),
        ("123-45-6789", 3.2, 4.1, 10, 21),
        ("thanks", 4.2, 4.6, 22, 28),
    ]
    .into_iter()
    .map(|(w, start, end, char_start, char_end)| TranscriptWord {
        text: w.to_string(),
        start,
        end,
        confidence: 0.92,
        char_start,
        char_end,
    })
    .collect();

    Transcript { text, words }
}

struct Harness {
    _dir: tempfile::TempDir,
    config: Config,
    db: db::DbPool,
}

async fn harness(pool_size: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let database_url = format!("sqlite:{}/scrub.db?mode=rwc", dir.path().display());
    let db = db::init_db(&database_url).await.unwrap();

    let config = Config {
        database_url,
        scratch_dir: dir.path().join("scratch"),
        pool_size,
        ..Config::default()
    };

    Harness {
        _dir: dir,
        config,
        db,
    }
}

fn detector() -> Arc<Detector> {
    Arc::new(Detector::new(&RuleSet::builtin(), 0.5).unwrap())
}

fn write_source(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"fake wav bytes for testing").unwrap();
    path
}

fn stage_index(state: RecordingState) -> usize {
    match state {
        RecordingState::Queued => 0,
        RecordingState::Transcribing => 1,
        RecordingState::Detecting => 2,
        RecordingState::Redacting => 3,
        RecordingState::Done => 4,
        RecordingState::Failed => 5,
    }
}

async fn wait_for_state(coordinator: &Arc<Coordinator>, id: Uuid, state: RecordingState) {
    for _ in 0..1000 {
        if coordinator.status(id).map(|r| r.state) == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for state {}", state);
}

#[tokio::test]
async fn test_end_to_end_ssn_redaction() {
    let h = harness(2).await;
    let transcriber = Arc::new(FixedTranscriber {
        transcript: ssn_transcript(),
        delay: Duration::from_millis(10),
    });
    let redactor = StubRedactor::new(Duration::from_millis(10));
    let last_ranges = Arc::clone(&redactor.last_ranges);

    let (coordinator, mut events) = Coordinator::new(
        h.config.clone(),
        h.db.clone(),
        transcriber,
        Arc::new(redactor),
        detector(),
    );

    let source = write_source(h._dir.path(), "call.wav");
    let id = coordinator.submit(source.clone()).unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.id, id);
    assert_eq!(event.state, RecordingState::Done);
    assert_eq!(event.error_category, None);

    // The SSN time range, padded by the 150 ms guard interval
    let ranges = last_ranges.lock().unwrap().clone();
    assert_eq!(ranges.len(), 1);
    assert!((ranges[0].start - 3.05).abs() < 1e-9);
    assert!((ranges[0].end - 4.25).abs() < 1e-9);

    let status = coordinator.status(id).unwrap();
    assert_eq!(status.state, RecordingState::Done);
    assert!(!status.unsaved);
    assert_eq!(status.duration_secs, Some(10.0));

    // All three artifacts landed, and the masked transcript hides the SSN
    let original = db::get_original(&h.db, id).await.unwrap().unwrap();
    assert_eq!(original.content, b"fake wav bytes for testing");
    assert_eq!(original.content_type, "audio/wav");

    let redacted = db::get_redacted(&h.db, id).await.unwrap().unwrap();
    assert_eq!(redacted.content, b"redacted-audio");

    let transcript = db::get_transcript(&h.db, id).await.unwrap().unwrap();
    assert_eq!(transcript.text, "my ssn is *********** thanks");
    assert!(transcript.spans_json.contains("ssn"));
}

#[tokio::test]
async fn test_states_advance_in_order() {
    let h = harness(1).await;
    let transcriber = Arc::new(FixedTranscriber {
        transcript: ssn_transcript(),
        delay: Duration::from_millis(100),
    });
    let redactor = Arc::new(StubRedactor::new(Duration::from_millis(100)));

    let (coordinator, mut events) =
        Coordinator::new(h.config.clone(), h.db.clone(), transcriber, redactor, detector());

    let source = write_source(h._dir.path(), "call.wav");
    let id = coordinator.submit(source).unwrap();

    // Sample the status feed until the job finishes; observed states must
    // never move backwards and must end in done
    let mut observed = Vec::new();
    loop {
        if let Some(recording) = coordinator.status(id) {
            if observed.last() != Some(&recording.state) {
                observed.push(recording.state);
            }
            if recording.state.is_terminal() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for pair in observed.windows(2) {
        assert!(
            stage_index(pair[0]) < stage_index(pair[1]),
            "state regressed: {} -> {}",
            pair[0],
            pair[1]
        );
    }
    assert!(observed.contains(&RecordingState::Transcribing));
    assert!(observed.contains(&RecordingState::Redacting));
    assert_eq!(*observed.last().unwrap(), RecordingState::Done);

    let event = events.recv().await.unwrap();
    assert_eq!(event.state, RecordingState::Done);
}

#[tokio::test]
async fn test_redacting_bounded_by_pool_size() {
    let h = harness(2).await;
    let transcriber = Arc::new(FixedTranscriber {
        transcript: ssn_transcript(),
        delay: Duration::from_millis(5),
    });
    let redactor = StubRedactor::new(Duration::from_millis(150));
    let max_seen = Arc::clone(&redactor.max_seen);

    let (coordinator, mut events) = Coordinator::new(
        h.config.clone(),
        h.db.clone(),
        transcriber,
        Arc::new(redactor),
        detector(),
    );

    for i in 0..5 {
        let source = write_source(h._dir.path(), &format!("call-{}.wav", i));
        coordinator.submit(source).unwrap();
    }

    // Sample the status feed while jobs drain; jobs waiting for a pool slot
    // must not report redacting
    let sampler = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            let mut max_redacting = 0usize;
            loop {
                let statuses = coordinator.statuses();
                let redacting = statuses
                    .iter()
                    .filter(|r| r.state == RecordingState::Redacting)
                    .count();
                max_redacting = max_redacting.max(redacting);
                if statuses.len() == 5 && statuses.iter().all(|r| r.state.is_terminal()) {
                    return max_redacting;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };

    for _ in 0..5 {
        let event = events.recv().await.unwrap();
        assert_eq!(event.state, RecordingState::Done);
    }

    assert!(
        sampler.await.unwrap() <= 2,
        "more than pool_size recordings reported redacting at once"
    );
    assert!(
        max_seen.load(Ordering::SeqCst) <= 2,
        "more than pool_size jobs ran the engine at once"
    );
}

#[tokio::test]
async fn test_completions_surface_per_job_not_batched() {
    let h = harness(2).await;
    let transcriber = Arc::new(PacedTranscriber {
        transcript: ssn_transcript(),
    });
    let redactor = Arc::new(StubRedactor::new(Duration::from_millis(10)));

    let (coordinator, mut events) =
        Coordinator::new(h.config.clone(), h.db.clone(), transcriber, redactor, detector());

    let slow = coordinator
        .submit(write_source(h._dir.path(), "slow.wav"))
        .unwrap();
    let fast = coordinator
        .submit(write_source(h._dir.path(), "fast.wav"))
        .unwrap();

    // The fast job finishes first even though it was submitted second
    let first = events.recv().await.unwrap();
    assert_eq!(first.id, fast);
    assert_eq!(first.state, RecordingState::Done);

    let second = events.recv().await.unwrap();
    assert_eq!(second.id, slow);
    assert_eq!(second.state, RecordingState::Done);
}

#[tokio::test]
async fn test_cancellation_kills_job_and_releases_scratch() {
    let h = harness(1).await;
    let transcriber = Arc::new(FixedTranscriber {
        transcript: ssn_transcript(),
        delay: Duration::from_millis(5),
    });
    let redactor = Arc::new(StubRedactor::new(Duration::from_secs(30)));

    let (coordinator, mut events) =
        Coordinator::new(h.config.clone(), h.db.clone(), transcriber, redactor, detector());

    let source = write_source(h._dir.path(), "call.wav");
    let id = coordinator.submit(source).unwrap();

    wait_for_state(&coordinator, id, RecordingState::Redacting).await;
    assert!(coordinator.cancel(id));

    let event = events.recv().await.unwrap();
    assert_eq!(event.id, id);
    assert_eq!(event.state, RecordingState::Failed);
    assert_eq!(event.error_category, Some("cancelled"));

    // Scratch directory is empty once the cancellation is acknowledged
    let leftovers: Vec<_> = std::fs::read_dir(&h.config.scratch_dir)
        .unwrap()
        .collect();
    assert!(leftovers.is_empty(), "residual temp files: {:?}", leftovers);

    // Cancelling a finished job is a no-op
    assert!(!coordinator.cancel(id));
}

#[tokio::test]
async fn test_capacity_failure_skips_engine() {
    let h = harness(1).await;
    let transcriber = Arc::new(FixedTranscriber {
        transcript: ssn_transcript(),
        delay: Duration::from_millis(5),
    });
    let redactor = StubRedactor::new(Duration::from_millis(5));
    let calls = Arc::clone(&redactor.calls);

    let config = Config {
        // Far beyond any real disk
        scratch_multiplier: 1e15,
        ..h.config.clone()
    };

    let (coordinator, mut events) =
        Coordinator::new(config, h.db.clone(), transcriber, Arc::new(redactor), detector());

    let id = coordinator
        .submit(write_source(h._dir.path(), "call.wav"))
        .unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.id, id);
    assert_eq!(event.state, RecordingState::Failed);
    assert_eq!(event.error_category, Some("capacity"));

    // No external process is ever started for a job that fails the check
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_format_rejection_fails_job() {
    let h = harness(1).await;
    let redactor = Arc::new(StubRedactor::new(Duration::from_millis(5)));

    let (coordinator, mut events) = Coordinator::new(
        h.config.clone(),
        h.db.clone(),
        Arc::new(RejectingTranscriber),
        redactor,
        detector(),
    );

    let id = coordinator
        .submit(write_source(h._dir.path(), "call.wav"))
        .unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.id, id);
    assert_eq!(event.state, RecordingState::Failed);
    assert_eq!(event.error_category, Some("transcription"));

    let status = coordinator.status(id).unwrap();
    assert!(status.error.unwrap().contains("unsupported codec"));
}

#[tokio::test]
async fn test_missing_artifacts_read_as_not_found() {
    let h = harness(1).await;
    let unknown = Uuid::new_v4();

    assert!(db::get_original(&h.db, unknown).await.unwrap().is_none());
    assert!(db::get_redacted(&h.db, unknown).await.unwrap().is_none());
    assert!(db::get_transcript(&h.db, unknown).await.unwrap().is_none());
}

#[tokio::test]
async fn test_submit_missing_file_is_rejected() {
    let h = harness(1).await;
    let transcriber = Arc::new(FixedTranscriber {
        transcript: ssn_transcript(),
        delay: Duration::from_millis(5),
    });
    let redactor = Arc::new(StubRedactor::new(Duration::from_millis(5)));

    let (coordinator, _events) =
        Coordinator::new(h.config.clone(), h.db.clone(), transcriber, redactor, detector());

    let missing = h._dir.path().join("no-such-file.wav");
    assert!(coordinator.submit(missing).is_err());
    assert!(coordinator.statuses().is_empty());
}
