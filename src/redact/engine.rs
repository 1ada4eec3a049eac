//! Audio redaction via an external ffmpeg process.
//!
//! All ranges for a job are passed to ffmpeg in a single invocation as a
//! chained `volume` filter, so the audio is decoded and re-encoded once.
//! Silencing keeps the total duration intact; nothing is cut.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::timing::TimeRange;

/// Longest stderr excerpt carried in an error
const STDERR_EXCERPT_BYTES: usize = 2048;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg exited with {status}: {stderr}")]
    Ffmpeg {
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("audio tool busy: {0}")]
    Busy(String),
    #[error("no output produced at {0}")]
    MissingOutput(PathBuf),
    #[error("duration probe failed: {0}")]
    Probe(String),
    #[error("redaction cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether a single retry is worthwhile (resource-busy conditions)
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Busy(_))
    }
}

/// Silences time ranges in an audio file without changing its duration
#[async_trait]
pub trait Redactor: Send + Sync {
    /// Total duration of an audio file in seconds
    async fn probe_duration(&self, path: &Path) -> Result<f64, EngineError>;

    /// Write a copy of `source` to `dest` with `ranges` silenced.
    ///
    /// Ranges outside `[0, duration]` are clamped, not rejected. On failure
    /// any partial output is removed. Cancellation kills the child process
    /// and removes partial output before returning.
    async fn redact(
        &self,
        source: &Path,
        ranges: &[TimeRange],
        dest: &Path,
        duration: f64,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError>;
}

/// ffmpeg-backed [`Redactor`]
pub struct FfmpegRedactor {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegRedactor {
    pub fn new(ffmpeg_path: String, ffprobe_path: String) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }
}

/// Clamp ranges to `[0, duration]`, dropping any that fall entirely outside
fn clamp_ranges(ranges: &[TimeRange], duration: f64) -> Vec<TimeRange> {
    ranges
        .iter()
        .filter_map(|r| {
            let start = r.start.max(0.0);
            let end = r.end.min(duration);
            (end > start).then_some(TimeRange { start, end })
        })
        .collect()
}

/// One `volume=0` filter per range, chained so a single decode/encode pass
/// silences everything
fn silence_filter(ranges: &[TimeRange]) -> String {
    ranges
        .iter()
        .map(|r| format!("volume=enable='between(t,{:.3},{:.3})':volume=0", r.start, r.end))
        .collect::<Vec<_>>()
        .join(",")
}

fn stderr_excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_EXCERPT_BYTES {
        return trimmed.to_string();
    }
    let cut = trimmed.len() - STDERR_EXCERPT_BYTES;
    let mut start = cut;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

#[async_trait]
impl Redactor for FfmpegRedactor {
    async fn probe_duration(&self, path: &Path) -> Result<f64, EngineError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(EngineError::Probe(stderr_excerpt(&String::from_utf8_lossy(
                &output.stderr,
            ))));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f64>()
            .map_err(|e| EngineError::Probe(format!("unparseable duration '{}': {}", text.trim(), e)))
    }

    async fn redact(
        &self,
        source: &Path,
        ranges: &[TimeRange],
        dest: &Path,
        duration: f64,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let ranges = clamp_ranges(ranges, duration);

        if ranges.is_empty() {
            // Nothing to silence; a filter pass would only re-encode
            tokio::fs::copy(source, dest).await?;
            return Ok(());
        }

        let filter = silence_filter(&ranges);
        debug!("Running ffmpeg with filter: {}", filter);

        let mut child = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-af")
            .arg(&filter)
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill ffmpeg: {}", e);
                }
                stderr_task.abort();
                let _ = tokio::fs::remove_file(dest).await;
                return Err(EngineError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let _ = tokio::fs::remove_file(dest).await;
            let excerpt = stderr_excerpt(&stderr);
            if excerpt.contains("Resource temporarily unavailable")
                || excerpt.contains("resource busy")
            {
                return Err(EngineError::Busy(excerpt));
            }
            return Err(EngineError::Ffmpeg {
                status,
                stderr: excerpt,
            });
        }

        if tokio::fs::metadata(dest).await.is_err() {
            return Err(EngineError::MissingOutput(dest.to_path_buf()));
        }

        info!(
            "Silenced {} range(s) in {} -> {}",
            ranges.len(),
            source.display(),
            dest.display()
        );
        Ok(())
    }
}
