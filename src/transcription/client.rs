//! Client for the external speech-to-text service.
//!
//! The service is a black box consumed over HTTP: it takes audio bytes and
//! returns the transcript text plus word-level timestamps and character
//! offsets. Transient failures (network, 5xx) are retried with exponential
//! backoff up to a bounded attempt count; a format rejection is permanent
//! and fails the job immediately.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::Transcript;

#[derive(Error, Debug)]
pub enum TranscriptionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transcription service unavailable: {0}")]
    Transient(String),
    #[error("audio format rejected by transcription service: {0}")]
    Rejected(String),
    #[error("malformed transcription response: {0}")]
    Malformed(String),
}

impl TranscriptionError {
    /// Whether retrying the request could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, TranscriptionError::Transient(_))
    }
}

/// Supplies a time-aligned transcript for an audio file
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript, TranscriptionError>;
}

/// HTTP-backed transcription client with bounded retry
pub struct HttpTranscriptionClient {
    base_url: String,
    client: reqwest::Client,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl HttpTranscriptionClient {
    pub fn new(base_url: String, max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    async fn request_once(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<Transcript, TranscriptionError> {
        let response = self
            .client
            .post(format!("{}/v1/transcripts", self.base_url))
            .query(&[("filename", filename)])
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| TranscriptionError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Rejected(format!("{}: {}", status, detail)));
        }
        if !status.is_success() {
            return Err(TranscriptionError::Transient(format!("status {}", status)));
        }

        response
            .json::<Transcript>()
            .await
            .map_err(|e| TranscriptionError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl TranscriptionClient for HttpTranscriptionClient {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript, TranscriptionError> {
        let bytes = tokio::fs::read(audio_path).await?;
        let filename = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();

        let mut backoff = self.initial_backoff;
        let mut attempt = 1u32;

        loop {
            match self.request_once(bytes.clone(), &filename).await {
                Ok(transcript) => {
                    info!(
                        "Transcribed {} ({} words, {} chars)",
                        filename,
                        transcript.words.len(),
                        transcript.text.len()
                    );
                    return Ok(transcript);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        "Transcription attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.max_attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TranscriptionError::Transient("timeout".into()).is_transient());
        assert!(!TranscriptionError::Rejected("bad codec".into()).is_transient());
        assert!(!TranscriptionError::Malformed("truncated json".into()).is_transient());
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = HttpTranscriptionClient::new(
            "http://localhost:9000/".into(),
            3,
            Duration::from_millis(100),
        );
        assert_eq!(client.base_url, "http://localhost:9000");
    }
}
