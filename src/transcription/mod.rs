//! Transcription: time-aligned transcripts from the external STT service.

pub mod client;
pub mod transcript;

pub use client::{HttpTranscriptionClient, TranscriptionClient, TranscriptionError};
pub use transcript::{Transcript, TranscriptWord, mask_spans};
