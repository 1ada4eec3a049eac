//! Call-recording PII redaction pipeline.
//!
//! Takes an uploaded call recording, fetches a time-aligned transcript from
//! an external speech-to-text service, finds sensitive spans (SSNs, card
//! numbers, phone numbers) in the text, maps them to audio time ranges, and
//! produces a redacted audio file with those ranges silenced plus a masked
//! transcript. Originals and redacted artifacts are persisted in SQLite.

pub mod config;
pub mod db;
pub mod detect;
pub mod pipeline;
pub mod redact;
pub mod timing;
pub mod transcription;

pub use config::Config;
pub use pipeline::{Coordinator, JobError, JobEvent, Recording, RecordingState};
