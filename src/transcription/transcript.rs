//! Transcript types returned by the speech-to-text service.
//!
//! Words carry both timing and character offsets into the full transcript
//! text, which is what lets detected text spans be resolved to audio ranges.

use serde::{Deserialize, Serialize};

/// A word with timing, confidence, and character-offset information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptWord {
    /// The word text
    pub text: String,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
    /// Byte offset of the first character within the full transcript text
    pub char_start: usize,
    /// Byte offset one past the last character
    pub char_end: usize,
}

/// Complete time-aligned transcript for one recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// Full transcript text
    pub text: String,
    /// Words in transcript order
    pub words: Vec<TranscriptWord>,
}

impl Transcript {
    /// Words whose character range overlaps `[char_start, char_end)`
    pub fn words_covering(&self, char_start: usize, char_end: usize) -> Vec<&TranscriptWord> {
        self.words
            .iter()
            .filter(|w| w.char_start < char_end && w.char_end > char_start)
            .collect()
    }
}

/// Mask the given character ranges with `*`.
///
/// Each character inside a masked range becomes a single `*`, so for ASCII
/// transcripts the masked text keeps the original offsets and spans remain
/// auditable against the unmasked transcript.
pub fn mask_spans(text: &str, spans: &[(usize, usize)]) -> String {
    let mut masked = String::with_capacity(text.len());

    for (offset, ch) in text.char_indices() {
        let inside = spans.iter().any(|&(start, end)| offset >= start && offset < end);
        if inside {
            masked.push('*');
        } else {
            masked.push(ch);
        }
    }

    masked
}
