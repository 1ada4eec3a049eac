//! Sensitive-pattern detection over transcript text.
//!
//! The detector reports character-offset spans only; resolving spans to
//! audio time ranges (and merging overlaps) happens in [`crate::timing`],
//! because two overlapping text spans can map to non-contiguous audio.

pub mod rules;

pub use rules::{Rule, RuleError, RuleSet, Validator, luhn_valid};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::transcription::Transcript;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("rule error: {0}")]
    Rule(#[from] RuleError),
    #[error("malformed transcript: {0}")]
    MalformedTranscript(String),
}

/// A flagged character range within the transcript text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensitiveSpan {
    pub category: String,
    pub char_start: usize,
    pub char_end: usize,
}

struct CompiledRule {
    category: String,
    regex: Regex,
    validator: Validator,
}

/// Scans transcript text for sensitive-information spans
pub struct Detector {
    rules: Vec<CompiledRule>,
    /// A span is suppressed when every constituent word falls below this
    confidence_threshold: f32,
}

impl Detector {
    pub fn new(set: &RuleSet, confidence_threshold: f32) -> Result<Self, RuleError> {
        let mut rules = Vec::with_capacity(set.rules.len());
        for rule in &set.rules {
            let regex = Regex::new(&rule.pattern).map_err(|source| RuleError::Pattern {
                category: rule.category.clone(),
                source,
            })?;
            rules.push(CompiledRule {
                category: rule.category.clone(),
                regex,
                validator: rule.validator,
            });
        }

        Ok(Self {
            rules,
            confidence_threshold,
        })
    }

    /// Detect sensitive spans, ordered by character offset.
    ///
    /// Overlapping matches from different categories are all reported;
    /// merging is deferred until time ranges are known.
    pub fn detect(&self, transcript: &Transcript) -> Result<Vec<SensitiveSpan>, DetectError> {
        for word in &transcript.words {
            if word.char_end < word.char_start || word.char_end > transcript.text.len() {
                return Err(DetectError::MalformedTranscript(format!(
                    "word '{}' has offsets {}..{} outside text of {} bytes",
                    word.text,
                    word.char_start,
                    word.char_end,
                    transcript.text.len()
                )));
            }
        }

        let mut spans = Vec::new();
        for rule in &self.rules {
            for m in rule.regex.find_iter(&transcript.text) {
                let matched = m.as_str();

                // Skip noise tokens and text that is already masked
                if matched.contains('*') || !matched.chars().any(|c| c.is_alphanumeric()) {
                    continue;
                }
                if rule.validator == Validator::Luhn && !luhn_valid(matched) {
                    continue;
                }
                if !self.passes_confidence(transcript, m.start(), m.end()) {
                    debug!(
                        "Suppressing low-confidence {} match at {}..{}",
                        rule.category,
                        m.start(),
                        m.end()
                    );
                    continue;
                }

                spans.push(SensitiveSpan {
                    category: rule.category.clone(),
                    char_start: m.start(),
                    char_end: m.end(),
                });
            }
        }

        spans.sort_by(|a, b| {
            a.char_start
                .cmp(&b.char_start)
                .then(a.char_end.cmp(&b.char_end))
        });
        Ok(spans)
    }

    fn passes_confidence(&self, transcript: &Transcript, start: usize, end: usize) -> bool {
        let covering = transcript.words_covering(start, end);
        if covering.is_empty() {
            // A match across a transcription gap; the mapper logs and skips it
            return true;
        }
        covering
            .iter()
            .any(|w| w.confidence >= self.confidence_threshold)
    }
}
