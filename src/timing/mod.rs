//! Maps character-offset spans to padded, merged audio time ranges.
//!
//! Each span resolves to the union of its covering words' time ranges,
//! padded by a guard interval to absorb transcript/audio alignment error.
//! Padded ranges that overlap or sit closer than a minimum gap are merged;
//! a merged range means "silence this interval" and carries no category.

use tracing::warn;

use crate::detect::SensitiveSpan;
use crate::transcription::Transcript;

/// A `[start, end]` interval in seconds within the source audio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MapperConfig {
    /// Guard interval added on both sides of a mapped range (seconds)
    pub padding_secs: f64,
    /// Ranges separated by less than this are merged (seconds)
    pub merge_gap_secs: f64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            padding_secs: 0.150,
            merge_gap_secs: 0.100,
        }
    }
}

/// Resolve spans to padded, merged time ranges.
///
/// A span with no covering word (the detector matched across a transcription
/// gap) is logged and skipped, never fatal. Word confidence plays no part
/// here; timing is independent of confidence.
pub fn map_spans(
    transcript: &Transcript,
    spans: &[SensitiveSpan],
    config: &MapperConfig,
) -> Vec<TimeRange> {
    let mut ranges = Vec::with_capacity(spans.len());

    for span in spans {
        let words = transcript.words_covering(span.char_start, span.char_end);
        if words.is_empty() {
            warn!(
                "No word covers {} span at {}..{}, skipping",
                span.category, span.char_start, span.char_end
            );
            continue;
        }

        let start = words.iter().map(|w| w.start).fold(f64::INFINITY, f64::min);
        let end = words.iter().map(|w| w.end).fold(f64::NEG_INFINITY, f64::max);

        ranges.push(TimeRange {
            start: (start - config.padding_secs).max(0.0),
            end: end + config.padding_secs,
        });
    }

    merge_ranges(ranges, config.merge_gap_secs)
}

/// Merge ranges that overlap or are separated by less than `min_gap`.
///
/// Idempotent: merging an already-merged set yields the same set.
pub fn merge_ranges(mut ranges: Vec<TimeRange>, min_gap: f64) -> Vec<TimeRange> {
    ranges.sort_by(|a, b| {
        a.start
            .partial_cmp(&b.start)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start - last.end < min_gap => {
                if range.end > last.end {
                    last.end = range.end;
                }
            }
            _ => merged.push(range),
        }
    }

    merged
}
