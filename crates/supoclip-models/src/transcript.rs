//! Time-aligned transcripts.
//!
//! A [`Transcript`] always covers `[0, duration]` without gaps: stretches
//! with no speech are represented by empty-text segments, so downstream
//! windowing never mistakes silence for missing coverage.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timestamp::format_mmss;

/// How far a segment may run past the probed media duration.
pub const DURATION_TOLERANCE_SECS: f64 = 0.5;

/// Gaps shorter than this are absorbed into the following segment.
const GAP_EPSILON_SECS: f64 = 0.05;

/// One `{text, start, end}` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptSegment {
    /// Spoken text (empty for silence)
    pub text: String,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
}

impl TranscriptSegment {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }

    fn silence(start: f64, end: f64) -> Self {
        Self::new(String::new(), start, end)
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_silence(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Transcript shape violations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranscriptError {
    #[error("Media duration must be a non-negative number, got {0}")]
    InvalidDuration(f64),

    #[error("Segment {index} has invalid bounds [{start}, {end}]")]
    InvalidSegment { index: usize, start: f64, end: f64 },

    #[error("Segment {index} starts at {start}s, beyond media duration {duration}s")]
    OutOfBounds { index: usize, start: f64, duration: f64 },

    #[error("Segment {index} overlaps or precedes the previous segment")]
    NotMonotonic { index: usize },

    #[error("Transcript does not cover the media: gap at {at}s")]
    Gap { at: f64 },
}

/// Ordered, non-overlapping, gap-free transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transcript {
    segments: Vec<TranscriptSegment>,
    duration: f64,
}

impl Transcript {
    /// Build a transcript from raw recognizer output.
    ///
    /// Sorts by start, trims overlaps, clamps to the media duration and
    /// fills uncovered time with empty segments.
    pub fn normalize(
        mut raw: Vec<TranscriptSegment>,
        duration: f64,
    ) -> Result<Self, TranscriptError> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(TranscriptError::InvalidDuration(duration));
        }

        for (index, seg) in raw.iter().enumerate() {
            if !seg.start.is_finite() || !seg.end.is_finite() || seg.start < 0.0 || seg.end < seg.start
            {
                return Err(TranscriptError::InvalidSegment {
                    index,
                    start: seg.start,
                    end: seg.end,
                });
            }
            if seg.start > duration + DURATION_TOLERANCE_SECS {
                return Err(TranscriptError::OutOfBounds {
                    index,
                    start: seg.start,
                    duration,
                });
            }
        }

        raw.sort_by(|a, b| a.start.total_cmp(&b.start));

        let mut segments: Vec<TranscriptSegment> = Vec::with_capacity(raw.len() + 2);
        let mut cursor = 0.0_f64;
        for seg in raw {
            let end = seg.end.min(duration);
            let mut start = seg.start.max(cursor);
            if end - start <= 0.0 {
                continue;
            }
            if start - cursor > GAP_EPSILON_SECS {
                segments.push(TranscriptSegment::silence(cursor, start));
            } else {
                start = cursor;
            }
            segments.push(TranscriptSegment::new(seg.text.trim(), start, end));
            cursor = end;
        }

        if duration - cursor > GAP_EPSILON_SECS {
            segments.push(TranscriptSegment::silence(cursor, duration));
        } else if let Some(last) = segments.last_mut() {
            last.end = duration;
        }

        let transcript = Self { segments, duration };
        transcript.validate()?;
        Ok(transcript)
    }

    /// Check the ordering and coverage invariants.
    pub fn validate(&self) -> Result<(), TranscriptError> {
        let mut cursor = 0.0_f64;
        for (index, seg) in self.segments.iter().enumerate() {
            if seg.end < seg.start {
                return Err(TranscriptError::InvalidSegment {
                    index,
                    start: seg.start,
                    end: seg.end,
                });
            }
            if seg.start < cursor - 1e-6 {
                return Err(TranscriptError::NotMonotonic { index });
            }
            if seg.start - cursor > GAP_EPSILON_SECS {
                return Err(TranscriptError::Gap { at: cursor });
            }
            if seg.end > self.duration + DURATION_TOLERANCE_SECS {
                return Err(TranscriptError::OutOfBounds {
                    index,
                    start: seg.start,
                    duration: self.duration,
                });
            }
            cursor = seg.end;
        }
        if self.duration - cursor > GAP_EPSILON_SECS {
            return Err(TranscriptError::Gap { at: cursor });
        }
        Ok(())
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    /// Media duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// True when no segment carries speech.
    pub fn is_silent(&self) -> bool {
        self.segments.iter().all(TranscriptSegment::is_silence)
    }

    /// Text spoken inside `[start, end)`.
    pub fn excerpt(&self, start: f64, end: f64) -> String {
        self.segments_between(start, end)
            .filter(|s| !s.is_silence())
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Segments that intersect `[start, end)`.
    pub fn segments_between(
        &self,
        start: f64,
        end: f64,
    ) -> impl Iterator<Item = &TranscriptSegment> + '_ {
        self.segments
            .iter()
            .filter(move |s| s.end > start && s.start < end)
    }

    /// Render as `[MM:SS - MM:SS] text` lines, skipping silence.
    pub fn to_timestamped_lines(&self) -> String {
        self.segments
            .iter()
            .filter(|s| !s.is_silence())
            .map(|s| format!("[{} - {}] {}", format_mmss(s.start), format_mmss(s.end), s.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str, start: f64, end: f64) -> TranscriptSegment {
        TranscriptSegment::new(text, start, end)
    }

    #[test]
    fn test_normalize_fills_gaps() {
        let t = Transcript::normalize(vec![seg("hello", 2.0, 4.0), seg("world", 6.0, 8.0)], 10.0)
            .unwrap();
        let segments = t.segments();
        assert_eq!(segments.len(), 5);
        assert!(segments[0].is_silence());
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[1].text, "hello");
        assert!(segments[2].is_silence());
        assert_eq!(segments[4].end, 10.0);
        t.validate().unwrap();
    }

    #[test]
    fn test_normalize_sorts_and_trims_overlap() {
        let t = Transcript::normalize(vec![seg("b", 3.0, 6.0), seg("a", 0.0, 4.0)], 6.0).unwrap();
        let segments = t.segments();
        assert_eq!(segments[0].text, "a");
        assert_eq!(segments[1].text, "b");
        assert_eq!(segments[1].start, 4.0);
    }

    #[test]
    fn test_normalize_clamps_to_duration() {
        let t = Transcript::normalize(vec![seg("tail", 0.0, 10.3)], 10.0).unwrap();
        assert_eq!(t.segments()[0].end, 10.0);
    }

    #[test]
    fn test_normalize_rejects_out_of_bounds() {
        let err = Transcript::normalize(vec![seg("late", 20.0, 21.0)], 10.0).unwrap_err();
        assert!(matches!(err, TranscriptError::OutOfBounds { index: 0, .. }));
    }

    #[test]
    fn test_normalize_rejects_inverted_segment() {
        let err = Transcript::normalize(vec![seg("x", 5.0, 4.0)], 10.0).unwrap_err();
        assert!(matches!(err, TranscriptError::InvalidSegment { index: 0, .. }));
    }

    #[test]
    fn test_empty_input_is_one_silent_segment() {
        let t = Transcript::normalize(Vec::new(), 12.0).unwrap();
        assert_eq!(t.segments().len(), 1);
        assert!(t.is_silent());
    }

    #[test]
    fn test_excerpt() {
        let t = Transcript::normalize(
            vec![seg("one", 0.0, 5.0), seg("two", 5.0, 10.0), seg("three", 10.0, 15.0)],
            15.0,
        )
        .unwrap();
        assert_eq!(t.excerpt(4.0, 10.0), "one two");
        assert_eq!(t.excerpt(5.0, 15.0), "two three");
    }

    #[test]
    fn test_timestamped_lines() {
        let t = Transcript::normalize(vec![seg("hi there", 61.0, 65.0)], 70.0).unwrap();
        assert_eq!(t.to_timestamped_lines(), "[01:01 - 01:05] hi there");
    }
}
