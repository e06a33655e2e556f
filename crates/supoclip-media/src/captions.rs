//! Caption cue layout.
//!
//! Transcript segments are split into short word groups so that burned-in
//! captions stay readable on a vertical frame. Word timing inside a segment
//! is not known, so each group gets a share of the segment proportional to
//! its word count.

use supoclip_models::TranscriptSegment;

/// Default number of words shown at once.
pub const DEFAULT_WORDS_PER_CUE: usize = 6;

/// Characters per caption line before wrapping.
const MAX_LINE_CHARS: usize = 24;

/// One caption shown during `[start, end)`, relative to the clip start.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl CaptionCue {
    /// Text broken into lines of at most `MAX_LINE_CHARS` where possible.
    pub fn wrapped_text(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut current = String::new();
        for word in self.text.split_whitespace() {
            if !current.is_empty() && current.len() + 1 + word.len() > MAX_LINE_CHARS {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            lines.push(current);
        }
        lines.join("\n")
    }
}

/// Lay out cues for the clip `[clip_start, clip_end)`.
///
/// Silence segments produce no cues. Cues are clipped to the clip window and
/// shifted so that `0.0` is the first frame of the clip.
pub fn build_cues(
    segments: &[TranscriptSegment],
    clip_start: f64,
    clip_end: f64,
    max_words: usize,
) -> Vec<CaptionCue> {
    let max_words = max_words.max(1);
    let mut cues = Vec::new();

    for segment in segments {
        if segment.is_silence() || segment.end <= clip_start || segment.start >= clip_end {
            continue;
        }

        let words: Vec<&str> = segment.text.split_whitespace().collect();
        let per_word = segment.duration() / words.len() as f64;

        for (i, chunk) in words.chunks(max_words).enumerate() {
            let first = i * max_words;
            let start = segment.start + per_word * first as f64;
            let end = segment.start + per_word * (first + chunk.len()) as f64;

            let start = start.max(clip_start);
            let end = end.min(clip_end);
            if end - start <= 0.0 {
                continue;
            }

            cues.push(CaptionCue {
                start: start - clip_start,
                end: end - clip_start,
                text: chunk.join(" "),
            });
        }
    }

    cues
}
