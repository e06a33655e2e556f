//! Segment selection.
//!
//! The transcript is cut into overlapping candidate windows whose
//! boundaries fall on transcript segment boundaries, every window is scored,
//! and the best windows are picked greedily so that no two overlap. The
//! selection is returned in chronological order; the score decides which
//! windows make it in, not where they appear.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use supoclip_models::{format_mmss, parse_timestamp, CandidateSegment, Transcript};

use crate::error::PipelineError;
use crate::metrics;
use crate::stages::{CandidateWindow, SegmentScorer, WindowScore};

/// Windows need at least this many spoken words to stand on their own.
pub const MIN_WINDOW_WORDS: usize = 3;

/// Selection bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorSettings {
    /// K
    pub max_clips: usize,
    /// Seconds
    pub min_duration: f64,
    /// Seconds
    pub max_duration: f64,
    /// Windows scoring below this are never selected
    pub min_relevance: f64,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            max_clips: 10,
            min_duration: 10.0,
            max_duration: 45.0,
            min_relevance: 0.5,
        }
    }
}

/// Build every candidate window within `[min_duration, max_duration]`.
///
/// Windows start at the beginning of a spoken segment (floored to the whole
/// second) and end at the end of a later spoken segment (rounded, never past
/// the media end), so their `MM:SS` labels describe them exactly.
pub fn build_windows(transcript: &Transcript, min_duration: f64, max_duration: f64) -> Vec<CandidateWindow> {
    let segments = transcript.segments();
    let media_end = transcript.duration().floor();
    let mut seen: HashSet<(i64, i64)> = HashSet::new();
    let mut windows = Vec::new();

    for (i, first) in segments.iter().enumerate() {
        if first.is_silence() {
            continue;
        }
        let start = first.start.floor();

        for last in &segments[i..] {
            if last.is_silence() {
                continue;
            }
            let end = last.end.round().min(media_end);
            let duration = end - start;
            if duration > max_duration {
                break;
            }
            if duration < min_duration || !seen.insert((start as i64, end as i64)) {
                continue;
            }

            let text = transcript.excerpt(start, end);
            if text.split_whitespace().count() < MIN_WINDOW_WORDS {
                continue;
            }

            windows.push(CandidateWindow {
                index: windows.len(),
                start,
                end,
                text,
            });
        }
    }

    windows
}

/// Validate scores and pick the non-overlapping winners.
///
/// Ranking is by score descending with ties going to the earlier start (then
/// the shorter window). A window overlapping an already selected one is
/// dropped, which includes windows contained in it. The result is sorted by
/// start time.
pub fn choose(
    windows: &[CandidateWindow],
    scores: Vec<WindowScore>,
    settings: &SelectorSettings,
) -> Result<Vec<(CandidateWindow, WindowScore)>, PipelineError> {
    let mut scored = vec![false; windows.len()];
    let mut ranked: Vec<(&CandidateWindow, WindowScore)> = Vec::with_capacity(scores.len());

    for score in scores {
        let window = windows.get(score.index).ok_or_else(|| {
            PipelineError::selection(format!("score for unknown window {}", score.index))
        })?;
        if !score.score.is_finite() || !(0.0..=1.0).contains(&score.score) {
            return Err(PipelineError::selection(format!(
                "window {} scored {} outside [0, 1]",
                score.index, score.score
            )));
        }
        if std::mem::replace(&mut scored[score.index], true) {
            return Err(PipelineError::selection(format!(
                "window {} scored twice",
                score.index
            )));
        }
        if score.score >= settings.min_relevance {
            ranked.push((window, score));
        }
    }

    ranked.sort_by(|(wa, sa), (wb, sb)| {
        sb.score
            .total_cmp(&sa.score)
            .then(wa.start.total_cmp(&wb.start))
            .then(wa.end.total_cmp(&wb.end))
    });

    let mut selected: Vec<(CandidateWindow, WindowScore)> = Vec::new();
    for (window, score) in ranked {
        if selected.len() >= settings.max_clips {
            break;
        }
        if selected
            .iter()
            .any(|(chosen, _)| window.start < chosen.end && chosen.start < window.end)
        {
            continue;
        }
        selected.push((window.clone(), score));
    }

    selected.sort_by(|(a, _), (b, _)| a.start.total_cmp(&b.start));
    Ok(selected)
}

/// The Segment Selector stage.
#[derive(Clone)]
pub struct SegmentSelector {
    scorer: Arc<dyn SegmentScorer>,
    settings: SelectorSettings,
}

impl SegmentSelector {
    pub fn new(scorer: Arc<dyn SegmentScorer>, settings: SelectorSettings) -> Self {
        Self { scorer, settings }
    }

    pub fn settings(&self) -> &SelectorSettings {
        &self.settings
    }

    /// Up to K non-overlapping segments in chronological order.
    ///
    /// An empty result is a normal outcome (nothing long or wordy enough, or
    /// nothing relevant enough).
    pub async fn select(&self, transcript: &Transcript) -> Result<Vec<CandidateSegment>, PipelineError> {
        let windows = build_windows(
            transcript,
            self.settings.min_duration,
            self.settings.max_duration,
        );
        if windows.is_empty() {
            info!(
                duration_secs = transcript.duration(),
                "No candidate windows in transcript"
            );
            return Ok(Vec::new());
        }

        metrics::record_windows_scored(windows.len());
        debug!(windows = windows.len(), scorer = self.scorer.name(), "Scoring candidate windows");

        let scores = self.scorer.score(transcript, &windows).await?;
        let selected = choose(&windows, scores, &self.settings)?;

        info!(
            windows = windows.len(),
            selected = selected.len(),
            scorer = self.scorer.name(),
            "Segments selected"
        );

        Ok(selected
            .into_iter()
            .map(|(window, score)| CandidateSegment {
                start: window.start,
                end: window.end,
                relevance_score: score.score,
                reasoning: score.reasoning,
                text: window.text,
            })
            .collect())
    }
}

// ============================================================================
// Heuristic scorer
// ============================================================================

/// Words per second of brisk, uninterrupted speech.
const TARGET_WORDS_PER_SEC: f64 = 2.5;

/// Openers that promise a payoff.
static HOOK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(how|why|what|here's|here is|the secret|never|stop|imagine|did you know|you)\b")
        .unwrap()
});

static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[!?]|\b\d+(\.\d+)?%?").unwrap());

/// Scores windows from the text alone: speech density, an opening hook,
/// emphasis (questions, exclamations, numbers) and whether the window ends on
/// a finished sentence.
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    fn score_window(window: &CandidateWindow) -> WindowScore {
        let mut reasons = Vec::new();

        let words_per_sec = window.word_count() as f64 / window.duration().max(1.0);
        let density = (words_per_sec / TARGET_WORDS_PER_SEC).min(1.0);
        if density >= 0.8 {
            reasons.push(format!("dense speech ({:.1} words/s)", words_per_sec));
        }

        let hook = HOOK.is_match(&window.text);
        if hook {
            reasons.push("opens with a hook".to_string());
        }

        let emphasis_hits = EMPHASIS.find_iter(&window.text).count();
        let emphasis = (emphasis_hits as f64 / 3.0).min(1.0);
        if emphasis_hits > 0 {
            reasons.push(format!("{} emphatic moments", emphasis_hits));
        }

        let complete = window.text.trim_end().ends_with(['.', '!', '?']);
        if complete {
            reasons.push("ends on a complete thought".to_string());
        }

        let score = 0.4 * density
            + 0.2 * f64::from(u8::from(hook))
            + 0.2 * emphasis
            + 0.2 * f64::from(u8::from(complete));
        let score = (score.clamp(0.0, 1.0) * 1000.0).round() / 1000.0;

        let reasoning = if reasons.is_empty() {
            "Steady stretch of speech".to_string()
        } else {
            let mut text = reasons.join(", ");
            if let Some(first) = text.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            text
        };

        WindowScore {
            index: window.index,
            score,
            reasoning,
        }
    }
}

#[async_trait]
impl SegmentScorer for HeuristicScorer {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn score(
        &self,
        _transcript: &Transcript,
        windows: &[CandidateWindow],
    ) -> Result<Vec<WindowScore>, PipelineError> {
        Ok(windows.iter().map(Self::score_window).collect())
    }
}

// ============================================================================
// Gemini scorer
// ============================================================================

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Tried after the configured model fails.
const FALLBACK_MODELS: [&str; 2] = ["gemini-2.5-flash", "gemini-2.5-flash-lite"];

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: String,
}

/// Passage proposed by the model.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Highlight {
    pub start_time: String,
    pub end_time: String,
    pub relevance_score: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
struct HighlightsResponse {
    #[serde(default, alias = "most_relevant_segments")]
    segments: Vec<Highlight>,
}

/// Asks Gemini for the most engaging passages of the transcript and scores
/// each window by its best match: the passage's relevance times the
/// intersection-over-union of the two time ranges.
pub struct GeminiScorer {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
    settings: SelectorSettings,
}

impl GeminiScorer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, settings: SelectorSettings) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            client: Client::new(),
            settings,
        }
    }

    /// Point at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_prompt(&self, transcript: &str) -> String {
        let min = self.settings.min_duration;
        let max = self.settings.max_duration;
        let count = self.settings.max_clips;
        format!(
            r#"You are an expert at analyzing video transcripts to find the most engaging segments for short-form content.

Pick passages that work as standalone clips: strong hooks, valuable insights or stories, emotional or funny moments, complete thoughts.

TIMING RULES:
- Each passage MUST be between {min:.0} and {max:.0} seconds long.
- Use EXACT timestamps from the transcript in MM:SS format.
- start_time MUST be earlier than end_time.
- Return at most {count} passages. Quality over quantity.

Return ONLY a single JSON object with this schema:
{{
  "segments": [
    {{
      "start_time": "MM:SS",
      "end_time": "MM:SS",
      "relevance_score": 0.0,
      "reasoning": "Why this passage works as a clip"
    }}
  ]
}}
relevance_score is a number from 0.0 to 1.0.

TRANSCRIPT:
{transcript}
"#
        )
    }

    async fn call_gemini_api(&self, model: &str, prompt: &str) -> Result<HighlightsResponse, String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Gemini API request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!("Gemini API returned {}: {}", status, error_text));
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Gemini response: {}", e))?;

        let text = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| "No content in Gemini response".to_string())?;

        parse_highlights(text)
    }

    async fn highlights(&self, transcript: &Transcript) -> Result<Vec<Highlight>, PipelineError> {
        let prompt = self.build_prompt(&transcript.to_timestamped_lines());

        let mut models = vec![self.model.as_str()];
        models.extend(FALLBACK_MODELS.iter().copied().filter(|m| *m != self.model));

        let mut last_error = None;
        for model in models {
            info!("Attempting Gemini API with model: {}", model);
            match self.call_gemini_api(model, &prompt).await {
                Ok(data) => {
                    info!(model = model, highlights = data.segments.len(), "Got highlights");
                    return Ok(data.segments);
                }
                Err(e) => {
                    warn!("Failed with model {}: {}", model, e);
                    last_error = Some(e);
                }
            }
        }

        Err(PipelineError::selection(format!(
            "scorer unavailable: {}",
            last_error.unwrap_or_else(|| "no model configured".to_string())
        )))
    }
}

/// Parse the model's JSON, tolerating a markdown code fence around it.
fn parse_highlights(text: &str) -> Result<HighlightsResponse, String> {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);

    serde_json::from_str(text.trim()).map_err(|e| format!("Failed to parse highlights JSON: {}", e))
}

/// Intersection over union of two time ranges.
fn iou(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    let intersection = (a_end.min(b_end) - a_start.max(b_start)).max(0.0);
    let union = a_end.max(b_end) - a_start.min(b_start);
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Map model passages onto windows.
fn score_against_highlights(
    windows: &[CandidateWindow],
    highlights: &[Highlight],
) -> Result<Vec<WindowScore>, PipelineError> {
    let mut ranges = Vec::with_capacity(highlights.len());
    for highlight in highlights {
        if !highlight.relevance_score.is_finite() || !(0.0..=1.0).contains(&highlight.relevance_score) {
            return Err(PipelineError::selection(format!(
                "model scored a passage {} outside [0, 1]",
                highlight.relevance_score
            )));
        }
        match (
            parse_timestamp(&highlight.start_time),
            parse_timestamp(&highlight.end_time),
        ) {
            (Ok(start), Ok(end)) if end > start => ranges.push((start, end, highlight)),
            _ => warn!(
                start = %highlight.start_time,
                end = %highlight.end_time,
                "Skipping passage with unusable timestamps"
            ),
        }
    }

    Ok(windows
        .iter()
        .filter_map(|window| {
            ranges
                .iter()
                .map(|(start, end, highlight)| {
                    let overlap = iou(window.start, window.end, *start, *end);
                    (highlight.relevance_score * overlap, *highlight)
                })
                .filter(|(score, _)| *score > 0.0)
                .max_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(score, highlight)| WindowScore {
                    index: window.index,
                    score: score.clamp(0.0, 1.0),
                    reasoning: if highlight.reasoning.trim().is_empty() {
                        format!(
                            "Matches the passage at {}-{}",
                            format_mmss(window.start),
                            format_mmss(window.end)
                        )
                    } else {
                        highlight.reasoning.trim().to_string()
                    },
                })
        })
        .collect())
}

#[async_trait]
impl SegmentScorer for GeminiScorer {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn score(
        &self,
        transcript: &Transcript,
        windows: &[CandidateWindow],
    ) -> Result<Vec<WindowScore>, PipelineError> {
        let highlights = self.highlights(transcript).await?;
        score_against_highlights(windows, &highlights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supoclip_models::TranscriptSegment;

    fn transcript(parts: &[(&str, f64, f64)], duration: f64) -> Transcript {
        Transcript::normalize(
            parts
                .iter()
                .map(|(text, start, end)| TranscriptSegment::new(*text, *start, *end))
                .collect(),
            duration,
        )
        .unwrap()
    }

    /// Ten minutes of ten-second segments with one standout passage at 5:00-5:30.
    fn ten_minute_transcript() -> Transcript {
        let segments: Vec<TranscriptSegment> = (0..60)
            .map(|i| {
                let start = i as f64 * 10.0;
                let text = if (30..33).contains(&i) {
                    "here is the one insight that changes everything about this"
                } else {
                    "so we kept talking about things"
                };
                TranscriptSegment::new(text, start, start + 10.0)
            })
            .collect();
        Transcript::normalize(segments, 600.0).unwrap()
    }

    /// Scores a window by how well it matches a fixed passage.
    struct PassageScorer {
        start: f64,
        end: f64,
    }

    #[async_trait]
    impl SegmentScorer for PassageScorer {
        fn name(&self) -> &'static str {
            "passage"
        }

        async fn score(
            &self,
            _transcript: &Transcript,
            windows: &[CandidateWindow],
        ) -> Result<Vec<WindowScore>, PipelineError> {
            Ok(windows
                .iter()
                .map(|w| WindowScore {
                    index: w.index,
                    score: iou(w.start, w.end, self.start, self.end),
                    reasoning: "matches the passage".to_string(),
                })
                .collect())
        }
    }

    struct FixedScorer(f64);

    #[async_trait]
    impl SegmentScorer for FixedScorer {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn score(
            &self,
            _transcript: &Transcript,
            windows: &[CandidateWindow],
        ) -> Result<Vec<WindowScore>, PipelineError> {
            Ok(windows
                .iter()
                .map(|w| WindowScore {
                    index: w.index,
                    score: self.0,
                    reasoning: String::new(),
                })
                .collect())
        }
    }

    fn window(index: usize, start: f64, end: f64) -> CandidateWindow {
        CandidateWindow {
            index,
            start,
            end,
            text: "one two three".to_string(),
        }
    }

    fn score(index: usize, score: f64) -> WindowScore {
        WindowScore {
            index,
            score,
            reasoning: format!("w{}", index),
        }
    }

    fn settings(max_clips: usize) -> SelectorSettings {
        SelectorSettings {
            max_clips,
            min_duration: 15.0,
            max_duration: 60.0,
            min_relevance: 0.5,
        }
    }

    #[test]
    fn test_windows_respect_band() {
        let t = ten_minute_transcript();
        let windows = build_windows(&t, 15.0, 60.0);
        assert!(!windows.is_empty());
        for (i, w) in windows.iter().enumerate() {
            assert_eq!(w.index, i);
            assert!(w.duration() >= 15.0 && w.duration() <= 60.0, "{:?}", w);
            assert_eq!(w.start.fract(), 0.0);
            assert_eq!(w.end.fract(), 0.0);
            assert!(w.word_count() >= MIN_WINDOW_WORDS);
        }
    }

    #[test]
    fn test_short_media_has_no_windows() {
        let t = transcript(&[("a very short clip indeed", 0.0, 8.0)], 8.0);
        assert!(build_windows(&t, 10.0, 45.0).is_empty());
    }

    #[test]
    fn test_windows_need_three_words() {
        let t = transcript(&[("hi", 0.0, 10.0), ("there", 10.0, 20.0)], 20.0);
        assert!(build_windows(&t, 10.0, 45.0).is_empty());
    }

    #[test]
    fn test_windows_skip_silent_edges() {
        let t = transcript(&[("one two three four", 5.0, 25.0)], 40.0);
        let windows = build_windows(&t, 10.0, 45.0);
        assert_eq!(windows.len(), 1);
        assert_eq!((windows[0].start, windows[0].end), (5.0, 25.0));
    }

    #[test]
    fn test_choose_is_greedy_and_non_overlapping() {
        let windows = vec![
            window(0, 0.0, 30.0),
            window(1, 20.0, 50.0),
            window(2, 50.0, 80.0),
            window(3, 5.0, 20.0),
        ];
        let scores = vec![score(0, 0.7), score(1, 0.9), score(2, 0.8), score(3, 0.6)];

        let chosen = choose(&windows, scores, &settings(5)).unwrap();
        let ranges: Vec<(f64, f64)> = chosen.iter().map(|(w, _)| (w.start, w.end)).collect();
        // 1 wins, 0 overlaps it, 2 touches it only at the edge, 3 fits before it
        assert_eq!(ranges, vec![(5.0, 20.0), (20.0, 50.0), (50.0, 80.0)]);
    }

    #[test]
    fn test_choose_discards_contained_window() {
        let windows = vec![window(0, 0.0, 40.0), window(1, 10.0, 30.0)];
        let chosen = choose(&windows, vec![score(0, 0.9), score(1, 0.8)], &settings(5)).unwrap();
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].0.index, 0);
    }

    #[test]
    fn test_choose_caps_at_k_and_sorts_chronologically() {
        let windows: Vec<CandidateWindow> = (0..6)
            .map(|i| window(i, i as f64 * 20.0, i as f64 * 20.0 + 15.0))
            .collect();
        let scores = (0..6).map(|i| score(i, 0.5 + i as f64 * 0.05)).collect();

        let chosen = choose(&windows, scores, &settings(3)).unwrap();
        let indices: Vec<usize> = chosen.iter().map(|(w, _)| w.index).collect();
        assert_eq!(indices, vec![3, 4, 5]);
    }

    #[test]
    fn test_choose_ties_prefer_earlier_start() {
        let windows = vec![window(0, 10.0, 40.0), window(1, 0.0, 30.0)];
        let chosen = choose(&windows, vec![score(0, 0.8), score(1, 0.8)], &settings(1)).unwrap();
        assert_eq!(chosen[0].0.index, 1);
    }

    #[test]
    fn test_choose_rejects_out_of_range_scores() {
        let windows = vec![window(0, 0.0, 30.0)];
        for bad in [1.2, -0.1, f64::NAN] {
            let err = choose(&windows, vec![score(0, bad)], &settings(3)).unwrap_err();
            assert_eq!(err.error_kind(), "selection");
        }
        assert!(choose(&windows, vec![score(7, 0.5)], &settings(3)).is_err());
        assert!(choose(&windows, vec![score(0, 0.5), score(0, 0.6)], &settings(3)).is_err());
    }

    #[test]
    fn test_choose_drops_weak_windows() {
        let windows = vec![window(0, 0.0, 30.0)];
        let chosen = choose(&windows, vec![score(0, 0.49)], &settings(3)).unwrap();
        assert!(chosen.is_empty());
    }

    #[tokio::test]
    async fn test_dominant_passage_yields_single_segment() {
        let selector = SegmentSelector::new(
            Arc::new(PassageScorer {
                start: 300.0,
                end: 330.0,
            }),
            settings(3),
        );

        let segments = selector.select(&ten_minute_transcript()).await.unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!((segments[0].start, segments[0].end), (300.0, 330.0));
        assert_eq!(segments[0].relevance_score, 1.0);
        assert!(segments[0].text.contains("insight"));
        assert_eq!(segments[0].reasoning, "matches the passage");
    }

    #[tokio::test]
    async fn test_selector_output_never_overlaps() {
        let selector = SegmentSelector::new(Arc::new(HeuristicScorer::new()), settings(10));
        let segments = selector.select(&ten_minute_transcript()).await.unwrap();

        assert!(segments.len() <= 10);
        for pair in segments.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[tokio::test]
    async fn test_short_media_selects_nothing() {
        let selector = SegmentSelector::new(Arc::new(FixedScorer(0.9)), settings(3));
        let t = transcript(&[("far too short to clip", 0.0, 9.0)], 9.0);
        assert!(selector.select(&t).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_scorer_output_fails_selection() {
        let selector = SegmentSelector::new(Arc::new(FixedScorer(1.5)), settings(3));
        let err = selector.select(&ten_minute_transcript()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Selection(_)));
    }

    #[test]
    fn test_heuristic_prefers_hooks_and_complete_thoughts() {
        let strong = CandidateWindow {
            index: 0,
            start: 0.0,
            end: 10.0,
            text: "Why do 90% of startups fail? Here is the one reason nobody tells you about."
                .to_string(),
        };
        let weak = CandidateWindow {
            index: 1,
            start: 0.0,
            end: 10.0,
            text: "and then um so".to_string(),
        };

        let strong = HeuristicScorer::score_window(&strong);
        let weak = HeuristicScorer::score_window(&weak);
        assert!(strong.score > weak.score);
        assert!((0.0..=1.0).contains(&strong.score));
        assert!(strong.reasoning.contains("hook"));
    }

    #[test]
    fn test_hook_and_emphasis_patterns() {
        assert!(HOOK.is_match("  Did you know this works?"));
        assert!(!HOOK.is_match("so anyway why not"));
        assert_eq!(EMPHASIS.find_iter("Up 40%! Really? 3.5 times").count(), 4);
    }

    #[test]
    fn test_parse_highlights_strips_fence() {
        let text = "```json\n{\"segments\": [{\"start_time\": \"01:00\", \"end_time\": \"01:30\", \"relevance_score\": 0.9, \"reasoning\": \"great\"}]}\n```";
        let parsed = parse_highlights(text).unwrap();
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.segments[0].start_time, "01:00");
    }

    #[test]
    fn test_highlights_map_to_best_window() {
        let windows = vec![window(0, 60.0, 90.0), window(1, 70.0, 100.0), window(2, 200.0, 230.0)];
        let highlights = vec![Highlight {
            start_time: "01:00".to_string(),
            end_time: "01:30".to_string(),
            relevance_score: 0.9,
            reasoning: "great story".to_string(),
        }];

        let scores = score_against_highlights(&windows, &highlights).unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].index, 0);
        assert!((scores[0].score - 0.9).abs() < 1e-9);
        assert!(scores[1].score < scores[0].score);
        assert_eq!(scores[0].reasoning, "great story");
    }

    #[test]
    fn test_highlight_score_out_of_range_is_selection_error() {
        let highlights = vec![Highlight {
            start_time: "00:00".to_string(),
            end_time: "00:30".to_string(),
            relevance_score: 7.0,
            reasoning: String::new(),
        }];
        let err = score_against_highlights(&[window(0, 0.0, 30.0)], &highlights).unwrap_err();
        assert_eq!(err.error_kind(), "selection");
    }

    #[tokio::test]
    async fn test_gemini_scorer_calls_generate_content() {
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let model_text = serde_json::json!({
            "segments": [{
                "start_time": "05:00",
                "end_time": "05:30",
                "relevance_score": 0.95,
                "reasoning": "The core insight of the talk"
            }]
        })
        .to_string();
        Mock::given(method("POST"))
            .and(path("/models/test-model:generateContent"))
            .and(query_param("key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": model_text}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let scorer = GeminiScorer::new("k", "test-model", settings(3)).with_base_url(server.uri());
        let selector = SegmentSelector::new(Arc::new(scorer), settings(3));
        let segments = selector.select(&ten_minute_transcript()).await.unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!((segments[0].start, segments[0].end), (300.0, 330.0));
        assert_eq!(segments[0].reasoning, "The core insight of the talk");
    }

    #[tokio::test]
    async fn test_gemini_outage_is_selection_error() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let scorer = GeminiScorer::new("k", "test-model", settings(3)).with_base_url(server.uri());
        let err = scorer
            .score(&ten_minute_transcript(), &[window(0, 0.0, 30.0)])
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "selection");
    }
}
