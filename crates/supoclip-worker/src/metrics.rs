//! Pipeline metrics.

use metrics::{counter, histogram};

pub mod names {
    /// Wall time spent in one stage, by step and outcome.
    pub const STAGE_DURATION_SECONDS: &str = "supoclip_stage_duration_seconds";

    /// Clips rendered successfully.
    pub const CLIPS_RENDERED_TOTAL: &str = "supoclip_clips_rendered_total";

    /// Per-segment render failures.
    pub const CLIPS_FAILED_TOTAL: &str = "supoclip_clips_failed_total";

    /// Candidate windows handed to the scorer.
    pub const WINDOWS_SCORED_TOTAL: &str = "supoclip_windows_scored_total";

    /// Queue entries processed by the executor, by outcome.
    pub const QUEUE_ENTRIES_TOTAL: &str = "supoclip_queue_entries_total";
}

pub fn record_stage_duration(step: &str, success: bool, secs: f64) {
    let outcome = if success { "success" } else { "failure" };
    histogram!(
        names::STAGE_DURATION_SECONDS,
        "step" => step.to_string(),
        "outcome" => outcome
    )
    .record(secs);
}

pub fn record_clip_rendered() {
    counter!(names::CLIPS_RENDERED_TOTAL).increment(1);
}

pub fn record_clip_failed() {
    counter!(names::CLIPS_FAILED_TOTAL).increment(1);
}

pub fn record_windows_scored(count: usize) {
    counter!(names::WINDOWS_SCORED_TOTAL).increment(count as u64);
}

pub fn record_queue_entry(outcome: &'static str) {
    counter!(names::QUEUE_ENTRIES_TOTAL, "outcome" => outcome).increment(1);
}
