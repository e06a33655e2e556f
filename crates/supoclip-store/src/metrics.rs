//! Task lifecycle metrics.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    /// Tasks accepted by `create`.
    pub const TASKS_CREATED_TOTAL: &str = "supoclip_tasks_created_total";

    /// Stage transitions by resulting step.
    pub const STAGE_TRANSITIONS_TOTAL: &str = "supoclip_stage_transitions_total";

    /// Tasks that reached `completed`.
    pub const TASKS_COMPLETED_TOTAL: &str = "supoclip_tasks_completed_total";

    /// Tasks that reached `error`, by error kind.
    pub const TASKS_FAILED_TOTAL: &str = "supoclip_tasks_failed_total";
}

pub fn record_task_created() {
    counter!(names::TASKS_CREATED_TOTAL).increment(1);
}

pub fn record_transition(step: &str) {
    counter!(names::STAGE_TRANSITIONS_TOTAL, "step" => step.to_string()).increment(1);
}

pub fn record_task_completed(clips: usize) {
    let outcome = if clips == 0 { "empty" } else { "clips" };
    counter!(names::TASKS_COMPLETED_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_task_failed(error_kind: &str, step: &str) {
    counter!(
        names::TASKS_FAILED_TOTAL,
        "error_kind" => error_kind.to_string(),
        "step" => step.to_string()
    )
    .increment(1);
}
