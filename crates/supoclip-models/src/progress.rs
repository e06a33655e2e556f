//! Client-observable progress snapshots.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::TaskId;
use crate::task::{Task, TaskStatus, TaskStep};

/// `{step, message, percentage}` view of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub step: TaskStep,
    pub message: String,
    /// 0-100, never decreasing for a task
    pub percentage: u8,
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            step: task.step,
            message: task.message.clone(),
            percentage: task.progress,
            updated_at: task.updated_at,
        }
    }
}

/// Percentage while `done` of `total` clips have been rendered.
///
/// Interpolates between the rendering and complete steps, never reaching 100.
pub fn rendering_percentage(done: usize, total: usize) -> u8 {
    let base = TaskStep::Rendering.base_percentage() as usize;
    let ceiling = TaskStep::Complete.base_percentage() as usize - 1;
    if total == 0 {
        return base as u8;
    }
    let span = ceiling - base;
    (base + span * done.min(total) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendering_percentage_bounds() {
        assert_eq!(rendering_percentage(0, 4), 70);
        assert_eq!(rendering_percentage(4, 4), 99);
        assert_eq!(rendering_percentage(9, 4), 99);
        assert_eq!(rendering_percentage(0, 0), 70);
    }

    #[test]
    fn test_rendering_percentage_monotonic() {
        let values: Vec<u8> = (0..=5).map(|d| rendering_percentage(d, 5)).collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }
}
