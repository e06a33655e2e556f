//! Job payloads carried on the stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use supoclip_models::{TaskId, UserId};

/// Run (or resume) the pipeline for one task.
///
/// The task record holds everything the worker needs; the job only names it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessTaskJob {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub enqueued_at: DateTime<Utc>,
}

impl ProcessTaskJob {
    pub fn new(task_id: TaskId, user_id: UserId) -> Self {
        Self {
            task_id,
            user_id,
            enqueued_at: Utc::now(),
        }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("process:{}", self.task_id)
    }
}
