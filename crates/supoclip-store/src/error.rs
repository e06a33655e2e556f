//! Store and state machine error types.

use supoclip_models::{TaskId, TaskStatus, TaskStep};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task {0} belongs to another user")]
    Forbidden(TaskId),

    #[error("Cannot apply {result} to task in {status}/{step}")]
    InvalidTransition {
        status: TaskStatus,
        step: TaskStep,
        result: &'static str,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Compare-and-set write lost against a newer revision.
    pub fn stale(task_id: &TaskId, expected_version: u64) -> Self {
        Self::Conflict(format!(
            "task {} was modified after version {}",
            task_id, expected_version
        ))
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// True for errors caused by the request rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_) | StoreError::Forbidden(_) | StoreError::InvalidTransition { .. }
        )
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}
