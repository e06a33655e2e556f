//! Structured task logging.
//!
//! Every line carries the task ID and the operation so that one task's
//! journey through the pipeline can be filtered out of interleaved output.

use tracing::{error, info, warn, Span};
use supoclip_models::TaskId;

/// Logger stamping `task_id` and `operation` on stage lifecycle events.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    task_id: String,
    operation: String,
}

impl TaskLogger {
    /// Create a logger for one task and operation (e.g. `"pipeline"`, `"render"`).
    pub fn new(task_id: &TaskId, operation: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Same task, different operation.
    pub fn for_operation(&self, operation: &str) -> Self {
        Self {
            task_id: self.task_id.clone(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task completed: {}", message
        );
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span for attaching further structured fields.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "task",
            task_id = %self.task_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_logger_creation() {
        let task_id = TaskId::new();
        let logger = TaskLogger::new(&task_id, "pipeline");

        assert_eq!(logger.task_id(), task_id.to_string());
        assert_eq!(logger.operation(), "pipeline");
    }

    #[test]
    fn test_for_operation_keeps_task() {
        let logger = TaskLogger::new(&TaskId::from_string("task-123"), "pipeline");
        let render = logger.for_operation("render");

        assert_eq!(render.task_id(), "task-123");
        assert_eq!(render.operation(), "render");
    }
}
