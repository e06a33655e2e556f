//! Worker error types.

use supoclip_models::{TaskId, TaskStep};
use thiserror::Error;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Task-level failures raised by pipeline stages.
///
/// Every variant except [`PipelineError::Render`] ends the task. The detail
/// string goes to the logs; clients only see [`PipelineError::client_message`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Source could not be resolved: {0}")]
    UnresolvableSource(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Segment selection failed: {0}")]
    Selection(String),

    #[error("Rendering segment {index} failed: {message}")]
    Render { index: usize, message: String },

    #[error("None of the {selected} selected segments could be rendered")]
    AllRendersFailed { selected: usize },

    #[error("Stage {stage} timed out after {secs} seconds")]
    Timeout { stage: TaskStep, secs: u64 },
}

impl PipelineError {
    pub fn unresolvable(msg: impl Into<String>) -> Self {
        Self::UnresolvableSource(msg.into())
    }

    pub fn transcription(msg: impl Into<String>) -> Self {
        Self::Transcription(msg.into())
    }

    pub fn selection(msg: impl Into<String>) -> Self {
        Self::Selection(msg.into())
    }

    pub fn render(index: usize, msg: impl Into<String>) -> Self {
        Self::Render {
            index,
            message: msg.into(),
        }
    }

    /// Stable label stored on the failed task.
    pub fn error_kind(&self) -> &'static str {
        match self {
            PipelineError::UnresolvableSource(_) => "unresolvable_source",
            PipelineError::Transcription(_) => "transcription",
            PipelineError::Selection(_) => "selection",
            PipelineError::Render { .. } | PipelineError::AllRendersFailed { .. } => "render",
            PipelineError::Timeout { .. } => "timeout",
        }
    }

    /// Human-readable message safe to show to the task owner.
    pub fn client_message(&self) -> String {
        match self {
            PipelineError::UnresolvableSource(_) => {
                "The source video could not be downloaded or read".to_string()
            }
            PipelineError::Transcription(_) => "The video could not be transcribed".to_string(),
            PipelineError::Selection(_) => "Clip selection failed".to_string(),
            PipelineError::Render { index, .. } => format!("Clip {} could not be rendered", index + 1),
            PipelineError::AllRendersFailed { selected } => {
                format!("None of the {} selected clips could be rendered", selected)
            }
            PipelineError::Timeout { stage, .. } => format!("The {} step took too long", stage),
        }
    }
}

/// Errors that can occur while running the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Media error: {0}")]
    Media(#[from] supoclip_media::MediaError),

    #[error("Store error: {0}")]
    Store(#[from] supoclip_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] supoclip_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task {0} is being run by another worker")]
    LeaseHeld(TaskId),

    #[error("Lost the lease on task {0}")]
    LeaseLost(TaskId),

    #[error("Shutdown requested")]
    Shutdown,
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether redelivering the queue entry can help.
    ///
    /// Pipeline failures are already recorded on the task; store and queue
    /// outages leave the task where it was, so another attempt resumes it.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Store(e) => !e.is_client_error(),
            WorkerError::Queue(_)
            | WorkerError::Io(_)
            | WorkerError::Shutdown
            | WorkerError::LeaseHeld(_)
            | WorkerError::LeaseLost(_) => true,
            WorkerError::ConfigError(_) | WorkerError::Pipeline(_) | WorkerError::Media(_) => false,
        }
    }
}
