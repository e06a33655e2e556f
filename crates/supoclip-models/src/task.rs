//! Task records and lifecycle enums.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::font::FontConfig;
use crate::ids::{ClipId, SourceId, TaskId, UserId};
use crate::segment::CandidateSegment;
use crate::source::NormalizedSource;
use crate::transcript::Transcript;

/// Task lifecycle status.
///
/// Moves only `pending -> processing -> {completed | error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, not yet started
    #[default]
    Pending,
    /// A stage is running
    Processing,
    /// All stages finished
    Completed,
    /// A fatal failure occurred
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Error)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable step enumeration exposed to clients.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskStep {
    /// Waiting for a worker
    #[default]
    Queued,
    /// Worker picked the task up and is checking its inputs
    Validation,
    /// Fetching or staging the source media
    Acquisition,
    /// Producing the transcript
    Transcript,
    /// Selecting segments
    Analysis,
    /// Rendering clips
    Rendering,
    /// Finished
    Complete,
}

impl TaskStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStep::Queued => "queued",
            TaskStep::Validation => "validation",
            TaskStep::Acquisition => "acquisition",
            TaskStep::Transcript => "transcript",
            TaskStep::Analysis => "analysis",
            TaskStep::Rendering => "rendering",
            TaskStep::Complete => "complete",
        }
    }

    /// Percentage reported when the step begins.
    pub fn base_percentage(&self) -> u8 {
        match self {
            TaskStep::Queued => 0,
            TaskStep::Validation => 5,
            TaskStep::Acquisition => 10,
            TaskStep::Transcript => 30,
            TaskStep::Analysis => 55,
            TaskStep::Rendering => 70,
            TaskStep::Complete => 100,
        }
    }

    /// Human message reported when the step begins.
    pub fn default_message(&self) -> &'static str {
        match self {
            TaskStep::Queued => "Waiting for an available worker",
            TaskStep::Validation => "Validating source",
            TaskStep::Acquisition => "Downloading video",
            TaskStep::Transcript => "Generating transcript",
            TaskStep::Analysis => "Finding the most relevant moments",
            TaskStep::Rendering => "Creating clips",
            TaskStep::Complete => "Clips ready",
        }
    }
}

impl fmt::Display for TaskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic record for a task that ended in `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TaskFailure {
    /// Stable error kind label (e.g., "transcription")
    pub kind: String,
    /// Step that was running
    pub step: TaskStep,
    /// Human readable message
    pub message: String,
}

/// Durable record of a finished stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StageRecord {
    pub step: TaskStep,
    pub completed_at: DateTime<Utc>,
    /// Short result summary (e.g., "3 segments selected")
    pub summary: String,
}

/// Stage outputs kept so an interrupted task can resume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageCheckpoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<NormalizedSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Transcript>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<CandidateSegment>>,
}

/// One end-to-end request to turn a source video into clips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,
    /// Owning user
    pub user_id: UserId,
    /// Input source; cleared when the source is deleted
    pub source_id: Option<SourceId>,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Current step
    pub step: TaskStep,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Progress message for the current step
    pub message: String,
    /// Caption font settings
    pub font: FontConfig,
    /// Produced clips in `clip_order`
    #[serde(default)]
    pub clip_ids: Vec<ClipId>,
    /// Failure details once `status == error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    /// Finished stages, oldest first
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    /// Stage outputs for resumption
    #[serde(default)]
    pub checkpoint: StageCheckpoint,
    /// Store revision, bumped by every write
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task.
    pub fn new(user_id: UserId, source_id: SourceId, font: FontConfig) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            user_id,
            source_id: Some(source_id),
            status: TaskStatus::Pending,
            step: TaskStep::Queued,
            progress: TaskStep::Queued.base_percentage(),
            message: TaskStep::Queued.default_message().to_string(),
            font,
            clip_ids: Vec::new(),
            failure: None,
            stages: Vec::new(),
            checkpoint: StageCheckpoint::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }

    /// First step whose output is not yet checkpointed, or `None` once terminal.
    pub fn resume_step(&self) -> Option<TaskStep> {
        if self.status.is_terminal() {
            return None;
        }
        let checkpoint = &self.checkpoint;
        Some(if checkpoint.media.is_none() {
            TaskStep::Validation
        } else if checkpoint.transcript.is_none() {
            TaskStep::Transcript
        } else if checkpoint.segments.is_none() {
            TaskStep::Analysis
        } else {
            TaskStep::Rendering
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Error));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Error.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Processing));
    }

    #[test]
    fn test_step_percentages_increase() {
        let steps = [
            TaskStep::Queued,
            TaskStep::Validation,
            TaskStep::Acquisition,
            TaskStep::Transcript,
            TaskStep::Analysis,
            TaskStep::Rendering,
            TaskStep::Complete,
        ];
        for pair in steps.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].base_percentage() < pair[1].base_percentage());
        }
    }

    #[test]
    fn test_step_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskStep::Transcript).unwrap(),
            "\"transcript\""
        );
        assert_eq!(serde_json::to_string(&TaskStatus::Error).unwrap(), "\"error\"");
    }

    #[test]
    fn test_version_defaults_for_old_records() {
        let task = Task::new(UserId::new("u"), SourceId::new(), FontConfig::default());
        let mut json = serde_json::to_value(&task).unwrap();
        json.as_object_mut().unwrap().remove("version");
        let parsed: Task = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.version, 0);
    }

    #[test]
    fn test_resume_step_follows_checkpoint() {
        let mut task = Task::new(UserId::new("u"), SourceId::new(), FontConfig::default());
        assert_eq!(task.resume_step(), Some(TaskStep::Validation));

        task.checkpoint.media = Some(NormalizedSource {
            local_path: "/tmp/a.mp4".into(),
            title: "a".to_string(),
            source_type: crate::SourceType::LocalUpload,
            duration: 10.0,
        });
        assert_eq!(task.resume_step(), Some(TaskStep::Transcript));

        task.status = TaskStatus::Completed;
        assert_eq!(task.resume_step(), None);
    }
}
