//! Client-facing read models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::clip::Clip;
use crate::ids::{ClipId, SourceId, TaskId, UserId};
use crate::source::{Source, SourceType};
use crate::task::{Task, TaskStatus, TaskStep};

/// Task as returned by `GetTask`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskView {
    pub id: TaskId,
    pub user_id: UserId,
    pub source_id: Option<SourceId>,
    pub source_title: Option<String>,
    pub source_type: Option<SourceType>,
    pub status: TaskStatus,
    pub step: TaskStep,
    pub progress: u8,
    pub message: String,
    /// Stable error kind once `status == error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub font_family: String,
    pub font_size: u32,
    pub font_color: String,
    pub generated_clips_ids: Vec<ClipId>,
    pub clips_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskView {
    /// Join a task with its (possibly deleted) source.
    pub fn new(task: &Task, source: Option<&Source>) -> Self {
        Self {
            id: task.id.clone(),
            user_id: task.user_id.clone(),
            source_id: task.source_id.clone(),
            source_title: source.map(|s| s.title.clone()),
            source_type: source.map(|s| s.source_type),
            status: task.status,
            step: task.step,
            progress: task.progress,
            message: task.message.clone(),
            error_kind: task.failure.as_ref().map(|f| f.kind.clone()),
            font_family: task.font.family.clone(),
            font_size: task.font.size,
            font_color: task.font.color.clone(),
            generated_clips_ids: task.clip_ids.clone(),
            clips_count: task.clip_ids.len(),
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Clip as returned by `ListClips`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipView {
    pub id: ClipId,
    pub task_id: TaskId,
    pub filename: String,
    pub file_path: String,
    pub start_time: String,
    pub end_time: String,
    pub duration: f64,
    pub text: String,
    pub relevance_score: f64,
    pub reasoning: String,
    pub clip_order: u32,
    pub created_at: DateTime<Utc>,
    /// Where the client can fetch the file
    pub video_url: String,
}

impl ClipView {
    /// `url_prefix` is the mount point of the clip file server, e.g. `/clips`.
    pub fn new(clip: &Clip, url_prefix: &str) -> Self {
        Self {
            id: clip.id.clone(),
            task_id: clip.task_id.clone(),
            filename: clip.filename.clone(),
            file_path: clip.file_path.clone(),
            start_time: clip.start_time.clone(),
            end_time: clip.end_time.clone(),
            duration: clip.duration,
            text: clip.text.clone(),
            relevance_score: clip.relevance_score,
            reasoning: clip.reasoning.clone(),
            clip_order: clip.clip_order,
            created_at: clip.created_at,
            video_url: format!(
                "{}/{}/{}",
                url_prefix.trim_end_matches('/'),
                clip.task_id,
                clip.filename
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontConfig;
    use crate::source::SourceDescriptor;

    #[test]
    fn test_task_view_without_source() {
        let mut task = Task::new(UserId::new("u1"), SourceId::new(), FontConfig::default());
        task.source_id = None;
        let view = TaskView::new(&task, None);
        assert_eq!(view.source_title, None);
        assert_eq!(view.clips_count, 0);
        assert_eq!(view.font_family, "TikTokSans-Regular");
    }

    #[test]
    fn test_task_view_joins_source() {
        let d = SourceDescriptor::from_parts(None, Some("talk.mp4"), Some("Talk")).unwrap();
        let source = Source::from_descriptor(&d);
        let task = Task::new(UserId::new("u1"), source.id.clone(), FontConfig::default());
        let view = TaskView::new(&task, Some(&source));
        assert_eq!(view.source_title.as_deref(), Some("Talk"));
        assert_eq!(view.source_type, Some(SourceType::LocalUpload));
    }

    #[test]
    fn test_clip_view_url() {
        let clip = Clip {
            id: ClipId::new(),
            task_id: TaskId::from_string("t1"),
            filename: "clip_1_0000-0030.mp4".to_string(),
            file_path: "outputs/clips/t1/clip_1_0000-0030.mp4".to_string(),
            start_time: "00:00".to_string(),
            end_time: "00:30".to_string(),
            duration: 30.0,
            text: "hello".to_string(),
            relevance_score: 0.8,
            reasoning: "hook".to_string(),
            clip_order: 1,
            created_at: Utc::now(),
        };
        let view = ClipView::new(&clip, "/clips/");
        assert_eq!(view.video_url, "/clips/t1/clip_1_0000-0030.mp4");
    }
}
