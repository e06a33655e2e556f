//! Rendered clip records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{ClipId, TaskId};
use crate::timestamp::compact_mmss;

/// A rendered, captioned output video derived from one selected segment.
///
/// Created only after a successful render; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Clip {
    /// Unique clip ID
    pub id: ClipId,
    /// Owning task
    pub task_id: TaskId,
    /// File name (e.g., "clip_1_0130-0200.mp4")
    pub filename: String,
    /// Storage path of the rendered file
    pub file_path: String,
    /// Start time formatted as `MM:SS`
    pub start_time: String,
    /// End time formatted as `MM:SS`
    pub end_time: String,
    /// Duration in seconds
    pub duration: f64,
    /// Transcript excerpt covering the clip
    pub text: String,
    /// Relevance score in `[0, 1]`
    pub relevance_score: f64,
    /// Why the segment was selected
    pub reasoning: String,
    /// 1-based position among the task's clips
    pub clip_order: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Build the canonical file name for a clip.
///
/// # Examples
/// ```
/// use supoclip_models::clip_filename;
/// assert_eq!(clip_filename(2, 90.0, 125.0), "clip_2_0130-0205.mp4");
/// ```
pub fn clip_filename(order: u32, start: f64, end: f64) -> String {
    format!("clip_{}_{}-{}.mp4", order, compact_mmss(start), compact_mmss(end))
}

/// True when the clips' `clip_order` values are exactly `1..=N`.
pub fn has_dense_clip_order(clips: &[Clip]) -> bool {
    let mut orders: Vec<u32> = clips.iter().map(|c| c.clip_order).collect();
    orders.sort_unstable();
    orders.iter().enumerate().all(|(i, &o)| o as usize == i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(order: u32) -> Clip {
        Clip {
            id: ClipId::new(),
            task_id: TaskId::from_string("task"),
            filename: clip_filename(order, 0.0, 30.0),
            file_path: String::new(),
            start_time: "00:00".to_string(),
            end_time: "00:30".to_string(),
            duration: 30.0,
            text: String::new(),
            relevance_score: 0.9,
            reasoning: String::new(),
            clip_order: order,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_dense_order() {
        assert!(has_dense_clip_order(&[]));
        assert!(has_dense_clip_order(&[clip(2), clip(1), clip(3)]));
        assert!(!has_dense_clip_order(&[clip(1), clip(3)]));
        assert!(!has_dense_clip_order(&[clip(1), clip(1)]));
    }

    #[test]
    fn test_filename() {
        assert_eq!(clip_filename(1, 0.0, 30.0), "clip_1_0000-0030.mp4");
    }
}
