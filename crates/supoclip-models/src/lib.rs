//! Shared data models for the SupoClip pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Tasks, sources and rendered clips
//! - Task lifecycle status and the stable step enumeration
//! - Font configuration and the font catalog entries
//! - Transcripts and candidate segments exchanged between stages
//! - Client-facing views and progress snapshots

pub mod clip;
pub mod error;
pub mod font;
pub mod ids;
pub mod progress;
pub mod segment;
pub mod source;
pub mod task;
pub mod timestamp;
pub mod transcript;
pub mod view;
pub mod youtube;

// Re-export common types
pub use clip::{clip_filename, has_dense_clip_order, Clip};
pub use error::ValidationError;
pub use font::{
    is_safe_family_name, FontConfig, FontInfo, FontOptions, DEFAULT_FONT_COLOR, DEFAULT_FONT_FAMILY,
    DEFAULT_FONT_SIZE,
};
pub use ids::{ClipId, SourceId, TaskId, UserId};
pub use progress::{rendering_percentage, ProgressSnapshot};
pub use segment::CandidateSegment;
pub use source::{is_valid_upload_handle, NormalizedSource, Source, SourceDescriptor, SourceRef, SourceType};
pub use task::{StageCheckpoint, StageRecord, Task, TaskFailure, TaskStatus, TaskStep};
pub use timestamp::{format_mmss, parse_timestamp, TimestampError};
pub use transcript::{Transcript, TranscriptError, TranscriptSegment};
pub use view::{ClipView, TaskView};
pub use youtube::{extract_youtube_id, is_youtube_url};
