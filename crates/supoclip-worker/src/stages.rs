//! Stage contracts.
//!
//! The pipeline only talks to these traits. Production wiring uses yt-dlp,
//! ffprobe, a Whisper-compatible HTTP service, a scorer and FFmpeg; tests
//! plug in fakes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use supoclip_models::{
    CandidateSegment, FontConfig, NormalizedSource, SourceDescriptor, TaskId, Transcript,
    TranscriptSegment,
};

use crate::error::PipelineError;

/// Resolves a source descriptor into a local, decodable media file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceNormalizer: Send + Sync {
    /// Stage the media under `work_dir`. Later stages never touch the network
    /// for the source itself.
    async fn normalize(
        &self,
        descriptor: &SourceDescriptor,
        work_dir: &Path,
    ) -> Result<NormalizedSource, PipelineError>;
}

/// Produces a time-aligned transcript from a local media file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Intermediate files go under `work_dir`, which belongs to this task
    /// alone; `media` itself may sit in a directory shared with other tasks.
    async fn transcribe(
        &self,
        media: &NormalizedSource,
        work_dir: &Path,
    ) -> Result<Transcript, PipelineError>;
}

/// A contiguous run of transcript segments proposed for scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateWindow {
    /// Position in the window list handed to the scorer
    pub index: usize,
    /// Whole seconds
    pub start: f64,
    /// Whole seconds
    pub end: f64,
    /// Spoken text inside the window
    pub text: String,
}

impl CandidateWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Score assigned to one window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowScore {
    /// [`CandidateWindow::index`] of the scored window
    pub index: usize,
    /// Must lie in `[0, 1]`
    pub score: f64,
    /// Short explanation shown with the clip
    pub reasoning: String,
}

/// Pluggable relevance scoring for candidate windows.
///
/// Windows left out of the result are treated as unscored and never
/// selected.
#[async_trait]
pub trait SegmentScorer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn score(
        &self,
        transcript: &Transcript,
        windows: &[CandidateWindow],
    ) -> Result<Vec<WindowScore>, PipelineError>;
}

/// One segment to cut and caption.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub task_id: TaskId,
    /// Position of the segment in the selector's chronological output
    pub index: usize,
    pub input: PathBuf,
    pub output: PathBuf,
    pub segment: CandidateSegment,
    /// Transcript segments intersecting the clip, in source time
    pub captions: Vec<TranscriptSegment>,
    pub font: FontConfig,
}

/// A finished render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedClip {
    pub index: usize,
    pub path: PathBuf,
    /// Measured duration of the output file
    pub duration: f64,
    /// Font family actually burned in
    pub font_family: String,
}

/// Cuts one segment and burns captions into it.
///
/// A failure only concerns the segment in `job`; the pipeline carries on
/// with the others.
#[async_trait]
pub trait ClipRenderer: Send + Sync {
    async fn render(&self, job: &RenderJob) -> Result<RenderedClip, PipelineError>;
}
