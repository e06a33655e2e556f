//! Clip production worker.
//!
//! This crate provides:
//! - The stage contracts (normalize, transcribe, score, render) and their
//!   production implementations
//! - The segment selector
//! - The per-task pipeline driven by the task state machine
//! - The queue executor with crash recovery and graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod renderer;
pub mod selector;
pub mod stages;
pub mod transcriber;

pub use config::{ScorerKind, WorkerConfig};
pub use error::{PipelineError, WorkerError, WorkerResult};
pub use executor::TaskExecutor;
pub use logging::TaskLogger;
pub use normalizer::MediaSourceNormalizer;
pub use pipeline::{Pipeline, PipelineSettings, PipelineStages};
pub use renderer::FfmpegClipRenderer;
pub use selector::{build_windows, GeminiScorer, HeuristicScorer, SegmentSelector, SelectorSettings};
pub use stages::{
    CandidateWindow, ClipRenderer, RenderJob, RenderedClip, SegmentScorer, SourceNormalizer,
    Transcriber, WindowScore,
};
pub use transcriber::WhisperTranscriber;
