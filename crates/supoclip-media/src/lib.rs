//! FFmpeg CLI wrapper for clip production.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Timeouts and child cleanup via tokio
//! - Source download and metadata lookup through yt-dlp
//! - Media probing and audio extraction
//! - Face-aware 9:16 framing
//! - Caption cue layout and vertical clip rendering with burned-in text
//! - The caption font catalog

pub mod audio;
pub mod captions;
pub mod command;
pub mod download;
pub mod error;
pub mod fonts;
pub mod framing;
pub mod probe;
pub mod progress;
pub mod render;

pub use audio::extract_audio;
pub use captions::{build_cues, CaptionCue};
pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use download::{download_video, fetch_title, DownloadOptions};
pub use error::{MediaError, MediaResult};
pub use fonts::{FontCatalog, ResolvedFont};
#[cfg(feature = "opencv")]
pub use framing::HaarCascadeDetector;
pub use framing::{choose_crop, plan_crop, CropWindow, FaceBox, FaceDetector};
pub use probe::{probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use render::{render_clip, ClipRenderSpec, OUTPUT_HEIGHT, OUTPUT_WIDTH};
