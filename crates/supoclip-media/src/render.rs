//! Vertical clip rendering with burned-in captions.
//!
//! The source is cut to `[start, end)`, cropped to 9:16 (around a detected
//! face when [`ClipRenderSpec::crop`] is set, centred otherwise), scaled to
//! 1080x1920 and overlaid with one `drawtext` filter per caption cue. Cue
//! text is passed through `textfile=` so transcript content never has to be
//! escaped inside the filter graph.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::captions::CaptionCue;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fonts::ResolvedFont;
use crate::framing::CropWindow;
use crate::probe::{probe_video, VideoInfo};

pub const OUTPUT_WIDTH: u32 = 1080;
pub const OUTPUT_HEIGHT: u32 = 1920;

/// Caption sizes are given for a 540px-wide preview.
const CAPTION_SCALE: u32 = 2;

/// Caption baseline distance from the bottom edge.
const CAPTION_BOTTOM_MARGIN: u32 = 320;

/// Allowed difference between requested and rendered duration.
pub const RENDER_DURATION_TOLERANCE_SECS: f64 = 0.5;

/// Everything needed to render one clip.
#[derive(Debug, Clone)]
pub struct ClipRenderSpec {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Segment start in the source, seconds
    pub start: f64,
    /// Segment end in the source, seconds
    pub end: f64,
    /// Cues relative to `start`
    pub cues: Vec<CaptionCue>,
    pub font: ResolvedFont,
    /// Caption size as requested by the client
    pub font_size: u32,
    /// `#RRGGBB`
    pub font_color: String,
    /// Planned crop window; `None` centre-crops
    pub crop: Option<CropWindow>,
}

impl ClipRenderSpec {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Directory holding the per-cue text files.
    fn captions_dir(&self) -> PathBuf {
        self.scratch_dir("captions")
    }

    /// Hidden directory next to the output, e.g. `.clip_1_captions`.
    pub fn scratch_dir(&self, purpose: &str) -> PathBuf {
        let stem = self
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "clip".to_string());
        self.output.with_file_name(format!(".{}_{}", stem, purpose))
    }
}

/// Render `spec` and verify the produced file.
///
/// The output is removed again when its probed duration is off by more than
/// [`RENDER_DURATION_TOLERANCE_SECS`].
pub async fn render_clip(spec: &ClipRenderSpec, runner: &FfmpegRunner) -> MediaResult<VideoInfo> {
    let duration = spec.duration();
    if !duration.is_finite() || duration <= 0.0 || spec.start < 0.0 {
        return Err(MediaError::invalid_video(format!(
            "Invalid clip range [{:.3}, {:.3}]",
            spec.start, spec.end
        )));
    }
    if !spec.input.exists() {
        return Err(MediaError::FileNotFound(spec.input.clone()));
    }

    if let Some(parent) = spec.output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let captions_dir = spec.captions_dir();
    let caption_files = write_caption_files(&captions_dir, &spec.cues).await?;

    info!(
        output = %spec.output.display(),
        start = spec.start,
        duration = duration,
        cues = spec.cues.len(),
        font = spec.font.family(),
        "Rendering clip"
    );

    let filter = build_render_filter(spec, &caption_files);
    let cmd = FfmpegCommand::new(&spec.input, &spec.output)
        .seek(spec.start)
        .duration(duration)
        .video_filter(filter)
        .video_codec("libx264")
        .preset("veryfast")
        .crf(23)
        .output_args(["-pix_fmt", "yuv420p"])
        .audio_codec("aac")
        .audio_bitrate("128k")
        .output_args(["-movflags", "+faststart"]);

    let result = runner.run(&cmd).await;

    if let Err(e) = tokio::fs::remove_dir_all(&captions_dir).await {
        debug!(dir = %captions_dir.display(), "Failed to remove caption files: {}", e);
    }
    result?;

    let info = probe_video(&spec.output).await?;
    if (info.duration - duration).abs() > RENDER_DURATION_TOLERANCE_SECS {
        warn!(
            output = %spec.output.display(),
            expected = duration,
            actual = info.duration,
            "Rendered duration out of tolerance"
        );
        let _ = tokio::fs::remove_file(&spec.output).await;
        return Err(MediaError::DurationMismatch {
            expected: duration,
            actual: info.duration,
        });
    }

    Ok(info)
}

async fn write_caption_files(dir: &Path, cues: &[CaptionCue]) -> MediaResult<Vec<PathBuf>> {
    if cues.is_empty() {
        return Ok(Vec::new());
    }
    tokio::fs::create_dir_all(dir).await?;
    let mut files = Vec::with_capacity(cues.len());
    for (i, cue) in cues.iter().enumerate() {
        let path = dir.join(format!("cue_{:04}.txt", i));
        tokio::fs::write(&path, cue.wrapped_text()).await?;
        files.push(path);
    }
    Ok(files)
}

/// Build the `-vf` chain; `caption_files[i]` holds the text of `spec.cues[i]`.
fn build_render_filter(spec: &ClipRenderSpec, caption_files: &[PathBuf]) -> String {
    let crop = match &spec.crop {
        Some(window) => window.filter(),
        None => "crop=w='min(iw,ih*9/16)':h='min(ih,iw*16/9)'".to_string(),
    };
    let mut filters = vec![
        crop,
        format!("scale={}:{}", OUTPUT_WIDTH, OUTPUT_HEIGHT),
        "setsar=1".to_string(),
    ];

    let font = font_option(&spec.font);
    let color = format!("0x{}", spec.font_color.trim_start_matches('#'));
    let size = spec.font_size * CAPTION_SCALE;

    for (cue, file) in spec.cues.iter().zip(caption_files) {
        filters.push(format!(
            "drawtext={}:textfile='{}':expansion=none:fontsize={}:fontcolor={}:\
             borderw=3:bordercolor=black:line_spacing=8:\
             x=(w-text_w)/2:y=h-text_h-{}:enable='between(t,{:.3},{:.3})'",
            font,
            escape_filter_path(&file.to_string_lossy()),
            size,
            color,
            CAPTION_BOTTOM_MARGIN,
            cue.start,
            cue.end,
        ));
    }

    filters.join(",")
}

fn font_option(font: &ResolvedFont) -> String {
    match font {
        ResolvedFont::File { path, .. } => {
            format!("fontfile='{}'", escape_filter_path(&path.to_string_lossy()))
        }
        ResolvedFont::System { family } => format!("font='{}'", escape_filter_path(family)),
    }
}

fn escape_filter_path(path: &str) -> String {
    path.replace('\\', "\\\\").replace('\'', "\\'").replace(':', "\\:")
}
