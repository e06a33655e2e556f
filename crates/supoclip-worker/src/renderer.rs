//! FFmpeg-backed clip renderer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use supoclip_media::{
    build_cues, plan_crop, render_clip, ClipRenderSpec, FaceDetector, FfmpegRunner, FontCatalog,
};
use supoclip_media::captions::DEFAULT_WORDS_PER_CUE;

use crate::error::PipelineError;
use crate::stages::{ClipRenderer, RenderJob, RenderedClip};

/// Production [`ClipRenderer`]: 9:16 crop, burned captions, H.264/AAC.
///
/// With a [`FaceDetector`] the crop follows the largest face in the segment.
#[derive(Clone)]
pub struct FfmpegClipRenderer {
    fonts: FontCatalog,
    timeout: Duration,
    words_per_cue: usize,
    face_detector: Option<Arc<dyn FaceDetector>>,
}

impl FfmpegClipRenderer {
    pub fn new(fonts: FontCatalog, timeout: Duration) -> Self {
        Self {
            fonts,
            timeout,
            words_per_cue: DEFAULT_WORDS_PER_CUE,
            face_detector: None,
        }
    }

    pub fn with_face_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.face_detector = Some(detector);
        self
    }

    pub fn with_words_per_cue(mut self, words: usize) -> Self {
        self.words_per_cue = words.max(1);
        self
    }
}

#[async_trait]
impl ClipRenderer for FfmpegClipRenderer {
    async fn render(&self, job: &RenderJob) -> Result<RenderedClip, PipelineError> {
        let font = self.fonts.resolve(&job.font.family).await;
        if font.is_fallback() {
            warn!(
                task_id = %job.task_id,
                requested = %job.font.family,
                using = font.family(),
                "Requested font unavailable, using fallback"
            );
        }
        let font_family = font.family().to_string();

        let mut spec = ClipRenderSpec {
            input: job.input.clone(),
            output: job.output.clone(),
            start: job.segment.start,
            end: job.segment.end,
            cues: build_cues(&job.captions, job.segment.start, job.segment.end, self.words_per_cue),
            font,
            font_size: job.font.size,
            font_color: job.font.color.clone(),
            crop: None,
        };

        if let Some(detector) = &self.face_detector {
            let scratch = spec.scratch_dir("frames");
            match plan_crop(&spec.input, spec.start, spec.end, &scratch, detector.as_ref()).await {
                Ok(crop) => spec.crop = Some(crop),
                Err(e) => warn!(
                    task_id = %job.task_id,
                    segment_index = job.index,
                    error = %e,
                    "Face framing failed, using centre crop"
                ),
            }
        }

        let runner = FfmpegRunner::new()
            .with_timeout(self.timeout)
            .with_label("render_clip");

        let info = render_clip(&spec, &runner).await.map_err(|e| {
            if let Some(stderr) = e.stderr() {
                warn!(
                    task_id = %job.task_id,
                    segment_index = job.index,
                    stderr = %stderr,
                    "FFmpeg output"
                );
            }
            PipelineError::render(job.index, e.to_string())
        })?;

        info!(
            task_id = %job.task_id,
            segment_index = job.index,
            duration_secs = info.duration,
            output = %job.output.display(),
            "Clip rendered"
        );

        Ok(RenderedClip {
            index: job.index,
            path: job.output.clone(),
            duration: info.duration,
            font_family,
        })
    }
}
