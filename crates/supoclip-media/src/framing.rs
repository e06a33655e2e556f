//! Face-aware 9:16 framing.
//!
//! A few frames are sampled from the clip range and run through a
//! [`FaceDetector`]. The crop window is centred on the largest face found in
//! any sample; without a face it falls back to a centre crop.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::probe::probe_video;

/// Clips longer than this are sampled at start, middle and end.
const MULTI_SAMPLE_MIN_SECS: f64 = 3.0;

/// Distance of the first and last sample from the range edges.
const SAMPLE_EDGE_OFFSET_SECS: f64 = 0.5;

const FRAME_TIMEOUT: Duration = Duration::from_secs(30);

/// Face bounding box in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Portrait crop rectangle in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropWindow {
    /// Largest 9:16 window that fits a `frame_width` x `frame_height` frame.
    pub fn portrait_size(frame_width: u32, frame_height: u32) -> (u32, u32) {
        let (w, h) = (u64::from(frame_width), u64::from(frame_height));
        // w / h > 9 / 16 means the frame is wider than portrait
        if w * 16 > h * 9 {
            ((h * 9 / 16) as u32, frame_height)
        } else {
            (frame_width, (w * 16 / 9) as u32)
        }
    }

    /// Window in the middle of the frame.
    pub fn centered(frame_width: u32, frame_height: u32) -> Self {
        let (width, height) = Self::portrait_size(frame_width, frame_height);
        Self {
            x: (frame_width - width) / 2,
            y: (frame_height - height) / 2,
            width,
            height,
        }
    }

    /// Window centred on `focus`, shifted back inside the frame.
    pub fn around(frame_width: u32, frame_height: u32, focus: (u32, u32)) -> Self {
        let (width, height) = Self::portrait_size(frame_width, frame_height);
        Self {
            x: focus.0.saturating_sub(width / 2).min(frame_width - width),
            y: focus.1.saturating_sub(height / 2).min(frame_height - height),
            width,
            height,
        }
    }

    /// FFmpeg `crop` filter for this window.
    pub fn filter(&self) -> String {
        format!("crop={}:{}:{}:{}", self.width, self.height, self.x, self.y)
    }
}

/// Finds faces in a still frame.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect(&self, frame: &Path) -> MediaResult<Vec<FaceBox>>;
}

/// Times at which to sample `[start, end]` for faces.
pub fn sample_times(start: f64, end: f64) -> Vec<f64> {
    let duration = end - start;
    if duration > MULTI_SAMPLE_MIN_SECS {
        vec![
            start + SAMPLE_EDGE_OFFSET_SECS,
            start + duration / 2.0,
            end - SAMPLE_EDGE_OFFSET_SECS,
        ]
    } else {
        vec![start + duration / 2.0]
    }
}

/// Crop centred on the largest face across all samples.
pub fn choose_crop(frame_width: u32, frame_height: u32, samples: &[Vec<FaceBox>]) -> CropWindow {
    let largest = samples
        .iter()
        .flatten()
        .filter(|face| face.width > 0 && face.height > 0)
        .max_by_key(|face| face.area());

    match largest {
        Some(face) => CropWindow::around(frame_width, frame_height, face.center()),
        None => CropWindow::centered(frame_width, frame_height),
    }
}

/// Decide the crop for `input` over `[start, end]`.
///
/// Sampled frames are written to `scratch_dir` and removed again. A frame
/// that cannot be extracted or analysed is skipped.
pub async fn plan_crop(
    input: &Path,
    start: f64,
    end: f64,
    scratch_dir: &Path,
    detector: &dyn FaceDetector,
) -> MediaResult<CropWindow> {
    let info = probe_video(input).await?;
    tokio::fs::create_dir_all(scratch_dir).await?;

    let runner = FfmpegRunner::new()
        .with_timeout(FRAME_TIMEOUT)
        .with_label("sample_frame");

    let mut samples = Vec::new();
    for (i, at) in sample_times(start, end).into_iter().enumerate() {
        let frame = scratch_dir.join(format!("frame_{}.png", i));
        let cmd = FfmpegCommand::new(input, &frame)
            .seek(at)
            .output_args(["-frames:v", "1"]);
        if let Err(e) = runner.run(&cmd).await {
            warn!(at = at, error = %e, "Could not extract frame for face detection");
            continue;
        }
        match detector.detect(&frame).await {
            Ok(faces) => {
                debug!(at = at, faces = faces.len(), "Sampled frame");
                samples.push(faces);
            }
            Err(e) => warn!(at = at, error = %e, "Face detection failed on frame"),
        }
    }

    if let Err(e) = tokio::fs::remove_dir_all(scratch_dir).await {
        debug!(dir = %scratch_dir.display(), "Failed to remove sampled frames: {}", e);
    }

    let crop = choose_crop(info.width, info.height, &samples);
    let found = samples.iter().any(|faces| !faces.is_empty());
    info!(
        face_found = found,
        crop = %crop.filter(),
        "Planned clip framing"
    );
    Ok(crop)
}

/// OpenCV Haar cascade detector.
#[cfg(feature = "opencv")]
pub struct HaarCascadeDetector {
    cascade: std::path::PathBuf,
}

#[cfg(feature = "opencv")]
impl HaarCascadeDetector {
    /// `cascade` is a frontal-face cascade XML, e.g.
    /// `haarcascade_frontalface_default.xml`.
    pub fn new(cascade: impl Into<std::path::PathBuf>) -> MediaResult<Self> {
        let cascade = cascade.into();
        if !cascade.exists() {
            return Err(crate::error::MediaError::FileNotFound(cascade));
        }
        Ok(Self { cascade })
    }
}

#[cfg(feature = "opencv")]
#[async_trait]
impl FaceDetector for HaarCascadeDetector {
    async fn detect(&self, frame: &Path) -> MediaResult<Vec<FaceBox>> {
        let cascade = self.cascade.clone();
        let frame = frame.to_path_buf();
        tokio::task::spawn_blocking(move || haar::detect(&cascade, &frame))
            .await
            .map_err(|e| crate::error::MediaError::detection_failed(e.to_string()))?
    }
}

#[cfg(feature = "opencv")]
mod haar {
    use std::path::Path;

    use opencv::core::{Rect, Size, Vector};
    use opencv::prelude::*;
    use opencv::{imgcodecs, objdetect};

    use super::FaceBox;
    use crate::error::{MediaError, MediaResult};

    const SCALE_FACTOR: f64 = 1.1;
    const MIN_NEIGHBORS: i32 = 5;
    const MIN_FACE_PX: i32 = 50;

    pub(super) fn detect(cascade: &Path, frame: &Path) -> MediaResult<Vec<FaceBox>> {
        let to_err = |e: opencv::Error| MediaError::detection_failed(e.to_string());

        let mut classifier =
            objdetect::CascadeClassifier::new(&cascade.to_string_lossy()).map_err(to_err)?;
        let image = imgcodecs::imread(&frame.to_string_lossy(), imgcodecs::IMREAD_GRAYSCALE)
            .map_err(to_err)?;
        if image.empty() {
            return Err(MediaError::detection_failed(format!(
                "unreadable frame {}",
                frame.display()
            )));
        }

        let mut faces = Vector::<Rect>::new();
        classifier
            .detect_multi_scale(
                &image,
                &mut faces,
                SCALE_FACTOR,
                MIN_NEIGHBORS,
                0,
                Size::new(MIN_FACE_PX, MIN_FACE_PX),
                Size::new(0, 0),
            )
            .map_err(to_err)?;

        Ok(faces
            .iter()
            .map(|r| FaceBox {
                x: r.x.max(0) as u32,
                y: r.y.max(0) as u32,
                width: r.width.max(0) as u32,
                height: r.height.max(0) as u32,
            })
            .collect())
    }
}
