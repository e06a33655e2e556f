//! Source normalization with yt-dlp and ffprobe.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use supoclip_media::{download_video, fetch_title, probe_video, DownloadOptions, MediaError};
use supoclip_models::{is_valid_upload_handle, NormalizedSource, SourceDescriptor, SourceRef};

use crate::error::PipelineError;
use crate::stages::SourceNormalizer;

/// Title lookups are cheap; don't let one hold up the download.
const TITLE_TIMEOUT: Duration = Duration::from_secs(60);

/// File stem of downloaded sources inside the task work directory.
const SOURCE_STEM: &str = "source";

/// Production [`SourceNormalizer`].
#[derive(Debug, Clone)]
pub struct MediaSourceNormalizer {
    upload_dir: PathBuf,
    download: DownloadOptions,
    max_duration: f64,
}

impl MediaSourceNormalizer {
    pub fn new(upload_dir: impl Into<PathBuf>, download: DownloadOptions, max_duration: f64) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            download,
            max_duration,
        }
    }

    /// Path of a staged upload, refusing handles that could escape the directory.
    fn upload_path(&self, handle: &str) -> Result<PathBuf, PipelineError> {
        if !is_valid_upload_handle(handle) {
            return Err(PipelineError::unresolvable(format!(
                "invalid upload handle '{}'",
                handle
            )));
        }
        Ok(self.upload_dir.join(handle))
    }

    async fn fetch_remote(&self, url: &str, work_dir: &Path) -> Result<(PathBuf, Option<String>), PipelineError> {
        let title = match fetch_title(url, TITLE_TIMEOUT).await {
            Ok(title) => Some(title),
            Err(e) => {
                warn!(url = %url, error = %e, "Could not fetch remote title");
                None
            }
        };

        let path = download_video(url, work_dir, SOURCE_STEM, &self.download)
            .await
            .map_err(|e| unresolvable_from_media("download failed", e))?;
        Ok((path, title))
    }
}

#[async_trait]
impl SourceNormalizer for MediaSourceNormalizer {
    async fn normalize(
        &self,
        descriptor: &SourceDescriptor,
        work_dir: &Path,
    ) -> Result<NormalizedSource, PipelineError> {
        let (local_path, remote_title) = match &descriptor.source {
            SourceRef::RemoteVideo { url } => self.fetch_remote(url, work_dir).await?,
            SourceRef::LocalUpload { handle } => {
                let path = self.upload_path(handle)?;
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(PipelineError::unresolvable(format!(
                        "upload '{}' not found",
                        handle
                    )));
                }
                (path, None)
            }
        };

        let info = probe_video(&local_path)
            .await
            .map_err(|e| unresolvable_from_media("not a decodable video", e))?;

        check_duration(info.duration, self.max_duration)?;

        let title = resolve_title(descriptor.title.as_deref(), remote_title.as_deref(), &local_path);

        info!(
            path = %local_path.display(),
            duration_secs = info.duration,
            width = info.width,
            height = info.height,
            source_type = %descriptor.source_type(),
            "Source normalized"
        );

        Ok(NormalizedSource {
            local_path,
            title,
            source_type: descriptor.source_type(),
            duration: info.duration,
        })
    }
}

fn unresolvable_from_media(context: &str, err: MediaError) -> PipelineError {
    if let Some(stderr) = err.stderr() {
        warn!(stderr = %stderr, "Source tool output");
    }
    PipelineError::unresolvable(format!("{}: {}", context, err))
}

fn check_duration(duration: f64, max_duration: f64) -> Result<(), PipelineError> {
    if duration > max_duration {
        return Err(PipelineError::unresolvable(format!(
            "video is {:.0}s long, the limit is {:.0}s",
            duration, max_duration
        )));
    }
    Ok(())
}

/// Explicit override, then remote metadata, then the file stem.
fn resolve_title(explicit: Option<&str>, remote: Option<&str>, path: &Path) -> String {
    explicit
        .or(remote)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Untitled".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer(dir: &Path) -> MediaSourceNormalizer {
        MediaSourceNormalizer::new(dir, DownloadOptions::default(), 3600.0)
    }

    #[test]
    fn test_title_precedence() {
        let path = Path::new("/tmp/work/my-talk.mp4");
        assert_eq!(resolve_title(Some("Mine"), Some("Remote"), path), "Mine");
        assert_eq!(resolve_title(None, Some("Remote"), path), "Remote");
        assert_eq!(resolve_title(None, Some("  "), path), "my-talk");
        assert_eq!(resolve_title(None, None, path), "my-talk");
    }

    #[test]
    fn test_duration_limit() {
        assert!(check_duration(3599.0, 3600.0).is_ok());
        let err = check_duration(4000.0, 3600.0).unwrap_err();
        assert_eq!(err.error_kind(), "unresolvable_source");
    }

    #[test]
    fn test_upload_path_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let n = normalizer(dir.path());
        assert!(n.upload_path("../secret.mp4").is_err());
        assert_eq!(n.upload_path("abc.mp4").unwrap(), dir.path().join("abc.mp4"));
    }

    #[tokio::test]
    async fn test_missing_upload_is_unresolvable() {
        let dir = tempfile::tempdir().unwrap();
        let n = normalizer(dir.path());
        let descriptor = SourceDescriptor::from_parts(None, Some("gone.mp4"), None).unwrap();

        let err = n.normalize(&descriptor, dir.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnresolvableSource(_)));
    }
}
