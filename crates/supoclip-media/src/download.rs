//! Source download and metadata lookup using yt-dlp.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::check_ytdlp;
use crate::error::{MediaError, MediaResult};

/// Format selector capping sources at 720p.
pub const DEFAULT_FORMAT: &str = "best[height<=720]/bestvideo[height<=720]+bestaudio/best";

/// yt-dlp invocation settings.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// yt-dlp `-f` format selector
    pub format: String,
    /// Kill yt-dlp after this long
    pub timeout: Duration,
    /// Netscape cookies file passed to yt-dlp, if any
    pub cookies_file: Option<PathBuf>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
            timeout: Duration::from_secs(1800),
            cookies_file: None,
        }
    }
}

impl DownloadOptions {
    fn download_args(&self, url: &str, template: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-f".into(),
            self.format.clone(),
            "--merge-output-format".into(),
            "mp4".into(),
            "--no-playlist".into(),
            "--no-progress".into(),
            "--no-simulate".into(),
            "--print".into(),
            "after_move:filepath".into(),
            "-o".into(),
            template.to_string(),
        ];
        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".into());
            args.push(cookies.to_string_lossy().to_string());
        }
        args.push(url.to_string());
        args
    }
}

/// Download `url` into `dir` as `{stem}.<ext>`, returning the final file path.
pub async fn download_video(
    url: &str,
    dir: impl AsRef<Path>,
    stem: &str,
    options: &DownloadOptions,
) -> MediaResult<PathBuf> {
    let dir = dir.as_ref();
    check_ytdlp()?;
    tokio::fs::create_dir_all(dir).await?;

    let template = dir.join(format!("{}.%(ext)s", stem));
    let args = options.download_args(url, &template.to_string_lossy());

    info!(url = %url, dir = %dir.display(), "Downloading video");

    let stdout = run_ytdlp(&args, options.timeout).await?;

    let printed = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(PathBuf::from);

    let path = match printed {
        Some(path) if path.exists() => path,
        _ => find_by_stem(dir, stem)
            .await?
            .ok_or_else(|| MediaError::download_failed("Output file not created"))?,
    };

    let size = tokio::fs::metadata(&path).await?.len();
    if size == 0 {
        return Err(MediaError::download_failed("Downloaded file is empty"));
    }

    info!(
        output = %path.display(),
        size_mb = size as f64 / (1024.0 * 1024.0),
        "Downloaded video successfully"
    );
    Ok(path)
}

/// Look up the title of a remote video without downloading it.
pub async fn fetch_title(url: &str, timeout: Duration) -> MediaResult<String> {
    check_ytdlp()?;
    let args = [
        "--print".to_string(),
        "title".to_string(),
        "--no-download".to_string(),
        "--no-playlist".to_string(),
        url.to_string(),
    ];
    let stdout = run_ytdlp(&args, timeout).await?;
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .ok_or_else(|| MediaError::download_failed("yt-dlp returned no title"))
}

async fn run_ytdlp(args: &[String], timeout: Duration) -> MediaResult<String> {
    let child = Command::new("yt-dlp")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(output) => output?,
        Err(_) => {
            warn!("yt-dlp timed out after {} seconds", timeout.as_secs());
            return Err(MediaError::Timeout(timeout.as_secs()));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("yt-dlp stderr: {}", stderr);
        let error_msg = last_error_line(&stderr).unwrap_or("Unknown error");
        return Err(MediaError::download_failed(format!("yt-dlp failed: {}", error_msg)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Most relevant line of yt-dlp stderr: the last `ERROR:` line, else the last line.
fn last_error_line(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .map(str::trim)
}

async fn find_by_stem(dir: &Path, stem: &str) -> MediaResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path.file_stem().and_then(|s| s.to_str()) == Some(stem)
            && path.extension().and_then(|e| e.to_str()) != Some("part");
        if matches {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_args() {
        let options = DownloadOptions::default();
        let args = options.download_args("https://youtu.be/abc", "/tmp/x/abc.%(ext)s");
        assert_eq!(args[0], "-f");
        assert_eq!(args[1], DEFAULT_FORMAT);
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--print" && w[1] == "after_move:filepath"));
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc");
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn test_download_args_with_cookies() {
        let options = DownloadOptions {
            cookies_file: Some(PathBuf::from("/etc/cookies.txt")),
            ..Default::default()
        };
        let args = options.download_args("https://example.com/v", "t");
        assert!(args.windows(2).any(|w| w[0] == "--cookies" && w[1] == "/etc/cookies.txt"));
    }

    #[test]
    fn test_last_error_line() {
        let stderr = "[youtube] abc: Downloading webpage\nERROR: [youtube] abc: Video unavailable\nsome trailer\n";
        assert_eq!(last_error_line(stderr), Some("ERROR: [youtube] abc: Video unavailable"));
        assert_eq!(last_error_line("only line\n"), Some("only line"));
        assert_eq!(last_error_line(""), None);
    }

    #[tokio::test]
    async fn test_find_by_stem_skips_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("vid.part"), b"x").await.unwrap();
        assert!(find_by_stem(dir.path(), "vid").await.unwrap().is_none());

        tokio::fs::write(dir.path().join("vid.mp4"), b"x").await.unwrap();
        let found = find_by_stem(dir.path(), "vid").await.unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "vid.mp4");
    }
}
