//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Which scorer ranks candidate windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScorerKind {
    /// Local text heuristics, no network
    #[default]
    Heuristic,
    /// Gemini `generateContent`
    Gemini,
}

impl ScorerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Some(ScorerKind::Heuristic),
            "gemini" | "llm" => Some(ScorerKind::Gemini),
            _ => None,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent tasks
    pub max_concurrent_tasks: usize,
    /// Maximum concurrent renders within one task
    pub max_concurrent_renders: usize,
    /// Scratch space for downloads and audio, one subdirectory per task
    pub work_dir: PathBuf,
    /// Where finished clips are written, one subdirectory per task
    pub clips_dir: PathBuf,
    /// Where staged uploads live
    pub upload_dir: PathBuf,
    /// Caption font files
    pub fonts_dir: PathBuf,
    /// Haar cascade for face-centred framing; centre crop when unset
    pub face_cascade_path: Option<PathBuf>,
    /// Maximum clips per task (K)
    pub max_clips: usize,
    /// Shortest clip, seconds
    pub min_clip_duration: f64,
    /// Longest clip, seconds
    pub max_clip_duration: f64,
    /// Windows scoring below this are never selected
    pub min_relevance: f64,
    /// Longest accepted source, seconds
    pub max_video_duration: f64,
    pub acquisition_timeout: Duration,
    pub transcription_timeout: Duration,
    pub analysis_timeout: Duration,
    /// Per clip
    pub render_timeout: Duration,
    pub scorer: ScorerKind,
    pub gemini_api_key: Option<String>,
    pub llm_model: String,
    pub whisper_api_url: String,
    pub whisper_api_key: Option<String>,
    pub whisper_model: String,
    /// Netscape cookies file handed to yt-dlp
    pub cookies_file: Option<PathBuf>,
    /// How often the worker scans for orphaned pending entries
    pub claim_interval: Duration,
    /// Minimum idle time before a pending entry can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Task lease TTL; renewed every third of it while the task runs
    pub lease_ttl: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Port for the Prometheus exporter; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 2,
            max_concurrent_renders: 2,
            work_dir: PathBuf::from("temp"),
            clips_dir: PathBuf::from("outputs/clips"),
            upload_dir: PathBuf::from("uploads"),
            fonts_dir: PathBuf::from("fonts"),
            face_cascade_path: None,
            max_clips: 10,
            min_clip_duration: 10.0,
            max_clip_duration: 45.0,
            min_relevance: 0.5,
            max_video_duration: 3600.0,
            acquisition_timeout: Duration::from_secs(1800),
            transcription_timeout: Duration::from_secs(1800),
            analysis_timeout: Duration::from_secs(300),
            render_timeout: Duration::from_secs(600),
            scorer: ScorerKind::Heuristic,
            gemini_api_key: None,
            llm_model: "gemini-2.5-flash-lite".to_string(),
            whisper_api_url: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            whisper_api_key: None,
            whisper_model: "whisper-1".to_string(),
            cookies_file: None,
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            lease_ttl: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_tasks: env_parse("WORKER_MAX_TASKS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_tasks),
            max_concurrent_renders: env_parse("WORKER_MAX_RENDERS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_renders),
            work_dir: env_path("WORKER_WORK_DIR").unwrap_or(defaults.work_dir),
            clips_dir: env_path("CLIPS_DIR").unwrap_or(defaults.clips_dir),
            upload_dir: env_path("UPLOAD_DIR").unwrap_or(defaults.upload_dir),
            fonts_dir: env_path("FONTS_DIR").unwrap_or(defaults.fonts_dir),
            face_cascade_path: env_path("FACE_CASCADE_PATH"),
            max_clips: env_parse("MAX_CLIPS").unwrap_or(defaults.max_clips),
            min_clip_duration: env_parse("MIN_CLIP_DURATION").unwrap_or(defaults.min_clip_duration),
            max_clip_duration: env_parse("MAX_CLIP_DURATION").unwrap_or(defaults.max_clip_duration),
            min_relevance: env_parse("MIN_RELEVANCE").unwrap_or(defaults.min_relevance),
            max_video_duration: env_parse("MAX_VIDEO_DURATION")
                .unwrap_or(defaults.max_video_duration),
            acquisition_timeout: env_secs("ACQUISITION_TIMEOUT")
                .unwrap_or(defaults.acquisition_timeout),
            transcription_timeout: env_secs("TRANSCRIPTION_TIMEOUT")
                .unwrap_or(defaults.transcription_timeout),
            analysis_timeout: env_secs("ANALYSIS_TIMEOUT").unwrap_or(defaults.analysis_timeout),
            render_timeout: env_secs("RENDER_TIMEOUT").unwrap_or(defaults.render_timeout),
            scorer: std::env::var("SCORER")
                .ok()
                .and_then(|s| ScorerKind::parse(&s))
                .unwrap_or(defaults.scorer),
            gemini_api_key: env_string("GEMINI_API_KEY"),
            llm_model: env_string("LLM_MODEL").unwrap_or(defaults.llm_model),
            whisper_api_url: env_string("WHISPER_API_URL").unwrap_or(defaults.whisper_api_url),
            whisper_api_key: env_string("WHISPER_API_KEY"),
            whisper_model: env_string("WHISPER_MODEL").unwrap_or(defaults.whisper_model),
            cookies_file: env_path("YTDLP_COOKIES_FILE"),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS")
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS")
                .unwrap_or(defaults.claim_min_idle),
            lease_ttl: env_secs("WORKER_LEASE_TTL_SECS")
                .filter(|ttl| !ttl.is_zero())
                .unwrap_or(defaults.lease_ttl),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT")
                .unwrap_or(defaults.shutdown_timeout),
            metrics_port: env_parse("WORKER_METRICS_PORT"),
        }
    }

    /// Check settings that would make every task fail.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_clip_duration <= 0.0 || self.max_clip_duration < self.min_clip_duration {
            return Err(format!(
                "invalid clip duration band [{}, {}]",
                self.min_clip_duration, self.max_clip_duration
            ));
        }
        if !(0.0..=1.0).contains(&self.min_relevance) {
            return Err(format!("MIN_RELEVANCE {} outside [0, 1]", self.min_relevance));
        }
        if self.max_clips == 0 {
            return Err("MAX_CLIPS must be at least 1".to_string());
        }
        if self.claim_min_idle < Duration::from_secs(3) {
            return Err("WORKER_CLAIM_MIN_IDLE_SECS must be at least 3".to_string());
        }
        if self.scorer == ScorerKind::Gemini && self.gemini_api_key.is_none() {
            return Err("SCORER=gemini requires GEMINI_API_KEY".to_string());
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_clips, 10);
        assert_eq!(config.min_relevance, 0.5);
    }

    #[test]
    fn test_scorer_parse() {
        assert_eq!(ScorerKind::parse("Gemini"), Some(ScorerKind::Gemini));
        assert_eq!(ScorerKind::parse("heuristic"), Some(ScorerKind::Heuristic));
        assert_eq!(ScorerKind::parse("gpt"), None);
    }

    #[test]
    fn test_validate_rejects_bad_band() {
        let config = WorkerConfig {
            min_clip_duration: 60.0,
            max_clip_duration: 15.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            claim_min_idle: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            scorer: ScorerKind::Gemini,
            gemini_api_key: None,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
