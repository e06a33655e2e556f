//! Whisper-compatible transcription adapter.
//!
//! Extracts a mono 16 kHz audio track and posts it to an
//! OpenAI-style `audio/transcriptions` endpoint with `verbose_json`
//! output, which carries segment-level timestamps.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use tracing::{debug, info, warn};

use supoclip_media::extract_audio;
use supoclip_models::{NormalizedSource, Transcript, TranscriptSegment};

use crate::error::PipelineError;
use crate::stages::Transcriber;

/// Audio file written into the task's work directory.
const AUDIO_FILE_NAME: &str = "audio.mp3";

fn audio_path(work_dir: &Path) -> PathBuf {
    work_dir.join(AUDIO_FILE_NAME)
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Production [`Transcriber`].
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    audio_timeout: Duration,
}

impl WhisperTranscriber {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            api_key,
            model: model.into(),
            audio_timeout: Duration::from_secs(600),
        }
    }

    /// Limit for the FFmpeg audio extraction.
    pub fn with_audio_timeout(mut self, timeout: Duration) -> Self {
        self.audio_timeout = timeout;
        self
    }

    /// Transcribe an already extracted audio file.
    pub async fn transcribe_audio(&self, audio: &Path, duration: f64) -> Result<Transcript, PipelineError> {
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| PipelineError::transcription(format!("cannot read audio: {}", e)))?;
        debug!(bytes = bytes.len(), url = %self.api_url, "Uploading audio for transcription");

        let file = multipart::Part::bytes(bytes)
            .file_name(AUDIO_FILE_NAME)
            .mime_str("audio/mpeg")
            .map_err(|e| PipelineError::transcription(e.to_string()))?;
        let form = multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .part("file", file);

        let mut request = self.client.post(&self.api_url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::transcription(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Transcription service returned an error");
            return Err(PipelineError::transcription(format!(
                "service returned {}",
                status
            )));
        }

        let parsed: WhisperResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::transcription(format!("invalid response: {}", e)))?;

        into_transcript(parsed, duration)
    }
}

fn into_transcript(response: WhisperResponse, duration: f64) -> Result<Transcript, PipelineError> {
    let raw: Vec<TranscriptSegment> = if response.segments.is_empty() && !response.text.trim().is_empty() {
        // No timing information; the whole text spans the media
        vec![TranscriptSegment::new(response.text.trim(), 0.0, duration)]
    } else {
        response
            .segments
            .into_iter()
            .map(|s| TranscriptSegment::new(s.text, s.start, s.end))
            .collect()
    };

    Transcript::normalize(raw, duration)
        .map_err(|e| PipelineError::transcription(format!("malformed timestamps: {}", e)))
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        media: &NormalizedSource,
        work_dir: &Path,
    ) -> Result<Transcript, PipelineError> {
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|e| PipelineError::transcription(format!("work directory: {}", e)))?;
        let audio = audio_path(work_dir);
        extract_audio(&media.local_path, &audio, self.audio_timeout)
            .await
            .map_err(|e| PipelineError::transcription(format!("audio extraction failed: {}", e)))?;

        let result = self.transcribe_audio(&audio, media.duration).await;

        if let Err(e) = tokio::fs::remove_file(&audio).await {
            debug!(path = %audio.display(), error = %e, "Could not remove audio file");
        }

        let transcript = result?;
        info!(
            segments = transcript.segments().len(),
            duration_secs = transcript.duration(),
            silent = transcript.is_silent(),
            "Transcript ready"
        );
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn audio_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(AUDIO_FILE_NAME), b"ID3fake")
            .await
            .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_transcribe_audio_parses_segments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "hello there. general kenobi",
                "duration": 10.0,
                "segments": [
                    {"id": 0, "start": 0.5, "end": 3.0, "text": " hello there."},
                    {"id": 1, "start": 3.0, "end": 6.0, "text": " general kenobi"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = audio_fixture().await;
        let transcriber = WhisperTranscriber::new(
            format!("{}/v1/audio/transcriptions", server.uri()),
            Some("secret".to_string()),
            "whisper-1",
        );

        let transcript = transcriber
            .transcribe_audio(&dir.path().join(AUDIO_FILE_NAME), 10.0)
            .await
            .unwrap();

        assert_eq!(transcript.duration(), 10.0);
        assert_eq!(transcript.excerpt(0.0, 10.0), "hello there. general kenobi");
        // leading and trailing silence fill the gaps
        assert!(transcript.segments().first().unwrap().is_silence());
        assert_eq!(transcript.segments().last().unwrap().end, 10.0);
    }

    #[tokio::test]
    async fn test_service_error_is_transcription_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let dir = audio_fixture().await;
        let transcriber = WhisperTranscriber::new(server.uri(), None, "whisper-1");
        let err = transcriber
            .transcribe_audio(&dir.path().join(AUDIO_FILE_NAME), 10.0)
            .await
            .unwrap_err();

        assert_eq!(err.error_kind(), "transcription");
        assert!(!err.client_message().contains("overloaded"));
    }

    #[test]
    fn test_audio_stays_out_of_shared_upload_dir() {
        // Two uploads staged side by side in the shared upload directory
        let uploads = Path::new("/srv/uploads");
        let first = uploads.join("a.mp4");
        let second = uploads.join("b.mp4");
        assert_eq!(first.parent(), second.parent());

        let first_audio = audio_path(Path::new("/srv/work/task-a"));
        let second_audio = audio_path(Path::new("/srv/work/task-b"));
        assert_ne!(first_audio, second_audio);
        assert!(!first_audio.starts_with(uploads));
        assert!(!second_audio.starts_with(uploads));
    }

    #[test]
    fn test_text_without_segments_spans_media() {
        let response = WhisperResponse {
            segments: Vec::new(),
            text: "just words".to_string(),
        };
        let transcript = into_transcript(response, 8.0).unwrap();
        assert_eq!(transcript.segments().len(), 1);
        assert_eq!(transcript.segments()[0].end, 8.0);
    }

    #[test]
    fn test_out_of_range_timestamps_rejected() {
        let response = WhisperResponse {
            segments: vec![WhisperSegment {
                start: 50.0,
                end: 55.0,
                text: "late".to_string(),
            }],
            text: String::new(),
        };
        assert!(into_transcript(response, 10.0).is_err());
    }
}
