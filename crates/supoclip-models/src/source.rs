//! Source descriptors and resolved sources.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ValidationError;
use crate::ids::SourceId;
use crate::youtube::is_youtube_url;

/// Kind of input a task was started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Remote video fetched by URL
    RemoteVideo,
    /// File staged through the upload endpoint
    LocalUpload,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::RemoteVideo => "remote_video",
            SourceType::LocalUpload => "local_upload",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validated reference to the input media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    RemoteVideo { url: String },
    LocalUpload { handle: String },
}

impl SourceRef {
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceRef::RemoteVideo { .. } => SourceType::RemoteVideo,
            SourceRef::LocalUpload { .. } => SourceType::LocalUpload,
        }
    }

    /// True for remote YouTube references.
    pub fn is_youtube(&self) -> bool {
        matches!(self, SourceRef::RemoteVideo { url } if is_youtube_url(url))
    }
}

/// Everything needed to resolve a task's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceDescriptor {
    pub source: SourceRef,
    /// Title override supplied by the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SourceDescriptor {
    /// Validate the raw request fields.
    ///
    /// Exactly one of `url` and `uploaded_file_handle` must be present.
    pub fn from_parts(
        url: Option<&str>,
        uploaded_file_handle: Option<&str>,
        title: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let url = url.map(str::trim).filter(|s| !s.is_empty());
        let handle = uploaded_file_handle.map(str::trim).filter(|s| !s.is_empty());

        let source = match (url, handle) {
            (None, None) => return Err(ValidationError::MissingSource),
            (Some(_), Some(_)) => return Err(ValidationError::AmbiguousSource),
            (Some(url), None) => {
                let parsed = Url::parse(url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
                if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                    return Err(ValidationError::InvalidUrl(format!(
                        "unsupported URL '{}'",
                        url
                    )));
                }
                SourceRef::RemoteVideo {
                    url: url.to_string(),
                }
            }
            (None, Some(handle)) => {
                if !is_valid_upload_handle(handle) {
                    return Err(ValidationError::InvalidUploadHandle(handle.to_string()));
                }
                SourceRef::LocalUpload {
                    handle: handle.to_string(),
                }
            }
        };

        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Ok(Self { source, title })
    }

    pub fn source_type(&self) -> SourceType {
        self.source.source_type()
    }
}

/// Upload handles are bare file names inside the upload directory.
pub fn is_valid_upload_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle.len() <= 128
        && !handle.starts_with('.')
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// The resolved input of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Source {
    /// Unique source ID
    pub id: SourceId,
    /// Input kind
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Human title
    pub title: String,
    /// Original reference
    pub reference: SourceRef,
    /// Whether the title is final (explicit override or already refined)
    #[serde(default)]
    pub title_final: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// Create the source record for a descriptor.
    ///
    /// Without an override the title is a placeholder until acquisition
    /// resolves the real one.
    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Self {
        let (title, title_final) = match &descriptor.title {
            Some(title) => (title.clone(), true),
            None => (
                match &descriptor.source {
                    SourceRef::RemoteVideo { url } => url.clone(),
                    SourceRef::LocalUpload { handle } => handle.clone(),
                },
                false,
            ),
        };

        Self {
            id: SourceId::new(),
            source_type: descriptor.source_type(),
            title,
            reference: descriptor.source.clone(),
            title_final,
            created_at: Utc::now(),
        }
    }

    /// Apply the title resolved during acquisition; only the first refinement sticks.
    pub fn refine_title(&mut self, title: &str) -> bool {
        let title = title.trim();
        if self.title_final || title.is_empty() {
            return false;
        }
        self.title = title.to_string();
        self.title_final = true;
        true
    }
}

/// Output of the source normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NormalizedSource {
    /// Local media file
    pub local_path: PathBuf,
    /// Title resolved from override, remote metadata or file name
    pub title: String,
    pub source_type: SourceType,
    /// Probed media duration in seconds
    pub duration: f64,
}
