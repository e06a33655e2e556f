//! Request validation errors.

use thiserror::Error;

/// Validation failure for client-supplied input.
///
/// Raised before any task record exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Source URL or uploaded file handle is required")]
    MissingSource,

    #[error("Provide either a source URL or an uploaded file handle, not both")]
    AmbiguousSource,

    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid uploaded file handle: {0}")]
    InvalidUploadHandle(String),

    #[error("font_color must be a 6-digit hex color like #FFFFFF, got '{0}'")]
    InvalidFontColor(String),

    #[error("font_size must be between {min} and {max}, got {value}")]
    InvalidFontSize { value: u32, min: u32, max: u32 },

    #[error("Invalid font family: '{0}'")]
    InvalidFontFamily(String),
}
