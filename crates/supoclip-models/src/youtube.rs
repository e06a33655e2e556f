//! YouTube URL helpers.
//!
//! Supports `watch?v=`, `youtu.be/`, `/embed/`, `/v/` and `/shorts/` forms.

use url::Url;

/// Length of a YouTube video ID.
const VIDEO_ID_LEN: usize = 11;

/// True when the URL points at a YouTube host.
pub fn is_youtube_url(url: &str) -> bool {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .map(|host| {
            host == "youtu.be"
                || host == "youtube.com"
                || host.ends_with(".youtube.com")
        })
        .unwrap_or(false)
}

/// Extract the 11-character video ID from a YouTube URL.
pub fn extract_youtube_id(url: &str) -> Option<String> {
    if !is_youtube_url(url) {
        return None;
    }
    let parsed = Url::parse(url.trim()).ok()?;

    if let Some((_, v)) = parsed.query_pairs().find(|(k, _)| k == "v") {
        return validate_id(&v);
    }

    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let first = segments.next()?;
    let candidate = if parsed.host_str() == Some("youtu.be") {
        first
    } else {
        match first {
            "embed" | "v" | "shorts" | "live" => segments.next()?,
            _ => return None,
        }
    };
    validate_id(candidate)
}

fn validate_id(id: &str) -> Option<String> {
    let valid = id.len() == VIDEO_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| id.to_string())
}
