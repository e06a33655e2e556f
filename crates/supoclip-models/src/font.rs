//! Caption font configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Font used when the request does not name one.
pub const DEFAULT_FONT_FAMILY: &str = "TikTokSans-Regular";

/// Caption size used when the request does not set one.
pub const DEFAULT_FONT_SIZE: u32 = 24;

/// Caption color used when the request does not set one.
pub const DEFAULT_FONT_COLOR: &str = "#FFFFFF";

/// Smallest accepted caption size.
pub const MIN_FONT_SIZE: u32 = 8;

/// Largest accepted caption size.
pub const MAX_FONT_SIZE: u32 = 200;

/// Optional font settings as submitted with a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FontOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
}

impl FontOptions {
    /// Validate and fill in defaults.
    pub fn resolve(&self) -> Result<FontConfig, ValidationError> {
        let family = match self.font_family.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_FONT_FAMILY.to_string(),
            Some(family) => {
                if !is_safe_family_name(family) {
                    return Err(ValidationError::InvalidFontFamily(family.to_string()));
                }
                family.to_string()
            }
        };

        let size = self.font_size.unwrap_or(DEFAULT_FONT_SIZE);
        if !(MIN_FONT_SIZE..=MAX_FONT_SIZE).contains(&size) {
            return Err(ValidationError::InvalidFontSize {
                value: size,
                min: MIN_FONT_SIZE,
                max: MAX_FONT_SIZE,
            });
        }

        let color = match self.font_color.as_deref() {
            None => DEFAULT_FONT_COLOR.to_string(),
            Some(raw) => normalize_hex_color(raw)
                .ok_or_else(|| ValidationError::InvalidFontColor(raw.to_string()))?,
        };

        Ok(FontConfig {
            family,
            size,
            color,
        })
    }
}

/// Validated caption font settings stored on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FontConfig {
    /// Font family name (file stem in the fonts directory)
    pub family: String,
    /// Font size in points
    pub size: u32,
    /// Color as `#RRGGBB`
    pub color: String,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            family: DEFAULT_FONT_FAMILY.to_string(),
            size: DEFAULT_FONT_SIZE,
            color: DEFAULT_FONT_COLOR.to_string(),
        }
    }
}

impl FontConfig {
    /// Color channels, falling back to white for a malformed stored value.
    pub fn rgb(&self) -> (u8, u8, u8) {
        let hex = self.color.trim_start_matches('#');
        let channel = |i: usize| {
            hex.get(i..i + 2)
                .and_then(|c| u8::from_str_radix(c, 16).ok())
                .unwrap_or(0xFF)
        };
        (channel(0), channel(2), channel(4))
    }
}

/// Font catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FontInfo {
    /// Name accepted as `font_family`
    pub name: String,
    /// Human readable label
    pub display_name: String,
}

impl FontInfo {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let display_name = name.replace(['-', '_'], " ");
        Self { name, display_name }
    }
}

/// Returns `#RRGGBB` for a 6-digit hex color with or without the leading `#`.
pub fn normalize_hex_color(raw: &str) -> Option<String> {
    let hex = raw.trim();
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(format!("#{}", hex.to_ascii_uppercase()))
    } else {
        None
    }
}

/// Family names end up inside FFmpeg filter arguments.
pub fn is_safe_family_name(name: &str) -> bool {
    name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = FontOptions::default().resolve().unwrap();
        assert_eq!(config.family, "TikTokSans-Regular");
        assert_eq!(config.size, 24);
        assert_eq!(config.color, "#FFFFFF");
    }

    #[test]
    fn test_color_normalized() {
        let options = FontOptions {
            font_color: Some("ff00aa".to_string()),
            ..Default::default()
        };
        assert_eq!(options.resolve().unwrap().color, "#FF00AA");
    }

    #[test]
    fn test_invalid_colors_rejected() {
        for bad in ["#FFF", "white", "#GGGGGG", "#FFFFFFF", ""] {
            let options = FontOptions {
                font_color: Some(bad.to_string()),
                ..Default::default()
            };
            assert_eq!(
                options.resolve(),
                Err(ValidationError::InvalidFontColor(bad.to_string())),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_font_size_bounds() {
        let options = FontOptions {
            font_size: Some(2),
            ..Default::default()
        };
        assert!(matches!(
            options.resolve(),
            Err(ValidationError::InvalidFontSize { value: 2, .. })
        ));
    }

    #[test]
    fn test_family_injection_rejected() {
        let options = FontOptions {
            font_family: Some("Arial':force_style=".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            options.resolve(),
            Err(ValidationError::InvalidFontFamily(_))
        ));
    }

    #[test]
    fn test_rgb() {
        let config = FontConfig {
            color: "#10FF00".to_string(),
            ..Default::default()
        };
        assert_eq!(config.rgb(), (0x10, 0xFF, 0x00));
    }

    #[test]
    fn test_font_info_display_name() {
        let info = FontInfo::new("TikTokSans-Regular");
        assert_eq!(info.display_name, "TikTokSans Regular");
    }
}
