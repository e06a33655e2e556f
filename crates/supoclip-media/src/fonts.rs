//! Caption font catalog backed by a directory of font files.

use std::path::{Path, PathBuf};

use supoclip_models::{is_safe_family_name, FontInfo};
use tracing::{debug, warn};

use crate::error::MediaResult;

/// fontconfig family used when no font file is available.
pub const SYSTEM_FALLBACK_FAMILY: &str = "Sans";

const FONT_EXTENSIONS: [&str; 2] = ["ttf", "otf"];

/// Where a caption font comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedFont {
    /// A font file from the catalog directory
    File {
        family: String,
        path: PathBuf,
        /// True when the requested family was missing and the default was used
        fallback: bool,
    },
    /// A fontconfig family name
    System { family: String },
}

impl ResolvedFont {
    pub fn family(&self) -> &str {
        match self {
            ResolvedFont::File { family, .. } | ResolvedFont::System { family } => family,
        }
    }

    pub fn is_fallback(&self) -> bool {
        match self {
            ResolvedFont::File { fallback, .. } => *fallback,
            ResolvedFont::System { .. } => true,
        }
    }
}

/// Fonts available for captions.
#[derive(Debug, Clone)]
pub struct FontCatalog {
    dir: PathBuf,
    default_family: String,
}

impl FontCatalog {
    pub fn new(dir: impl Into<PathBuf>, default_family: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            default_family: default_family.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn default_family(&self) -> &str {
        &self.default_family
    }

    /// Fonts in the catalog, sorted by name; the default family is always listed.
    pub async fn list(&self) -> MediaResult<Vec<FontInfo>> {
        let mut names: Vec<String> = Vec::new();

        match tokio::fs::read_dir(&self.dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if !has_font_extension(&path) {
                        continue;
                    }
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        if is_safe_family_name(stem) {
                            names.push(stem.to_string());
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(dir = %self.dir.display(), "Fonts directory does not exist");
            }
            Err(e) => return Err(e.into()),
        }

        if !names.contains(&self.default_family) {
            names.push(self.default_family.clone());
        }
        names.sort();
        names.dedup();

        Ok(names.into_iter().map(FontInfo::new).collect())
    }

    /// Resolve `family` to a file, falling back to the default family and then
    /// to the system sans font.
    pub async fn resolve(&self, family: &str) -> ResolvedFont {
        if let Some(path) = self.find_file(family).await {
            return ResolvedFont::File {
                family: family.to_string(),
                path,
                fallback: false,
            };
        }

        if family != self.default_family {
            if let Some(path) = self.find_file(&self.default_family).await {
                debug!(requested = family, "Font not found, using default family");
                return ResolvedFont::File {
                    family: self.default_family.clone(),
                    path,
                    fallback: true,
                };
            }
        }

        warn!(requested = family, "No font file available, using system font");
        ResolvedFont::System {
            family: SYSTEM_FALLBACK_FAMILY.to_string(),
        }
    }

    async fn find_file(&self, family: &str) -> Option<PathBuf> {
        if !is_safe_family_name(family) {
            return None;
        }
        for ext in FONT_EXTENSIONS {
            let candidate = self.dir.join(format!("{}.{}", family, ext));
            if tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                return Some(candidate);
            }
        }
        None
    }
}

fn has_font_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FONT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn catalog_with(files: &[&str]) -> (tempfile::TempDir, FontCatalog) {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            tokio::fs::write(dir.path().join(f), b"font").await.unwrap();
        }
        let catalog = FontCatalog::new(dir.path(), "TikTokSans-Regular");
        (dir, catalog)
    }

    #[tokio::test]
    async fn test_list_includes_default_and_filters() {
        let (_dir, catalog) = catalog_with(&["Roboto-Bold.ttf", "Inter.otf", "notes.txt", "bad;name.ttf"]).await;
        let fonts = catalog.list().await.unwrap();
        let names: Vec<&str> = fonts.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Inter", "Roboto-Bold", "TikTokSans-Regular"]);
        assert_eq!(fonts[1].display_name, "Roboto Bold");
    }

    #[tokio::test]
    async fn test_list_missing_dir() {
        let catalog = FontCatalog::new("/no/such/fonts/dir", "TikTokSans-Regular");
        let fonts = catalog.list().await.unwrap();
        assert_eq!(fonts.len(), 1);
        assert_eq!(fonts[0].name, "TikTokSans-Regular");
    }

    #[tokio::test]
    async fn test_resolve_requested_family() {
        let (dir, catalog) = catalog_with(&["Inter.otf", "TikTokSans-Regular.ttf"]).await;
        let font = catalog.resolve("Inter").await;
        assert_eq!(
            font,
            ResolvedFont::File {
                family: "Inter".to_string(),
                path: dir.path().join("Inter.otf"),
                fallback: false,
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_default() {
        let (_dir, catalog) = catalog_with(&["TikTokSans-Regular.ttf"]).await;
        let font = catalog.resolve("Missing").await;
        assert_eq!(font.family(), "TikTokSans-Regular");
        assert!(font.is_fallback());
    }

    #[tokio::test]
    async fn test_resolve_system_when_empty() {
        let (_dir, catalog) = catalog_with(&[]).await;
        let font = catalog.resolve("Missing").await;
        assert_eq!(
            font,
            ResolvedFont::System {
                family: SYSTEM_FALLBACK_FAMILY.to_string()
            }
        );
    }
}
