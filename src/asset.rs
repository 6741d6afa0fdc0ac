//! # Asset Records Module
//!
//! Questo modulo definisce `AssetRecord`, il record prodotto dallo scanner per
//! ogni file media riconosciuto.
//!
//! ## Responsabilità:
//! - Mappa le estensioni sulle categorie (`Image`, `Gif`, `Video`, `Document`, `Bundle`)
//! - Calcola percorso relativo e percorso web (sempre con `/`)
//! - I record sono immutabili: il resto della pipeline li prende in prestito o li clona

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "webp", "avif"];
const GIF_EXTS: &[&str] = &["gif"];
const VIDEO_EXTS: &[&str] = &["mp4", "mov", "webm", "m4v"];
const DOCUMENT_EXTS: &[&str] = &["pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx"];
const BUNDLE_EXTS: &[&str] = &["js", "mjs", "css"];

/// Asset category, one threshold rule each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Image,
    Gif,
    Video,
    Document,
    Bundle,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Image,
        Category::Gif,
        Category::Video,
        Category::Document,
        Category::Bundle,
    ];

    /// Map a lowercase extension (without dot) to its category
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        let ext = ext.as_str();
        if IMAGE_EXTS.contains(&ext) {
            Some(Self::Image)
        } else if GIF_EXTS.contains(&ext) {
            Some(Self::Gif)
        } else if VIDEO_EXTS.contains(&ext) {
            Some(Self::Video)
        } else if DOCUMENT_EXTS.contains(&ext) {
            Some(Self::Document)
        } else if BUNDLE_EXTS.contains(&ext) {
            Some(Self::Bundle)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Gif => "gif",
            Self::Video => "video",
            Self::Document => "document",
            Self::Bundle => "bundle",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media or report-only file found under the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub absolute_path: PathBuf,
    /// Relative to the project root; used for backup mirroring and reporting
    pub relative_path: PathBuf,
    /// Lowercase, without the leading dot
    pub extension: String,
    pub size: u64,
    pub category: Category,
    pub discovered_at: SystemTime,
}

impl AssetRecord {
    /// Build a record for `absolute_path` under `root`. Returns `None` for
    /// unrecognised extensions or paths outside the root.
    pub fn new(root: &Path, absolute_path: &Path, size: u64) -> Option<Self> {
        let extension = absolute_path.extension()?.to_string_lossy().to_ascii_lowercase();
        let category = Category::from_extension(&extension)?;
        let relative_path = absolute_path.strip_prefix(root).ok()?.to_path_buf();

        Some(Self {
            absolute_path: absolute_path.to_path_buf(),
            relative_path,
            extension,
            size,
            category,
            discovered_at: SystemTime::now(),
        })
    }

    pub fn file_name(&self) -> String {
        self.absolute_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned()
    }

    /// Relative path with forward slashes, as it appears in web references
    pub fn display_path(&self) -> String {
        to_web_path(&self.relative_path)
    }
}

/// Render a relative path with `/` separators regardless of platform
pub fn to_web_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_extension() {
        assert_eq!(Category::from_extension("JPG"), Some(Category::Image));
        assert_eq!(Category::from_extension("avif"), Some(Category::Image));
        assert_eq!(Category::from_extension("gif"), Some(Category::Gif));
        assert_eq!(Category::from_extension("mov"), Some(Category::Video));
        assert_eq!(Category::from_extension("pdf"), Some(Category::Document));
        assert_eq!(Category::from_extension("css"), Some(Category::Bundle));
        assert_eq!(Category::from_extension("txt"), None);
    }

    #[test]
    fn test_record_relative_path_and_extension() {
        let root = Path::new("/site");
        let record = AssetRecord::new(root, Path::new("/site/img/Hero.JPEG"), 42).unwrap();
        assert_eq!(record.relative_path, PathBuf::from("img/Hero.JPEG"));
        assert_eq!(record.extension, "jpeg");
        assert_eq!(record.category, Category::Image);
        assert_eq!(record.display_path(), "img/Hero.JPEG");
        assert_eq!(record.file_name(), "Hero.JPEG");
    }

    #[test]
    fn test_record_rejects_unknown_and_outside_root() {
        let root = Path::new("/site");
        assert!(AssetRecord::new(root, Path::new("/site/readme.txt"), 1).is_none());
        assert!(AssetRecord::new(root, Path::new("/elsewhere/a.png"), 1).is_none());
        assert!(AssetRecord::new(root, Path::new("/site/Makefile"), 1).is_none());
    }
}
