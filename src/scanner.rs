//! # Path Scanner Module
//!
//! Questo modulo attraversa l'albero del progetto e produce gli `AssetRecord`
//! in modo lazy, in ordine stabile (per nome file).
//!
//! ## Responsabilità:
//! - Pota le directory escluse durante la scansione: `node_modules` non viene mai aperta
//! - Ignora in silenzio le estensioni non riconosciute
//! - Salta con un warning le voci illeggibili
//!
//! Lo scanner non scrive mai: due scansioni dello stesso albero danno gli stessi record.

use crate::asset::AssetRecord;
use crate::config::Config;
use crate::error::{OptimizeError, OptimizeResult};
use crate::file_manager::TEMP_PREFIX;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

pub struct Scanner {
    root: PathBuf,
    exclusions: Vec<String>,
}

impl Scanner {
    /// Create a scanner for `root`. A missing or unreadable root is the one
    /// run-fatal error.
    pub fn new(root: &Path, config: &Config) -> OptimizeResult<Self> {
        let root_error = |reason: String| OptimizeError::ProjectRoot {
            path: root.to_path_buf(),
            reason,
        };

        let root = root.canonicalize().map_err(|e| root_error(e.to_string()))?;
        if !root.is_dir() {
            return Err(root_error("not a directory".to_string()));
        }
        std::fs::read_dir(&root).map_err(|e| root_error(e.to_string()))?;

        Ok(Self {
            root,
            exclusions: config.effective_exclusions(),
        })
    }

    /// Canonical project root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the tree and yield every recognised asset
    pub fn assets(&self) -> impl Iterator<Item = AssetRecord> + '_ {
        self.files().filter_map(move |entry| {
            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    let warning = OptimizeError::Scan {
                        path: entry.path().to_path_buf(),
                        reason: e.to_string(),
                    };
                    warn!("{}, skipped", warning);
                    return None;
                }
            };
            AssetRecord::new(&self.root, entry.path(), size)
        })
    }

    /// Text files that may reference assets, selected by `is_candidate`
    pub fn text_files<'a, F>(&'a self, is_candidate: F) -> impl Iterator<Item = PathBuf> + 'a
    where
        F: Fn(&Path) -> bool + 'a,
    {
        self.files()
            .filter(move |entry| is_candidate(entry.path()))
            .map(|entry| entry.into_path())
    }

    fn files(&self) -> impl Iterator<Item = DirEntry> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| !self.is_pruned(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    let warning = OptimizeError::Scan {
                        path: e.path().map(Path::to_path_buf).unwrap_or_default(),
                        reason: e.to_string(),
                    };
                    warn!("{}, skipped", warning);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
    }

    fn is_pruned(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        let pruned = self.exclusions.iter().any(|excluded| excluded == name.as_ref());
        if pruned {
            debug!("Pruning excluded directory: {}", entry.path().display());
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Category;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, size: usize) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; size]).unwrap();
    }

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "index.html", 100);
        write(root, "img/hero.jpg", 900);
        write(root, "img/logo.PNG", 50);
        write(root, "img/anim.gif", 300);
        write(root, "media/intro.mp4", 1000);
        write(root, "docs/notes.txt", 10);
        write(root, "node_modules/pkg/big.png", 5000);
        write(root, ".git/objects/x.jpg", 10);
        write(root, "backup_originals/img/hero.jpg", 900);
        write(root, "img/.smo-abc123.jpg", 10);
        dir
    }

    #[test]
    fn test_scan_finds_assets_and_prunes_exclusions() {
        let dir = site();
        let scanner = Scanner::new(dir.path(), &Config::default()).unwrap();
        let records: Vec<_> = scanner.assets().collect();
        let paths: Vec<String> = records.iter().map(|r| r.display_path()).collect();

        assert_eq!(
            paths,
            vec!["img/anim.gif", "img/hero.jpg", "img/logo.PNG", "media/intro.mp4"]
        );
        let hero = records.iter().find(|r| r.file_name() == "hero.jpg").unwrap();
        assert_eq!(hero.size, 900);
        assert_eq!(hero.category, Category::Image);
    }

    #[test]
    fn test_scan_is_restartable() {
        let dir = site();
        let scanner = Scanner::new(dir.path(), &Config::default()).unwrap();
        let first: Vec<_> = scanner.assets().map(|r| (r.relative_path, r.size)).collect();
        let second: Vec<_> = scanner.assets().map(|r| (r.relative_path, r.size)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_custom_exclusions() {
        let dir = site();
        let config = Config {
            excluded_dirs: vec!["media".to_string()],
            ..Default::default()
        };
        let scanner = Scanner::new(dir.path(), &config).unwrap();
        let paths: Vec<String> = scanner.assets().map(|r| r.display_path()).collect();
        assert!(!paths.iter().any(|p| p.starts_with("media/")));
        // node_modules is no longer excluded, the backup tree always is
        assert!(paths.contains(&"node_modules/pkg/big.png".to_string()));
        assert!(!paths.iter().any(|p| p.starts_with("backup_originals/")));
    }

    #[test]
    fn test_text_files() {
        let dir = site();
        let config = Config::default();
        let scanner = Scanner::new(dir.path(), &config).unwrap();
        let texts: Vec<_> = scanner
            .text_files(|p| config.is_rewrite_candidate(p))
            .collect();
        assert_eq!(texts, vec![scanner.root().join("index.html")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = site();
        write(dir.path(), "locked/secret.jpg", 900);
        let locked = dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // root ignores directory permissions
        let enforced = fs::read_dir(&locked).is_err();

        let scanner = Scanner::new(dir.path(), &Config::default());
        let paths: Option<Vec<String>> = scanner
            .as_ref()
            .ok()
            .map(|s| s.assets().map(|r| r.display_path()).collect());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let paths = paths.expect("scanner should open the root");
        for sibling in ["img/anim.gif", "img/hero.jpg", "img/logo.PNG", "media/intro.mp4"] {
            assert!(paths.contains(&sibling.to_string()), "missing {}", sibling);
        }
        if enforced {
            assert!(!paths.contains(&"locked/secret.jpg".to_string()));
        }
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = Scanner::new(&dir.path().join("missing"), &Config::default())
            .err()
            .unwrap();
        assert!(err.is_run_fatal());
    }

    #[test]
    fn test_root_must_be_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.jpg");
        fs::write(&file, b"x").unwrap();
        assert!(Scanner::new(&file, &Config::default()).is_err());
    }
}
