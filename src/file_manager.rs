//! # File Management Module
//!
//! Questo modulo raccoglie le operazioni sui file condivise da backup,
//! transform engine e reference rewriter.
//!
//! ## Operazioni sui file:
//! - `temp_sibling()`: file temporaneo accanto al target, così il rename resta sullo stesso filesystem
//! - `commit_replacement()`: rename atomico del file temporaneo sul target
//! - `sha256_file()`: digest in streaming per verificare i backup
//! - `format_size()` / `calculate_reduction()`: utilità per il report
//!
//! `PathLocks` fornisce un mutex async per percorso: due worker non scrivono
//! mai lo stesso backup o lo stesso file di testo insieme.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Prefix of every temp file this tool creates inside the project tree.
/// The scanner ignores files carrying it.
pub const TEMP_PREFIX: &str = ".smo-";

/// Manages file operations shared across components
pub struct FileManager;

impl FileManager {
    /// Create a temp file in the same directory as `target`, keeping `extension`
    /// so external encoders can infer the container from the name.
    pub fn temp_sibling(target: &Path, extension: &str) -> Result<NamedTempFile> {
        let dir = target
            .parent()
            .ok_or_else(|| anyhow::anyhow!("No parent directory for {}", target.display()))?;
        let suffix = if extension.is_empty() {
            ".tmp".to_string()
        } else {
            format!(".{}", extension)
        };
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(&suffix)
            .tempfile_in(dir)?;
        Ok(temp)
    }

    /// Atomically move a finished temp file to `target`.
    ///
    /// When `target` already exists its permissions are carried over, since
    /// temp files are created owner-only. With `clobber = false` an existing
    /// target is an error and the temp file is discarded.
    pub fn commit_replacement(temp: NamedTempFile, target: &Path, clobber: bool) -> Result<()> {
        match std::fs::metadata(target) {
            Ok(metadata) => std::fs::set_permissions(temp.path(), metadata.permissions())?,
            Err(_) => {
                // New file: plain world-readable web asset
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o644))?;
                }
            }
        }

        if clobber {
            temp.persist(target).map_err(|e| anyhow::anyhow!(e.error))?;
        } else {
            temp.persist_noclobber(target).map_err(|e| anyhow::anyhow!(e.error))?;
        }
        Ok(())
    }

    /// SHA-256 of a file, read in chunks
    pub async fn sha256_file(path: &Path) -> Result<String> {
        let mut file = fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    pub async fn file_size(path: &Path) -> Result<u64> {
        Ok(fs::metadata(path).await?.len())
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    /// Calculate percentage reduction
    pub fn calculate_reduction(original_size: u64, new_size: u64) -> f64 {
        if original_size == 0 {
            0.0
        } else {
            ((original_size as f64 - new_size as f64) / original_size as f64) * 100.0
        }
    }
}

/// One async mutex per path, created on first use
#[derive(Clone, Default)]
pub struct PathLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(FileManager::format_size(512), "512 B");
        assert_eq!(FileManager::format_size(2048), "2.00 KB");
        assert_eq!(FileManager::format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_calculate_reduction() {
        assert_eq!(FileManager::calculate_reduction(0, 0), 0.0);
        assert_eq!(FileManager::calculate_reduction(1000, 250), 75.0);
    }

    #[test]
    fn test_temp_sibling_lives_next_to_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("hero.jpg");
        let temp = FileManager::temp_sibling(&target, "jpg").unwrap();
        assert_eq!(temp.path().parent(), Some(dir.path()));
        let name = temp.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(TEMP_PREFIX));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn test_commit_replacement_swaps_content() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.txt");
        std::fs::write(&target, b"old").unwrap();

        let mut temp = FileManager::temp_sibling(&target, "txt").unwrap();
        temp.write_all(b"new").unwrap();
        FileManager::commit_replacement(temp, &target, true).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_commit_without_clobber_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.mp4");
        std::fs::write(&target, b"existing").unwrap();

        let mut temp = FileManager::temp_sibling(&target, "mp4").unwrap();
        temp.write_all(b"new").unwrap();
        assert!(FileManager::commit_replacement(temp, &target, false).is_err());
        assert_eq!(std::fs::read(&target).unwrap(), b"existing");
    }

    #[tokio::test]
    async fn test_sha256_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        let digest = FileManager::sha256_file(&path).await.unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_path_locks_serialize_same_path() {
        let locks = PathLocks::new();
        let path = PathBuf::from("/site/index.html");

        let guard = locks.lock(&path).await;
        let contender = {
            let locks = locks.clone();
            let path = path.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&path).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();

        // A different path is never blocked
        let _a = locks.lock(Path::new("/a")).await;
        let _b = locks.lock(Path::new("/b")).await;
    }
}
