//! # Backup Manager Module
//!
//! Questo modulo salva una copia degli originali prima di qualsiasi modifica.
//!
//! ## Responsabilità:
//! - Copia l'originale in `<project root>/<backup dir>/`, mantenendo il percorso relativo
//! - Scrive su un file temporaneo dentro l'albero di backup, verifica lo SHA-256 e poi rinomina
//! - Idempotente: una copia con la stessa dimensione della sorgente viene riusata
//! - Una dimensione diversa produce un warning e un nuovo backup di riferimento

use crate::asset::AssetRecord;
use crate::error::{OptimizeError, OptimizeResult};
use crate::file_manager::{FileManager, PathLocks};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One preserved original
#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    pub original_relative_path: PathBuf,
    pub backup_path: PathBuf,
    pub copied_at: SystemTime,
}

#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub entry: BackupEntry,
    /// Zero when an existing backup was reused
    pub bytes_copied: u64,
}

pub struct BackupManager {
    backup_root: PathBuf,
    locks: PathLocks,
    entries: Mutex<HashMap<PathBuf, BackupEntry>>,
}

impl BackupManager {
    pub fn new(project_root: &Path, backup_dir: &str) -> Self {
        Self {
            backup_root: project_root.join(backup_dir),
            locks: PathLocks::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Where the backup of `asset` lives (or would live)
    pub fn backup_path_for(&self, asset: &AssetRecord) -> PathBuf {
        self.backup_root.join(&asset.relative_path)
    }

    /// Make sure a verified copy of `asset` exists in the backup tree.
    pub async fn ensure_backup(&self, asset: &AssetRecord) -> OptimizeResult<BackupOutcome> {
        let backup_path = self.backup_path_for(asset);
        let _guard = self.locks.lock(&backup_path).await;

        let source_size = fs::metadata(&asset.absolute_path)
            .await
            .map_err(|e| OptimizeError::backup(&asset.absolute_path, e))?
            .len();

        let bytes_copied = match fs::metadata(&backup_path).await {
            Ok(existing) if existing.len() == source_size => {
                debug!("Reusing existing backup: {}", backup_path.display());
                0
            }
            Ok(existing) => {
                warn!(
                    "Backup of {} has size {} but source has {}, replacing it",
                    asset.display_path(),
                    existing.len(),
                    source_size
                );
                self.copy_verified(asset, &backup_path).await?
            }
            Err(_) => self.copy_verified(asset, &backup_path).await?,
        };

        let entry = BackupEntry {
            original_relative_path: asset.relative_path.clone(),
            backup_path,
            copied_at: SystemTime::now(),
        };
        self.entries
            .lock()
            .await
            .insert(asset.relative_path.clone(), entry.clone());

        Ok(BackupOutcome {
            entry,
            bytes_copied,
        })
    }

    /// Every backup recorded during this run, sorted by original path
    pub async fn entries(&self) -> Vec<BackupEntry> {
        let mut entries: Vec<_> = self.entries.lock().await.values().cloned().collect();
        entries.sort_by(|a, b| a.original_relative_path.cmp(&b.original_relative_path));
        entries
    }

    async fn copy_verified(&self, asset: &AssetRecord, backup_path: &Path) -> OptimizeResult<u64> {
        let fail = |reason: String| OptimizeError::backup(&asset.absolute_path, reason);

        if let Some(parent) = backup_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let temp = FileManager::temp_sibling(backup_path, &asset.extension)
            .map_err(|e| fail(e.to_string()))?;
        let copied = fs::copy(&asset.absolute_path, temp.path())
            .await
            .map_err(|e| fail(e.to_string()))?;

        let source_digest = FileManager::sha256_file(&asset.absolute_path)
            .await
            .map_err(|e| fail(e.to_string()))?;
        let copy_digest = FileManager::sha256_file(temp.path())
            .await
            .map_err(|e| fail(e.to_string()))?;
        if source_digest != copy_digest {
            // Dropping the temp file removes the partial copy
            return Err(fail("backup copy does not match the original".to_string()));
        }

        FileManager::commit_replacement(temp, backup_path, true).map_err(|e| fail(e.to_string()))?;
        info!(
            "Backed up {} ({})",
            asset.display_path(),
            FileManager::format_size(copied)
        );
        Ok(copied)
    }
}
