//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione di una run.
//!
//! ## Responsabilità:
//! - Definisce `Config` e la tabella delle soglie (`ThresholdTable`)
//! - Valida i parametri (intensity 1-5, workers > 0, CRF, soglie coerenti)
//! - Carica/salva la configurazione da/verso file JSON
//! - Cerca il file nella root del progetto, poi nella config dir dell'utente
//!
//! `Config` si costruisce una volta sola (default, file, flag CLI) e poi non
//! cambia più.
//!
//! ## Tabella delle soglie:
//! Una `ThresholdRule` per `Category`: heavy threshold, ideal target opzionale,
//! override per estensione (WebP e AVIF sono già formati efficienti) e azioni
//! ammesse.
//!
//! ## Esempio:
//! ```rust
//! use site_media_optimizer::Config;
//!
//! let config = Config {
//!     intensity: 2,
//!     workers: 8,
//!     ..Default::default()
//! };
//! config.validate().unwrap();
//! ```

use crate::asset::Category;
use crate::classifier::{Action, GifFormat};
use crate::error::OptimizeError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn invalid(message: String) -> anyhow::Error {
    OptimizeError::Config(message).into()
}

/// Name of the per-project config file looked up in the project root
pub const PROJECT_CONFIG_FILE: &str = ".site-media-optimizer.json";

/// Heavy/ideal thresholds for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub category: Category,
    /// Assets at or above this many bytes are candidates for action
    pub heavy_threshold: u64,
    /// Assets below this many bytes are left alone as already optimal
    pub ideal_target: Option<u64>,
    /// Extension-specific heavy thresholds (lowercase, no dot)
    #[serde(default)]
    pub heavy_overrides: BTreeMap<String, u64>,
    pub eligible_actions: Vec<Action>,
}

impl ThresholdRule {
    /// Heavy threshold for a given extension, honouring overrides
    pub fn heavy_threshold_for(&self, extension: &str) -> u64 {
        self.heavy_overrides
            .get(extension)
            .copied()
            .unwrap_or(self.heavy_threshold)
    }

    pub fn allows(&self, action: Action) -> bool {
        self.eligible_actions.contains(&action)
    }
}

/// The full, read-only threshold table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdTable {
    rules: Vec<ThresholdRule>,
}

impl ThresholdTable {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    pub fn rule(&self, category: Category) -> Option<&ThresholdRule> {
        self.rules.iter().find(|r| r.category == category)
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    fn validate(&self) -> Result<()> {
        for category in Category::ALL {
            let count = self.rules.iter().filter(|r| r.category == category).count();
            if count != 1 {
                return Err(invalid(format!(
                    "Threshold table needs exactly one rule for {}, found {}",
                    category,
                    count
                )));
            }
        }
        for rule in &self.rules {
            if rule.heavy_threshold == 0 {
                return Err(invalid(format!(
                    "Heavy threshold for {} must be greater than 0",
                    rule.category
                )));
            }
        }
        Ok(())
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        let image_overrides = BTreeMap::from([
            ("webp".to_string(), 400_000),
            ("avif".to_string(), 400_000),
        ]);

        Self::new(vec![
            ThresholdRule {
                category: Category::Image,
                heavy_threshold: 800_000,
                ideal_target: Some(250_000),
                heavy_overrides: image_overrides,
                eligible_actions: vec![Action::Compress],
            },
            ThresholdRule {
                category: Category::Gif,
                heavy_threshold: 2_000_000,
                ideal_target: None,
                heavy_overrides: BTreeMap::new(),
                eligible_actions: vec![Action::ConvertToMp4, Action::ConvertToWebM],
            },
            ThresholdRule {
                category: Category::Video,
                heavy_threshold: 8_000_000,
                ideal_target: Some(5_000_000),
                heavy_overrides: BTreeMap::new(),
                eligible_actions: vec![Action::Compress],
            },
            ThresholdRule {
                category: Category::Document,
                heavy_threshold: 5_000_000,
                ideal_target: None,
                heavy_overrides: BTreeMap::new(),
                eligible_actions: vec![Action::ReportOnly],
            },
            ThresholdRule {
                category: Category::Bundle,
                heavy_threshold: 500_000,
                ideal_target: None,
                heavy_overrides: BTreeMap::new(),
                eligible_actions: vec![Action::ReportOnly],
            },
        ])
    }
}

/// Configuration for a site optimization run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub thresholds: ThresholdTable,
    /// Backup tree directory name, created under the project root
    pub backup_dir: String,
    /// Directory names never descended into
    pub excluded_dirs: Vec<String>,
    /// Text files scanned for references to converted assets (extensions, no dot)
    pub rewrite_extensions: Vec<String>,
    /// Compression intensity (1 = gentlest, 5 = strongest)
    pub intensity: u8,
    /// CRF for GIF -> MP4 (libx264)
    pub gif_mp4_crf: u8,
    /// CRF for GIF -> WebM (libvpx-vp9)
    pub gif_webm_crf: u8,
    /// Audio bitrate for re-encoded videos
    pub audio_bitrate: String,
    /// Number of assets processed in parallel
    pub workers: usize,
    /// Upper bound for a single external encode
    pub encode_timeout_secs: u64,
    /// Classify and confirm, but never touch the disk
    pub dry_run: bool,
    /// Output newline-delimited JSON events instead of the text table
    pub json_output: bool,
    /// Container for heavy GIFs; when unset the user is asked
    pub default_gif_format: Option<GifFormat>,
    /// Delete the GIF from the project tree after a backed-up conversion
    pub remove_converted_sources: bool,
}

impl Default for Config {
    fn default() -> Self {
        let backup_dir = "backup_originals".to_string();
        Self {
            thresholds: ThresholdTable::default(),
            excluded_dirs: vec![
                backup_dir.clone(),
                ".git".to_string(),
                "node_modules".to_string(),
                "dist".to_string(),
                "build".to_string(),
                ".next".to_string(),
            ],
            backup_dir,
            rewrite_extensions: ["html", "htm", "js", "mjs", "css", "scss"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            intensity: 3,
            gif_mp4_crf: 23,
            gif_webm_crf: 32,
            audio_bitrate: "128k".to_string(),
            workers: 4,
            encode_timeout_secs: 900,
            dry_run: false,
            json_output: false,
            default_gif_format: None,
            remove_converted_sources: false,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;

        if !(1..=5).contains(&self.intensity) {
            return Err(invalid("Compression intensity must be between 1 and 5".to_string()));
        }

        if self.gif_mp4_crf > 51 {
            return Err(invalid("GIF to MP4 CRF must be between 0 and 51".to_string()));
        }

        if self.gif_webm_crf > 63 {
            return Err(invalid("GIF to WebM CRF must be between 0 and 63".to_string()));
        }

        if self.workers == 0 {
            return Err(invalid("Number of workers must be greater than 0".to_string()));
        }

        if self.encode_timeout_secs == 0 {
            return Err(invalid("Encode timeout must be greater than 0".to_string()));
        }

        let backup = Path::new(&self.backup_dir);
        if self.backup_dir.is_empty() || backup.components().count() != 1 || backup.is_absolute() {
            return Err(invalid(format!(
                "Backup directory must be a single directory name, got '{}'",
                self.backup_dir
            )));
        }

        Ok(())
    }

    /// Excluded directory names, always including the backup tree
    pub fn effective_exclusions(&self) -> Vec<String> {
        let mut names = self.excluded_dirs.clone();
        if !names.contains(&self.backup_dir) {
            names.push(self.backup_dir.clone());
        }
        names
    }

    pub fn is_rewrite_candidate(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .map(|ext| self.rewrite_extensions.iter().any(|e| e == &ext))
            .unwrap_or(false)
    }

    /// Load configuration from file, falling back to defaults if it does not exist
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file to use for a project: the project-local file
    /// first, then the user-wide one.
    pub fn discover(project_root: &Path) -> Option<PathBuf> {
        let local = project_root.join(PROJECT_CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("site-media-optimizer").join("config.json"))
            .filter(|path| path.is_file())
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
