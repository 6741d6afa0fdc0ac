//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON per le run con `--json`:
//! un oggetto per riga su stdout, con il campo `"type"`.
//!
//! ## Tipi di messaggi:
//! - `start`: root del progetto, numero di asset, impostazioni effettive
//! - `plan`: analisi per categoria, prima di ogni conferma
//! - `asset_complete`: una riga del summary
//! - `complete`: totali della run
//! - `error`: errore fatale

use crate::asset::Category;
use crate::config::Config;
use crate::summary::{SummaryRow, Totals};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum JsonMessage {
    #[serde(rename = "start")]
    Start {
        project_root: PathBuf,
        total_assets: usize,
        config: JsonConfig,
    },

    #[serde(rename = "plan")]
    Plan { categories: Vec<CategoryPlan> },

    #[serde(rename = "asset_complete")]
    AssetComplete {
        #[serde(flatten)]
        row: SummaryRow,
        error: Option<String>,
    },

    #[serde(rename = "complete")]
    Complete {
        #[serde(flatten)]
        totals: Totals,
        duration_seconds: f64,
    },

    #[serde(rename = "error")]
    Error {
        message: String,
        details: Option<String>,
    },
}

/// Settings echoed in the `start` event
#[derive(Debug, Serialize)]
pub struct JsonConfig {
    pub intensity: u8,
    pub workers: usize,
    pub dry_run: bool,
    pub backup_dir: String,
    pub gif_mp4_crf: u8,
    pub gif_webm_crf: u8,
}

impl From<&Config> for JsonConfig {
    fn from(config: &Config) -> Self {
        Self {
            intensity: config.intensity,
            workers: config.workers,
            dry_run: config.dry_run,
            backup_dir: config.backup_dir.clone(),
            gif_mp4_crf: config.gif_mp4_crf,
            gif_webm_crf: config.gif_webm_crf,
        }
    }
}

/// Analysis of one category before confirmation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryPlan {
    pub category: Category,
    pub files: usize,
    pub total_size: u64,
    pub heavy: usize,
    pub heavy_size: u64,
    pub heavy_threshold: Option<u64>,
    pub ideal_target: Option<u64>,
}

impl JsonMessage {
    /// Print the message as one line on stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn start(project_root: PathBuf, total_assets: usize, config: &Config) -> Self {
        Self::Start {
            project_root,
            total_assets,
            config: JsonConfig::from(config),
        }
    }

    pub fn plan(categories: Vec<CategoryPlan>) -> Self {
        Self::Plan { categories }
    }

    pub fn asset_complete(row: &SummaryRow) -> Self {
        Self::AssetComplete {
            row: row.clone(),
            error: row.detail.clone(),
        }
    }

    pub fn complete(totals: Totals, duration_seconds: f64) -> Self {
        Self::Complete {
            totals,
            duration_seconds,
        }
    }

    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}
