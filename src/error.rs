//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore di una run.
//!
//! ## Responsabilità:
//! - Definisce `OptimizeError` con `thiserror`
//! - Distingue l'unico errore fatale (`ProjectRoot`) da quelli che fermano un solo asset
//!
//! ## Categorie di errori:
//! - `ProjectRoot`: root del progetto mancante o illeggibile
//! - `Scan`: percorso illeggibile durante la scansione, saltato con un warning
//! - `Backup`: l'originale non è stato salvato, l'asset non viene trasformato
//! - `Transform` / `Encode`: nuovo file non prodotto, originale intatto
//! - `Rewrite`: un file di testo non è stato modificato
//! - `MissingDependency`: tool esterno non installato
//! - `Config`: valori di configurazione non validi

use std::path::PathBuf;

/// Custom error types for site media optimization
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Project root is missing or unreadable: {path}: {reason}")]
    ProjectRoot { path: PathBuf, reason: String },

    #[error("Scan warning at {path}: {reason}")]
    Scan { path: PathBuf, reason: String },

    #[error("Backup failed for {path}: {reason}")]
    Backup { path: PathBuf, reason: String },

    #[error("Transform failed for {path}: {reason}")]
    Transform { path: PathBuf, reason: String },

    #[error("Encoder error: {0}")]
    Encode(String),

    #[error("Reference rewrite warning for {path}: {reason}")]
    Rewrite { path: PathBuf, reason: String },

    #[error("Dependency missing: {0}")]
    MissingDependency(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl OptimizeError {
    pub fn backup(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Backup {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transform(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Transform {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn rewrite(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Rewrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for the only condition that aborts a whole run.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::ProjectRoot { .. })
    }
}

pub type OptimizeResult<T> = Result<T, OptimizeError>;
