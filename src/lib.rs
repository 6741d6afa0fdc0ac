//! # Site Media Optimizer Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Trova immagini, GIF e video pesanti in un progetto web
//! - Salva gli originali, li comprime o li converte e riporta quanto spazio è stato risparmiato
//!
//! ## Architettura dei moduli:
//! - `scanner`: scansione dell'albero con esclusioni
//! - `classifier`: decisioni pure basate sulle soglie
//! - `backup`: copie verificate degli originali
//! - `encoder`: interfaccia di transcodifica e implementazione con tool esterni
//! - `transform`: compressione/conversione atomica, mai più grande dell'originale
//! - `rewriter`: riferimenti ai file convertiti in HTML/JS/CSS
//! - `confirm`: canale di conferma interattivo
//! - `optimizer`: il coordinator della run
//! - `summary`: righe per asset e tabella finale
//!
//! ## Utilizzo:
//! ```rust,no_run
//! use site_media_optimizer::{Config, RunCoordinator, ScriptedConfirmer, ToolEncoder};
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let encoder = Arc::new(ToolEncoder::new(Duration::from_secs(900)));
//! let confirmer = ScriptedConfirmer::accept_all(None, true);
//! let mut coordinator = RunCoordinator::new(Config::default(), encoder, confirmer);
//! let summary = coordinator.run(Path::new("./site")).await?;
//! println!("{}", summary.render_table());
//! # Ok(())
//! # }
//! ```

pub mod asset;
pub mod backup;
pub mod classifier;
pub mod config;
pub mod confirm;
pub mod encoder;
pub mod error;
pub mod file_manager;
pub mod image_processor;
pub mod json_output;
pub mod optimizer;
pub mod platform;
pub mod progress;
pub mod rewriter;
pub mod scanner;
pub mod summary;
pub mod transform;
pub mod video_processor;

pub use asset::{AssetRecord, Category};
pub use classifier::{classify, Action, Decision, GifFormat};
pub use config::Config;
pub use confirm::{Answer, ConfirmationChannel, ScriptedConfirmer, TerminalConfirmer};
pub use encoder::{EncodeProfile, Encoder, ToolEncoder};
pub use error::{OptimizeError, OptimizeResult};
pub use optimizer::{GifChoice, RunCoordinator};
pub use summary::{Status, Summary, SummaryRow};
