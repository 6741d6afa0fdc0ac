//! # Optimizer Module
//!
//! - `coordinator`: la run, dalla scansione al summary
//! - `pipeline`: macchina a stati di ogni asset, backup e poi trasformazione
//! - `progress_tracker`: barra di progresso ed eventi JSON condivisi dai worker

pub mod coordinator;
pub mod pipeline;
pub mod progress_tracker;

pub use coordinator::{GifChoice, RunCoordinator};
pub use pipeline::{AssetPipeline, AssetState, PipelineOutcome};
pub use progress_tracker::ProgressTracker;
