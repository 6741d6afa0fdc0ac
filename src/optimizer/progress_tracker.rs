//! # Progress Tracking Module
//!
//! Tracker thread-safe condiviso dai worker di trasformazione. Aggiorna la
//! barra sul terminale e, in modalità JSON, emette gli eventi `asset_complete`.

use crate::file_manager::FileManager;
use crate::json_output::JsonMessage;
use crate::progress::ProgressManager;
use crate::summary::SummaryRow;
use crate::transform::{TransformOutcome, TransformResult};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounts {
    pub done: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub bytes_saved: u64,
}

#[derive(Clone)]
pub struct ProgressTracker {
    pub total: usize,
    json_output: bool,
    counts: Arc<Mutex<ProgressCounts>>,
    progress_manager: ProgressManager,
}

impl ProgressTracker {
    /// The bar is hidden in JSON mode, with nothing to do, and when stderr
    /// is not a terminal
    pub fn new(total: usize, json_output: bool) -> Self {
        let hidden = json_output || total == 0 || !std::io::stderr().is_terminal();
        Self {
            total,
            json_output,
            counts: Arc::new(Mutex::new(ProgressCounts::default())),
            progress_manager: ProgressManager::new(total as u64, hidden),
        }
    }

    /// Record one finished transform and update the bar
    pub async fn handle_transform(&self, result: &TransformResult) {
        let name = result.decision.asset.file_name();
        let message = {
            let mut counts = self.counts.lock().await;
            counts.done += 1;
            match result.outcome {
                TransformOutcome::Compressed | TransformOutcome::Converted(_) => {
                    counts.changed += 1;
                    counts.bytes_saved += result.saved();
                    format!(
                        "[OK] {}: {:.1}% saved",
                        name,
                        FileManager::calculate_reduction(result.before_size, result.after_size)
                    )
                }
                TransformOutcome::AlreadyOptimal => {
                    counts.unchanged += 1;
                    format!("[SKIP] {}: already optimal", name)
                }
                TransformOutcome::AlreadyConverted(format) => {
                    counts.unchanged += 1;
                    format!("[SKIP] {}: already converted to {}", name, format.extension())
                }
                TransformOutcome::Failed => {
                    counts.failed += 1;
                    format!("[ERROR] {}: failed", name)
                }
            }
        };
        self.progress_manager.update(&message);
    }

    /// Record an asset that never reached the encoder (backup failure, panic)
    pub async fn handle_failure(&self, name: &str) {
        {
            let mut counts = self.counts.lock().await;
            counts.done += 1;
            counts.failed += 1;
        }
        self.progress_manager
            .update(&format!("[ERROR] {}: failed", name));
    }

    /// Emit the final row of an asset in JSON mode
    pub fn emit_row(&self, row: &SummaryRow) {
        if self.json_output {
            JsonMessage::asset_complete(row).emit();
        }
    }

    pub async fn counts(&self) -> ProgressCounts {
        *self.counts.lock().await
    }

    /// Close the bar with the run's counts
    pub async fn finish(&self) -> ProgressCounts {
        let counts = self.counts().await;
        self.progress_manager.finish(&finish_message(&counts));
        counts
    }
}

fn finish_message(counts: &ProgressCounts) -> String {
    let mut message = format!(
        "{} changed, {} unchanged, saved {}",
        counts.changed,
        counts.unchanged,
        FileManager::format_size(counts.bytes_saved)
    );
    if counts.failed > 0 {
        message.push_str(&format!(", {} failed", counts.failed));
    }
    message
}
