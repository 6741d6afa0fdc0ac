//! # Asset Pipeline
//!
//! Questo modulo definisce la macchina a stati di ogni asset, dalla scoperta
//! alla riga del summary:
//!
//! ```text
//! Discovered -> Classified -> AwaitingConfirmation -> BackedUp -> Transformed -> ReferencesRewritten -> Done
//!                   |            |      |      |           |            |
//!                   v            |      |      v           v            v
//!                  Done          |      |  FailedBackup  FailedTransform  Done
//!                                |      v
//!                                |   Cancelled
//!                                v
//!                           DoneSkipped
//! ```
//!
//! Un backup fallito ferma l'asset prima che l'encoder venga chiamato.

use crate::backup::{BackupEntry, BackupManager};
use crate::classifier::Decision;
use crate::transform::{TransformEngine, TransformResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    Discovered,
    Classified,
    AwaitingConfirmation,
    DoneSkipped,
    BackedUp,
    Transformed,
    ReferencesRewritten,
    Done,
    FailedBackup,
    FailedTransform,
    Cancelled,
}

impl AssetState {
    pub fn can_advance_to(&self, next: AssetState) -> bool {
        use AssetState::*;
        matches!(
            (self, next),
            (Discovered, Classified)
                | (Classified, Done)
                | (Classified, AwaitingConfirmation)
                | (AwaitingConfirmation, DoneSkipped)
                | (AwaitingConfirmation, BackedUp)
                | (AwaitingConfirmation, Cancelled)
                | (AwaitingConfirmation, FailedBackup)
                | (BackedUp, Transformed)
                | (BackedUp, FailedTransform)
                | (Transformed, ReferencesRewritten)
                | (Transformed, Done)
                | (ReferencesRewritten, Done)
        )
    }
}

/// Everything one asset went through in its pipeline
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub decision: Decision,
    pub state: AssetState,
    pub backup: Option<BackupEntry>,
    pub transform: Option<TransformResult>,
    pub error: Option<String>,
}

impl PipelineOutcome {
    /// Fresh record for a scanned asset, already classified into `decision`
    pub fn classified(decision: Decision) -> Self {
        let mut outcome = Self {
            decision,
            state: AssetState::Discovered,
            backup: None,
            transform: None,
            error: None,
        };
        outcome.advance(AssetState::Classified);
        outcome
    }

    /// Move to `next`, refusing transitions the state machine does not have
    pub fn advance(&mut self, next: AssetState) -> bool {
        if !self.state.can_advance_to(next) {
            warn!(
                "{}: ignoring transition {:?} -> {:?}",
                self.decision.asset.display_path(),
                self.state,
                next
            );
            return false;
        }
        debug!(
            "{}: {:?} -> {:?}",
            self.decision.asset.display_path(),
            self.state,
            next
        );
        self.state = next;
        true
    }

    fn check_awaiting(&self) -> bool {
        if self.state == AssetState::AwaitingConfirmation {
            return true;
        }
        warn!(
            "{}: not awaiting confirmation ({:?}), not processed",
            self.decision.asset.display_path(),
            self.state
        );
        false
    }

    pub fn fail(&mut self, next: AssetState, error: String) {
        self.advance(next);
        self.error = Some(error);
    }
}

/// Backup, then transform, for one asset
pub struct AssetPipeline {
    backups: Arc<BackupManager>,
    engine: Arc<TransformEngine>,
}

impl AssetPipeline {
    pub fn new(backups: Arc<BackupManager>, engine: Arc<TransformEngine>) -> Self {
        Self { backups, engine }
    }

    /// Takes an asset the user has approved, in `AwaitingConfirmation`
    pub async fn run(&self, mut outcome: PipelineOutcome) -> PipelineOutcome {
        if !outcome.check_awaiting() {
            return outcome;
        }

        match self.backups.ensure_backup(&outcome.decision.asset).await {
            Ok(backup) => {
                if backup.bytes_copied > 0 {
                    debug!(
                        "Backed up {} ({} bytes)",
                        outcome.decision.asset.display_path(),
                        backup.bytes_copied
                    );
                }
                outcome.backup = Some(backup.entry);
                outcome.advance(AssetState::BackedUp);
            }
            Err(e) => {
                warn!("{}", e);
                outcome.fail(AssetState::FailedBackup, e.to_string());
                return outcome;
            }
        }

        let result = self.engine.transform(&outcome.decision).await;
        if result.success {
            outcome.advance(AssetState::Transformed);
        } else {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "transform failed".to_string());
            outcome.fail(AssetState::FailedTransform, error);
        }
        outcome.transform = Some(result);
        outcome
    }
}
