//! # Run Coordinator Module
//!
//! Questo modulo orchestra una run, dalla scansione al summary.
//!
//! ## Flusso di esecuzione:
//! 1. Scansiona il progetto e classifica ogni asset
//! 2. Mostra l'analisi e chiede se procedere
//! 3. Sceglie il contenitore per le GIF e conferma ogni categoria in blocco
//! 4. Backup e trasformazione degli asset confermati, con un pool di worker limitato
//! 5. Riscrive (o conta soltanto) i riferimenti ai file convertiti
//! 6. Costruisce il summary in ordine di scoperta
//!
//! Solo una root mancante o illeggibile interrompe la run con un errore. Ogni
//! altro errore resta legato al suo asset e compare come riga del summary.

use crate::{
    asset::Category,
    backup::BackupManager,
    classifier::{classify, Action, Decision, GifFormat, Reason},
    config::{Config, ThresholdTable},
    confirm::{Answer, ConfirmRequest, ConfirmationChannel},
    encoder::Encoder,
    error::OptimizeResult,
    file_manager::{FileManager, PathLocks},
    json_output::{CategoryPlan, JsonMessage},
    optimizer::{
        pipeline::{AssetPipeline, AssetState, PipelineOutcome},
        progress_tracker::ProgressTracker,
    },
    progress::ProgressManager,
    rewriter::ReferenceRewriter,
    scanner::Scanner,
    summary::{Status, Summary, SummaryRow},
    transform::{TransformEngine, TransformOutcome},
};
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// How heavy GIFs get their target container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GifChoice {
    /// Ask the confirmation channel
    Ask,
    Use(GifFormat),
    /// Leave heavy GIFs untouched
    Skip,
}

/// What confirmation made of one asset
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    /// Never asked about; final as classified
    Unasked(Status),
    /// Asked about and not approved, or a dry run
    Settled(Status),
    Approved,
}

/// One asset's lifecycle during the run
struct Slot {
    outcome: PipelineOutcome,
    /// Row status for assets that never reach the pipeline
    settled: Option<Status>,
}

impl Slot {
    fn new(decision: Decision, verdict: Verdict) -> Self {
        let mut outcome = PipelineOutcome::classified(decision);
        let settled = match verdict {
            Verdict::Unasked(status) => {
                outcome.advance(AssetState::Done);
                Some(status)
            }
            Verdict::Settled(status) => {
                outcome.advance(AssetState::AwaitingConfirmation);
                outcome.advance(AssetState::DoneSkipped);
                Some(status)
            }
            Verdict::Approved => {
                outcome.advance(AssetState::AwaitingConfirmation);
                None
            }
        };
        Self { outcome, settled }
    }

    fn is_approved(&self) -> bool {
        self.outcome.state == AssetState::AwaitingConfirmation
    }

    fn conversion(&self) -> Option<GifFormat> {
        match self.outcome.transform.as_ref()?.outcome {
            TransformOutcome::Converted(format) | TransformOutcome::AlreadyConverted(format) => {
                Some(format)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct ConversionFollowUp {
    references_rewritten: usize,
    references_left: usize,
    source_removed: bool,
}

pub struct RunCoordinator<C> {
    config: Arc<Config>,
    encoder: Arc<dyn Encoder>,
    confirmer: C,
    gif_choice: GifChoice,
    stop: Option<broadcast::Receiver<()>>,
    ctrl_c: bool,
    stopped: bool,
}

impl<C: ConfirmationChannel> RunCoordinator<C> {
    pub fn new(config: Config, encoder: Arc<dyn Encoder>, confirmer: C) -> Self {
        let gif_choice = match config.default_gif_format {
            Some(format) => GifChoice::Use(format),
            None => GifChoice::Ask,
        };
        Self {
            config: Arc::new(config),
            encoder,
            confirmer,
            gif_choice,
            stop: None,
            ctrl_c: false,
            stopped: false,
        }
    }

    pub fn with_gif_choice(mut self, choice: GifChoice) -> Self {
        self.gif_choice = choice;
        self
    }

    /// Stop dispatching new assets once a message arrives on `stop`
    pub fn with_stop_signal(mut self, stop: broadcast::Receiver<()>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Treat Ctrl-C as a stop signal once the prompts are over. Until then
    /// the default handler applies and the process ends with nothing changed.
    pub fn with_ctrl_c(mut self) -> Self {
        self.ctrl_c = true;
        self
    }

    pub fn confirmer(&self) -> &C {
        &self.confirmer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the whole pipeline over `root`
    pub async fn run(&mut self, root: &Path) -> OptimizeResult<Summary> {
        let start_time = Instant::now();
        let scanner = Scanner::new(root, &self.config)?;

        let spinner = ProgressManager::spinner("Scanning project tree...", self.quiet());
        let assets: Vec<_> = scanner.assets().collect();
        spinner.finish_and_clear();
        self.emit_start_message(scanner.root(), assets.len());

        let table = self.config.thresholds.clone();
        let mut decisions: Vec<Decision> =
            assets.iter().map(|asset| classify(asset, &table, None)).collect();
        self.log_analysis(&build_plan(&decisions, &table), decisions.len());

        let verdicts = self.confirm_decisions(&mut decisions, &table);
        let mut slots: Vec<Slot> = decisions
            .into_iter()
            .zip(verdicts)
            .map(|(decision, verdict)| Slot::new(decision, verdict))
            .collect();

        let approved = slots.iter().filter(|s| s.is_approved()).count();
        let conversions = slots
            .iter()
            .filter(|s| s.is_approved() && s.outcome.decision.action.conversion_target().is_some())
            .count();
        let rewrite = conversions > 0 && self.ask_rewrite(conversions);

        let tracker = ProgressTracker::new(approved, self.config.json_output);
        let backups = Arc::new(BackupManager::new(scanner.root(), &self.config.backup_dir));
        if approved > 0 {
            if self.ctrl_c {
                self.listen_for_ctrl_c();
            }
            self.process_approved(&mut slots, backups.clone(), &tracker)
                .await;
        }

        let mut summary = Summary {
            dry_run: self.config.dry_run,
            ..Default::default()
        };
        let follow_ups = self
            .follow_up_conversions(&scanner, &mut slots, rewrite, &mut summary)
            .await;

        if slots.iter().any(|s| s.outcome.backup.is_some()) {
            summary.backup_root = Some(backups.backup_root().to_path_buf());
        }
        summary.rows = self.build_rows(slots, follow_ups, &tracker);

        let totals = summary.totals();
        if approved > 0 {
            let counts = tracker.finish().await;
            debug!("Workers finished: {:?}", counts);
        }
        let elapsed = start_time.elapsed().as_secs_f64();
        if self.config.json_output {
            JsonMessage::complete(totals, elapsed).emit();
        } else {
            info!("Run finished in {:.1}s", elapsed);
        }

        Ok(summary)
    }

    fn quiet(&self) -> bool {
        self.config.json_output || !std::io::stderr().is_terminal()
    }

    fn emit_start_message(&self, root: &Path, total_assets: usize) {
        if self.config.json_output {
            JsonMessage::start(root.to_path_buf(), total_assets, &self.config).emit();
        } else {
            info!("Scanning {}: {} media asset(s) found", root.display(), total_assets);
            info!(
                "Intensity {}, {} worker(s), backups in {}",
                self.config.intensity, self.config.workers, self.config.backup_dir
            );
            if self.config.dry_run {
                info!("Dry run mode: no files will be modified");
            }
        }
    }

    fn log_analysis(&self, plan: &[CategoryPlan], total: usize) {
        if self.config.json_output {
            JsonMessage::plan(plan.to_vec()).emit();
            return;
        }

        info!("Analysis of {} asset(s):", total);
        for entry in plan.iter().filter(|p| p.files > 0) {
            let ideal = entry
                .ideal_target
                .map(FileManager::format_size)
                .unwrap_or_else(|| "-".to_string());
            let heavy = entry
                .heavy_threshold
                .map(FileManager::format_size)
                .unwrap_or_else(|| "-".to_string());
            info!(
                "  • {}: {} file(s), {} total; {} heavy ({}); heavy >= {}, ideal < {}",
                entry.category,
                entry.files,
                FileManager::format_size(entry.total_size),
                entry.heavy,
                FileManager::format_size(entry.heavy_size),
                heavy,
                ideal
            );
        }
    }

    /// Run-level, GIF format and per-category confirmation
    fn confirm_decisions(&mut self, decisions: &mut [Decision], table: &ThresholdTable) -> Vec<Verdict> {
        let mut verdicts: Vec<Verdict> = decisions
            .iter()
            .map(|d| {
                if is_candidate(d) {
                    Verdict::Settled(settled_status(d))
                } else {
                    Verdict::Unasked(settled_status(d))
                }
            })
            .collect();

        let candidates = decisions.iter().filter(|d| is_candidate(d)).count();
        if candidates == 0 {
            info!("Nothing heavy enough to optimize");
            return verdicts;
        }

        let go_ahead = self.confirmer.confirm_run(candidates).unwrap_or_else(|e| {
            warn!("Confirmation failed, nothing will be changed: {}", e);
            false
        });
        if !go_ahead {
            info!("Run declined, {} heavy asset(s) left untouched", candidates);
            for (verdict, decision) in verdicts.iter_mut().zip(decisions.iter()) {
                if is_candidate(decision) {
                    *verdict = Verdict::Settled(Status::SkippedByUser);
                }
            }
            return verdicts;
        }

        let heavy_gifs: Vec<Decision> = decisions
            .iter()
            .filter(|d| d.reason == Reason::NoFormatChosen)
            .cloned()
            .collect();
        if !heavy_gifs.is_empty() {
            let format = match self.gif_choice {
                GifChoice::Use(format) => Some(format),
                GifChoice::Skip => None,
                GifChoice::Ask => self
                    .confirmer
                    .choose_gif_format(&heavy_gifs)
                    .unwrap_or_else(|e| {
                        warn!("GIF format choice failed, GIFs left untouched: {}", e);
                        None
                    }),
            };
            if let Some(format) = format {
                reclassify_gifs(decisions, table, format);
            }
        }

        for category in Category::ALL {
            let indices: Vec<usize> = (0..decisions.len())
                .filter(|&i| {
                    decisions[i].asset.category == category && decisions[i].action.is_mutating()
                })
                .collect();
            if indices.is_empty() {
                continue;
            }

            let batch: Vec<Decision> = indices.iter().map(|&i| decisions[i].clone()).collect();
            let savings: Vec<u64> = batch
                .iter()
                .filter_map(|d| d.expected_savings(table))
                .collect();
            let request = ConfirmRequest {
                category,
                decisions: &batch,
                expected_savings: (!savings.is_empty()).then(|| savings.iter().sum()),
            };
            let answer = self.confirmer.confirm(&request).unwrap_or_else(|e| {
                warn!("Confirmation failed, skipping {} assets: {}", category, e);
                Answer::Skip
            });
            debug!("{}: {:?}", category, answer);

            for index in indices {
                if let (Answer::Convert(format), Category::Gif) = (answer, category) {
                    decisions[index] = classify(&decisions[index].asset, table, Some(format));
                }
                let decision = &decisions[index];
                verdicts[index] = match answer {
                    Answer::Skip => Verdict::Settled(Status::SkippedByUser),
                    _ if !decision.action.is_mutating() => {
                        Verdict::Settled(settled_status(decision))
                    }
                    _ if self.config.dry_run => Verdict::Settled(Status::DryRun(decision.action)),
                    _ => Verdict::Approved,
                };
            }
        }

        verdicts
    }

    fn ask_rewrite(&mut self, conversions: usize) -> bool {
        self.confirmer
            .confirm_rewrite(conversions)
            .unwrap_or_else(|e| {
                warn!("Confirmation failed, references will not be rewritten: {}", e);
                false
            })
    }

    fn listen_for_ctrl_c(&mut self) {
        let (stop_tx, stop_rx) = broadcast::channel(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, letting in-flight assets finish");
                let _ = stop_tx.send(());
            }
        });
        self.stop = Some(stop_rx);
    }

    fn stop_requested(&mut self) -> bool {
        if self.stopped {
            return true;
        }
        if let Some(stop) = self.stop.as_mut() {
            match stop.try_recv() {
                Ok(()) | Err(TryRecvError::Lagged(_)) => {
                    warn!("Stop requested, no further assets will be started");
                    self.stopped = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {}
            }
        }
        self.stopped
    }

    /// Back up and transform every approved asset, `workers` at a time
    async fn process_approved(
        &mut self,
        slots: &mut [Slot],
        backups: Arc<BackupManager>,
        tracker: &ProgressTracker,
    ) {
        let engine = Arc::new(TransformEngine::new(
            self.encoder.clone(),
            self.config.clone(),
        ));
        let pipeline = Arc::new(AssetPipeline::new(backups, engine));
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = Vec::new();

        for (index, slot) in slots.iter_mut().enumerate() {
            if !slot.is_approved() {
                continue;
            }
            if self.stop_requested() {
                slot.outcome.advance(AssetState::Cancelled);
                continue;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    slot.outcome.advance(AssetState::Cancelled);
                    continue;
                }
            };
            if self.stop_requested() {
                slot.outcome.advance(AssetState::Cancelled);
                continue;
            }

            let pipeline = pipeline.clone();
            let tracker = tracker.clone();
            let pending = slot.outcome.clone();
            let task = tokio::spawn(async move {
                let _permit = permit;
                let outcome = pipeline.run(pending).await;
                match &outcome.transform {
                    Some(result) => tracker.handle_transform(result).await,
                    None => tracker.handle_failure(&outcome.decision.asset.file_name()).await,
                }
                outcome
            });
            tasks.push((index, task));
        }

        let (indices, handles): (Vec<usize>, Vec<_>) = tasks.into_iter().unzip();
        let joined = join_all(handles).await;
        for (index, joined) in indices.into_iter().zip(joined) {
            let slot = &mut slots[index];
            match joined {
                Ok(outcome) => slot.outcome = outcome,
                Err(e) => {
                    let asset = slot.outcome.decision.asset.clone();
                    error!("Worker for {} did not finish: {}", asset.display_path(), e);
                    tracker.handle_failure(&asset.file_name()).await;
                    let reason = if e.is_panic() {
                        "encoder worker panicked"
                    } else {
                        "encoder worker was cancelled"
                    };
                    // How far the lost task got is unknown; the original was
                    // only ever replaced by a finished rename
                    slot.outcome.state = AssetState::FailedTransform;
                    slot.outcome.error = Some(reason.to_string());
                }
            }
        }
    }

    /// Reference rewrites and optional source removal for converted GIFs
    async fn follow_up_conversions(
        &self,
        scanner: &Scanner,
        slots: &mut [Slot],
        rewrite: bool,
        summary: &mut Summary,
    ) -> HashMap<usize, ConversionFollowUp> {
        let mut follow_ups = HashMap::new();
        let converted: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.conversion().is_some())
            .map(|(index, _)| index)
            .collect();
        if converted.is_empty() {
            return follow_ups;
        }

        let text_files: Vec<PathBuf> = scanner
            .text_files(|path| self.config.is_rewrite_candidate(path))
            .collect();
        debug!("{} text file(s) to check for references", text_files.len());
        let rewriter = ReferenceRewriter::new(PathLocks::new());
        let mut updated = BTreeSet::new();

        for index in converted {
            let outcome = &mut slots[index].outcome;
            let Some(result) = outcome.transform.as_ref() else {
                continue;
            };
            let asset = outcome.decision.asset.clone();
            let new_relative = result
                .output_path
                .strip_prefix(scanner.root())
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| result.output_path.clone());

            let report = rewriter
                .rewrite_references(&asset.relative_path, &new_relative, &text_files, rewrite)
                .await;
            let mut follow_up = ConversionFollowUp::default();
            if rewrite {
                follow_up.references_rewritten = report.edits;
                updated.extend(report.files_changed);
                if report.edits > 0 {
                    outcome.advance(AssetState::ReferencesRewritten);
                }
            } else {
                follow_up.references_left = report.edits;
                summary.references_unrewritten += report.edits;
            }

            if self.config.remove_converted_sources && outcome.backup.is_some() {
                match tokio::fs::remove_file(&asset.absolute_path).await {
                    Ok(()) => {
                        info!("Removed {} (kept in backup)", asset.display_path());
                        follow_up.source_removed = true;
                    }
                    Err(e) => warn!("Could not remove {}: {}", asset.display_path(), e),
                }
            }
            follow_ups.insert(index, follow_up);
        }

        summary.text_files_updated = updated.len();
        follow_ups
    }

    fn build_rows(
        &self,
        slots: Vec<Slot>,
        mut follow_ups: HashMap<usize, ConversionFollowUp>,
        tracker: &ProgressTracker,
    ) -> Vec<SummaryRow> {
        let mut rows = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            let asset = &slot.outcome.decision.asset;
            let row = match (slot.settled, slot.outcome.state) {
                (Some(status), _) => SummaryRow::unchanged(asset, status),
                (None, AssetState::AwaitingConfirmation | AssetState::Cancelled) => {
                    SummaryRow::unchanged(asset, Status::Cancelled)
                }
                (None, _) => finished_row(slot.outcome, follow_ups.remove(&index)),
            };
            tracker.emit_row(&row);
            rows.push(row);
        }
        rows
    }
}

/// Assets the user is asked about: everything heavy that could be changed
fn is_candidate(decision: &Decision) -> bool {
    decision.action.is_mutating() || decision.reason == Reason::NoFormatChosen
}

fn settled_status(decision: &Decision) -> Status {
    match (decision.action, decision.reason) {
        (Action::ReportOnly, _) => Status::ReportOnly,
        (_, Reason::BelowHeavyThreshold) => Status::BelowHeavyThreshold,
        (_, Reason::NoFormatChosen) => Status::SkippedByUser,
        _ => Status::AlreadyOptimal,
    }
}

fn reclassify_gifs(decisions: &mut [Decision], table: &ThresholdTable, format: GifFormat) {
    for decision in decisions
        .iter_mut()
        .filter(|d| d.reason == Reason::NoFormatChosen)
    {
        *decision = classify(&decision.asset, table, Some(format));
    }
}

fn finished_row(mut outcome: PipelineOutcome, follow_up: Option<ConversionFollowUp>) -> SummaryRow {
    let asset = outcome.decision.asset.clone();
    match outcome.state {
        AssetState::FailedBackup => {
            return SummaryRow::unchanged(&asset, Status::BackupFailed).with_detail(outcome.error)
        }
        AssetState::FailedTransform => {
            return SummaryRow::unchanged(&asset, Status::TransformFailed)
                .with_detail(outcome.error)
        }
        _ => {}
    }

    outcome.advance(AssetState::Done);
    let Some(result) = outcome.transform else {
        return SummaryRow::unchanged(&asset, Status::TransformFailed);
    };
    match result.outcome {
        TransformOutcome::Compressed => SummaryRow::changed(
            &asset,
            result.before_size,
            result.after_size,
            Status::Compressed,
        ),
        TransformOutcome::AlreadyOptimal => SummaryRow::changed(
            &asset,
            result.before_size,
            result.before_size,
            Status::AlreadyOptimal,
        ),
        TransformOutcome::Converted(format) | TransformOutcome::AlreadyConverted(format) => {
            let follow_up = follow_up.unwrap_or_default();
            SummaryRow::changed(
                &asset,
                result.before_size,
                result.after_size,
                Status::Converted {
                    format,
                    existing: matches!(result.outcome, TransformOutcome::AlreadyConverted(_)),
                    references_rewritten: follow_up.references_rewritten,
                    references_left: follow_up.references_left,
                    source_removed: follow_up.source_removed,
                },
            )
        }
        TransformOutcome::Failed => {
            SummaryRow::unchanged(&asset, Status::TransformFailed).with_detail(result.error)
        }
    }
}

/// Per-category totals and heavy counts shown before confirmation
pub fn build_plan(decisions: &[Decision], table: &ThresholdTable) -> Vec<CategoryPlan> {
    Category::ALL
        .iter()
        .map(|&category| {
            let in_category: Vec<&Decision> = decisions
                .iter()
                .filter(|d| d.asset.category == category)
                .collect();
            let heavy: Vec<&&Decision> = in_category.iter().filter(|d| d.is_heavy()).collect();
            let rule = table.rule(category);
            CategoryPlan {
                category,
                files: in_category.len(),
                total_size: in_category.iter().map(|d| d.asset.size).sum(),
                heavy: heavy.len(),
                heavy_size: heavy.iter().map(|d| d.asset.size).sum(),
                heavy_threshold: rule.map(|r| r.heavy_threshold),
                ideal_target: rule.and_then(|r| r.ideal_target),
            }
        })
        .collect()
}
