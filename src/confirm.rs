//! # Confirmation Channel Module
//!
//! Questo modulo è l'unico punto in cui l'input dell'utente decide se andare
//! avanti. Il coordinator chiede, il canale risponde.
//!
//! ## Implementazioni:
//! - `TerminalConfirmer`: prompt su qualsiasi coppia `BufRead`/`Write` (stdin/stderr nel binario)
//! - `ScriptedConfirmer`: risposte prefissate, usato per `--yes` e nei test

use crate::asset::Category;
use crate::classifier::{Decision, GifFormat};
use crate::file_manager::FileManager;
use anyhow::Result;
use std::collections::VecDeque;
use std::io::{BufRead, Write};

/// Answer to a batch confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Proceed,
    Skip,
    /// Only meaningful for GIFs
    Convert(GifFormat),
}

/// One category's worth of pending mutating decisions
#[derive(Debug, Clone)]
pub struct ConfirmRequest<'a> {
    pub category: Category,
    pub decisions: &'a [Decision],
    pub expected_savings: Option<u64>,
}

impl ConfirmRequest<'_> {
    pub fn total_size(&self) -> u64 {
        self.decisions.iter().map(|d| d.asset.size).sum()
    }
}

pub trait ConfirmationChannel: Send {
    /// Go ahead with the run at all, after the analysis was shown
    fn confirm_run(&mut self, heavy_assets: usize) -> Result<bool>;

    /// Container for heavy GIFs; `None` leaves them untouched
    fn choose_gif_format(&mut self, heavy_gifs: &[Decision]) -> Result<Option<GifFormat>>;

    /// Batch confirmation for one category
    fn confirm(&mut self, request: &ConfirmRequest<'_>) -> Result<Answer>;

    /// Rewrite references to converted files in markup, scripts and styles
    fn confirm_rewrite(&mut self, conversions: usize) -> Result<bool>;
}

/// Interactive prompts over a reader/writer pair
pub struct TerminalConfirmer<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> TerminalConfirmer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{} ", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        // EOF reads as an empty answer, i.e. the default
        self.input.read_line(&mut line)?;
        Ok(line.trim().to_ascii_lowercase())
    }

    fn yes_no(&mut self, prompt: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            match self.ask(&format!("{} {}", prompt, hint))?.as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.output, "Please answer y or n.")?,
            }
        }
    }
}

impl<R: BufRead + Send, W: Write + Send> ConfirmationChannel for TerminalConfirmer<R, W> {
    fn confirm_run(&mut self, heavy_assets: usize) -> Result<bool> {
        self.yes_no(
            &format!("{} heavy asset(s) found. Continue?", heavy_assets),
            true,
        )
    }

    fn choose_gif_format(&mut self, heavy_gifs: &[Decision]) -> Result<Option<GifFormat>> {
        let total: u64 = heavy_gifs.iter().map(|d| d.asset.size).sum();
        writeln!(
            self.output,
            "{} heavy GIF(s), {} in total:",
            heavy_gifs.len(),
            FileManager::format_size(total)
        )?;
        for decision in heavy_gifs {
            writeln!(
                self.output,
                "  {} ({})",
                decision.asset.display_path(),
                FileManager::format_size(decision.asset.size)
            )?;
        }
        loop {
            match self.ask("Convert them to [m]p4, [w]ebm, or [s]kip?")?.as_str() {
                "m" | "mp4" => return Ok(Some(GifFormat::Mp4)),
                "w" | "webm" => return Ok(Some(GifFormat::WebM)),
                "" | "s" | "skip" => return Ok(None),
                _ => writeln!(self.output, "Please answer m, w or s.")?,
            }
        }
    }

    fn confirm(&mut self, request: &ConfirmRequest<'_>) -> Result<Answer> {
        writeln!(
            self.output,
            "\n{} heavy {} file(s), {} in total:",
            request.decisions.len(),
            request.category,
            FileManager::format_size(request.total_size())
        )?;
        for decision in request.decisions {
            writeln!(
                self.output,
                "  {} ({})",
                decision.asset.display_path(),
                FileManager::format_size(decision.asset.size)
            )?;
        }
        if let Some(savings) = request.expected_savings {
            writeln!(
                self.output,
                "Expected savings: up to {}",
                FileManager::format_size(savings)
            )?;
        }

        let verb = match request.decisions.first().map(|d| d.action.conversion_target()) {
            Some(Some(format)) => format!("Convert to {}?", format.extension()),
            _ => "Compress?".to_string(),
        };
        if self.yes_no(&verb, true)? {
            Ok(Answer::Proceed)
        } else {
            Ok(Answer::Skip)
        }
    }

    fn confirm_rewrite(&mut self, conversions: usize) -> Result<bool> {
        self.yes_no(
            &format!(
                "Update references to the {} converted file(s) in HTML/JS/CSS?",
                conversions
            ),
            true,
        )
    }
}

/// Pre-recorded answers. Once a queue runs dry the fallback applies.
#[derive(Debug, Clone)]
pub struct ScriptedConfirmer {
    pub run: bool,
    pub gif_format: Option<GifFormat>,
    pub answers: VecDeque<Answer>,
    pub fallback: Answer,
    pub rewrite: bool,
    /// Categories asked about, in order
    pub asked: Vec<Category>,
}

impl ScriptedConfirmer {
    /// Says yes to everything
    pub fn accept_all(gif_format: Option<GifFormat>, rewrite: bool) -> Self {
        Self {
            run: true,
            gif_format,
            answers: VecDeque::new(),
            fallback: Answer::Proceed,
            rewrite,
            asked: Vec::new(),
        }
    }

    /// Declines the whole run
    pub fn decline_run() -> Self {
        Self {
            run: false,
            ..Self::accept_all(None, false)
        }
    }

    pub fn with_answers(mut self, answers: impl IntoIterator<Item = Answer>) -> Self {
        self.answers = answers.into_iter().collect();
        self
    }
}

impl ConfirmationChannel for ScriptedConfirmer {
    fn confirm_run(&mut self, _heavy_assets: usize) -> Result<bool> {
        Ok(self.run)
    }

    fn choose_gif_format(&mut self, _heavy_gifs: &[Decision]) -> Result<Option<GifFormat>> {
        Ok(self.gif_format)
    }

    fn confirm(&mut self, request: &ConfirmRequest<'_>) -> Result<Answer> {
        self.asked.push(request.category);
        Ok(self.answers.pop_front().unwrap_or(self.fallback))
    }

    fn confirm_rewrite(&mut self, _conversions: usize) -> Result<bool> {
        Ok(self.rewrite)
    }
}
