//! # Site Media Optimizer - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del logging con `tracing` su stderr
//! - Configurazione: file, poi override dai flag
//! - Ctrl-C ferma la run solo dopo che i prompt hanno avuto risposta
//! - Stampa della tabella finale e scrittura del report JSON
//!
//! ## Esempio di utilizzo:
//! ```bash
//! site-media-optimizer ./my-site --intensity 4 --gif-format webm --report report.json
//! ```

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use site_media_optimizer::{
    json_output::JsonMessage, platform::PlatformCommands, Config, ConfirmationChannel, GifChoice,
    GifFormat, OptimizeResult, RunCoordinator, ScriptedConfirmer, Summary, TerminalConfirmer,
    ToolEncoder,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GifFormatArg {
    Mp4,
    Webm,
    Skip,
}

#[derive(Parser)]
#[command(name = "site-media-optimizer")]
#[command(about = "Find heavy media in a website project, back it up and shrink it")]
struct Args {
    /// Project root to scan
    root: PathBuf,

    /// Config file (default: <root>/.site-media-optimizer.json, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Compression intensity, 1 (gentlest) to 5 (strongest)
    #[arg(short, long)]
    intensity: Option<u8>,

    /// Number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Classify and confirm, but don't change anything
    #[arg(long)]
    dry_run: bool,

    /// Backup directory name under the project root
    #[arg(long)]
    backup_dir: Option<String>,

    /// Extra directory name to skip (repeatable)
    #[arg(long = "exclude", value_name = "DIR")]
    exclude: Vec<String>,

    /// Newline-delimited JSON events on stdout instead of the table
    #[arg(long)]
    json: bool,

    /// Write the final summary as JSON to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Answer yes to every prompt
    #[arg(short, long)]
    yes: bool,

    /// Container for heavy GIFs (asked interactively when omitted)
    #[arg(long, value_enum)]
    gif_format: Option<GifFormatArg>,

    /// With --yes, also rewrite references to converted files
    #[arg(long)]
    rewrite_refs: bool,

    /// Delete converted GIFs from the project (they stay in the backup tree)
    #[arg(long)]
    remove_converted: bool,

    /// Write the effective configuration to this file and exit
    #[arg(long, value_name = "FILE")]
    write_config: Option<PathBuf>,

    /// List the external encoders found on this system and exit
    #[arg(long)]
    tools: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if args.tools {
        println!("System: {}", PlatformCommands::system_info());
        print!("{}", ToolEncoder::tools_report());
        return Ok(());
    }

    let config = load_config(&args).await?;

    if let Some(path) = &args.write_config {
        config.save_to_file(path).await?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    debug!("{}", ToolEncoder::tools_report());
    if let Err(e) = ToolEncoder::check_video_support() {
        warn!("{}; videos and GIFs will fail to transform", e);
    }

    let encoder = Arc::new(ToolEncoder::new(Duration::from_secs(
        config.encode_timeout_secs,
    )));
    let gif_choice = match args.gif_format {
        Some(GifFormatArg::Skip) => Some(GifChoice::Skip),
        _ => None,
    };
    let json_output = config.json_output;

    let result = if args.yes {
        let confirmer = ScriptedConfirmer::accept_all(config.default_gif_format, args.rewrite_refs);
        execute(
            RunCoordinator::new(config, encoder, confirmer),
            gif_choice,
            &args.root,
        )
        .await
    } else {
        let confirmer = TerminalConfirmer::new(BufReader::new(std::io::stdin()), std::io::stderr());
        execute(
            RunCoordinator::new(config, encoder, confirmer),
            gif_choice,
            &args.root,
        )
        .await
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            if json_output {
                let details = e
                    .is_run_fatal()
                    .then(|| "nothing was changed".to_string());
                JsonMessage::error(e.to_string(), details).emit();
            }
            return Err(e.into());
        }
    };

    if !json_output {
        println!("{}", summary.render_table());
    }

    if let Some(path) = &args.report {
        tokio::fs::write(path, summary.to_report_json()?).await?;
        info!("Report written to {}", path.display());
    }

    Ok(())
}

async fn execute<C: ConfirmationChannel>(
    coordinator: RunCoordinator<C>,
    gif_choice: Option<GifChoice>,
    root: &Path,
) -> OptimizeResult<Summary> {
    let mut coordinator = coordinator.with_ctrl_c();
    if let Some(choice) = gif_choice {
        coordinator = coordinator.with_gif_choice(choice);
    }
    coordinator.run(root).await
}

/// Config file first, then command line overrides
async fn load_config(args: &Args) -> Result<Config> {
    let path = match &args.config {
        Some(path) if !path.exists() => {
            return Err(anyhow::anyhow!("Config file does not exist: {}", path.display()));
        }
        Some(path) => Some(path.clone()),
        None => Config::discover(&args.root),
    };

    let mut config = match path {
        Some(path) => {
            info!("Using configuration from {}", path.display());
            Config::from_file(&path).await?
        }
        None => Config::default(),
    };

    if let Some(intensity) = args.intensity {
        config.intensity = intensity;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(backup_dir) = &args.backup_dir {
        config.backup_dir = backup_dir.clone();
    }
    config.excluded_dirs.extend(args.exclude.iter().cloned());
    config.dry_run |= args.dry_run;
    config.json_output |= args.json;
    config.remove_converted_sources |= args.remove_converted;
    match args.gif_format {
        Some(GifFormatArg::Mp4) => config.default_gif_format = Some(GifFormat::Mp4),
        Some(GifFormatArg::Webm) => config.default_gif_format = Some(GifFormat::WebM),
        Some(GifFormatArg::Skip) => config.default_gif_format = None,
        None => {}
    }

    config.validate()?;
    Ok(config)
}
