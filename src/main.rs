use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{debug, error, info, warn};

use aimacro::config::{self as cfg, Config};
use aimacro::document::{MacroDocument, SharedMacro};
use aimacro::engine::{
    Clock, Collaborators, Engine, EnigoInjector, ImageFileScreen, LogNotifier, NoScreen, Notifier, PushoverNotifier,
    RunFlag, RunLoop, RunOutcome, ScreenCapture, SystemClock, UnavailableVision, VariableStore, VirtualClock,
};
use aimacro::events::{Event, parse_line};

/// aimacro CLI
#[derive(Debug, Parser)]
#[command(
    name = aimacro::PKG_NAME,
    version = aimacro::PKG_VERSION,
    about = "Replay a recorded macro: input events, vision queries, pattern searches and branches"
)]
struct Args {
    /// Path to the macro document (JSON, as saved by the editor)
    #[arg(short = 'm', long = "macro", required_unless_present = "print_schema")]
    macro_path: Option<PathBuf>,

    /// Path to the JSON configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Number of passes over the macro (defaults to engine.default_repeat)
    #[arg(short = 'r', long = "repeat")]
    repeat: Option<u32>,

    /// Enable dry-run mode (log input instead of simulating it, and skip real delays)
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Recompute the checkpoint table from the Checkpoint lines before running
    #[arg(long = "rebuild-checkpoints")]
    rebuild_checkpoints: bool,

    /// Image file standing in for the screen (pattern and vision events capture from it)
    #[arg(long = "screen")]
    screen: Option<PathBuf>,

    /// Write the macro back here after the run (keeps scene-change updates and variables)
    #[arg(long = "save")]
    save: Option<PathBuf>,

    /// Parse every line, report malformed or unrecognized ones, and exit
    #[arg(long = "check")]
    check: bool,

    /// Set log level (e.g., trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Print the JSON Schema for the configuration and exit
    #[arg(long = "print-schema")]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_schema {
        let schema = cfg::generate_schema();
        let json = serde_json::to_string_pretty(&schema)?;
        println!("{json}");
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => cfg::load_from_path_async(path).await?,
        None => Config::default(),
    };

    // --log-level wins over RUST_LOG, which wins over the config's verbose flag.
    match &args.log_level {
        Some(level) => {
            aimacro::init_tracing_at(aimacro::parse_level(level).unwrap_or(tracing::Level::INFO))
        }
        None if config.verbose => aimacro::init_tracing_with_default(tracing::Level::DEBUG),
        None => aimacro::init_tracing(),
    }

    let Some(macro_path) = args.macro_path.clone() else {
        bail!("--macro is required");
    };
    info!(
        version = aimacro::PKG_VERSION,
        macro_file = %macro_path.display(),
        dry_run = args.dry_run,
        "Starting aimacro"
    );

    let mut doc = MacroDocument::load_async(&macro_path).await?;
    if args.rebuild_checkpoints {
        doc.rebuild_checkpoints();
        debug!(target: "aimacro", checkpoints = ?doc.checkpoints, "Rebuilt checkpoints");
    } else {
        let stale = doc.stale_checkpoints();
        if !stale.is_empty() {
            warn!(
                target: "aimacro",
                ?stale,
                "Stored checkpoints do not match the macro lines; consider --rebuild-checkpoints"
            );
        }
    }

    if args.check {
        return check(&doc);
    }

    let screen = select_screen(args.screen.as_deref(), args.dry_run)?;
    let mut notifications = config.notifications.clone();
    notifications.extend(doc.notifications.clone());

    let shared = Arc::new(SharedMacro::from_document(&doc));
    let variables = VariableStore::from_map(doc.variables.clone());
    let flag = RunFlag::new();
    let repeat = args.repeat.unwrap_or(config.engine.default_repeat);
    let options = config.engine.options();
    let dry_run = args.dry_run;

    let mut handle = {
        let shared = shared.clone();
        let variables = variables.clone();
        let flag = flag.clone();
        tokio::task::spawn_blocking(move || {
            let clock: Arc<dyn Clock> = if dry_run {
                Arc::new(VirtualClock::starting_now())
            } else {
                Arc::new(SystemClock::new())
            };
            let notifier: Box<dyn Notifier> = if dry_run {
                Box::new(LogNotifier::new(notifications))
            } else {
                Box::new(PushoverNotifier::new(notifications)?)
            };
            let collaborators = Collaborators {
                input: Box::new(EnigoInjector::new(dry_run)),
                screen,
                vision: Box::new(UnavailableVision),
                notifier,
            };
            let engine = Engine::new(shared, variables, collaborators)
                .with_clock(clock)
                .with_flag(flag)
                .with_options(options);
            anyhow::Ok(RunLoop::new(engine, repeat).run())
        })
    };

    let summary = tokio::select! {
        joined = &mut handle => joined.context("Macro worker panicked")??,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping macro");
            flag.stop();
            handle.await.context("Macro worker panicked")??
        }
    };

    match summary.outcome {
        RunOutcome::Completed => info!(
            dispatches = summary.dispatches,
            passes = summary.passes,
            "Macro completed"
        ),
        RunOutcome::Stopped => warn!(
            dispatches = summary.dispatches,
            passes = summary.passes,
            line = summary.last.index,
            "Macro stopped"
        ),
    }

    if let Some(path) = &args.save {
        shared.store_into(&mut doc);
        doc.variables = variables.snapshot();
        doc.save_async(path).await?;
    }

    info!("aimacro exited");
    Ok(())
}

/// `--screen` wins; otherwise the live primary monitor when built with
/// `live-capture` and not dry-running.
fn select_screen(path: Option<&Path>, dry_run: bool) -> anyhow::Result<Box<dyn ScreenCapture + Send>> {
    if let Some(path) = path {
        return Ok(Box::new(ImageFileScreen::open(path)?));
    }
    if !dry_run {
        if let Some(screen) = live_screen() {
            info!("Capturing the primary monitor");
            return Ok(screen);
        }
    }
    debug!(dry_run, "No screen source, pattern and vision events will stop the run");
    Ok(Box::new(NoScreen))
}

#[cfg(feature = "live-capture")]
fn live_screen() -> Option<Box<dyn ScreenCapture + Send>> {
    Some(Box::new(aimacro::engine::XcapScreen::new()))
}

#[cfg(not(feature = "live-capture"))]
fn live_screen() -> Option<Box<dyn ScreenCapture + Send>> {
    None
}

/// Report lines that would be skipped at run time.
fn check(doc: &MacroDocument) -> anyhow::Result<()> {
    let mut malformed = 0;
    for (index, line) in doc.events.iter().enumerate() {
        match parse_line(line) {
            Ok(parsed) => match parsed.event {
                Event::Unrecognized(raw) => warn!(line = index, event = %raw, "Unrecognized event"),
                event => debug!(line = index, kind = event.kind(), "ok"),
            },
            Err(err) => {
                malformed += 1;
                error!(line = index, error = %err, "Malformed event");
            }
        }
    }
    if malformed > 0 {
        bail!("{malformed} of {} lines are malformed", doc.events.len());
    }
    info!(lines = doc.events.len(), "All lines parse");
    Ok(())
}
