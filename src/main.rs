//! overlay-recorder command line

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use overlay_recorder::eventlog::codec;
use overlay_recorder::processing::stack_events;
use overlay_recorder::recorder::encoder::DEFAULT_FPS;
use overlay_recorder::recorder::{FfmpegSink, SUMMARY_FILE};
use overlay_recorder::{
    init_tracing, MalformedPolicy, OverlayExporter, RecordingConfig, RecordingCoordinator,
    RecordingSummary, SharedTheme, ThemeConfig, WindowHandle,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "overlay-recorder")]
#[command(about = "Record a window together with its keyboard and mouse input")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the load report and input groups of an event log
    Inspect {
        /// Event log (.tsv)
        log: PathBuf,

        /// Fail on the first malformed record instead of skipping it
        #[arg(long)]
        abort: bool,

        /// Theme JSON providing the stacking settings
        #[arg(long)]
        theme: Option<PathBuf>,
    },

    /// Record a window until Ctrl+C
    Record {
        /// Window handle, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_window_handle)]
        window: WindowHandle,

        /// Directory the session folder is created in
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        #[arg(long)]
        fps: Option<u32>,

        /// Make exports of this session fail on malformed event log records
        #[arg(long)]
        strict: bool,
    },

    /// Composite the input overlay onto a recorded session
    Export {
        /// Session folder written by `record`
        session: PathBuf,

        /// Recording number inside the session
        #[arg(long, default_value_t = 0)]
        index: usize,

        /// Overlay theme JSON
        #[arg(long)]
        theme: Option<PathBuf>,

        /// Directory for the exported video; defaults to the session folder
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_FPS)]
        fps: u32,
    },
}

fn parse_window_handle(s: &str) -> Result<WindowHandle, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed
        .map(WindowHandle)
        .map_err(|e| format!("invalid window handle {s:?}: {e}"))
}

fn load_theme(path: Option<&Path>) -> Result<ThemeConfig> {
    match path {
        Some(path) => ThemeConfig::load(path)
            .with_context(|| format!("failed to load theme {}", path.display())),
        None => Ok(ThemeConfig::default()),
    }
}

fn inspect(log: PathBuf, abort: bool, theme: Option<PathBuf>) -> Result<()> {
    let policy = if abort {
        MalformedPolicy::Abort
    } else {
        MalformedPolicy::Skip
    };
    let theme = load_theme(theme.as_deref())?;

    let report = codec::read_file(&log, policy)
        .with_context(|| format!("failed to read event log {}", log.display()))?;

    println!("events:    {}", report.log.len());
    println!("duration:  {}ms", report.log.duration());
    println!("skipped:   {}", report.skipped_count());
    println!("reordered: {}", report.reordered);
    for skipped in &report.skipped {
        println!("  {}", skipped);
    }

    let groups = stack_events(&report.log, &theme.stacking);
    println!("groups:    {}", groups.len());
    for group in &groups {
        println!("{}\t{}", group.first, group.label());
    }
    Ok(())
}

async fn record(window: WindowHandle, output: PathBuf, fps: Option<u32>, strict: bool) -> Result<()> {
    let mut config = RecordingConfig::new(window, output);
    if let Some(fps) = fps {
        config.fps = fps;
    }
    if strict {
        config.malformed_policy = MalformedPolicy::Abort;
    }

    let mut coordinator = RecordingCoordinator::new();
    coordinator
        .start(config)
        .await
        .context("failed to start recording")?;
    println!("Recording window {window}; press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    let summary = coordinator.stop().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn export(
    session: PathBuf,
    index: usize,
    theme: Option<PathBuf>,
    output: Option<PathBuf>,
    fps: u32,
) -> Result<()> {
    let summary_path = session.join(SUMMARY_FILE);
    let summary: RecordingSummary = serde_json::from_str(
        &std::fs::read_to_string(&summary_path)
            .with_context(|| format!("failed to read {}", summary_path.display()))?,
    )
    .with_context(|| format!("invalid session summary {}", summary_path.display()))?;

    let theme = SharedTheme::new(load_theme(theme.as_deref())?);
    let mut exporter = OverlayExporter::for_session(&summary, theme);
    let output = output.unwrap_or_else(|| session.clone());
    let mut sink = FfmpegSink::new(&output, format!("export-{index}"), fps)?;

    let report = exporter
        .export_session(&session, index, &mut sink)
        .with_context(|| format!("failed to export {}", session.display()))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Inspect { log, abort, theme } => inspect(log, abort, theme),
        Command::Record {
            window,
            output,
            fps,
            strict,
        } => {
            if fps == Some(0) {
                bail!("--fps must be at least 1");
            }
            record(window, output, fps, strict).await
        }
        Command::Export {
            session,
            index,
            theme,
            output,
            fps,
        } => {
            if fps == 0 {
                bail!("--fps must be at least 1");
            }
            export(session, index, theme, output, fps)
        }
    }
}
