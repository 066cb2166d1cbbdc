//! Rewind CLI - drive the replay pipeline from the command line

mod script;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rewind_core::prelude::*;

use crate::script::Step;

#[derive(Parser)]
#[command(name = "rewind")]
#[command(about = "Session replay capture and flush pipeline CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; defaults to rewind.toml plus REWIND_ variables
    #[arg(short, long, global = true, env = "REWIND_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a script of recorder events and signals through an engine
    Simulate {
        /// Script with one JSON step per line
        script: PathBuf,

        /// File receiving one JSON line per sent envelope
        #[arg(short, long, default_value = "envelopes.jsonl")]
        out: PathBuf,

        /// Force a recording mode instead of sampling
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,

        /// URL reported as the replay's starting page
        #[arg(long, default_value = "https://localhost/")]
        url: String,
    },
    /// Print the effective configuration as JSON
    Config,
    /// Version information
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Buffered,
    Continuous,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("rewind {}", env!("CARGO_PKG_VERSION"));
            println!("rewind-core {}", rewind_core::VERSION);
        }
        Commands::Config => {
            let config = load_config(cli.config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Simulate {
            script,
            out,
            mode,
            url,
        } => {
            let config = load_config(cli.config.as_ref())?;
            simulate(config, &script, out, mode, url).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<RewindConfig> {
    let config = match path {
        Some(path) => RewindConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RewindConfig::load()?,
    };
    Ok(config)
}

async fn simulate(
    config: RewindConfig,
    script: &Path,
    out: PathBuf,
    mode: Option<ModeArg>,
    url: String,
) -> Result<()> {
    let source = tokio::fs::read_to_string(script)
        .await
        .with_context(|| format!("failed to read {}", script.display()))?;
    let steps = script::parse(&source)?;

    let clock = default_clock();
    let recorder = Arc::new(ManualRecorder::new(clock.clone()));
    let engine = ReplayEngine::builder(config)
        .clock(clock.clone())
        .recorder(recorder.clone())
        .transport(Arc::new(FileTransport::new(&out)))
        .initial_url(url)
        .build()?;

    match mode {
        Some(ModeArg::Buffered) => engine.start_buffering()?,
        Some(ModeArg::Continuous) => engine.start()?,
        None => engine.initialize_sampling(),
    }
    if !engine.is_enabled() {
        tracing::info!("Session not sampled; nothing will be recorded");
    }

    for step in steps {
        tracing::debug!(?step, "Running step");
        match step {
            Step::Emit {
                kind,
                timestamp,
                data,
                checkout,
            } => {
                let timestamp = timestamp.unwrap_or_else(|| clock.now_ms());
                let event = RecordingEvent::new(kind, timestamp, data);
                recorder.emit(event, checkout);
            }
            Step::Breadcrumb { category, message } => {
                let mut crumb = Breadcrumb::new(category, clock.now_ms());
                if let Some(message) = message {
                    crumb = crumb.with_message(message);
                }
                engine.hooks().dispatch(&Signal::Breadcrumb(crumb));
            }
            Step::Error { event_id, message } => {
                let event = engine.process_event(CapturedEvent::error(event_id, message));
                tracing::info!(tags = ?event.tags, "Processed error event");
            }
            Step::Mutations { count } => {
                if !recorder.mutate(count) {
                    tracing::info!(count, "Mutation batch dropped");
                }
            }
            Step::Visibility { state } => {
                engine.hooks().dispatch(&Signal::Visibility(state));
            }
            Step::SleepMs { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
            Step::Flush => engine.flush_immediate().await,
        }
    }

    // Buffered replays without an error are discarded
    engine.wait_for_conversion().await;
    let mode = engine.recording_mode();
    if mode == RecordingMode::Continuous {
        engine.flush_immediate().await;
    }
    let session = engine.session();
    engine.stop(false).await;

    match session {
        Some(session) => println!(
            "replay {} ({:?}): {} segment(s) written to {}",
            session.id,
            mode,
            session.segment_id,
            out.display()
        ),
        None => println!("no replay recorded"),
    }
    Ok(())
}
