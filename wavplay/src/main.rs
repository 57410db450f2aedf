//! wavplay - play or inspect PCM WAV files
//!
//! `wavplay info <FILE>` prints the decoded header.
//! `wavplay play <FILE>` streams the file to the output device and exits when
//! playback ends or on Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use wavplay::audio::backend::{CpalDevice, SimulatedDevice};
use wavplay::audio::BackendFactory;
use wavplay::{EventBus, PlaybackSession, PlayerConfig, ValidationMode};

/// How often the play loop checks whether the session is still playing
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "wavplay")]
#[command(about = "Stream PCM WAV files to an audio output device")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
struct Cli {
    /// Config file (overrides WAVPLAY_CONFIG and the per-user file)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Fail on malformed headers instead of warning
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the RIFF/WAVE header of a file
    Info {
        file: PathBuf,
    },
    /// Play a file
    Play(PlayArgs),
    /// List output devices
    Devices,
}

#[derive(Args, Debug)]
struct PlayArgs {
    file: PathBuf,

    /// Render into memory at real-time pace instead of a device
    #[arg(long)]
    null_output: bool,

    /// Output device name
    #[arg(short, long, env = "WAVPLAY_DEVICE")]
    device: Option<String>,

    /// Bytes per read/write iteration
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Wait after the last write before stopping, in milliseconds
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Stop once the header's duration has been rendered
    #[arg(long)]
    single_shot: bool,

    /// Print playback events as JSON lines on stdout
    #[arg(long)]
    json: bool,
}

/// Swaps the log filter once the config file has been read
type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Registry with a reloadable filter and a fmt layer writing to `writer`
fn build_subscriber<W>(
    filter: EnvFilter,
    writer: W,
) -> (impl Subscriber + Send + Sync + 'static, FilterHandle)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer));
    (subscriber, handle)
}

fn apply_log_level(handle: &FilterHandle, level: &str) {
    if let Err(e) = handle.reload(EnvFilter::new(level)) {
        warn!("Failed to apply log level '{}': {}", level, e);
    }
}

/// CLI flags take priority over file values
fn apply_overrides(config: &mut PlayerConfig, cli: &Cli) {
    if cli.strict {
        config.validation = ValidationMode::Strict;
    }
    if let Command::Play(args) = &cli.command {
        if let Some(chunk) = args.chunk_size {
            config.chunk_size_bytes = chunk;
        }
        if let Some(grace) = args.grace_ms {
            config.grace_period_ms = grace;
        }
        if args.device.is_some() {
            config.device = args.device.clone();
        }
        if args.single_shot {
            config.single_shot_period = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise log at info until the config names a level
    let env_filter = EnvFilter::try_from_default_env();
    let level_from_env = env_filter.is_ok();
    let (subscriber, log_filter) = build_subscriber(
        env_filter.unwrap_or_else(|_| EnvFilter::new("info")),
        std::io::stderr,
    );
    subscriber.init();

    info!(
        "wavplay v{} [{}] built {}",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let mut config =
        PlayerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli);
    config.validate().context("Invalid configuration")?;
    if !level_from_env {
        apply_log_level(&log_filter, &config.logging.level);
    }

    match &cli.command {
        Command::Info { file } => {
            let header = wavplay::decode_header_with(file, config.validation)
                .with_context(|| format!("Failed to decode {}", file.display()))?;
            println!("{}", header);
            Ok(())
        }
        Command::Devices => {
            for name in CpalDevice::list_devices().context("Failed to list devices")? {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Play(args) => play(config, args).await,
    }
}

async fn play(config: PlayerConfig, args: &PlayArgs) -> Result<()> {
    let backend: Arc<dyn BackendFactory> = if args.null_output {
        info!("Using null output");
        Arc::new(SimulatedDevice::default().realtime())
    } else {
        Arc::new(CpalDevice::new(config.device.clone()))
    };

    let events = EventBus::default();
    let printer = args.json.then(|| {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!("Failed to serialize event: {}", e),
                    },
                    Err(RecvError::Lagged(missed)) => warn!("Dropped {} events", missed),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let mut session = PlaybackSession::new(config, backend, events.clone())
        .context("Failed to create playback session")?;
    session
        .start_playback(&args.file)
        .with_context(|| format!("Failed to start playback of {}", args.file.display()))?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(STATUS_POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                session.stop_playback();
                break;
            }
            _ = ticker.tick() => {
                if !session.is_playing() {
                    break;
                }
            }
        }
    }

    info!(
        "Finished {} ({} b written)",
        args.file.display(),
        session.bytes_written()
    );
    session.release();
    drop(session);
    drop(events);

    if let Some(printer) = printer {
        printer.await.context("Event printer failed")?;
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping playback");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping playback");
        },
    }
}
