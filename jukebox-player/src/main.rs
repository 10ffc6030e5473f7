//! Jukebox Player (jukebox-player) - Main entry point
//!
//! Console front end for the playback pipeline: reads chat-style commands from
//! stdin for a single console session and prints replies and status lines.
//! Playback is simulated by the timed transport.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use jukebox_common::config::{resolve_cache_dir, TomlConfig};
use jukebox_common::SessionId;
use jukebox_player::commands::{CommandDispatcher, DispatcherConfig, IncomingMessage};
use jukebox_player::playback::{PlaybackTransport, TimedTransport};
use jukebox_player::resolver::YtDlpResolver;
use jukebox_player::status::ConsoleStatusReporter;
use jukebox_player::{ChannelTarget, Recycler, SessionConfig, SessionRegistry, Upload};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Session driven by the console
const CONSOLE_SESSION: SessionId = SessionId(0);

/// Channel the console user is considered to be in
const CONSOLE_CHANNEL: &str = "console";

/// Command-line arguments for jukebox-player
#[derive(Parser, Debug)]
#[command(name = "jukebox-player")]
#[command(about = "Per-session media playback pipeline with a console front end")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "JUKEBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Folder where media files are materialized
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Seconds to wait on an empty queue before leaving the channel
    #[arg(long, env = "JUKEBOX_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: Option<u64>,

    /// Seconds each track plays for on the timed transport
    #[arg(long, default_value = "30")]
    track_seconds: u64,

    /// Log level, overrides the config file (RUST_LOG takes precedence)
    #[arg(long)]
    log_level: Option<String>,

    /// Print session events as JSON lines
    #[arg(long)]
    print_events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(secs) = args.idle_timeout_secs {
        config.idle_timeout_secs = secs;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config)?;

    let cache_dir = resolve_cache_dir(args.cache_dir.as_deref(), &config);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("Failed to create cache folder {}", cache_dir.display()))?;

    info!("Starting jukebox player");
    info!("Cache folder: {}", cache_dir.display());
    info!(
        idle_timeout_secs = config.idle_timeout_secs,
        reap_interval_secs = config.reap_interval_secs,
        resolve_parallelism = config.resolve_parallelism,
        "Configuration loaded"
    );

    let recycler = Arc::new(Recycler::new());
    let reaper = recycler.spawn_reaper(config.reap_interval());

    let resolver = Arc::new(YtDlpResolver::new(
        config.resolver.ytdlp_binary.clone(),
        cache_dir.clone(),
    ));
    let track_length = Duration::from_secs(args.track_seconds);
    let registry = Arc::new(SessionRegistry::new(
        Arc::clone(&recycler),
        resolver,
        move |_: SessionId| -> Arc<dyn PlaybackTransport> { Arc::new(TimedTransport::new(track_length)) },
        Arc::new(ConsoleStatusReporter::new()),
        SessionConfig::from(&config),
    ));
    let dispatcher = CommandDispatcher::new(Arc::clone(&registry), DispatcherConfig::from(&config));

    if args.print_events {
        spawn_event_printer(&registry).await;
    }

    let input = spawn_stdin_reader().context("Failed to start console reader")?;
    println!("Type {}help for commands.", config.command_prefix);

    tokio::select! {
        _ = console_loop(&dispatcher, &config.command_prefix, input) => {
            info!("Console closed, shutting down");
        }
        _ = shutdown_signal() => {}
    }

    registry.shutdown().await;
    reaper.abort();
    let report = recycler.reap();
    info!(reaped = report.reaped.len(), failures = report.failures.len(), "Final sweep complete");

    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing from the logging configuration
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jukebox_player={0},jukebox_common={0}", config.logging.level)));

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// Print every event of the console session as a JSON line
async fn spawn_event_printer(registry: &SessionRegistry) {
    let mut events = registry.get_or_create(CONSOLE_SESSION).await.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("{}", json),
                    Err(e) => warn!(error = %e, "Failed to serialize event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Read stdin lines on a detached thread
///
/// Blocking reads cannot be cancelled; the thread is never joined.
fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("console-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Dispatch console lines until stdin closes
async fn console_loop(dispatcher: &CommandDispatcher, prefix: &str, mut input: mpsc::Receiver<String>) {
    let play = format!("{}play", prefix);

    while let Some(line) = input.recv().await {
        let message = console_message(&line, &play);
        debug!(content = %message.content, attachments = message.attachments.len(), "Console input");

        if let Some(reply) = dispatcher.dispatch(message).await {
            println!("{}", reply);
        }
    }
}

/// Turn a console line into a message; `play <existing file>` becomes an upload
fn console_message(line: &str, play: &str) -> IncomingMessage {
    let channel = Some(ChannelTarget::new(CONSOLE_CHANNEL));
    let line = line.trim();

    if let Some(arg) = line.strip_prefix(play).map(str::trim) {
        let path = Path::new(arg);
        if !arg.is_empty() && path.is_file() {
            if let Some(upload) = Upload::from_path(path) {
                return IncomingMessage::new(CONSOLE_SESSION, channel, play).with_attachments(vec![upload]);
            }
        }
    }
    IncomingMessage::new(CONSOLE_SESSION, channel, line)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
