//! Trapline - Main Application Entry Point
//!
//! Receives SNMP traps, filters them and turns them into normalised events.

use anyhow::{Context, Result};
use clap::{Arg, Command};
use futures_util::stream::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use trapline::relay_queue;
use trapline::{
    AppState, BlockList, Config, EventStore, SnmpListener, StatusServer, TrapIngestor,
    TrapProcessor,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("trapline")
        .version(VERSION)
        .about("Trapline receives SNMP traps, filters them and normalises them into events.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (.yaml, .yml or .json)")
                .default_value("config.yaml"),
        )
        .arg(
            Arg::new("daemon")
                .short('d')
                .long("daemon")
                .help("Run as daemon (suppress console output)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a default configuration file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .context("Missing configuration path")?;
    let daemon_mode = matches.get_flag("daemon");

    if matches.get_flag("generate-config") {
        return generate_default_config(&config_path).await;
    }

    let config = load_configuration(&config_path).await?;

    initialise_logging(&config, daemon_mode)?;

    info!("Starting Trapline v{}", VERSION);
    info!("Configuration loaded from: {}", config_path.display());

    config.validate().context("Configuration validation failed")?;

    run_application(config).await
}

async fn generate_default_config(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        anyhow::bail!("Configuration file already exists: {}", config_path.display());
    }

    Config::default()
        .save_to_file(config_path)
        .await
        .context("Failed to save default configuration")?;

    println!("Default configuration generated: {}", config_path.display());
    println!("Please edit the configuration file and restart the application.");

    Ok(())
}

/// Load configuration, writing the default first if the file is missing
async fn load_configuration(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        // Logging is not initialised yet
        eprintln!(
            "Configuration file not found, creating default: {}",
            config_path.display()
        );

        let default_config = Config::default();
        default_config
            .save_to_file(config_path)
            .await
            .context("Failed to create default configuration file")?;

        return Ok(default_config);
    }

    Config::load_from_file(config_path)
        .await
        .context("Failed to load configuration file")
}

fn initialise_logging(config: &Config, daemon_mode: bool) -> Result<()> {
    let level = match config.logging.level.as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let mut layers = Vec::new();

    if config.logging.console_output && !daemon_mode {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true);
        layers.push(console_layer.boxed());
    }

    if let Some(ref log_file_path) = config.logging.file_output {
        let log_path = Path::new(log_file_path);
        let log_dir = log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let log_filename = log_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("trapline.log");

        std::fs::create_dir_all(log_dir).context("Failed to create log directory")?;

        let file_appender = match config.logging.rotation_strategy.as_str() {
            "hourly" => tracing_appender::rolling::hourly(log_dir, log_filename),
            "never" => tracing_appender::rolling::never(log_dir, log_filename),
            _ => tracing_appender::rolling::daily(log_dir, log_filename),
        };

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
            .with_target(false);

        layers.push(file_layer.boxed());

        // Dropping the guard stops the background writer
        static GUARD_HOLDER: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD_HOLDER.set(guard);
    }

    if layers.is_empty() {
        let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        layers.push(stderr_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(tracing_subscriber::filter::LevelFilter::from_level(level))
        .init();

    Ok(())
}

async fn run_application(config: Config) -> Result<()> {
    let builder = config
        .processor
        .compile()
        .context("Failed to compile processing rules")?;

    let blocklist = Arc::new(BlockList::from_config(&config.listener));
    let store = Arc::new(EventStore::new());
    let (queue_tx, queue_rx) = relay_queue::bounded(config.listener.queue_size);
    let (processor_shutdown_tx, processor_shutdown_rx) = mpsc::unbounded_channel();
    let (processor_done_tx, processor_done_rx) = oneshot::channel();

    let processor = TrapProcessor::new(
        builder,
        Arc::clone(&store),
        queue_rx,
        processor_shutdown_rx,
        Some(processor_done_tx),
    );

    let mut processor_handle = tokio::spawn(async move {
        if let Err(e) = processor.start().await {
            error!("Trap processor failed: {}", e);
        }
    });

    let ingestor = Arc::new(TrapIngestor::new(Arc::clone(&blocklist), queue_tx.clone()));
    let listener = Arc::new(SnmpListener::new(config.listener.clone(), ingestor));
    let port = config.listener.port;
    let mut listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.start().await {
            error!("SNMP listener failed on port {}: {:#}", port, e);
            error!("Possible causes: Port already in use, insufficient permissions, or network configuration");
        }
    });

    let (status_shutdown_tx, status_shutdown_rx) = oneshot::channel::<()>();
    let status_handle = if config.status.enabled {
        let state = AppState {
            store: Arc::clone(&store),
            blocklist: Arc::clone(&blocklist),
            queue: queue_tx.clone(),
        };
        let status_config = config.status.clone();
        Some(tokio::spawn(async move {
            let shutdown = async {
                let _ = status_shutdown_rx.await;
            };
            if let Err(e) = StatusServer::run(status_config, state, shutdown).await {
                error!("Status server failed: {:#}", e);
            }
        }))
    } else {
        info!("Status server disabled");
        None
    };

    let mut signals =
        Signals::new([SIGTERM, SIGINT]).context("Failed to register signal handlers")?;

    info!("Trapline started successfully");
    info!(
        "Listening on {}:{} (queue capacity {})",
        config.listener.bind_address,
        config.listener.port,
        queue_tx.capacity()
    );

    tokio::select! {
        _ = signals.next() => {
            info!("Received shutdown signal, stopping gracefully...");
        }
        _ = &mut listener_handle => {
            warn!("SNMP listener stopped unexpectedly");
        }
        _ = &mut processor_handle => {
            warn!("Trap processor stopped unexpectedly");
        }
    }

    // Stop accepting new traps first
    listener_handle.abort();
    drop(queue_tx);

    let _ = processor_shutdown_tx.send(());
    match tokio::time::timeout(tokio::time::Duration::from_secs(10), processor_done_rx).await {
        Ok(Ok(stats)) => {
            info!(
                "Trap processor finished: {} processed, {} failed",
                stats.processed, stats.failed
            );
        }
        _ => {
            warn!("Trap processor did not confirm shutdown in time");
        }
    }
    processor_handle.abort();

    let _ = status_shutdown_tx.send(());
    if let Some(handle) = status_handle {
        let _ = tokio::time::timeout(tokio::time::Duration::from_secs(5), handle).await;
    }

    info!("Trapline stopped with {} event(s) in the store", store.len());
    Ok(())
}
