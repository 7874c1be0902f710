//! spdeploy supervisor daemon.
//!
//! Loads the repository set, starts the monitor loop, and reloads the
//! configuration when the document changes on disk. Runs until SIGTERM
//! or ctrl-c, then drains in-flight syncs before exiting.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spdeploy_common::ConfigStore;
use spdeployd::config_watch::{ConfigWatcher, DEFAULT_DEBOUNCE};
use spdeployd::git::DEFAULT_GIT_TIMEOUT;
use spdeployd::monitor::{Monitor, MonitorConfig, DEFAULT_RELOAD_INTERVAL};
use spdeployd::script::DEFAULT_SCRIPT_TIMEOUT;

#[derive(Parser)]
#[command(name = "spdeployd")]
#[command(author, version, about = "spdeploy supervisor daemon")]
struct Cli {
    /// Path to the configuration file (default: OS-conventional location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the poll interval in seconds
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let store = match cli.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::open_default().context("failed to open configuration store")?,
    };
    let file_config = store.load().context("failed to load configuration")?;

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&file_config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    info!(config = %store.path().display(), "Starting spdeploy supervisor");

    let store = Arc::new(store);
    store
        .set_daemon_pid(Some(std::process::id()))
        .context("failed to record supervisor PID")?;

    let poll_secs = cli.poll_interval.unwrap_or(file_config.poll_interval).max(1);
    let monitor_config = MonitorConfig {
        poll_interval: Duration::from_secs(poll_secs),
        reload_interval: DEFAULT_RELOAD_INTERVAL,
        git_timeout: DEFAULT_GIT_TIMEOUT,
        script_timeout: DEFAULT_SCRIPT_TIMEOUT,
        log_dir: store.log_directory(),
    };
    let monitor = Monitor::new(store.clone(), monitor_config)?;
    monitor
        .reload()
        .await
        .context("initial configuration load failed")?;

    let (reload_tx, reload_rx) = mpsc::channel(8);
    let config_watcher =
        match ConfigWatcher::start(store.path().to_path_buf(), reload_tx, DEFAULT_DEBOUNCE) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(error = %err, "Config file watching unavailable; relying on periodic reload");
                None
            }
        };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    monitor.run(reload_rx, shutdown_rx).await;

    if let Some(watcher) = config_watcher {
        watcher.stop();
    }
    if let Err(err) = store.set_daemon_pid(None) {
        warn!(error = %err, "Failed to clear supervisor PID");
    }
    info!("spdeploy supervisor stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
