//! Configuration file watcher.
//!
//! Watches the config document and its containing directory (atomic
//! saves land as a rename) and collapses event bursts with a debounce
//! window: the timer restarts on every event, and one reload trigger
//! fires once the window passes quietly.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default quiet period before a burst of file events turns into one
/// reload.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching `config_path`; each settled burst of changes
    /// sends one `()` on `reload_tx`.
    pub fn start(
        config_path: PathBuf,
        reload_tx: mpsc::Sender<()>,
        debounce: Duration,
    ) -> notify::Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let file_name: Option<OsString> = config_path.file_name().map(OsString::from);

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "Config file watcher error");
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            let ours = event
                .paths
                .iter()
                .any(|path| path.file_name().map(OsString::from) == file_name);
            if ours {
                let _ = event_tx.send(());
            }
        })?;

        let dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        if config_path.exists() {
            // Watching the file itself too catches in-place edits on
            // platforms where directory events are coarse.
            if let Err(err) = watcher.watch(&config_path, RecursiveMode::NonRecursive) {
                debug!(error = %err, "Could not watch config file directly; directory watch remains");
            }
        }
        debug!(path = %config_path.display(), "Watching configuration file for changes");

        let task = tokio::spawn(debounce_loop(event_rx, reload_tx, debounce));
        Ok(Self { _watcher: watcher, task })
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

async fn debounce_loop(
    mut events: mpsc::UnboundedReceiver<()>,
    reload_tx: mpsc::Sender<()>,
    debounce: Duration,
) {
    while events.recv().await.is_some() {
        // Restart the window on every further event in the burst.
        loop {
            match tokio::time::timeout(debounce, events.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        debug!("Config file changed on disk");
        if reload_tx.send(()).await.is_err() {
            return;
        }
    }
}
