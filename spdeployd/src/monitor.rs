//! Monitor supervisor.
//!
//! Owns the fleet of repository watchers under a read-write lock and
//! drives two tickers: the poll tick fans one task out per idle
//! watcher, the reload tick re-reads the configuration and diffs it
//! against the fleet. Reloads preserve runtime state for unchanged
//! ids. Shutdown stops the tickers and drains in-flight tasks.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use spdeploy_common::error::ConfigError;
use spdeploy_common::providers::Registry;
use spdeploy_common::token::resolve_token;
use spdeploy_common::urls;
use spdeploy_common::{ConfigStore, RepoLog};

use crate::git::{GitError, GitSync};
use crate::github_api::GithubChangeApi;
use crate::script::ScriptRunner;
use crate::watcher::{RepoWatcher, SyncEngine, WatcherCell, WatcherStatus};

/// Default interval between configuration re-reads.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub reload_interval: Duration,
    pub git_timeout: Duration,
    pub script_timeout: Duration,
    /// Directory for per-repository log sinks.
    pub log_dir: PathBuf,
}

/// Counts from one reload diff.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReloadSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub total: usize,
}

pub struct Monitor {
    engine: Arc<SyncEngine>,
    watchers: Arc<RwLock<HashMap<String, WatcherCell>>>,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(store: Arc<ConfigStore>, config: MonitorConfig) -> Result<Self, GitError> {
        let engine = SyncEngine {
            store,
            registry: Arc::new(Registry::new()),
            git: GitSync::new(config.git_timeout)?,
            scripts: ScriptRunner::new(config.script_timeout),
            github: GithubChangeApi::new(),
        };
        Ok(Self {
            engine: Arc::new(engine),
            watchers: Arc::new(RwLock::new(HashMap::new())),
            config,
        })
    }

    /// Re-read the configuration and diff it against the fleet.
    ///
    /// A parse failure rejects the reload and leaves the previous
    /// fleet authoritative. Watchers whose id is unchanged keep their
    /// in-memory `last_sync`, `last_error`, and log sink; new active
    /// entries get a watcher plus an `ensure_tree`, with any setup
    /// error recorded on the watcher rather than failing the reload.
    pub async fn reload(&self) -> Result<ReloadSummary, ConfigError> {
        let config = self.engine.store.load()?;
        self.engine.registry.load_instances(&config.providers).await;

        let mut summary = ReloadSummary::default();
        let mut watchers = self.watchers.write().await;

        let active_ids: HashSet<&str> = config
            .repositories
            .iter()
            .filter(|r| r.active)
            .map(|r| r.id.as_str())
            .collect();

        for repo in config.repositories.iter().filter(|r| r.active) {
            if let Some(cell) = watchers.get(&repo.id) {
                let mut watcher = cell.write().await;
                watcher.config = repo.clone();
                summary.updated += 1;
                debug!(repo = %urls::strip_credentials(&repo.url), id = %repo.id, "Updated existing repository configuration");
                continue;
            }

            let repo_name = urls::strip_credentials(&repo.url);
            info!(
                repo = %repo_name,
                branch = %repo.branch,
                path = %repo.path.display(),
                "Adding repository to monitoring"
            );

            let log = match RepoLog::open(&self.config.log_dir, &repo.url) {
                Ok(log) => Some(Arc::new(log)),
                Err(err) => {
                    // The global logger still covers this repository.
                    error!(repo = %repo_name, error = %err, "Failed to create repository log sink");
                    None
                }
            };
            let mut watcher = RepoWatcher::new(repo.clone(), log);

            let handle = self.engine.registry.detect_with_probe(&repo.url).await;
            let token = repo
                .token
                .clone()
                .filter(|t| !t.trim().is_empty())
                .or_else(|| resolve_token(&handle, &repo.id));
            let auth_url = token
                .as_deref()
                .map(|t| handle.authenticated_url(&repo.url, t))
                .unwrap_or_else(|| repo.url.clone());

            if let Err(err) = self
                .engine
                .git
                .ensure_tree(&repo.url, &auth_url, &repo.branch, &repo.path)
                .await
            {
                // Retained so a user fix plus reload can recover it.
                error!(repo = %repo_name, error = %err, "Failed to validate repository");
                if let Some(log) = &watcher.log {
                    log.error(&format!("setup failed: {err}"));
                }
                watcher.last_error = Some(err.to_string());
            }

            watchers.insert(repo.id.clone(), Arc::new(RwLock::new(watcher)));
            summary.added += 1;
        }

        let stale: Vec<String> = watchers
            .keys()
            .filter(|id| !active_ids.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            if let Some(cell) = watchers.remove(&id) {
                // An in-flight task keeps its Arc and runs to completion
                // against the stale entry.
                let watcher = cell.read().await;
                info!(repo = %urls::strip_credentials(&watcher.config.url), id = %id, "Removing repository from monitoring");
                summary.removed += 1;
            }
        }

        summary.total = watchers.len();
        info!(
            total = summary.total,
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            "Reload completed"
        );
        Ok(summary)
    }

    /// Snapshot of every watcher for the status query.
    pub async fn status(&self) -> Vec<WatcherStatus> {
        let watchers = self.watchers.read().await;
        let mut statuses = Vec::with_capacity(watchers.len());
        for cell in watchers.values() {
            statuses.push(cell.read().await.status());
        }
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// One poll tick: fan out a task per watcher that is not already
    /// processing. The map lock is held only to snapshot the cells.
    pub async fn check_all(&self, tasks: &mut JoinSet<()>) {
        let snapshot: Vec<WatcherCell> = {
            let watchers = self.watchers.read().await;
            watchers.values().cloned().collect()
        };
        debug!(repositories = snapshot.len(), "Polling repositories");

        for cell in snapshot {
            {
                let mut watcher = cell.write().await;
                if watcher.is_processing {
                    continue;
                }
                watcher.is_processing = true;
            }
            let engine = self.engine.clone();
            tasks.spawn(async move {
                engine.run_cycle(&cell).await;
                cell.write().await.is_processing = false;
            });
        }

        // Reap whatever already finished so the set stays bounded.
        while tasks.try_join_next().is_some() {}
    }

    /// Drive the poll and reload tickers until shutdown, then drain
    /// in-flight watcher tasks.
    pub async fn run(&self, mut reload_rx: mpsc::Receiver<()>, mut shutdown: watch::Receiver<bool>) {
        let mut poll = interval_at(
            Instant::now() + self.config.poll_interval,
            self.config.poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reload = interval_at(
            Instant::now() + self.config.reload_interval,
            self.config.reload_interval,
        );
        reload.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            reload_secs = self.config.reload_interval.as_secs(),
            repositories = self.watchers.read().await.len(),
            "Starting monitoring loop"
        );

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.check_all(&mut tasks).await;
                }
                _ = reload.tick() => {
                    if let Err(err) = self.reload().await {
                        error!(error = %err, "Failed to reload repositories; keeping previous configuration");
                    }
                }
                Some(()) = reload_rx.recv() => {
                    info!("Config file changed, reloading repositories");
                    if let Err(err) = self.reload().await {
                        error!(error = %err, "Failed to reload repositories after config change; keeping previous configuration");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, "Shutdown requested; draining in-flight syncs");
        }
        while tasks.join_next().await.is_some() {}
        info!("Monitor stopped");
    }
}
