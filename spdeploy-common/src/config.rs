//! On-disk configuration store.
//!
//! The configuration is a single TOML document. Every save is an
//! atomic replace (write to a temp file in the same directory, then
//! rename) so readers and the config-file watcher never observe a
//! half-written document.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::providers::ProviderInstance;
use crate::types::{Repository, TriggerKind};
use crate::urls;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// The configuration document.
///
/// Scalar fields come before the table arrays; the TOML serializer
/// requires that ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between repository polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// PID of the running supervisor; informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_pid: Option<u32>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub providers: Vec<ProviderInstance>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
            log_level: "info".to_string(),
            daemon_pid: None,
            repositories: Vec::new(),
            providers: Vec::new(),
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Fields the CLI supplies when adding a repository.
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub url: String,
    pub branch: Option<String>,
    pub path: Option<PathBuf>,
    pub trigger: TriggerKind,
    pub token: Option<String>,
    pub post_pull_script: Option<String>,
}

/// What happened to an `update_repository_sync` call.
///
/// A watcher removed by a reload may finish its cycle and persist after
/// its id has left the document; that is reported as `UnknownId`, not
/// an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSyncOutcome {
    Updated,
    UnknownId,
}

/// Typed read/write access to the configuration document.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Open the store at the OS-conventional location, creating the
    /// containing directory if needed.
    pub fn open_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(Self::new(path))
    }

    /// OS-conventional config file location.
    pub fn default_path() -> PathBuf {
        if cfg!(windows) {
            let program_data =
                std::env::var("PROGRAMDATA").unwrap_or_else(|_| "C:\\ProgramData".to_string());
            return Path::new(&program_data).join("spdeploy").join("config.toml");
        }
        match std::env::var("HOME") {
            Ok(home) if !home.is_empty() => Path::new(&home)
                .join(".config")
                .join("spdeploy")
                .join("config.toml"),
            _ => PathBuf::from("/etc/spdeploy/config.toml"),
        }
    }

    /// OS-conventional directory for global and per-repository logs.
    pub fn log_directory(&self) -> PathBuf {
        if cfg!(windows) {
            let program_data =
                std::env::var("PROGRAMDATA").unwrap_or_else(|_| "C:\\ProgramData".to_string());
            return Path::new(&program_data).join("spdeploy").join("logs");
        }
        match std::env::var("HOME") {
            Ok(home) if !home.is_empty() => Path::new(&home)
                .join(".local")
                .join("share")
                .join("spdeploy")
                .join("logs"),
            _ => PathBuf::from("/var/log/spdeploy"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document; a missing file yields the defaults.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Config::default());
            }
            Err(source) => {
                return Err(ConfigError::Read { path: self.path.clone(), source });
            }
        };
        toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Atomically replace the document on disk.
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let serialized = toml::to_string_pretty(config)?;
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: self.path.clone(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
        tmp.write_all(serialized.as_bytes()).map_err(write_err)?;
        tmp.flush().map_err(write_err)?;
        tmp.persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }

    pub fn list_repositories(&self) -> Result<Vec<Repository>, ConfigError> {
        Ok(self.load()?.repositories)
    }

    /// Add a repository, filling defaults and enforcing the unique
    /// (url, branch, path) invariant. Returns the stored record.
    pub fn add_repository(&self, new: NewRepository) -> Result<Repository, ConfigError> {
        let mut config = self.load()?;

        let url = expand_url_shorthand(new.url.trim());
        let branch = new
            .branch
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "main".to_string());
        let path = match new.path {
            Some(path) => absolutize(&path),
            None => std::env::current_dir().map_err(|source| ConfigError::Write {
                path: PathBuf::from("."),
                source,
            })?,
        };

        let duplicate = config.repositories.iter().any(|repo| {
            urls::equivalent(&repo.url, &url) && repo.branch == branch && repo.path == path
        });
        if duplicate {
            return Err(ConfigError::DuplicateRepository { url, branch, path });
        }

        let repo = Repository {
            id: generate_repo_id(),
            url,
            branch,
            path,
            trigger: new.trigger,
            active: true,
            last_sync: None,
            token: new.token.filter(|t| !t.is_empty()),
            post_pull_script: new.post_pull_script.filter(|s| !s.is_empty()),
        };
        config.repositories.push(repo.clone());
        self.save(&config)?;
        Ok(repo)
    }

    /// Remove entries matching url+branch, and path when given.
    /// Returns how many entries were removed.
    pub fn remove_repository(
        &self,
        url: &str,
        branch: &str,
        path: Option<&Path>,
    ) -> Result<usize, ConfigError> {
        let mut config = self.load()?;
        let url = expand_url_shorthand(url.trim());
        let path = path.map(absolutize);

        let before = config.repositories.len();
        config.repositories.retain(|repo| {
            let matched = urls::equivalent(&repo.url, &url)
                && repo.branch == branch
                && path.as_deref().is_none_or(|p| repo.path == p);
            !matched
        });
        let removed = before - config.repositories.len();
        if removed == 0 {
            return Err(ConfigError::RepositoryNotFound);
        }
        self.save(&config)?;
        Ok(removed)
    }

    /// Persist a successful sync timestamp for one repository.
    pub fn update_repository_sync(
        &self,
        repo_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<UpdateSyncOutcome, ConfigError> {
        let mut config = self.load()?;
        match config.repositories.iter_mut().find(|r| r.id == repo_id) {
            Some(repo) => {
                repo.last_sync = Some(timestamp);
                self.save(&config)?;
                Ok(UpdateSyncOutcome::Updated)
            }
            None => {
                debug!(repo_id, "Sync update for id no longer in configuration");
                Ok(UpdateSyncOutcome::UnknownId)
            }
        }
    }

    pub fn list_provider_instances(&self) -> Result<Vec<ProviderInstance>, ConfigError> {
        Ok(self.load()?.providers)
    }

    pub fn add_provider_instance(&self, instance: ProviderInstance) -> Result<(), ConfigError> {
        let mut config = self.load()?;
        if config.providers.iter().any(|p| p.name == instance.name) {
            return Err(ConfigError::DuplicateInstance(instance.name));
        }
        config.providers.push(instance);
        self.save(&config)
    }

    pub fn remove_provider_instance(&self, name: &str) -> Result<(), ConfigError> {
        let mut config = self.load()?;
        let before = config.providers.len();
        config.providers.retain(|p| p.name != name);
        if config.providers.len() == before {
            return Err(ConfigError::InstanceNotFound(name.to_string()));
        }
        self.save(&config)
    }

    pub fn daemon_pid(&self) -> Result<Option<u32>, ConfigError> {
        Ok(self.load()?.daemon_pid)
    }

    pub fn set_daemon_pid(&self, pid: Option<u32>) -> Result<(), ConfigError> {
        let mut config = self.load()?;
        config.daemon_pid = pid;
        self.save(&config)
    }
}

/// `owner/repo` and `github.com/owner/repo` shorthands expand to the
/// HTTPS GitHub form; full URLs pass through.
pub fn expand_url_shorthand(url: &str) -> String {
    if url.starts_with("https://")
        || url.starts_with("http://")
        || url.starts_with("git@")
        || url.starts_with("ssh://")
        || url.starts_with("file://")
    {
        return url.to_string();
    }
    if url.starts_with("github.com/") {
        return format!("https://{url}");
    }
    if url.split('/').count() == 2 && !url.contains('.') {
        return format!("https://github.com/{url}");
    }
    url.to_string()
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

fn generate_repo_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join("config.toml"))
    }

    fn sample_repo(dir: &Path) -> NewRepository {
        NewRepository {
            url: "https://github.com/acme/site".to_string(),
            branch: Some("main".to_string()),
            path: Some(dir.join("site")),
            trigger: TriggerKind::Push,
            token: None,
            post_pull_script: None,
        }
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = store_in(&dir).load().unwrap();
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.log_level, "info");
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn test_add_and_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let repo = store.add_repository(sample_repo(dir.path())).unwrap();
        assert_eq!(repo.id.len(), 8);
        assert!(repo.active);

        let listed = store.list_repositories().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, repo.id);
        assert_eq!(listed[0].url, "https://github.com/acme/site");
    }

    #[test]
    fn test_duplicate_triple_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add_repository(sample_repo(dir.path())).unwrap();

        let err = store.add_repository(sample_repo(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRepository { .. }));

        // Same url+branch at a different path is a distinct entry.
        let mut other = sample_repo(dir.path());
        other.path = Some(dir.path().join("elsewhere"));
        store.add_repository(other).unwrap();
        assert_eq!(store.list_repositories().unwrap().len(), 2);
    }

    #[test]
    fn test_equivalent_urls_count_as_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add_repository(sample_repo(dir.path())).unwrap();

        let mut ssh_form = sample_repo(dir.path());
        ssh_form.url = "git@github.com:acme/site.git".to_string();
        let err = store.add_repository(ssh_form).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRepository { .. }));
    }

    #[test]
    fn test_remove_repository() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add_repository(sample_repo(dir.path())).unwrap();

        assert!(matches!(
            store.remove_repository("https://github.com/acme/other", "main", None),
            Err(ConfigError::RepositoryNotFound)
        ));
        let removed = store
            .remove_repository("https://github.com/acme/site", "main", None)
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.list_repositories().unwrap().is_empty());
    }

    #[test]
    fn test_update_sync_and_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let repo = store.add_repository(sample_repo(dir.path())).unwrap();

        let ts = Utc::now();
        assert_eq!(
            store.update_repository_sync(&repo.id, ts).unwrap(),
            UpdateSyncOutcome::Updated
        );
        let stored = &store.list_repositories().unwrap()[0];
        assert_eq!(stored.last_sync, Some(ts));

        assert_eq!(
            store.update_repository_sync("gone", ts).unwrap(),
            UpdateSyncOutcome::UnknownId
        );
    }

    #[test]
    fn test_provider_instance_management() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let instance = ProviderInstance {
            name: "corp".to_string(),
            kind: crate::providers::ProviderKind::Gitlab,
            base_url: "https://git.corp.example".to_string(),
            api_url: None,
        };
        store.add_provider_instance(instance.clone()).unwrap();
        assert!(matches!(
            store.add_provider_instance(instance),
            Err(ConfigError::DuplicateInstance(_))
        ));
        assert_eq!(store.list_provider_instances().unwrap().len(), 1);

        store.remove_provider_instance("corp").unwrap();
        assert!(matches!(
            store.remove_provider_instance("corp"),
            Err(ConfigError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn test_save_is_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add_repository(sample_repo(dir.path())).unwrap();
        store.set_daemon_pid(Some(4242)).unwrap();

        // The document on disk parses and holds everything written so far.
        let reread = store.load().unwrap();
        assert_eq!(reread.daemon_pid, Some(4242));
        assert_eq!(reread.repositories.len(), 1);

        // No stray temp files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path() != store.path())
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[test]
    fn test_expand_url_shorthand() {
        assert_eq!(
            expand_url_shorthand("acme/site"),
            "https://github.com/acme/site"
        );
        assert_eq!(
            expand_url_shorthand("github.com/acme/site"),
            "https://github.com/acme/site"
        );
        assert_eq!(
            expand_url_shorthand("https://gitlab.com/grp/proj"),
            "https://gitlab.com/grp/proj"
        );
        assert_eq!(
            expand_url_shorthand("git@github.com:acme/site.git"),
            "git@github.com:acme/site.git"
        );
    }
}
