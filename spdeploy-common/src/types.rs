//! Common types used across spdeploy components.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which remote events trigger a deployment for a repository.
///
/// Providers without a change API treat every trigger as `push`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Deploy on new commits on the watched branch.
    #[default]
    Push,
    /// Deploy on merged pull requests targeting the watched branch.
    Pr,
    /// Deploy on either.
    Both,
}

impl TriggerKind {
    /// Whether this trigger wants pull-request classification.
    pub fn includes_pr(self) -> bool {
        matches!(self, Self::Pr | Self::Both)
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pr => write!(f, "pr"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Self::Push),
            "pr" => Ok(Self::Pr),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "invalid trigger type: {other} (must be push, pr, or both)"
            )),
        }
    }
}

/// A watched (remote repository, branch, local working tree) triple.
///
/// Records returned from the configuration store are treated as
/// immutable snapshots; runtime state lives on the daemon's watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// Stable opaque identifier, unique within the configuration.
    pub id: String,
    /// Remote URL as entered by the user (HTTPS or SSH form).
    pub url: String,
    /// Branch to track.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Absolute path of the local working tree.
    pub path: PathBuf,
    /// Which remote events cause a deployment.
    #[serde(default)]
    pub trigger: TriggerKind,
    /// Inactive entries are carried in config but not watched.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Timestamp of the last successfully applied change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Per-repository literal token. Discouraged but honored; prefer
    /// the environment variables the token resolver reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Relative path of the deployment script, overriding discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_pull_script: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

/// How a detected change was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Push,
    Pr,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pr => write!(f, "pr"),
        }
    }
}

/// Output of change detection for one repository.
#[derive(Debug, Clone, Serialize)]
pub struct Change {
    pub kind: ChangeKind,
    /// Full commit hash, or the synthetic `"latest"` when the provider
    /// exposes no API to name the commit.
    pub commit: String,
    pub branch: String,
    pub timestamp: DateTime<Utc>,
    /// Pull-request number when `kind` is `Pr`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_number: Option<u64>,
}

impl Change {
    /// A git-detected change: the plumbing knows something moved but
    /// not which commit until after the pull.
    pub fn synthetic_push(branch: &str) -> Self {
        Self {
            kind: ChangeKind::Push,
            commit: "latest".to_string(),
            branch: branch.to_string(),
            timestamp: Utc::now(),
            pull_number: None,
        }
    }

    /// Short form of the commit for log lines.
    pub fn short_commit(&self) -> &str {
        let end = self.commit.len().min(8);
        &self.commit[..end]
    }
}
