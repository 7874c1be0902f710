//! GitHub change API client.
//!
//! Git plumbing is the authoritative change detector; this client is
//! the optimization layered on top for GitHub-hosted repositories whose
//! trigger includes pull requests. It classifies what moved (push vs
//! merged PR) and names the commit, so the watcher can refine the
//! synthetic git-detected change.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use spdeploy_common::types::{Change, ChangeKind, TriggerKind};
use spdeploy_common::urls;

const API_ROOT: &str = "https://api.github.com";
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const USER_AGENT: &str = concat!("spdeploy/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ChangeApiError {
    #[error("unrecognized GitHub repository URL: {0}")]
    BadUrl(String),

    #[error("GitHub API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API returned status {0}")]
    Status(u16),
}

#[derive(Debug, Deserialize)]
struct CommitItem {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    committer: Option<CommitSignature>,
}

#[derive(Debug, Deserialize)]
struct CommitSignature {
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct PullItem {
    number: u64,
    merged_at: Option<DateTime<Utc>>,
    merge_commit_sha: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GithubChangeApi {
    client: reqwest::Client,
}

impl Default for GithubChangeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl GithubChangeApi {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    /// Classify the newest change on `branch` since `since`, honoring
    /// the trigger. Returns `None` when the API sees nothing newer.
    pub async fn check_for_changes(
        &self,
        repo_url: &str,
        branch: &str,
        trigger: TriggerKind,
        since: Option<DateTime<Utc>>,
        token: Option<&str>,
    ) -> Result<Option<Change>, ChangeApiError> {
        let (owner, repo) = urls::github_owner_repo(repo_url)
            .ok_or_else(|| ChangeApiError::BadUrl(urls::strip_credentials(repo_url)))?;

        match trigger {
            TriggerKind::Push => self.latest_push(&owner, &repo, branch, since, token).await,
            TriggerKind::Pr => self.latest_merged_pr(&owner, &repo, branch, since, token).await,
            TriggerKind::Both => {
                let push = self.latest_push(&owner, &repo, branch, since, token).await?;
                let pr = self.latest_merged_pr(&owner, &repo, branch, since, token).await?;
                Ok(most_recent(push, pr))
            }
        }
    }

    async fn latest_push(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        since: Option<DateTime<Utc>>,
        token: Option<&str>,
    ) -> Result<Option<Change>, ChangeApiError> {
        let mut request = self
            .client
            .get(format!("{API_ROOT}/repos/{owner}/{repo}/commits"))
            .query(&[("sha", branch), ("per_page", "1")])
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", USER_AGENT)
            .timeout(REQUEST_TIMEOUT);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ChangeApiError::Status(response.status().as_u16()));
        }
        let commits: Vec<CommitItem> = response.json().await?;
        let Some(latest) = commits.into_iter().next() else {
            return Ok(None);
        };
        let timestamp = latest
            .commit
            .committer
            .and_then(|c| c.date)
            .unwrap_or_else(Utc::now);
        if since.is_some_and(|s| timestamp <= s) {
            return Ok(None);
        }
        Ok(Some(Change {
            kind: ChangeKind::Push,
            commit: latest.sha,
            branch: branch.to_string(),
            timestamp,
            pull_number: None,
        }))
    }

    async fn latest_merged_pr(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        since: Option<DateTime<Utc>>,
        token: Option<&str>,
    ) -> Result<Option<Change>, ChangeApiError> {
        let mut request = self
            .client
            .get(format!("{API_ROOT}/repos/{owner}/{repo}/pulls"))
            .query(&[
                ("state", "closed"),
                ("base", branch),
                ("sort", "updated"),
                ("direction", "desc"),
                ("per_page", "10"),
            ])
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", USER_AGENT)
            .timeout(REQUEST_TIMEOUT);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ChangeApiError::Status(response.status().as_u16()));
        }
        let pulls: Vec<PullItem> = response.json().await?;
        let newest = pulls
            .into_iter()
            .filter_map(|pr| {
                let merged_at = pr.merged_at?;
                if since.is_some_and(|s| merged_at <= s) {
                    return None;
                }
                Some(Change {
                    kind: ChangeKind::Pr,
                    commit: pr.merge_commit_sha.unwrap_or_else(|| "latest".to_string()),
                    branch: branch.to_string(),
                    timestamp: merged_at,
                    pull_number: Some(pr.number),
                })
            })
            .max_by_key(|change| change.timestamp);
        Ok(newest)
    }
}

fn most_recent(a: Option<Change>, b: Option<Change>) -> Option<Change> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a.timestamp >= b.timestamp { a } else { b }),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(kind: ChangeKind, secs: i64) -> Change {
        Change {
            kind,
            commit: "c".to_string(),
            branch: "main".to_string(),
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            pull_number: None,
        }
    }

    #[test]
    fn test_most_recent_prefers_newer() {
        let push = change(ChangeKind::Push, 100);
        let pr = change(ChangeKind::Pr, 200);
        let winner = most_recent(Some(push), Some(pr)).unwrap();
        assert_eq!(winner.kind, ChangeKind::Pr);
    }

    #[test]
    fn test_most_recent_handles_missing_sides() {
        assert!(most_recent(None, None).is_none());
        let only = most_recent(Some(change(ChangeKind::Push, 1)), None).unwrap();
        assert_eq!(only.kind, ChangeKind::Push);
    }

    #[test]
    fn test_commit_payload_shape() {
        let payload = r#"[{
            "sha": "deadbeef",
            "commit": { "committer": { "date": "2026-08-01T12:00:00Z" } }
        }]"#;
        let commits: Vec<CommitItem> = serde_json::from_str(payload).unwrap();
        assert_eq!(commits[0].sha, "deadbeef");
        assert!(commits[0].commit.committer.as_ref().unwrap().date.is_some());
    }

    #[test]
    fn test_pull_payload_shape() {
        let payload = r#"[{
            "number": 7,
            "merged_at": "2026-08-01T12:00:00Z",
            "merge_commit_sha": "cafe"
        }, {
            "number": 8,
            "merged_at": null,
            "merge_commit_sha": null
        }]"#;
        let pulls: Vec<PullItem> = serde_json::from_str(payload).unwrap();
        assert_eq!(pulls[0].number, 7);
        assert!(pulls[1].merged_at.is_none());
    }
}
