//! End-to-end sync cycle tests against local git fixtures.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use spdeploy_common::config::Config;
use spdeploy_common::providers::Registry;
use spdeploy_common::types::{Repository, TriggerKind};
use spdeploy_common::ConfigStore;
use spdeployd::git::GitSync;
use spdeployd::github_api::GithubChangeApi;
use spdeployd::script::ScriptRunner;
use spdeployd::watcher::{RepoWatcher, SyncEngine, WatcherCell};

fn git_cmd(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("git not installed");
    assert!(status.success(), "git {args:?} failed in {dir:?}");
}

fn commit_all(dir: &Path, message: &str) {
    git_cmd(dir, &["add", "."]);
    git_cmd(
        dir,
        &[
            "-c",
            "user.name=test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-m",
            message,
        ],
    );
}

/// Upstream repository containing a deployment script, plus its URL.
fn upstream_with_script(root: &Path, script_body: &str) -> (PathBuf, String) {
    let dir = root.join("upstream");
    std::fs::create_dir_all(&dir).unwrap();
    git_cmd(&dir, &["init"]);
    git_cmd(&dir, &["checkout", "-b", "main"]);
    std::fs::write(dir.join("README.md"), "v1").unwrap();
    std::fs::write(dir.join("spdeploy.sh"), format!("#!/bin/sh\n{script_body}\n")).unwrap();
    commit_all(&dir, "init");
    let url = format!("file://{}", dir.display());
    (dir, url)
}

struct Harness {
    engine: SyncEngine,
    store: Arc<ConfigStore>,
    cell: WatcherCell,
    repo: Repository,
}

fn harness(root: &Path, url: &str, trigger: TriggerKind) -> Harness {
    let repo = Repository {
        id: "r1".to_string(),
        url: url.to_string(),
        branch: "main".to_string(),
        path: root.join("tree"),
        trigger,
        active: true,
        last_sync: None,
        token: None,
        post_pull_script: None,
    };

    let store = Arc::new(ConfigStore::new(root.join("config.toml")));
    store
        .save(&Config { repositories: vec![repo.clone()], ..Config::default() })
        .unwrap();

    let engine = SyncEngine {
        store: store.clone(),
        registry: Arc::new(Registry::new()),
        git: GitSync::new(Duration::from_secs(60)).unwrap(),
        scripts: ScriptRunner::new(Duration::from_secs(30)),
        github: GithubChangeApi::new(),
    };
    let cell = Arc::new(RwLock::new(RepoWatcher::new(repo.clone(), None)));
    Harness { engine, store, cell, repo }
}

#[tokio::test]
async fn test_deploys_on_new_commit() {
    let root = tempfile::tempdir().unwrap();
    let marker_line = "echo ran >> \"$SPDEPLOY_REPO_PATH/.deploy-marker\"";
    let (up, url) = upstream_with_script(root.path(), marker_line);
    let h = harness(root.path(), &url, TriggerKind::Push);

    h.engine
        .git
        .ensure_tree(&h.repo.url, &h.repo.url, "main", &h.repo.path)
        .await
        .unwrap();

    // No commits since clone: the cycle is a no-op.
    h.engine.run_cycle(&h.cell).await;
    assert!(!h.repo.path.join(".deploy-marker").exists());
    assert!(h.cell.read().await.last_sync.is_none());

    // A new upstream commit triggers pull, script, and persistence.
    std::fs::write(up.join("README.md"), "v2").unwrap();
    commit_all(&up, "update");
    h.engine.run_cycle(&h.cell).await;

    let marker = std::fs::read_to_string(h.repo.path.join(".deploy-marker")).unwrap();
    assert_eq!(marker.lines().count(), 1);
    assert_eq!(
        std::fs::read_to_string(h.repo.path.join("README.md")).unwrap(),
        "v2"
    );
    let watcher = h.cell.read().await;
    assert!(watcher.last_sync.is_some());
    assert!(watcher.last_error.is_none());
    drop(watcher);

    let persisted = &h.store.list_repositories().unwrap()[0];
    assert!(persisted.last_sync.is_some());

    // Idempotent detection: with nothing new, the second cycle neither
    // pulls nor re-runs the script.
    h.engine.run_cycle(&h.cell).await;
    let marker = std::fs::read_to_string(h.repo.path.join(".deploy-marker")).unwrap();
    assert_eq!(marker.lines().count(), 1);
}

#[tokio::test]
async fn test_script_failure_does_not_block_future_syncs() {
    let root = tempfile::tempdir().unwrap();
    let (up, url) = upstream_with_script(root.path(), "exit 1");
    let h = harness(root.path(), &url, TriggerKind::Push);
    h.engine
        .git
        .ensure_tree(&h.repo.url, &h.repo.url, "main", &h.repo.path)
        .await
        .unwrap();

    std::fs::write(up.join("README.md"), "v2").unwrap();
    commit_all(&up, "second");
    h.engine.run_cycle(&h.cell).await;

    let first_sync = h.cell.read().await.last_sync;
    assert!(first_sync.is_some(), "pull succeeded, so the sync point advances");
    assert!(h.cell.read().await.last_error.is_none());

    std::fs::write(up.join("README.md"), "v3").unwrap();
    commit_all(&up, "third");
    h.engine.run_cycle(&h.cell).await;

    let second_sync = h.cell.read().await.last_sync;
    assert!(second_sync > first_sync, "each new commit still deploys");
    assert_eq!(
        std::fs::read_to_string(h.repo.path.join("README.md")).unwrap(),
        "v3"
    );
}

#[tokio::test]
async fn test_detection_failure_records_watcher_error() {
    let root = tempfile::tempdir().unwrap();
    let (_up, url) = upstream_with_script(root.path(), "true");
    let h = harness(root.path(), &url, TriggerKind::Push);
    // The working tree was never set up: detection fails, the error is
    // captured on the watcher, and nothing escapes the cycle.
    h.engine.run_cycle(&h.cell).await;

    let watcher = h.cell.read().await;
    assert!(watcher.last_error.is_some());
    assert!(watcher.last_sync.is_none());
}

#[tokio::test]
async fn test_pr_trigger_degrades_once_for_plain_git_hosts() {
    let root = tempfile::tempdir().unwrap();
    let (_up, url) = upstream_with_script(root.path(), "true");
    let h = harness(root.path(), &url, TriggerKind::Both);
    h.engine
        .git
        .ensure_tree(&h.repo.url, &h.repo.url, "main", &h.repo.path)
        .await
        .unwrap();

    assert!(!h.cell.read().await.pr_degraded_logged);
    h.engine.run_cycle(&h.cell).await;
    assert!(h.cell.read().await.pr_degraded_logged);
    // The flag latches: later cycles do not re-announce.
    h.engine.run_cycle(&h.cell).await;
    assert!(h.cell.read().await.pr_degraded_logged);
}
