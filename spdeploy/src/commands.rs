//! CLI command implementations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};

use spdeploy_common::config::NewRepository;
use spdeploy_common::providers::{self, ProviderInstance, ProviderKind, Registry};
use spdeploy_common::token::{candidate_env_vars, resolve_token};
use spdeploy_common::types::TriggerKind;
use spdeploy_common::{repolog, urls, ConfigStore};

use crate::process;

pub fn add(
    store: &ConfigStore,
    url: String,
    branch: Option<String>,
    path: Option<PathBuf>,
    trigger: String,
    token: Option<String>,
    script: Option<String>,
) -> Result<()> {
    let trigger: TriggerKind = trigger.parse().map_err(|msg: String| anyhow!(msg))?;
    let repo = store.add_repository(NewRepository {
        url,
        branch,
        path,
        trigger,
        token,
        post_pull_script: script,
    })?;

    println!(
        "Added repository {} ({}) -> {}",
        repo.url,
        repo.branch,
        repo.path.display()
    );
    println!("Repository ID: {}", repo.id);
    println!("A running daemon picks this up within its reload interval.");
    Ok(())
}

pub fn remove(
    store: &ConfigStore,
    url: &str,
    branch: Option<&str>,
    path: Option<&Path>,
) -> Result<()> {
    let branch = branch.unwrap_or("main");
    let removed = store.remove_repository(url, branch, path)?;
    println!("Removed {removed} repositor{}", if removed == 1 { "y" } else { "ies" });
    Ok(())
}

pub fn list(store: &ConfigStore) -> Result<()> {
    let repositories = store.list_repositories()?;
    if repositories.is_empty() {
        println!("No repositories configured. Add one with `spdeploy add <url>`.");
        return Ok(());
    }

    for repo in repositories {
        let marker = if repo.active { "*" } else { " " };
        println!(
            "{} {}  {} ({})",
            marker,
            repo.id,
            urls::strip_credentials(&repo.url),
            repo.branch
        );
        println!("    path:      {}", repo.path.display());
        println!("    trigger:   {}", repo.trigger);
        println!("    last sync: {}", format_sync(repo.last_sync));
    }
    Ok(())
}

pub fn start(store: &ConfigStore, foreground: bool) -> Result<()> {
    if let Some(pid) = store.daemon_pid()? {
        if process::is_alive(pid) {
            bail!("daemon already running (PID {pid})");
        }
    }

    let daemon = find_daemon_binary()?;
    if foreground {
        let status = std::process::Command::new(&daemon)
            .arg("--config")
            .arg(store.path())
            .status()
            .with_context(|| format!("failed to run {}", daemon.display()))?;
        if !status.success() {
            bail!("daemon exited with {status}");
        }
        return Ok(());
    }

    let child = std::process::Command::new(&daemon)
        .arg("--config")
        .arg(store.path())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .with_context(|| format!("failed to start {}", daemon.display()))?;
    println!("Started spdeploy daemon (PID {})", child.id());
    Ok(())
}

pub fn stop(store: &ConfigStore) -> Result<()> {
    let Some(pid) = store.daemon_pid()? else {
        println!("Daemon is not running.");
        return Ok(());
    };
    if !process::is_alive(pid) {
        println!("Daemon is not running (stale PID {pid} cleared).");
        store.set_daemon_pid(None)?;
        return Ok(());
    }

    if !process::terminate(pid) {
        bail!("failed to signal daemon (PID {pid})");
    }
    // The daemon drains in-flight syncs before exiting.
    for _ in 0..50 {
        if !process::is_alive(pid) {
            println!("Daemon stopped.");
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    println!("Daemon (PID {pid}) is still draining; it exits once in-flight syncs finish.");
    Ok(())
}

pub fn status(store: &ConfigStore) -> Result<()> {
    match store.daemon_pid()? {
        Some(pid) if process::is_alive(pid) => println!("Daemon: running (PID {pid})"),
        Some(pid) => println!("Daemon: not running (stale PID {pid})"),
        None => println!("Daemon: not running"),
    }

    let config = store.load()?;
    let active = config.repositories.iter().filter(|r| r.active).count();
    println!(
        "Repositories: {} configured, {} active (poll every {}s)",
        config.repositories.len(),
        active,
        config.poll_interval
    );
    for repo in &config.repositories {
        println!(
            "  {} {} ({}) last sync {}",
            if repo.active { "*" } else { " " },
            urls::strip_credentials(&repo.url),
            repo.branch,
            format_sync(repo.last_sync)
        );
    }
    Ok(())
}

pub fn logs(store: &ConfigStore, url: Option<&str>, lines: usize) -> Result<()> {
    let log_dir = store.log_directory();
    let Some(url) = url else {
        let mut names: Vec<String> = match std::fs::read_dir(&log_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".log"))
                .collect(),
            Err(_) => Vec::new(),
        };
        if names.is_empty() {
            println!("No repository logs in {}", log_dir.display());
            return Ok(());
        }
        names.sort();
        println!("Repository logs in {}:", log_dir.display());
        for name in names {
            println!("  {name}");
        }
        return Ok(());
    };

    let path = repolog::log_path(&log_dir, url);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("no log found at {}", path.display()))?;
    for line in tail_lines(&content, lines) {
        println!("{line}");
    }
    Ok(())
}

pub fn provider_register(
    store: &ConfigStore,
    name: String,
    kind: &str,
    base_url: String,
    api_url: Option<String>,
) -> Result<()> {
    let kind: ProviderKind = kind.parse().map_err(|msg: String| anyhow!(msg))?;
    let instance = ProviderInstance { name: name.clone(), kind, base_url, api_url };
    store.add_provider_instance(instance)?;
    println!("Registered provider instance {name} ({kind})");
    println!(
        "Set SPDEPLOY_{}_TOKEN to authenticate against it.",
        spdeploy_common::providers::env_var_component(&name)
    );
    Ok(())
}

pub fn provider_remove(store: &ConfigStore, name: &str) -> Result<()> {
    store.remove_provider_instance(name)?;
    println!("Removed provider instance {name}");
    Ok(())
}

pub fn provider_list(store: &ConfigStore) -> Result<()> {
    let instances = store.list_provider_instances()?;
    if instances.is_empty() {
        println!("No provider instances registered.");
        return Ok(());
    }
    for instance in instances {
        println!("{} ({})", instance.name, instance.kind);
        println!("    base url: {}", instance.base_url);
        if let Some(api) = instance.effective_api_url() {
            println!("    api url:  {api}");
        }
    }
    Ok(())
}

pub async fn provider_detect(store: &ConfigStore, url: &str) -> Result<()> {
    let registry = registry_from(store).await?;
    let handle = registry.detect_with_probe(url).await;

    println!("Provider: {} ({})", handle.name(), handle.kind);
    match handle.api_base() {
        Some(api) => println!("API:      {api}"),
        None => println!("API:      none"),
    }
    println!("Token:    {}", handle.token_env_var());
    println!();
    println!("{}", handle.setup_instructions());
    Ok(())
}

pub async fn provider_test(store: &ConfigStore, url: &str) -> Result<()> {
    let registry = registry_from(store).await?;
    let handle = registry.detect_with_probe(url).await;
    println!("Provider: {} ({})", handle.name(), handle.kind);

    let Some(token) = resolve_token(&handle, "") else {
        let vars = candidate_env_vars(&handle, "");
        bail!("no token found; checked {}", vars.join(", "));
    };
    providers::validate_token(&handle, &token).await?;
    println!("Token accepted by {}.", handle.name());
    Ok(())
}

async fn registry_from(store: &ConfigStore) -> Result<Registry> {
    let registry = Registry::new();
    registry
        .load_instances(&store.list_provider_instances()?)
        .await;
    Ok(registry)
}

fn find_daemon_binary() -> Result<PathBuf> {
    if let Ok(current) = std::env::current_exe() {
        if let Some(dir) = current.parent() {
            let sibling = dir.join(daemon_name());
            if sibling.is_file() {
                return Ok(sibling);
            }
        }
    }
    which::which(daemon_name()).map_err(|_| anyhow!("spdeployd binary not found; is spdeploy installed?"))
}

fn daemon_name() -> &'static str {
    if cfg!(windows) {
        "spdeployd.exe"
    } else {
        "spdeployd"
    }
}

fn format_sync(last_sync: Option<DateTime<Utc>>) -> String {
    match last_sync {
        Some(ts) => ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        None => "never".to_string(),
    }
}

fn tail_lines(content: &str, count: usize) -> Vec<&str> {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].to_vec()
}
