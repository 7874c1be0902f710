//! Deployment script discovery and execution.
//!
//! After a successful pull the watcher looks for a deployment script in
//! the working tree root and runs it with a documented environment and
//! a hard timeout. A missing script is not an error; a failing script
//! is logged but never rolls back the sync.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::git::HeadInfo;

/// Default bound on script execution.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[cfg(not(windows))]
const SCRIPT_CANDIDATES: &[&str] = &["spdeploy.sh", "spdeploy"];

#[cfg(windows)]
const SCRIPT_CANDIDATES: &[&str] = &["spdeploy.bat", "spdeploy.cmd", "spdeploy.ps1", "spdeploy.sh"];

/// Outcome of one script run.
#[derive(Debug, Clone)]
pub struct ScriptResult {
    pub success: bool,
    /// Combined stdout and stderr.
    pub output: String,
    pub error: Option<String>,
    /// Process exit code; `-1` for a timeout or signal death.
    pub exit_code: i32,
    pub duration: Duration,
    pub script_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScriptRunner {
    timeout: Duration,
}

impl ScriptRunner {
    pub fn new(script_timeout: Duration) -> Self {
        let script_timeout = if script_timeout.is_zero() {
            DEFAULT_SCRIPT_TIMEOUT
        } else {
            script_timeout
        };
        Self { timeout: script_timeout }
    }

    /// Locate the deployment script in the working tree root.
    ///
    /// An explicit relative path from the repository record wins;
    /// otherwise the platform candidate list is probed in order and the
    /// first regular file is taken. On POSIX a file without any
    /// executable bit gets `0o755` added; if that fails the candidate
    /// is skipped.
    pub fn find_script(&self, repo_path: &Path, explicit: Option<&str>) -> Option<PathBuf> {
        if let Some(relative) = explicit {
            let candidate = repo_path.join(relative);
            if candidate.is_file() {
                return self.executable(candidate);
            }
            warn!(script = relative, path = %repo_path.display(), "Configured deployment script not found");
            return None;
        }

        for name in SCRIPT_CANDIDATES {
            let candidate = repo_path.join(name);
            if candidate.is_file() {
                if let Some(found) = self.executable(candidate) {
                    info!(script = %found.display(), "Found deployment script");
                    return Some(found);
                }
            }
        }
        None
    }

    #[cfg(unix)]
    fn executable(&self, script: PathBuf) -> Option<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(&script).ok()?;
        let mode = metadata.permissions().mode();
        if mode & 0o111 != 0 {
            return Some(script);
        }
        let mut permissions = metadata.permissions();
        permissions.set_mode(mode | 0o755);
        match std::fs::set_permissions(&script, permissions) {
            Ok(()) => Some(script),
            Err(err) => {
                warn!(
                    script = %script.display(),
                    error = %err,
                    "Found script but couldn't make it executable"
                );
                None
            }
        }
    }

    #[cfg(not(unix))]
    fn executable(&self, script: PathBuf) -> Option<PathBuf> {
        Some(script)
    }

    /// Run the script from the repository root with the injected
    /// environment. The child is killed on timeout.
    pub async fn execute(
        &self,
        script: &Path,
        repo_path: &Path,
        head: Option<&HeadInfo>,
    ) -> ScriptResult {
        info!(
            script = %script.display(),
            repo_path = %repo_path.display(),
            timeout_secs = self.timeout.as_secs(),
            "Executing deployment script"
        );

        let start = Instant::now();
        let mut cmd = command_for(script);
        cmd.current_dir(repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("SPDEPLOY_REPO_PATH", repo_path)
            .env(
                "SPDEPLOY_TIMESTAMP",
                Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            )
            .env("SPDEPLOY_VERSION", env!("CARGO_PKG_VERSION"));
        if let Some(head) = head {
            cmd.env("SPDEPLOY_GIT_BRANCH", &head.branch)
                .env("SPDEPLOY_GIT_COMMIT", &head.commit);
            if let Some(remote) = &head.remote {
                cmd.env("SPDEPLOY_GIT_REMOTE", remote);
            }
        }

        match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let exit_code = output.status.code().unwrap_or(-1);
                ScriptResult {
                    success: output.status.success(),
                    error: if output.status.success() {
                        None
                    } else {
                        Some(format!("script exited with code {exit_code}"))
                    },
                    output: combined,
                    exit_code,
                    duration: start.elapsed(),
                    script_path: script.to_path_buf(),
                }
            }
            Ok(Err(err)) => ScriptResult {
                success: false,
                output: String::new(),
                error: Some(format!("failed to launch script: {err}")),
                exit_code: -1,
                duration: start.elapsed(),
                script_path: script.to_path_buf(),
            },
            Err(_) => ScriptResult {
                success: false,
                output: String::new(),
                error: Some(format!(
                    "script execution timed out after {}s",
                    self.timeout.as_secs()
                )),
                exit_code: -1,
                duration: start.elapsed(),
                script_path: script.to_path_buf(),
            },
        }
    }
}

#[cfg(not(windows))]
fn command_for(script: &Path) -> Command {
    match script.extension().and_then(|e| e.to_str()) {
        Some("sh") => {
            let mut cmd = Command::new("/bin/bash");
            cmd.arg(script);
            cmd
        }
        _ => Command::new(script),
    }
}

#[cfg(windows)]
fn command_for(script: &Path) -> Command {
    match script.extension().and_then(|e| e.to_str()) {
        Some("ps1") => {
            let mut cmd = Command::new("powershell");
            cmd.args(["-ExecutionPolicy", "Bypass", "-File"]).arg(script);
            cmd
        }
        Some("bat") | Some("cmd") => {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(script);
            cmd
        }
        _ => Command::new(script),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_find_script_prefers_shell_candidate() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "spdeploy.sh", "true");
        let runner = ScriptRunner::new(DEFAULT_SCRIPT_TIMEOUT);
        let found = runner.find_script(dir.path(), None).unwrap();
        assert_eq!(found.file_name().unwrap(), "spdeploy.sh");
    }

    #[test]
    fn test_find_script_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptRunner::new(DEFAULT_SCRIPT_TIMEOUT);
        assert!(runner.find_script(dir.path(), None).is_none());
    }

    #[test]
    fn test_find_script_adds_exec_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spdeploy.sh");
        std::fs::write(&path, "#!/bin/sh\ntrue\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let runner = ScriptRunner::new(DEFAULT_SCRIPT_TIMEOUT);
        let found = runner.find_script(dir.path(), None).unwrap();
        let mode = std::fs::metadata(&found).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }

    #[test]
    fn test_explicit_script_overrides_discovery() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "spdeploy.sh", "true");
        write_script(dir.path(), "release.sh", "true");
        let runner = ScriptRunner::new(DEFAULT_SCRIPT_TIMEOUT);
        let found = runner.find_script(dir.path(), Some("release.sh")).unwrap();
        assert_eq!(found.file_name().unwrap(), "release.sh");
        assert!(runner.find_script(dir.path(), Some("missing.sh")).is_none());
    }

    #[tokio::test]
    async fn test_execute_injects_environment() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "spdeploy.sh",
            "echo \"path=$SPDEPLOY_REPO_PATH branch=$SPDEPLOY_GIT_BRANCH commit=$SPDEPLOY_GIT_COMMIT\"",
        );
        let head = HeadInfo {
            branch: "main".to_string(),
            commit: "abc123".to_string(),
            remote: Some("https://github.com/acme/site".to_string()),
        };

        let runner = ScriptRunner::new(Duration::from_secs(30));
        let result = runner.execute(&script, dir.path(), Some(&head)).await;
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains(&format!("path={}", dir.path().display())));
        assert!(result.output.contains("branch=main"));
        assert!(result.output.contains("commit=abc123"));
    }

    #[tokio::test]
    async fn test_execute_reports_failure_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "spdeploy.sh", "echo broken >&2\nexit 3");
        let runner = ScriptRunner::new(Duration::from_secs(30));
        let result = runner.execute(&script, dir.path(), None).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert!(result.output.contains("broken"));
        assert!(result.error.unwrap().contains("code 3"));
    }

    #[tokio::test]
    async fn test_execute_kills_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "spdeploy.sh", "sleep 30");
        let runner = ScriptRunner::new(Duration::from_millis(300));

        let started = Instant::now();
        let result = runner.execute(&script, dir.path(), None).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.error.unwrap().contains("timed out"));
    }
}
