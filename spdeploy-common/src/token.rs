//! Environment-based token resolution.
//!
//! Candidate variables are tried in a fixed priority order; the first
//! non-empty value wins. Resolved tokens must never reach a log line:
//! diagnostics use the credential-stripped URL forms.

use tracing::debug;

use crate::providers::{env_var_component, ProviderHandle};

/// Candidate environment variables for a repository, most specific
/// first: per-repo, per-instance, provider default, provider generic.
/// An empty `repo_id` (no repository context) skips the per-repo slot.
pub fn candidate_env_vars(handle: &ProviderHandle, repo_id: &str) -> Vec<String> {
    let mut candidates = Vec::with_capacity(4);
    if !repo_id.is_empty() {
        candidates.push(format!("SPDEPLOY_REPO_{}_TOKEN", env_var_component(repo_id)));
    }
    if let Some(instance) = &handle.instance {
        candidates.push(format!(
            "SPDEPLOY_{}_TOKEN",
            env_var_component(&instance.name)
        ));
    }
    candidates.push(handle.token_env_var());
    candidates.push(format!(
        "SPDEPLOY_{}_TOKEN",
        handle.kind.as_str().to_ascii_uppercase()
    ));
    candidates.dedup();
    candidates
}

/// Resolve a token for the repository, or `None` when no variable is
/// set; the git adapter then proceeds without injected credentials.
pub fn resolve_token(handle: &ProviderHandle, repo_id: &str) -> Option<String> {
    for var in candidate_env_vars(handle, repo_id) {
        if let Ok(value) = std::env::var(&var) {
            let value = value.trim();
            if !value.is_empty() {
                debug!(env_var = %var, repo_id, "Resolved token from environment");
                return Some(value.to_string());
            }
        }
    }
    debug!(repo_id, provider = handle.name(), "No token found in environment");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env_test_lock;
    use crate::providers::{ProviderHandle, ProviderInstance, ProviderKind};

    fn clear(vars: &[&str]) {
        for var in vars {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_priority_order() {
        let _guard = env_test_lock();
        let vars = [
            "SPDEPLOY_REPO_R1_TOKEN",
            "SPDEPLOY_CORP_TOKEN",
            "SPDEPLOY_GITLAB_TOKEN",
        ];
        clear(&vars);

        let handle = ProviderHandle {
            kind: ProviderKind::Gitlab,
            instance: Some(ProviderInstance {
                name: "corp".to_string(),
                kind: ProviderKind::Gitlab,
                base_url: "https://git.corp.example".to_string(),
                api_url: None,
            }),
        };

        std::env::set_var("SPDEPLOY_GITLAB_TOKEN", "provider-default");
        assert_eq!(resolve_token(&handle, "r1").as_deref(), Some("provider-default"));

        std::env::set_var("SPDEPLOY_CORP_TOKEN", "instance-level");
        assert_eq!(resolve_token(&handle, "r1").as_deref(), Some("instance-level"));

        std::env::set_var("SPDEPLOY_REPO_R1_TOKEN", "repo-level");
        assert_eq!(resolve_token(&handle, "r1").as_deref(), Some("repo-level"));

        clear(&vars);
    }

    #[test]
    fn test_empty_and_whitespace_values_skipped() {
        let _guard = env_test_lock();
        let vars = ["SPDEPLOY_REPO_R2_TOKEN", "SPDEPLOY_GITHUB_TOKEN"];
        clear(&vars);

        let handle = ProviderHandle { kind: ProviderKind::Github, instance: None };
        std::env::set_var("SPDEPLOY_REPO_R2_TOKEN", "   ");
        std::env::set_var("SPDEPLOY_GITHUB_TOKEN", " padded ");
        assert_eq!(resolve_token(&handle, "r2").as_deref(), Some("padded"));

        clear(&vars);
        assert_eq!(resolve_token(&handle, "r2"), None);
    }

    #[test]
    fn test_candidate_vars_for_builtin_provider() {
        let handle = ProviderHandle { kind: ProviderKind::Github, instance: None };
        assert_eq!(
            candidate_env_vars(&handle, "web-app"),
            vec![
                "SPDEPLOY_REPO_WEB_APP_TOKEN".to_string(),
                "SPDEPLOY_GITHUB_TOKEN".to_string(),
            ]
        );
    }
}
