//! Git hosting provider registry.
//!
//! A provider is a capability record: detect a host, build an
//! authenticated fetch URL, name the token environment variable, and
//! optionally point at a change API. Dispatch is by [`ProviderKind`]
//! tag; new kinds are added here and in their own rule module without
//! touching the supervisor.

pub mod bitbucket;
pub mod detector;
pub mod generic;
pub mod github;
pub mod gitlab;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ProviderError;
use crate::urls;

pub use detector::Detection;

/// The kinds of git hosts the supervisor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Github,
    Gitlab,
    Bitbucket,
    Gitea,
    Gogs,
    Generic,
    /// Detection failed; authentication falls back to git's own
    /// credential handling.
    Unknown,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
            Self::Bitbucket => "bitbucket",
            Self::Gitea => "gitea",
            Self::Gogs => "gogs",
            Self::Generic => "generic",
            Self::Unknown => "unknown",
        }
    }

    /// API base for the public host of this kind, if there is one.
    pub fn public_api_url(self) -> Option<&'static str> {
        match self {
            Self::Github => Some(github::API_URL),
            Self::Gitlab => Some(gitlab::API_URL),
            Self::Bitbucket => Some(bitbucket::API_URL),
            _ => None,
        }
    }

    /// API path appended to a self-hosted instance's base URL.
    pub fn api_suffix(self) -> Option<&'static str> {
        match self {
            Self::Github => Some("/api/v3"),
            Self::Gitlab => Some("/api/v4"),
            Self::Gitea | Self::Gogs => Some("/api/v1"),
            Self::Bitbucket => Some("/rest/api/1.0"),
            Self::Generic | Self::Unknown => None,
        }
    }

    /// Default token environment variable for the public host.
    pub fn default_token_env_var(self) -> String {
        match self {
            Self::Generic | Self::Unknown => "SPDEPLOY_GIT_TOKEN".to_string(),
            kind => format!("SPDEPLOY_{}_TOKEN", kind.as_str().to_ascii_uppercase()),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::Github),
            "gitlab" => Ok(Self::Gitlab),
            "bitbucket" => Ok(Self::Bitbucket),
            "gitea" => Ok(Self::Gitea),
            "gogs" => Ok(Self::Gogs),
            "generic" => Ok(Self::Generic),
            other => Err(format!(
                "unknown provider type: {other} (must be github, gitlab, bitbucket, gitea, gogs, or generic)"
            )),
        }
    }
}

/// A configured self-hosted git host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstance {
    /// Unique name, used in the `SPDEPLOY_<NAME>_TOKEN` variable.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl ProviderInstance {
    /// API base for this instance, derived from `base_url` when not
    /// configured explicitly.
    pub fn effective_api_url(&self) -> Option<String> {
        if let Some(api) = &self.api_url {
            return Some(api.clone());
        }
        self.kind
            .api_suffix()
            .map(|suffix| format!("{}{}", self.base_url.trim_end_matches('/'), suffix))
    }
}

/// Resolved provider for one repository URL.
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    pub kind: ProviderKind,
    /// Present when the URL matched a registered self-hosted instance.
    pub instance: Option<ProviderInstance>,
}

impl ProviderHandle {
    pub fn unknown() -> Self {
        Self { kind: ProviderKind::Unknown, instance: None }
    }

    /// Instance name for self-hosted hosts, provider name otherwise.
    pub fn name(&self) -> &str {
        match &self.instance {
            Some(instance) => &instance.name,
            None => self.kind.as_str(),
        }
    }

    pub fn api_base(&self) -> Option<String> {
        match &self.instance {
            Some(instance) => instance.effective_api_url(),
            None => self.kind.public_api_url().map(str::to_string),
        }
    }

    /// Environment variable holding this host's token.
    pub fn token_env_var(&self) -> String {
        match &self.instance {
            Some(instance) => format!("SPDEPLOY_{}_TOKEN", env_var_component(&instance.name)),
            None => self.kind.default_token_env_var(),
        }
    }

    /// Build the transient authenticated fetch URL. With an empty token
    /// (or for SSH URLs on providers that keep them) the input is
    /// returned unchanged.
    pub fn authenticated_url(&self, repo_url: &str, token: &str) -> String {
        if token.is_empty() {
            return repo_url.to_string();
        }
        match self.kind {
            ProviderKind::Github => github::authenticated_url(repo_url, token),
            ProviderKind::Gitlab => gitlab::authenticated_url(repo_url, token),
            ProviderKind::Bitbucket => bitbucket::authenticated_url(repo_url, token),
            ProviderKind::Gitea | ProviderKind::Gogs | ProviderKind::Generic => {
                generic::authenticated_url(repo_url, token)
            }
            ProviderKind::Unknown => repo_url.to_string(),
        }
    }

    /// Whether this host exposes a change API the watcher can use to
    /// classify push vs pull-request events. Only public GitHub does;
    /// everything else uses pure git detection.
    pub fn supports_change_api(&self) -> bool {
        self.kind == ProviderKind::Github && self.instance.is_none()
    }

    /// Short token setup guidance shown by `spdeploy provider detect`.
    pub fn setup_instructions(&self) -> String {
        let env_var = self.token_env_var();
        match self.kind {
            ProviderKind::Github => format!(
                "Create a personal access token with the `repo` scope at\n\
                 https://github.com/settings/tokens/new, then:\n  export {env_var}=<your-token>"
            ),
            ProviderKind::Gitlab => format!(
                "Create a personal access token with `read_repository` at\n\
                 <gitlab>/-/profile/personal_access_tokens, then:\n  export {env_var}=<your-token>"
            ),
            ProviderKind::Bitbucket => format!(
                "Create an API token with repository read access in your\n\
                 Bitbucket account settings, then:\n  export {env_var}=<your-token>"
            ),
            ProviderKind::Gitea | ProviderKind::Gogs => format!(
                "Create an access token under Settings > Applications on your\n\
                 instance, then:\n  export {env_var}=<your-token>"
            ),
            ProviderKind::Generic | ProviderKind::Unknown => format!(
                "Authentication methods vary by server. For token auth:\n  export {env_var}=<your-token>\n\
                 For SSH auth, add your key to the server and use an SSH URL."
            ),
        }
    }
}

/// Uppercase a name for use inside an environment variable.
pub fn env_var_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' => c.to_ascii_uppercase(),
            'A'..='Z' | '0'..='9' => c,
            _ => '_',
        })
        .collect()
}

/// Insert a userinfo segment into an HTTP(S) URL, dropping any
/// credentials already present.
pub(crate) fn insert_userinfo(repo_url: &str, userinfo: &str) -> String {
    let clean = urls::strip_credentials(repo_url);
    if let Some(rest) = clean.strip_prefix("https://") {
        format!("https://{userinfo}@{rest}")
    } else if let Some(rest) = clean.strip_prefix("http://") {
        format!("http://{userinfo}@{rest}")
    } else {
        repo_url.to_string()
    }
}

/// Hosts with fixed kinds, checked before probing.
fn builtin_kind(host: &str) -> Option<ProviderKind> {
    match host {
        "github.com" => Some(ProviderKind::Github),
        "gitlab.com" => Some(ProviderKind::Gitlab),
        "bitbucket.org" => Some(ProviderKind::Bitbucket),
        "codeberg.org" | "gitea.com" => Some(ProviderKind::Gitea),
        _ => None,
    }
}

/// Registry of provider instances plus host detection.
///
/// Detection order: exact host match against registered instances,
/// built-in public host rules, then active probing (cached per host).
pub struct Registry {
    instances: RwLock<HashMap<String, ProviderInstance>>,
    detector: detector::Detector,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            detector: detector::Detector::new(),
        }
    }

    /// Register one self-hosted instance, keyed by its host.
    pub async fn register_instance(&self, instance: ProviderInstance) {
        if let Some(host) = urls::host_of(&instance.base_url) {
            self.instances.write().await.insert(host, instance);
        } else {
            debug!(base_url = %instance.base_url, "Ignoring provider instance with unparseable base URL");
        }
    }

    /// Replace the registered instance set, as the reload diff does.
    pub async fn load_instances(&self, instances: &[ProviderInstance]) {
        let mut map = HashMap::new();
        for instance in instances {
            match urls::host_of(&instance.base_url) {
                Some(host) => {
                    map.insert(host, instance.clone());
                }
                None => debug!(
                    base_url = %instance.base_url,
                    "Ignoring provider instance with unparseable base URL"
                ),
            }
        }
        *self.instances.write().await = map;
    }

    pub async fn instances(&self) -> Vec<ProviderInstance> {
        self.instances.read().await.values().cloned().collect()
    }

    /// Resolve a URL to a provider using instances and built-in host
    /// rules only. Never touches the network.
    pub async fn detect(&self, repo_url: &str) -> ProviderHandle {
        let Some(host) = urls::host_of(repo_url) else {
            return ProviderHandle::unknown();
        };
        if let Some(instance) = self.instances.read().await.get(&host) {
            return ProviderHandle { kind: instance.kind, instance: Some(instance.clone()) };
        }
        match builtin_kind(&host) {
            Some(kind) => ProviderHandle { kind, instance: None },
            None => ProviderHandle::unknown(),
        }
    }

    /// [`Registry::detect`], falling back to read-only probing of
    /// well-known endpoints for unknown hosts. Probe results are
    /// memoized by host; probes never carry credentials.
    pub async fn detect_with_probe(&self, repo_url: &str) -> ProviderHandle {
        let handle = self.detect(repo_url).await;
        if handle.kind != ProviderKind::Unknown {
            return handle;
        }
        let Some(base) = urls::base_url(repo_url) else {
            return handle;
        };
        match self.detector.probe(&base).await {
            Some(detection) => {
                let host = urls::host_of(repo_url).unwrap_or_else(|| base.clone());
                debug!(
                    host = %host,
                    kind = %detection.kind,
                    confidence = detection.confidence,
                    "Provider detected by probing"
                );
                ProviderHandle {
                    kind: detection.kind,
                    instance: Some(ProviderInstance {
                        name: host,
                        kind: detection.kind,
                        base_url: base,
                        api_url: detection.api_url,
                    }),
                }
            }
            None => handle,
        }
    }
}

/// Issue a read-only authenticated API request to check that a token is
/// accepted by the host.
pub async fn validate_token(handle: &ProviderHandle, token: &str) -> Result<(), ProviderError> {
    if token.is_empty() {
        return Err(ProviderError::EmptyToken);
    }
    let Some(api) = handle.api_base() else {
        return Err(ProviderError::ValidationUnsupported(handle.kind));
    };
    let client = reqwest::Client::new();
    let timeout = std::time::Duration::from_secs(10);
    let response = match handle.kind {
        ProviderKind::Github => {
            client
                .get(format!("{api}/user"))
                .bearer_auth(token)
                .header("Accept", "application/vnd.github.v3+json")
                .header("User-Agent", concat!("spdeploy/", env!("CARGO_PKG_VERSION")))
                .timeout(timeout)
                .send()
                .await?
        }
        ProviderKind::Gitlab => {
            client
                .get(format!("{api}/user"))
                .header("PRIVATE-TOKEN", token)
                .timeout(timeout)
                .send()
                .await?
        }
        ProviderKind::Bitbucket => {
            client
                .get(format!("{api}/repositories"))
                .bearer_auth(token)
                .timeout(timeout)
                .send()
                .await?
        }
        ProviderKind::Gitea | ProviderKind::Gogs => {
            client
                .get(format!("{api}/version"))
                .header("Authorization", format!("token {token}"))
                .timeout(timeout)
                .send()
                .await?
        }
        ProviderKind::Generic | ProviderKind::Unknown => {
            return Err(ProviderError::ValidationUnsupported(handle.kind));
        }
    };

    let status = response.status();
    // Bitbucket answers 401 for a well-formed token that lacks scopes;
    // the endpoint being reachable is what this check establishes there.
    let accepted = status.is_success()
        || (handle.kind == ProviderKind::Bitbucket && status.as_u16() == 401);
    if accepted {
        Ok(())
    } else {
        Err(ProviderError::InvalidToken(status.as_u16()))
    }
}
