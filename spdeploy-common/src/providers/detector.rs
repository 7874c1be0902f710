//! Active provider probing for unknown hosts.
//!
//! Issues read-only HTTP requests against well-known endpoints, scores
//! the responses, and memoizes the verdict per host. Probes never carry
//! credentials.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use super::ProviderKind;

/// Minimum confidence required to accept a probe verdict.
const MIN_CONFIDENCE: f64 = 0.5;

/// Per-request probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap on fetched HTML when falling back to page inspection.
const MAX_HTML_BYTES: usize = 1024 * 1024;

/// Outcome of probing one host.
#[derive(Debug, Clone)]
pub struct Detection {
    pub kind: ProviderKind,
    pub api_url: Option<String>,
    pub version: Option<String>,
    pub confidence: f64,
}

pub(crate) struct Detector {
    client: reqwest::Client,
    /// Verdicts per base URL; `None` records a failed probe so the
    /// host is not hammered on every tick.
    cache: RwLock<HashMap<String, Option<Detection>>>,
}

impl Detector {
    pub(crate) fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Probe a base URL (`https://host[:port]`), memoized.
    pub(crate) async fn probe(&self, base_url: &str) -> Option<Detection> {
        if let Some(cached) = self.cache.read().await.get(base_url) {
            return cached.clone();
        }

        let detection = self.probe_uncached(base_url).await;
        match &detection {
            Some(found) => debug!(
                base_url,
                kind = %found.kind,
                confidence = found.confidence,
                "Host probe succeeded"
            ),
            None => debug!(base_url, "Host probe found no known provider"),
        }
        self.cache
            .write()
            .await
            .insert(base_url.to_string(), detection.clone());
        detection
    }

    async fn probe_uncached(&self, base_url: &str) -> Option<Detection> {
        let candidates = [
            self.try_gitlab(base_url).await,
            self.try_gitea(base_url).await,
            self.try_bitbucket(base_url).await,
            self.try_gogs(base_url).await,
            self.try_html(base_url).await,
            self.fingerprint(base_url).await,
        ];
        candidates
            .into_iter()
            .flatten()
            .filter(|d| d.confidence >= MIN_CONFIDENCE)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    async fn get(&self, url: &str) -> Option<reqwest::Response> {
        self.client
            .get(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .ok()
    }

    async fn try_gitlab(&self, base_url: &str) -> Option<Detection> {
        #[derive(Deserialize)]
        struct VersionInfo {
            version: String,
        }

        let response = self.get(&format!("{base_url}/api/v4/version")).await?;
        if !response.status().is_success() {
            return None;
        }
        let info: VersionInfo = response.json().await.ok()?;
        Some(Detection {
            kind: ProviderKind::Gitlab,
            api_url: Some(format!("{base_url}/api/v4")),
            version: Some(info.version),
            confidence: 1.0,
        })
    }

    async fn try_gitea(&self, base_url: &str) -> Option<Detection> {
        #[derive(Deserialize)]
        struct VersionInfo {
            version: String,
        }

        let response = self.get(&format!("{base_url}/api/v1/version")).await?;
        if !response.status().is_success() {
            return None;
        }
        let info: VersionInfo = response.json().await.ok()?;
        Some(Detection {
            kind: ProviderKind::Gitea,
            api_url: Some(format!("{base_url}/api/v1")),
            version: Some(info.version),
            confidence: 1.0,
        })
    }

    async fn try_bitbucket(&self, base_url: &str) -> Option<Detection> {
        #[derive(Deserialize)]
        struct AppProps {
            version: Option<String>,
            #[serde(rename = "displayName")]
            display_name: Option<String>,
        }

        let url = format!("{base_url}/rest/api/1.0/application-properties");
        let response = self.get(&url).await?;
        if !response.status().is_success() {
            return None;
        }
        let props: AppProps = response.json().await.ok()?;
        let named_bitbucket = props
            .display_name
            .as_deref()
            .is_some_and(|name| name.to_ascii_lowercase().contains("bitbucket"));
        if !named_bitbucket {
            return None;
        }
        Some(Detection {
            kind: ProviderKind::Bitbucket,
            api_url: Some(format!("{base_url}/rest/api/1.0")),
            version: props.version,
            confidence: 1.0,
        })
    }

    async fn try_gogs(&self, base_url: &str) -> Option<Detection> {
        let response = self.get(&format!("{base_url}/api/v1/repos/search")).await?;
        if !response.status().is_success() {
            return None;
        }
        let gogs_header = response
            .headers()
            .get("X-Content-Type-Options")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("gogs"));
        if !gogs_header {
            return None;
        }
        Some(Detection {
            kind: ProviderKind::Gogs,
            api_url: Some(format!("{base_url}/api/v1")),
            version: None,
            confidence: 0.9,
        })
    }

    async fn try_html(&self, base_url: &str) -> Option<Detection> {
        let response = self.get(base_url).await?;
        if !response.status().is_success() {
            return None;
        }
        let body = response.text().await.ok()?;
        let body = &body[..body.len().min(MAX_HTML_BYTES)];
        classify_html(body, base_url)
    }

    /// Score a provider by how many of its well-known paths answer.
    async fn fingerprint(&self, base_url: &str) -> Option<Detection> {
        let fingerprints: [(ProviderKind, &[&str]); 4] = [
            (ProviderKind::Gitlab, &["/api/v4/version", "/users/sign_in", "/-/profile"]),
            (ProviderKind::Gitea, &["/api/v1/version", "/user/login", "/explore/repos"]),
            (ProviderKind::Bitbucket, &["/rest/api/1.0/projects", "/login"]),
            (ProviderKind::Gogs, &["/api/v1/users", "/user/login", "/explore/repos"]),
        ];

        let mut best: Option<Detection> = None;
        for (kind, endpoints) in fingerprints {
            let mut matched = 0usize;
            for endpoint in endpoints {
                let answered = self
                    .client
                    .head(format!("{base_url}{endpoint}"))
                    .timeout(PROBE_TIMEOUT)
                    .send()
                    .await
                    .map(|r| r.status().as_u16() < 400)
                    .unwrap_or(false);
                if answered {
                    matched += 1;
                }
            }
            let confidence = matched as f64 / endpoints.len() as f64;
            if confidence >= MIN_CONFIDENCE
                && best.as_ref().is_none_or(|b| confidence > b.confidence)
            {
                best = Some(Detection {
                    kind,
                    api_url: kind.api_suffix().map(|s| format!("{base_url}{s}")),
                    version: None,
                    confidence,
                });
            }
        }
        best
    }
}

/// Classify a landing page by provider-specific markers.
pub(crate) fn classify_html(body: &str, base_url: &str) -> Option<Detection> {
    let markers: [(ProviderKind, &[&str], f64); 4] = [
        (
            ProviderKind::Gitlab,
            &["gitlab-logo", "<meta content='GitLab", "gon.gitlab_url"],
            0.8,
        ),
        (
            ProviderKind::Gitea,
            &["Powered by Gitea", "gitea-version", "window.config.appName = \"Gitea\""],
            0.8,
        ),
        (ProviderKind::Gogs, &["Powered by Gogs", "gogs-version"], 0.7),
        (ProviderKind::Bitbucket, &["bitbucket-logo", "Bitbucket"], 0.7),
    ];

    for (kind, needles, confidence) in markers {
        if needles.iter().any(|needle| body.contains(needle)) {
            return Some(Detection {
                kind,
                api_url: kind.api_suffix().map(|s| format!("{base_url}{s}")),
                version: None,
                confidence,
            });
        }
    }
    None
}
