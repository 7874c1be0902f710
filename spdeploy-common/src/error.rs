//! Error types for the shared library.

use std::path::PathBuf;

use thiserror::Error;

use crate::providers::ProviderKind;

/// Configuration store failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("repository already configured for {url} ({branch}) at {path}")]
    DuplicateRepository {
        url: String,
        branch: String,
        path: PathBuf,
    },

    #[error("repository not found")]
    RepositoryNotFound,

    #[error("provider instance {0} is already registered")]
    DuplicateInstance(String),

    #[error("provider instance {0} not found")]
    InstanceNotFound(String),
}

/// Provider registry and token validation failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("token is empty")]
    EmptyToken,

    #[error("token validation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid token (status: {0})")]
    InvalidToken(u16),

    #[error("token validation is not supported for {0} providers")]
    ValidationUnsupported(ProviderKind),
}
