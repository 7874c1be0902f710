//! Shared library for the spdeploy continuous-deployment supervisor.
//!
//! Holds the pieces both binaries need: the data model, URL
//! canonicalization, the provider registry with host detection, the
//! environment-based token resolver, the on-disk configuration store,
//! and the per-repository log sinks.

pub mod config;
pub mod error;
pub mod providers;
pub mod repolog;
pub mod token;
pub mod types;
pub mod urls;

pub use config::{Config, ConfigStore, NewRepository, UpdateSyncOutcome};
pub use error::ConfigError;
pub use providers::{ProviderHandle, ProviderInstance, ProviderKind, Registry};
pub use repolog::RepoLog;
pub use types::{Change, ChangeKind, Repository, TriggerKind};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
}
