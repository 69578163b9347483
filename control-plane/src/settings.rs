use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use storage_backend::config::DEFAULT_ROOT;
use storage_backend::{StorageConfig, StorageOptions};

use crate::config_watcher::InitialListPolicy;

pub const DEFAULT_SYNC_FREQUENCY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Settings {
    pub storage: StorageConfig,
    pub storage_options: StorageOptions,
    pub secrets_dir: PathBuf,
    /// Fallback re-read interval for the secret directory
    pub secret_sync_frequency: Duration,
    pub initial_list_policy: InitialListPolicy,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings from any key/value source shaped like the environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = lookup("STORAGE_BACKEND").unwrap_or_else(|| "local".to_string());
        let storage = match backend.as_str() {
            "memory" => StorageConfig::Memory,
            "local" => {
                let path = lookup("STORAGE_PATH").unwrap_or_else(|| "./data".to_string());
                StorageConfig::local(path)
            }
            _ => bail!(
                "Unknown storage backend: {}. Must be 'memory' or 'local'",
                backend
            ),
        };

        let sync_frequency = match lookup("SYNC_FREQUENCY_MS") {
            Some(raw) => {
                let millis = raw.parse::<u64>().with_context(|| {
                    format!("SYNC_FREQUENCY_MS must be a number of milliseconds, got {raw:?}")
                })?;
                if millis == 0 {
                    bail!("SYNC_FREQUENCY_MS must be greater than zero");
                }
                Duration::from_millis(millis)
            }
            None => DEFAULT_SYNC_FREQUENCY,
        };

        let root = lookup("STORAGE_ROOT").unwrap_or_else(|| DEFAULT_ROOT.to_string());
        let secrets_dir = lookup("SECRETS_DIR").unwrap_or_else(|| "./secrets".to_string());
        let initial_list_policy = match lookup("INITIAL_LIST_POLICY") {
            Some(raw) => raw.parse()?,
            None => InitialListPolicy::default(),
        };

        Ok(Self {
            storage,
            storage_options: StorageOptions::new(root, sync_frequency),
            secrets_dir: PathBuf::from(secrets_dir),
            secret_sync_frequency: sync_frequency,
            initial_list_policy,
        })
    }
}
