use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ROOT: &str = "gateway";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageConfig {
    /// Process-local store; supports conditional updates natively
    Memory,
    Local { path: PathBuf },
}

impl StorageConfig {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local { path: path.into() }
    }
}

/// Options shared by every resource client of one storage instance
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Prefix every key is stored under
    pub root: String,
    /// How often watchers re-list the backend
    pub poll_interval: Duration,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl StorageOptions {
    pub fn new(root: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            root: root.into(),
            poll_interval,
        }
    }
}
