pub mod config_watcher;
pub mod secret_watcher;
pub mod settings;

use tokio::sync::mpsc;

pub use config_watcher::{ConfigWatcher, ConfigWatcherOptions, InitialListPolicy};
pub use secret_watcher::{FileSecretWatcher, SecretError, SecretTracker};
pub use settings::Settings;

/// Bound on errors queued for a consumer that is not keeping up
pub const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Single-consumer output of a watcher
pub struct WatchStreams<T> {
    /// Holds at most one undelivered item; producers wait for it to be taken
    pub updates: mpsc::Receiver<T>,
    /// Failures that did not stop the watcher
    pub errors: mpsc::Receiver<anyhow::Error>,
}
