//! Delivers the contents of tracked secret files whenever they change.
//!
//! Each tracked reference names a JSON document in the watched directory
//! holding a flat string-to-string map. Re-evaluation happens on directory
//! notifications and on a fixed interval; a content digest of the merged map
//! suppresses deliveries that would repeat the previous one.

mod error;


use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use shared_types::SecretMap;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{WatchStreams, ERROR_CHANNEL_CAPACITY};

pub use error::SecretError;

pub struct FileSecretWatcher {
    shared: Arc<Shared>,
    triggers: mpsc::Receiver<()>,
    sync_frequency: Duration,
    // Dropping the watcher stops directory notifications
    _fs_watcher: RecommendedWatcher,
}

/// Cloneable handle for changing which secrets are tracked
#[derive(Clone)]
pub struct SecretTracker {
    shared: Arc<Shared>,
}

struct Shared {
    dir: PathBuf,
    tracked: ArcSwap<Vec<String>>,
    last_seen: AtomicU64,
    secrets: mpsc::Sender<SecretMap>,
    errors: mpsc::Sender<anyhow::Error>,
}

impl FileSecretWatcher {
    /// Watch `dir` for secret files, creating it if needed. The directory is
    /// also re-read every `sync_frequency` in case a notification is missed.
    pub fn new(
        dir: impl Into<PathBuf>,
        sync_frequency: Duration,
    ) -> Result<(Self, WatchStreams<SecretMap>)> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create secret directory {dir:?}"))?;

        let (trigger_tx, triggers) = mpsc::channel(1);
        let mut fs_watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove() {
                        // A full channel already holds a pending re-evaluation
                        let _ = trigger_tx.try_send(());
                    }
                }
                Err(e) => warn!("Secret directory watch error: {:?}", e),
            }
        })
        .context("failed to start secret directory watcher")?;
        fs_watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch secret directory {dir:?}"))?;

        let (secrets_tx, secrets_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        info!(path = ?dir, "Secret watcher started");
        let watcher = Self {
            shared: Arc::new(Shared {
                dir,
                tracked: ArcSwap::from_pointee(Vec::new()),
                last_seen: AtomicU64::new(0),
                secrets: secrets_tx,
                errors: error_tx,
            }),
            triggers,
            sync_frequency,
            _fs_watcher: fs_watcher,
        };
        let streams = WatchStreams {
            updates: secrets_rx,
            errors: error_rx,
        };
        Ok((watcher, streams))
    }

    pub fn tracker(&self) -> SecretTracker {
        SecretTracker {
            shared: Arc::clone(&self.shared),
        }
    }

    pub async fn track_secrets(&self, secret_refs: Vec<String>) {
        self.shared.track(secret_refs).await;
    }

    /// Re-evaluate once immediately, then on every directory change or
    /// interval tick, until `stop` is cancelled.
    pub async fn run(mut self, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.sync_frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => {}
                Some(()) = self.triggers.recv() => {}
            }

            tokio::select! {
                () = stop.cancelled() => break,
                () = self.shared.update_secrets() => {}
            }
        }

        info!("Secret watcher stopped");
    }
}

impl SecretTracker {
    /// Replace the tracked set and re-evaluate right away
    pub async fn track_secrets(&self, secret_refs: Vec<String>) {
        self.shared.track(secret_refs).await;
    }

    /// Track every set published on `secret_refs`, in publication order,
    /// until `stop` is cancelled or the sender is dropped. Sets replaced
    /// before they were picked up are never applied.
    pub async fn follow(
        self,
        mut secret_refs: watch::Receiver<Vec<String>>,
        stop: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                changed = secret_refs.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let latest = secret_refs.borrow_and_update().clone();
            tokio::select! {
                () = stop.cancelled() => break,
                () = self.track_secrets(latest) => {}
            }
        }

        debug!("Stopped following secret references");
    }
}

impl Shared {
    async fn track(&self, secret_refs: Vec<String>) {
        debug!("Tracking {} secret(s)", secret_refs.len());
        self.tracked.store(Arc::new(secret_refs));
        self.update_secrets().await;
    }

    async fn update_secrets(&self) {
        match self.read_secrets().await {
            Ok(Some(secrets)) => {
                if self.secrets.send(secrets).await.is_err() {
                    debug!("Secret receiver dropped; secrets discarded");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to read secrets: {:#}", e);
                if self.errors.send(e).await.is_err() {
                    debug!("Error receiver dropped");
                }
            }
        }
    }

    /// The merged secret map if it differs from the last one handed out.
    /// Any unreadable or malformed file fails the whole evaluation.
    async fn read_secrets(&self) -> Result<Option<SecretMap>> {
        let tracked = self.tracked.load_full();
        if tracked.is_empty() {
            return Ok(None);
        }

        let mut secrets = SecretMap::new();
        for secret_ref in tracked.iter() {
            let path = self.secret_path(secret_ref)?;
            let raw = tokio::fs::read(&path)
                .await
                .map_err(|source| SecretError::Read {
                    path: path.clone(),
                    source,
                })?;
            let contents: BTreeMap<String, String> = serde_json::from_slice(&raw)
                .map_err(|source| SecretError::Malformed { path, source })?;
            secrets.insert(secret_ref.clone(), contents);
        }
        if secrets.is_empty() {
            return Ok(None);
        }

        let digest = match digest(&secrets) {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Failed to hash secrets, skipping delivery: {}", e);
                return Ok(None);
            }
        };

        let previous = self.last_seen.load(Ordering::Acquire);
        if previous == digest {
            debug!("Secrets unchanged");
            return Ok(None);
        }
        // Best effort: if another evaluation swapped first, it delivers and
        // this one is skipped. The next evaluation catches up.
        if self
            .last_seen
            .compare_exchange(previous, digest, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Lost digest race; skipping delivery");
            return Ok(None);
        }

        Ok(Some(secrets))
    }

    fn secret_path(&self, secret_ref: &str) -> Result<PathBuf, SecretError> {
        let mut components = Path::new(secret_ref).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.dir.join(secret_ref)),
            _ => Err(SecretError::InvalidRef(secret_ref.to_string())),
        }
    }
}

/// Deterministic 64-bit digest of a secret map
pub fn digest(secrets: &SecretMap) -> Result<u64, serde_json::Error> {
    let canonical = serde_json::to_vec(secrets)?;
    let hash = Sha256::digest(&canonical);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash[..8]);
    Ok(u64::from_be_bytes(prefix))
}
