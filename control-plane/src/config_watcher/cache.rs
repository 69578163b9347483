use shared_types::{Config, Resource, Upstream, VirtualHost};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::info;

/// A resource kind that owns one list of the merged snapshot
pub(crate) trait SnapshotSection: Resource {
    fn section(config: &Config) -> &[Self];
    fn section_mut(config: &mut Config) -> &mut Vec<Self>;
}

impl SnapshotSection for Upstream {
    fn section(config: &Config) -> &[Self] {
        &config.upstreams
    }

    fn section_mut(config: &mut Config) -> &mut Vec<Self> {
        &mut config.upstreams
    }
}

impl SnapshotSection for VirtualHost {
    fn section(config: &Config) -> &[Self] {
        &config.virtual_hosts
    }

    fn section_mut(config: &mut Config) -> &mut Vec<Self> {
        &mut config.virtual_hosts
    }
}

/// Latest accepted configuration.
///
/// All access goes through the lock, which is never held while a snapshot is
/// being delivered: callers get an owned copy back and publish it themselves.
pub(crate) struct SnapshotCache {
    config: Mutex<Config>,
}

impl SnapshotCache {
    pub(crate) fn new(seed: Config) -> Self {
        Self {
            config: Mutex::new(seed),
        }
    }

    /// Replace the cached list for `T` with `list`.
    ///
    /// Returns a copy of the merged snapshot, or `None` when `list` is
    /// structurally equal to what is cached, in which case nothing changes.
    pub(crate) async fn apply<T: SnapshotSection>(&self, list: Vec<T>) -> Option<Config> {
        let (previous, snapshot) = {
            let mut config = self.config.lock().await;
            if T::section(&config) == list.as_slice() {
                return None;
            }
            let previous = std::mem::replace(T::section_mut(&mut config), list);
            (previous, config.clone())
        };

        info!(
            kind = T::KIND,
            "Change detected: {}",
            describe_change(&previous, T::section(&snapshot))
        );
        Some(snapshot)
    }

    #[cfg(test)]
    pub(crate) async fn snapshot(&self) -> Config {
        self.config.lock().await.clone()
    }
}

/// Human-readable summary of the names that differ between two lists
fn describe_change<T: Resource>(previous: &[T], current: &[T]) -> String {
    let before: BTreeMap<&str, &T> = previous.iter().map(|r| (r.name(), r)).collect();
    let after: BTreeMap<&str, &T> = current.iter().map(|r| (r.name(), r)).collect();

    let added: Vec<&str> = after.keys().filter(|n| !before.contains_key(*n)).copied().collect();
    let removed: Vec<&str> = before.keys().filter(|n| !after.contains_key(*n)).copied().collect();
    let changed: Vec<&str> = after
        .iter()
        .filter(|(name, r)| before.get(*name).is_some_and(|old| old != *r))
        .map(|(name, _)| *name)
        .collect();

    format!("added {added:?}, removed {removed:?}, changed {changed:?}")
}
