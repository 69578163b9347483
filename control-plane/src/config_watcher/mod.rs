//! Fans the per-kind storage watches into one stream of merged snapshots.
//!
//! Every delivered [`Config`] is complete and owned: one resource kind has
//! either been fully replaced or the snapshot is not emitted at all. Lists
//! structurally equal to what was last accepted never produce a delivery.

mod cache;

#[cfg(test)]
mod tests;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared_types::{Config, Resource, Upstream, VirtualHost};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use storage_backend::{
    is_already_exists, ResourceClient, ResourceEventHandler, StorageClient, WatchHandle,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{WatchStreams, ERROR_CHANNEL_CAPACITY};

use cache::{SnapshotCache, SnapshotSection};

/// What to do when the startup listing of a resource kind fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitialListPolicy {
    /// Log a warning and start from an empty list
    #[default]
    FallbackToEmpty,
    /// Refuse to start
    Fail,
}

impl FromStr for InitialListPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "empty" => Ok(Self::FallbackToEmpty),
            "fail" => Ok(Self::Fail),
            other => Err(anyhow!(
                "Unknown initial list policy: {other}. Must be 'empty' or 'fail'"
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigWatcherOptions {
    pub initial_list_policy: InitialListPolicy,
}

pub struct ConfigWatcher {
    watchers: Vec<Box<dyn WatchHandle>>,
    errors: mpsc::Sender<anyhow::Error>,
}

impl ConfigWatcher {
    /// Register with the backend, seed the cache from a full listing of every
    /// kind and subscribe to changes.
    ///
    /// The seed is the first item on the returned config stream. Nothing else
    /// is delivered until [`ConfigWatcher::run`] is driven.
    pub async fn new(
        storage: &dyn StorageClient,
        options: ConfigWatcherOptions,
    ) -> Result<(Self, WatchStreams<Config>)> {
        if let Err(e) = storage.register().await {
            if !is_already_exists(&e) {
                return Err(e.context("failed to register to storage backend"));
            }
        }

        let policy = options.initial_list_policy;
        let seed = Config {
            upstreams: initial_list(storage.upstreams(), policy).await?,
            virtual_hosts: initial_list(storage.virtual_hosts(), policy).await?,
        };
        info!(
            "Seeded config with {} upstream(s) and {} virtual host(s)",
            seed.upstreams.len(),
            seed.virtual_hosts.len()
        );

        let (config_tx, config_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        // The channel is empty, so the seed always fits
        config_tx
            .try_send(seed.clone())
            .map_err(|_| anyhow!("config channel rejected the initial snapshot"))?;

        let cache = Arc::new(SnapshotCache::new(seed));
        let upstream_watch = storage
            .upstreams()
            .watch(Arc::new(SyncHandler::<Upstream>::new(
                Arc::clone(&cache),
                config_tx.clone(),
            )));
        let vhost_watch = storage
            .virtual_hosts()
            .watch(Arc::new(SyncHandler::<VirtualHost>::new(
                cache,
                config_tx,
            )));

        let watcher = Self {
            watchers: vec![vhost_watch, upstream_watch],
            errors: error_tx,
        };
        let streams = WatchStreams {
            updates: config_rx,
            errors: error_rx,
        };
        Ok((watcher, streams))
    }

    /// Drive every resource watch until `stop` is cancelled
    #[allow(tail_expr_drop_order)]
    pub async fn run(self, stop: CancellationToken) {
        let mut tasks = JoinSet::new();
        for watcher in self.watchers {
            tasks.spawn(watcher.run(stop.clone(), self.errors.clone()));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Resource watch task failed: {}", e);
            }
        }
        info!("Config watcher stopped");
    }
}

async fn initial_list<T: Resource>(
    client: &dyn ResourceClient<T>,
    policy: InitialListPolicy,
) -> Result<Vec<T>> {
    match client.list().await {
        Ok(mut list) => {
            sort_by_name(&mut list);
            Ok(list)
        }
        Err(e) => match policy {
            InitialListPolicy::FallbackToEmpty => {
                warn!("Startup: failed to read {} from storage: {:#}", T::KIND, e);
                Ok(Vec::new())
            }
            InitialListPolicy::Fail => {
                Err(e.context(format!("failed to read {} from storage", T::KIND)))
            }
        },
    }
}

fn sort_by_name<T: Resource>(list: &mut [T]) {
    list.sort_by(|a, b| a.name().cmp(b.name()));
}

/// Merges one resource kind's notifications into the shared cache
struct SyncHandler<T> {
    cache: Arc<SnapshotCache>,
    configs: mpsc::Sender<Config>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: SnapshotSection> SyncHandler<T> {
    fn new(cache: Arc<SnapshotCache>, configs: mpsc::Sender<Config>) -> Self {
        Self {
            cache,
            configs,
            _kind: PhantomData,
        }
    }

    async fn sync(&self, mut updated: Vec<T>) {
        sort_by_name(&mut updated);

        let Some(snapshot) = self.cache.apply(updated).await else {
            return;
        };

        // Blocks until the previous snapshot has been consumed
        if self.configs.send(snapshot).await.is_err() {
            debug!(kind = T::KIND, "Config receiver dropped; snapshot discarded");
        }
    }
}

#[async_trait]
impl<T: SnapshotSection> ResourceEventHandler<T> for SyncHandler<T> {
    async fn on_add(&self, list: Vec<T>, _added: T) {
        self.sync(list).await;
    }

    async fn on_update(&self, list: Vec<T>, _updated: T) {
        self.sync(list).await;
    }

    async fn on_delete(&self, list: Vec<T>, _deleted: T) {
        self.sync(list).await;
    }
}
