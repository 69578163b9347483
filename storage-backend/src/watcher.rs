use async_trait::async_trait;
use object_store::path::Path;
use object_store::ObjectStore;
use shared_types::Resource;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::fetch_all;
use crate::{ResourceEventHandler, WatchHandle};

/// A single observed change to one resource
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent<T> {
    Added(T),
    Updated(T),
    Deleted(T),
}

impl<T: Resource> ResourceEvent<T> {
    pub fn resource(&self) -> &T {
        match self {
            Self::Added(r) | Self::Updated(r) | Self::Deleted(r) => r,
        }
    }

    /// Invoke the handler callback matching this event
    pub async fn dispatch(self, handler: &dyn ResourceEventHandler<T>, list: Vec<T>) {
        match self {
            Self::Added(r) => handler.on_add(list, r).await,
            Self::Updated(r) => handler.on_update(list, r).await,
            Self::Deleted(r) => handler.on_delete(list, r).await,
        }
    }
}

/// Events that turn `previous` into `current`. Both maps are keyed by name.
pub fn diff<T: Resource>(
    previous: &BTreeMap<String, T>,
    current: &BTreeMap<String, T>,
) -> Vec<ResourceEvent<T>> {
    let mut events = Vec::new();

    for (name, resource) in current {
        match previous.get(name) {
            None => events.push(ResourceEvent::Added(resource.clone())),
            Some(old) if old != resource => events.push(ResourceEvent::Updated(resource.clone())),
            Some(_) => {}
        }
    }

    for (name, resource) in previous {
        if !current.contains_key(name) {
            events.push(ResourceEvent::Deleted(resource.clone()));
        }
    }

    events
}

/// Watches one resource kind by re-listing its prefix on a fixed interval.
///
/// Each poll is diffed against the previous one by name and resource
/// version; every difference is reported to the handler together with the
/// full list, sorted by name. The first poll reports everything as added.
pub struct PollingWatcher<T: Resource> {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    interval: Duration,
    handler: Arc<dyn ResourceEventHandler<T>>,
}

impl<T: Resource> PollingWatcher<T> {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        prefix: Path,
        interval: Duration,
        handler: Arc<dyn ResourceEventHandler<T>>,
    ) -> Self {
        Self {
            store,
            prefix,
            interval,
            handler,
        }
    }

    async fn poll(&self) -> anyhow::Result<BTreeMap<String, T>> {
        let resources: Vec<T> = fetch_all(self.store.as_ref(), &self.prefix).await?;
        Ok(resources
            .into_iter()
            .map(|r| (r.name().to_string(), r))
            .collect())
    }
}

#[async_trait]
impl<T: Resource> WatchHandle for PollingWatcher<T> {
    async fn run(self: Box<Self>, stop: CancellationToken, errors: mpsc::Sender<anyhow::Error>) {
        info!(kind = T::KIND, "Starting watch on {}", self.prefix);
        let mut known: BTreeMap<String, T> = BTreeMap::new();

        while !stop.is_cancelled() {
            match self.poll().await {
                Ok(current) => {
                    let events = diff(&known, &current);
                    if !events.is_empty() {
                        debug!(kind = T::KIND, "Observed {} change(s)", events.len());
                        let list: Vec<T> = current.values().cloned().collect();
                        known = current;

                        for event in events {
                            tokio::select! {
                                () = stop.cancelled() => break,
                                () = event.dispatch(self.handler.as_ref(), list.clone()) => {}
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(kind = T::KIND, "Watch poll failed: {:#}", e);
                    tokio::select! {
                        () = stop.cancelled() => break,
                        sent = errors.send(e) => {
                            if sent.is_err() {
                                debug!(kind = T::KIND, "Error receiver dropped");
                            }
                        }
                    }
                }
            }

            tokio::select! {
                () = stop.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(kind = T::KIND, "Stopped watch on {}", self.prefix);
    }
}
