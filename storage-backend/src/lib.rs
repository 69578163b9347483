pub mod backend;
pub mod config;
pub mod error;
pub mod metadata;
pub mod watcher;


use anyhow::Result;
use async_trait::async_trait;
use shared_types::{Resource, Upstream, VirtualHost};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use backend::{ObjectStoreResourceClient, ObjectStoreStorage};
pub use config::{StorageConfig, StorageOptions};
pub use error::{is_already_exists, is_not_found, is_version_conflict, StorageError};
pub use watcher::{PollingWatcher, ResourceEvent};

/// Entry point to every resource kind held by one backend
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Prepare backend-side namespaces.
    ///
    /// # Errors
    /// Returns `StorageError::AlreadyExists` when every namespace was already
    /// prepared; callers treat that as success.
    async fn register(&self) -> Result<()>;

    fn upstreams(&self) -> &dyn ResourceClient<Upstream>;

    fn virtual_hosts(&self) -> &dyn ResourceClient<VirtualHost>;
}

/// Versioned CRUD plus watch for a single resource kind
#[async_trait]
pub trait ResourceClient<T: Resource>: Send + Sync {
    /// Store a new resource.
    ///
    /// # Errors
    /// Returns `StorageError::AlreadyExists` if the name is taken.
    async fn create(&self, resource: &T) -> Result<T>;

    /// Replace a stored resource with optimistic concurrency control.
    ///
    /// The resource version in `resource.metadata()` must equal the stored one.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if nothing is stored under the name and
    /// `StorageError::VersionConflict` if the version is stale.
    async fn update(&self, resource: &T) -> Result<T>;

    async fn get(&self, name: &str) -> Result<T>;

    /// Every stored resource, in backend order
    async fn list(&self) -> Result<Vec<T>>;

    async fn delete(&self, name: &str) -> Result<()>;

    /// Register `handler` for change notifications. Nothing is observed until
    /// the returned handle is run.
    fn watch(&self, handler: Arc<dyn ResourceEventHandler<T>>) -> Box<dyn WatchHandle>;
}

/// Receives change notifications for one resource kind.
///
/// Every call carries the full current list, sorted by name, along with the
/// resource that triggered it.
#[async_trait]
pub trait ResourceEventHandler<T: Resource>: Send + Sync {
    async fn on_add(&self, _list: Vec<T>, _added: T) {}

    async fn on_update(&self, _list: Vec<T>, _updated: T) {}

    async fn on_delete(&self, _list: Vec<T>, _deleted: T) {}
}

/// A registered watch, ready to be driven
#[async_trait]
pub trait WatchHandle: Send {
    /// Drive the backend's change notifications until `stop` is cancelled.
    /// Backend failures are sent to `errors` and do not end the loop.
    async fn run(self: Box<Self>, stop: CancellationToken, errors: mpsc::Sender<anyhow::Error>);
}
