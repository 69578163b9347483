use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    ObjectMeta, ObjectStore, PutMode, PutOptions, PutPayload, PutResult, UpdateVersion,
};
use shared_types::{Resource, Upstream, VirtualHost};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::{StorageConfig, StorageOptions};
use crate::error::StorageError;
use crate::metadata::{decode, encode, resource_version, stamped};
use crate::watcher::PollingWatcher;
use crate::{ResourceClient, ResourceEventHandler, StorageClient, WatchHandle};

pub struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
    root: Path,
    upstreams: ObjectStoreResourceClient<Upstream>,
    virtual_hosts: ObjectStoreResourceClient<VirtualHost>,
}

impl ObjectStoreStorage {
    pub fn from_config(config: StorageConfig, options: StorageOptions) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config {
            StorageConfig::Memory => {
                info!("Initializing in-memory storage");
                Arc::new(InMemory::new())
            }
            StorageConfig::Local { path } => {
                info!("Initializing local storage at: {:?}", path);
                std::fs::create_dir_all(&path)
                    .with_context(|| format!("Failed to create storage directory {path:?}"))?;
                Arc::new(LocalFileSystem::new_with_prefix(path)?)
            }
        };

        Ok(Self::new(store, options))
    }

    pub fn new(store: Arc<dyn ObjectStore>, options: StorageOptions) -> Self {
        let root = Path::from(options.root.as_str());
        let upstreams =
            ObjectStoreResourceClient::new(Arc::clone(&store), &root, options.poll_interval);
        let virtual_hosts =
            ObjectStoreResourceClient::new(Arc::clone(&store), &root, options.poll_interval);

        Self {
            store,
            root,
            upstreams,
            virtual_hosts,
        }
    }

    fn namespace_path(&self, kind: &str) -> Path {
        self.root.child("namespaces").child(kind)
    }
}

#[async_trait]
impl StorageClient for ObjectStoreStorage {
    #[instrument(skip(self))]
    async fn register(&self) -> Result<()> {
        let mut created = 0;

        for kind in [Upstream::KIND, VirtualHost::KIND] {
            let path = self.namespace_path(kind);
            let marker = PutPayload::from(b"{}".to_vec());
            match self
                .store
                .put_opts(&path, marker, PutOptions::from(PutMode::Create))
                .await
            {
                Ok(_) => {
                    debug!("Registered namespace {}", path);
                    created += 1;
                }
                Err(object_store::Error::AlreadyExists { .. }) => {}
                Err(e) => return Err(StorageError::Transport(e).into()),
            }
        }

        if created == 0 {
            return Err(StorageError::AlreadyExists {
                kind: "namespace",
                name: self.root.to_string(),
            }
            .into());
        }

        info!("Registered storage namespaces under {}", self.root);
        Ok(())
    }

    fn upstreams(&self) -> &dyn ResourceClient<Upstream> {
        &self.upstreams
    }

    fn virtual_hosts(&self) -> &dyn ResourceClient<VirtualHost> {
        &self.virtual_hosts
    }
}

/// Stores each resource of kind `T` as JSON under `<root>/<kind>/<name>`
pub struct ObjectStoreResourceClient<T> {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    poll_interval: Duration,
    // Serializes check-then-write on stores without conditional updates
    write_lock: Mutex<()>,
    _resource: PhantomData<fn() -> T>,
}

impl<T: Resource> ObjectStoreResourceClient<T> {
    pub fn new(store: Arc<dyn ObjectStore>, root: &Path, poll_interval: Duration) -> Self {
        Self {
            store,
            prefix: root.child(T::KIND),
            poll_interval,
            write_lock: Mutex::new(()),
            _resource: PhantomData,
        }
    }

    fn path(&self, name: &str) -> Path {
        self.prefix.child(name)
    }

    fn not_found(name: &str) -> anyhow::Error {
        StorageError::NotFound {
            kind: T::KIND,
            name: name.to_string(),
        }
        .into()
    }

    fn validate(resource: &T) -> Result<()> {
        if resource.name().is_empty() {
            return Err(
                StorageError::Validation(format!("{} name must not be empty", T::KIND)).into(),
            );
        }
        Ok(())
    }

    async fn current_version(&self, name: &str) -> Result<String> {
        match self.store.head(&self.path(name)).await {
            Ok(meta) => resource_version(meta.e_tag, name),
            Err(object_store::Error::NotFound { .. }) => Err(Self::not_found(name)),
            Err(e) => Err(StorageError::Transport(e).into()),
        }
    }

    /// Compare-and-write for stores that reject `PutMode::Update`. Only
    /// writers sharing this client are excluded.
    async fn overwrite_checked(
        &self,
        name: &str,
        expected: &str,
        payload: PutPayload,
    ) -> Result<PutResult> {
        let _guard = self.write_lock.lock().await;

        let actual = self.current_version(name).await?;
        if actual != expected {
            return Err(conflict(name, expected, actual));
        }

        let result = self
            .store
            .put(&self.path(name), payload)
            .await
            .map_err(StorageError::Transport)?;
        Ok(result)
    }
}

fn conflict(name: &str, expected: &str, actual: String) -> anyhow::Error {
    StorageError::VersionConflict {
        name: name.to_string(),
        expected: expected.to_string(),
        actual,
    }
    .into()
}

/// Fetch every resource stored below `prefix`, stamped with its version.
/// Objects deleted between listing and reading are skipped.
pub(crate) async fn fetch_all<T: Resource>(
    store: &dyn ObjectStore,
    prefix: &Path,
) -> Result<Vec<T>> {
    let objects: Vec<ObjectMeta> = store
        .list(Some(prefix))
        .try_collect()
        .await
        .map_err(StorageError::Transport)?;

    let mut resources = Vec::with_capacity(objects.len());
    for object in objects {
        let result = match store.get(&object.location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => continue,
            Err(e) => return Err(StorageError::Transport(e).into()),
        };
        let version = resource_version(result.meta.e_tag.clone(), object.location.as_ref())?;
        let bytes = result.bytes().await.map_err(StorageError::Transport)?;
        let resource = decode(&bytes, version)
            .with_context(|| format!("Failed to decode {}", object.location))?;
        resources.push(resource);
    }

    Ok(resources)
}

#[async_trait]
impl<T: Resource> ResourceClient<T> for ObjectStoreResourceClient<T> {
    #[instrument(skip(self, resource), fields(kind = T::KIND, name = resource.name()))]
    async fn create(&self, resource: &T) -> Result<T> {
        Self::validate(resource)?;
        let name = resource.name();
        let payload = PutPayload::from(encode(resource)?);

        let result = match self
            .store
            .put_opts(&self.path(name), payload, PutOptions::from(PutMode::Create))
            .await
        {
            Ok(result) => result,
            Err(object_store::Error::AlreadyExists { .. }) => {
                return Err(StorageError::AlreadyExists {
                    kind: T::KIND,
                    name: name.to_string(),
                }
                .into());
            }
            Err(e) => return Err(StorageError::Transport(e).into()),
        };

        let version = resource_version(result.e_tag, name)?;
        info!("Created {} {} at version {}", T::KIND, name, version);
        Ok(stamped(resource, version))
    }

    #[instrument(skip(self, resource), fields(kind = T::KIND, name = resource.name()))]
    async fn update(&self, resource: &T) -> Result<T> {
        Self::validate(resource)?;
        let name = resource.name();
        let expected = resource.metadata().resource_version.as_str();

        let actual = self.current_version(name).await?;
        if actual != expected {
            return Err(conflict(name, expected, actual));
        }

        let payload = PutPayload::from(encode(resource)?);
        let condition = UpdateVersion {
            e_tag: Some(expected.to_string()),
            version: None,
        };

        let result = match self
            .store
            .put_opts(
                &self.path(name),
                payload.clone(),
                PutOptions::from(PutMode::Update(condition)),
            )
            .await
        {
            Ok(result) => result,
            Err(object_store::Error::Precondition { .. }) => {
                // Lost a race with another writer, or the entry is gone
                let actual = self.current_version(name).await?;
                return Err(conflict(name, expected, actual));
            }
            Err(object_store::Error::NotImplemented) => {
                self.overwrite_checked(name, expected, payload).await?
            }
            Err(e) => return Err(StorageError::Transport(e).into()),
        };

        let version = resource_version(result.e_tag, name)?;
        info!("Updated {} {} to version {}", T::KIND, name, version);
        Ok(stamped(resource, version))
    }

    #[instrument(skip(self), fields(kind = T::KIND))]
    async fn get(&self, name: &str) -> Result<T> {
        debug!("Getting {} {}", T::KIND, name);

        let result = match self.store.get(&self.path(name)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Err(Self::not_found(name)),
            Err(e) => return Err(StorageError::Transport(e).into()),
        };

        let version = resource_version(result.meta.e_tag.clone(), name)?;
        let bytes = result.bytes().await.map_err(StorageError::Transport)?;
        decode(&bytes, version)
    }

    #[instrument(skip(self), fields(kind = T::KIND))]
    async fn list(&self) -> Result<Vec<T>> {
        debug!("Listing {} under {}", T::KIND, self.prefix);
        fetch_all(self.store.as_ref(), &self.prefix).await
    }

    #[instrument(skip(self), fields(kind = T::KIND))]
    async fn delete(&self, name: &str) -> Result<()> {
        self.current_version(name).await?;

        self.store
            .delete(&self.path(name))
            .await
            .map_err(StorageError::Transport)?;

        info!("Deleted {} {}", T::KIND, name);
        Ok(())
    }

    fn watch(&self, handler: Arc<dyn ResourceEventHandler<T>>) -> Box<dyn WatchHandle> {
        Box::new(PollingWatcher::new(
            Arc::clone(&self.store),
            self.prefix.clone(),
            self.poll_interval,
            handler,
        ))
    }
}
