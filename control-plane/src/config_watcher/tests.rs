use super::*;
use shared_types::SslConfig;
use std::time::Duration;
use storage_backend::{ObjectStoreStorage, StorageConfig, StorageOptions};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

fn create_test_storage() -> ObjectStoreStorage {
    let options = StorageOptions::new(uuid::Uuid::new_v4().to_string(), Duration::from_millis(10));
    ObjectStoreStorage::from_config(StorageConfig::Memory, options).unwrap()
}

fn upstream(name: &str) -> Upstream {
    Upstream::new(name, "http", Duration::from_secs(1))
}

async fn next_config(streams: &mut WatchStreams<Config>) -> Config {
    timeout(WAIT, streams.updates.recv())
        .await
        .expect("timed out waiting for a config")
        .expect("config stream closed")
}

async fn assert_quiet(streams: &mut WatchStreams<Config>) {
    let result = timeout(QUIET, streams.updates.recv()).await;
    assert!(result.is_err(), "unexpected config: {result:?}");
}

fn names<T: Resource>(list: &[T]) -> Vec<&str> {
    list.iter().map(Resource::name).collect()
}

#[tokio::test]
async fn test_empty_backend_seeds_empty_config() {
    let storage = create_test_storage();
    let (_watcher, mut streams) = ConfigWatcher::new(&storage, ConfigWatcherOptions::default())
        .await
        .unwrap();

    let first = next_config(&mut streams).await;
    assert!(first.upstreams.is_empty());
    assert!(first.virtual_hosts.is_empty());
}

#[tokio::test]
async fn test_seed_is_sorted_by_name() {
    let storage = create_test_storage();
    for name in ["svc-c", "svc-a", "svc-b"] {
        storage.upstreams().create(&upstream(name)).await.unwrap();
    }

    let (_watcher, mut streams) = ConfigWatcher::new(&storage, ConfigWatcherOptions::default())
        .await
        .unwrap();

    let first = next_config(&mut streams).await;
    assert_eq!(names(&first.upstreams), vec!["svc-a", "svc-b", "svc-c"]);
}

#[tokio::test]
async fn test_tolerates_prior_registration() {
    let storage = create_test_storage();
    storage.register().await.unwrap();

    let result = ConfigWatcher::new(&storage, ConfigWatcherOptions::default()).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_three_creates_yield_one_snapshot() {
    let storage = create_test_storage();
    let (watcher, mut streams) = ConfigWatcher::new(&storage, ConfigWatcherOptions::default())
        .await
        .unwrap();
    let seed = next_config(&mut streams).await;
    assert!(seed.upstreams.is_empty());

    let mut created = Vec::new();
    for name in ["svc-b", "svc-c", "svc-a"] {
        created.push(storage.upstreams().create(&upstream(name)).await.unwrap());
    }

    let stop = CancellationToken::new();
    let run = tokio::spawn(watcher.run(stop.clone()));

    let config = next_config(&mut streams).await;
    assert_eq!(config.upstreams.len(), 3);
    assert_eq!(names(&config.upstreams), vec!["svc-a", "svc-b", "svc-c"]);
    for upstream in &created {
        assert!(config.upstreams.contains(upstream));
    }
    assert_quiet(&mut streams).await;

    stop.cancel();
    timeout(WAIT, run).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_existing_state_is_not_redelivered() {
    let storage = create_test_storage();
    storage.upstreams().create(&upstream("svc-a")).await.unwrap();

    let (watcher, mut streams) = ConfigWatcher::new(&storage, ConfigWatcherOptions::default())
        .await
        .unwrap();
    next_config(&mut streams).await;

    let stop = CancellationToken::new();
    let run = tokio::spawn(watcher.run(stop.clone()));

    // The first poll re-reports svc-a, which matches the seed
    assert_quiet(&mut streams).await;

    stop.cancel();
    timeout(WAIT, run).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_changes_merge_across_kinds() {
    let storage = create_test_storage();
    let (watcher, mut streams) = ConfigWatcher::new(&storage, ConfigWatcherOptions::default())
        .await
        .unwrap();
    next_config(&mut streams).await;

    let stop = CancellationToken::new();
    let run = tokio::spawn(watcher.run(stop.clone()));

    let created = storage.upstreams().create(&upstream("svc-a")).await.unwrap();
    let config = next_config(&mut streams).await;
    assert_eq!(config.upstreams, vec![created.clone()]);
    assert!(config.virtual_hosts.is_empty());

    let vhost = VirtualHost {
        ssl_config: Some(SslConfig {
            secret_ref: "web-cert".to_string(),
        }),
        ..VirtualHost::new("vh", vec!["example.com".to_string()])
    };
    let vhost = storage.virtual_hosts().create(&vhost).await.unwrap();
    let config = next_config(&mut streams).await;
    assert_eq!(config.upstreams, vec![created.clone()]);
    assert_eq!(config.virtual_hosts, vec![vhost.clone()]);
    assert_eq!(config.secret_refs(), vec!["web-cert"]);

    let mut changed = created;
    changed.upstream_type = "grpc".to_string();
    let updated = storage.upstreams().update(&changed).await.unwrap();
    let config = next_config(&mut streams).await;
    assert_eq!(config.upstreams, vec![updated]);
    assert_eq!(config.virtual_hosts, vec![vhost]);

    storage.virtual_hosts().delete("vh").await.unwrap();
    let config = next_config(&mut streams).await;
    assert!(config.virtual_hosts.is_empty());
    assert_eq!(config.upstreams.len(), 1);

    stop.cancel();
    timeout(WAIT, run).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_returns_when_stopped() {
    let storage = create_test_storage();
    let (watcher, _streams) = ConfigWatcher::new(&storage, ConfigWatcherOptions::default())
        .await
        .unwrap();

    let stop = CancellationToken::new();
    stop.cancel();
    timeout(WAIT, watcher.run(stop)).await.unwrap();
}

#[tokio::test]
async fn test_run_stops_while_consumer_is_stalled() {
    let storage = create_test_storage();
    let (watcher, _streams) = ConfigWatcher::new(&storage, ConfigWatcherOptions::default())
        .await
        .unwrap();

    // The seed is never consumed, so the next delivery blocks
    storage.upstreams().create(&upstream("svc-a")).await.unwrap();

    let stop = CancellationToken::new();
    let run = tokio::spawn(watcher.run(stop.clone()));
    tokio::time::sleep(QUIET).await;

    stop.cancel();
    timeout(WAIT, run).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handler_discards_equal_lists() {
    let cache = Arc::new(SnapshotCache::new(Config::default()));
    let (tx, mut rx) = mpsc::channel(1);
    let handler = SyncHandler::<Upstream>::new(Arc::clone(&cache), tx);

    handler
        .on_add(vec![upstream("b"), upstream("a")], upstream("b"))
        .await;
    // Same content in a different order is not a change
    handler
        .on_update(vec![upstream("a"), upstream("b")], upstream("a"))
        .await;

    let config = rx.recv().await.unwrap();
    assert_eq!(names(&config.upstreams), vec!["a", "b"]);
    assert!(rx.try_recv().is_err());
    assert_eq!(cache.snapshot().await, config);
}

#[tokio::test]
async fn test_handler_delivers_every_distinct_list() {
    let cache = Arc::new(SnapshotCache::new(Config::default()));
    let (tx, mut rx) = mpsc::channel(1);
    let handler = SyncHandler::<VirtualHost>::new(cache, tx);

    let vh = |name: &str| VirtualHost::new(name, vec![format!("{name}.example.com")]);

    handler.on_add(vec![vh("a")], vh("a")).await;
    assert_eq!(rx.recv().await.unwrap().virtual_hosts, vec![vh("a")]);

    handler.on_delete(Vec::new(), vh("a")).await;
    assert!(rx.recv().await.unwrap().virtual_hosts.is_empty());
}

mod failing_backend {
    use super::*;
    use tokio_util::sync::CancellationToken;

    pub struct FailingClient;

    fn unavailable() -> anyhow::Error {
        anyhow!("backend unavailable")
    }

    #[async_trait]
    impl<T: Resource> ResourceClient<T> for FailingClient {
        async fn create(&self, _resource: &T) -> Result<T> {
            Err(unavailable())
        }

        async fn update(&self, _resource: &T) -> Result<T> {
            Err(unavailable())
        }

        async fn get(&self, _name: &str) -> Result<T> {
            Err(unavailable())
        }

        async fn list(&self) -> Result<Vec<T>> {
            Err(unavailable())
        }

        async fn delete(&self, _name: &str) -> Result<()> {
            Err(unavailable())
        }

        fn watch(&self, _handler: Arc<dyn ResourceEventHandler<T>>) -> Box<dyn WatchHandle> {
            Box::new(IdleWatch)
        }
    }

    struct IdleWatch;

    #[async_trait]
    impl WatchHandle for IdleWatch {
        async fn run(
            self: Box<Self>,
            stop: CancellationToken,
            _errors: mpsc::Sender<anyhow::Error>,
        ) {
            stop.cancelled().await;
        }
    }

    pub struct FailingStorage {
        pub client: FailingClient,
    }

    #[async_trait]
    impl StorageClient for FailingStorage {
        async fn register(&self) -> Result<()> {
            Ok(())
        }

        fn upstreams(&self) -> &dyn ResourceClient<Upstream> {
            &self.client
        }

        fn virtual_hosts(&self) -> &dyn ResourceClient<VirtualHost> {
            &self.client
        }
    }
}

#[tokio::test]
async fn test_initial_list_failure_falls_back_to_empty() {
    let storage = failing_backend::FailingStorage {
        client: failing_backend::FailingClient,
    };

    let (_watcher, mut streams) = ConfigWatcher::new(&storage, ConfigWatcherOptions::default())
        .await
        .unwrap();
    assert_eq!(next_config(&mut streams).await, Config::default());
}

#[tokio::test]
async fn test_initial_list_failure_can_be_fatal() {
    let storage = failing_backend::FailingStorage {
        client: failing_backend::FailingClient,
    };
    let options = ConfigWatcherOptions {
        initial_list_policy: InitialListPolicy::Fail,
    };

    let err = ConfigWatcher::new(&storage, options).await.err().unwrap();
    assert!(format!("{err:#}").contains("backend unavailable"));
}

#[test]
fn test_initial_list_policy_from_str() {
    assert_eq!(
        "empty".parse::<InitialListPolicy>().unwrap(),
        InitialListPolicy::FallbackToEmpty
    );
    assert_eq!(
        "fail".parse::<InitialListPolicy>().unwrap(),
        InitialListPolicy::Fail
    );
    assert!("sometimes".parse::<InitialListPolicy>().is_err());
}
