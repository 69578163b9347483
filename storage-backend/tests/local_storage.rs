#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use anyhow::Result;
use shared_types::{Matcher, Route, Upstream, VirtualHost};
use std::time::Duration;
use storage_backend::{
    is_already_exists, is_not_found, is_version_conflict, ObjectStoreStorage, StorageClient,
    StorageConfig, StorageOptions,
};
use tempfile::TempDir;

// ============================================================================
// Local Filesystem Storage Tests
// ============================================================================

fn create_local_test_storage() -> Result<(ObjectStoreStorage, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = StorageConfig::local(temp_dir.path());
    let options = StorageOptions::new("gateway", Duration::from_millis(10));
    let storage = ObjectStoreStorage::from_config(config, options)?;
    Ok((storage, temp_dir))
}

#[tokio::test]
async fn test_local_values_live_under_kind_and_name() -> Result<()> {
    let (storage, dir) = create_local_test_storage()?;

    let input = Upstream::new("svc-a", "http", Duration::from_secs(1));
    storage.upstreams().create(&input).await?;

    let raw = std::fs::read(dir.path().join("gateway/upstreams/svc-a"))?;
    let stored: Upstream = serde_json::from_slice(&raw)?;
    assert_eq!(stored, input);
    Ok(())
}

#[tokio::test]
async fn test_local_register() -> Result<()> {
    let (storage, _dir) = create_local_test_storage()?;

    storage.register().await?;
    let err = storage.register().await.unwrap_err();
    assert!(is_already_exists(&err));
    assert!(storage.upstreams().list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_local_create_update_get() -> Result<()> {
    let (storage, _dir) = create_local_test_storage()?;

    let created = storage
        .upstreams()
        .create(&Upstream::new("svc-a", "http", Duration::from_secs(1)))
        .await?;
    assert!(!created.metadata.resource_version.is_empty());

    let mut changed = created.clone();
    changed.upstream_type = "grpc".to_string();
    let updated = storage.upstreams().update(&changed).await?;
    assert_eq!(updated.upstream_type, "grpc");
    assert_ne!(
        updated.metadata.resource_version,
        created.metadata.resource_version
    );

    let fetched = storage.upstreams().get("svc-a").await?;
    assert_eq!(fetched, updated);
    Ok(())
}

#[tokio::test]
async fn test_local_optimistic_concurrency_control() -> Result<()> {
    let (storage, _dir) = create_local_test_storage()?;

    let vhost = VirtualHost {
        routes: vec![Route {
            matcher: Matcher::Prefix("/".to_string()),
            destination: "svc-a".to_string(),
            prefix_rewrite: None,
        }],
        ..VirtualHost::new("default", vec!["*".to_string()])
    };
    let created = storage.virtual_hosts().create(&vhost).await?;

    let mut first = created.clone();
    first.domains = vec!["example.com".to_string()];
    let updated = storage.virtual_hosts().update(&first).await?;

    // Update with the version from before the first update should fail
    let mut stale = created;
    stale.domains = vec!["stale.example.com".to_string()];
    let err = storage.virtual_hosts().update(&stale).await.unwrap_err();
    assert!(is_version_conflict(&err));

    assert_eq!(storage.virtual_hosts().get("default").await?, updated);
    Ok(())
}

#[tokio::test]
async fn test_local_create_twice_and_delete() -> Result<()> {
    let (storage, _dir) = create_local_test_storage()?;
    let input = Upstream::new("svc-a", "http", Duration::from_secs(1));

    storage.upstreams().create(&input).await?;
    assert!(is_already_exists(
        &storage.upstreams().create(&input).await.unwrap_err()
    ));

    storage.upstreams().delete("svc-a").await?;
    assert!(is_not_found(
        &storage.upstreams().get("svc-a").await.unwrap_err()
    ));
    assert!(is_not_found(
        &storage.upstreams().update(&input).await.unwrap_err()
    ));
    Ok(())
}
