use anyhow::Result;
use control_plane::{ConfigWatcher, ConfigWatcherOptions, FileSecretWatcher, Settings};
use storage_backend::ObjectStoreStorage;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    info!("Starting gateway control plane");

    let settings = Settings::from_env()?;
    info!("Using storage {:?} with {:?}", settings.storage, settings.storage_options);

    let storage = ObjectStoreStorage::from_config(settings.storage, settings.storage_options)?;
    let options = ConfigWatcherOptions {
        initial_list_policy: settings.initial_list_policy,
    };
    let (config_watcher, mut configs) = ConfigWatcher::new(&storage, options).await?;
    let (secret_watcher, mut secrets) =
        FileSecretWatcher::new(&settings.secrets_dir, settings.secret_sync_frequency)?;
    let tracker = secret_watcher.tracker();

    let stop = CancellationToken::new();
    let config_task = tokio::spawn(config_watcher.run(stop.clone()));
    let secret_task = tokio::spawn(secret_watcher.run(stop.clone()));

    // Tracking may wait on the secrets stream, which the loop below drains
    let (secret_refs, secret_refs_rx) = watch::channel(Vec::new());
    let follow_task = tokio::spawn(tracker.follow(secret_refs_rx, stop.clone()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            Some(config) = configs.updates.recv() => {
                info!(
                    "Config updated: {} upstream(s), {} virtual host(s)",
                    config.upstreams.len(),
                    config.virtual_hosts.len()
                );
                secret_refs.send_replace(config.secret_refs());
            }
            Some(secret_map) = secrets.updates.recv() => {
                info!("Secrets updated: {} reference(s)", secret_map.len());
            }
            Some(e) = configs.errors.recv() => warn!("Config watch error: {:#}", e),
            Some(e) = secrets.errors.recv() => warn!("Secret watch error: {:#}", e),
        }
    }

    stop.cancel();
    config_task.await?;
    secret_task.await?;
    follow_task.await?;

    info!("Control plane stopped");
    Ok(())
}
