//! `backbone-sync` daemon: keeps the offline store in step with the remote
//! database until interrupted.

use std::sync::Arc;

use anyhow::Context;
use backbone_sync::collections::{CollectionTable, FallbackRemote};
use backbone_sync::config::SyncConfig;
use backbone_sync::connectivity::{
    ConnectivityProbe, ConnectivityState, check_reachability, spawn_reachability_monitor,
};
use backbone_sync::remote::{HttpRemoteStore, RemoteStore};
use backbone_sync::store::OfflineStore;
use backbone_sync::sync_manager::{SyncOptions, SyncService};
use backbone_sync::sync_worker::SyncWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    backbone_observability::init();

    let config = SyncConfig::from_env().context("invalid sync configuration")?;
    tracing::info!(
        api_url = %config.api_url,
        data_dir = %config.data_dir.display(),
        sync_interval = ?config.sync_interval,
        "starting backbone-sync"
    );

    let store = OfflineStore::open(&config).await;

    let mut http = HttpRemoteStore::new(&config.api_url, config.request_timeout)
        .with_context(|| format!("cannot use API url {}", config.api_url))?;
    if let Some(token) = &config.api_token {
        http = http.with_token(token.clone());
    } else {
        tracing::warn!("BACKBONE_API_TOKEN not set; sending unauthenticated requests");
    }
    let remote: Arc<dyn RemoteStore> =
        Arc::new(FallbackRemote::new(Arc::new(http), CollectionTable::dashboard()));

    let initial = if check_reachability(remote.as_ref(), config.probe_timeout).await {
        ConnectivityState::Online
    } else {
        ConnectivityState::Offline
    };
    let probe = ConnectivityProbe::new(initial);

    let service = Arc::new(SyncService::new(
        store.clone(),
        remote.clone(),
        probe.clone(),
        SyncOptions::from(&config),
    ));

    let monitor = spawn_reachability_monitor(
        probe.clone(),
        remote.clone(),
        config.monitor_interval,
        config.probe_timeout,
    );
    let worker = SyncWorker::spawn(service.clone(), probe.clone(), config.sync_interval);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    monitor.shutdown().await;
    worker.shutdown().await;

    let status = service.status().await;
    tracing::info!(
        pending_projects = status.pending_projects,
        queued_items = status.queued_items,
        "backbone-sync stopped"
    );

    Ok(())
}
