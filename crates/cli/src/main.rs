//! Snapship - snapshot shipper daemon

use anyhow::{Context, Result};
use clap::Parser;
use cli_lib::{Config, Daemon};
use cloud::{Endpoints, IdentityResolver};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How often the main task checks whether the watcher died
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    let bucket = config.bucket()?.to_string();

    let resolver = IdentityResolver::new(
        Endpoints::default(),
        config.pod_name.clone(),
        config.identity_timeout(),
    )?;
    let metadata = resolver.resolve(config.identity_timeout()).await;
    info!("Instance metadata: {}", metadata.to_json());

    if !metadata.is_resolved() {
        if config.require_cloud {
            anyhow::bail!("Unable to determine cloud provider and --require-cloud is set");
        }
        warn!("Cloud provider unknown; files will be detected but not uploaded");
    }

    let region = config.effective_region(&metadata);
    let uploader = uploader::for_cloud(metadata.cloud, &bucket, &region, Handle::current())
        .context("Failed to configure uploader")?;
    info!("Uploading to {} (region {})", uploader.describe(), region);

    let daemon = Daemon::start(&config, &metadata, Arc::clone(&uploader))?;

    wait_for_stop(&daemon).await;

    // Joining threads blocks; keep the runtime free to finish in-flight uploads
    let report = tokio::task::spawn_blocking(move || daemon.shutdown())
        .await
        .context("Shutdown task failed")??;

    info!(
        "Shut down after {} events ({} uploaded, {} failed, {} skipped)",
        report.pump.events,
        report.uploads.uploaded(),
        report.uploads.failed(),
        report.uploads.skipped()
    );
    Ok(())
}

/// Wait for SIGINT/SIGTERM or for the watcher to stop on its own
async fn wait_for_stop(daemon: &Daemon) {
    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut signal => {
                info!("Shutdown signal received");
                return;
            }
            _ = health.tick() => {
                if daemon.has_failed() {
                    warn!("File watching stopped unexpectedly");
                    return;
                }
            }
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Could not install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
