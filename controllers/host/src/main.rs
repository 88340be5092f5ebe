//! Host Controller
//!
//! Drives Host resources to their desired power state through the
//! fulfillment service, keeps their status and conditions current, and
//! releases provisioning resources when a Host is deleted.

mod backoff;
mod config;
mod controller;
mod dispatcher;
mod error;
mod queue;
mod reconciler;
mod server;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use crds::{Host, ResourceRegistry};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Must happen before any TLS client is built
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Host Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Fulfillment URL: {}", config.fulfillment_url);
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!(
        "  Host reference namespace: {}",
        config.host_namespace.as_deref().unwrap_or("per-Host namespace")
    );
    info!("  Workers: {}", config.worker_count);

    let registry = ResourceRegistry::new().register::<Host>()?;
    for kind in registry.kinds() {
        info!("  Serving kind: {}", kind);
    }

    let controller = Controller::new(config, &registry).await?;
    controller.run().await
}
