//! VM Operator
//!
//! Reconciles VirtualMachine resources against vCenter through the vSphere
//! VM provider:
//! - VirtualMachine: created, reconfigured, powered and deleted on vSphere
//! - Provider ConfigMap: vCenter endpoint changes reset the session cache
//!
//! Probes and Prometheus metrics are served over HTTP.

mod backoff;
mod controller;
mod error;
mod lifecycle;
mod metrics;
mod reconcile_helpers;
mod reconciler;
mod watcher;

#[cfg(test)]
mod reconcile_helpers_test;
#[cfg(test)]
mod test_utils;

use crate::controller::{Controller, ControllerSettings};
use crate::error::ControllerError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and reqwest both build rustls clients; pick the ring provider once.
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting VM Operator");

    let settings = ControllerSettings::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", settings.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Operator namespace: {}", settings.operator_namespace);
    info!(
        "  Provider config: {}",
        if settings.config_from_env { "environment" } else { "ConfigMap" }
    );
    info!("  Metrics port: {}", settings.metrics_port);
    info!(
        "  Debounce: {:?}, concurrency: {}, resync: {:?}",
        settings.watch.debounce, settings.watch.concurrency, settings.watch.resync
    );

    let controller = Controller::new(settings).await?;
    controller.run().await?;

    Ok(())
}
