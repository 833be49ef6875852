//! Kubernetes resource watchers.
//!
//! VirtualMachines are driven by `kube_runtime::Controller`, which handles
//! reconnection, debouncing and per-object scheduling. The provider ConfigMap
//! is followed with a plain watch stream so a vCenter endpoint change reaches
//! the provider's session cache.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crds::VirtualMachine;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, ResourceExt};
use kube_runtime::{
    controller::{Action, Config as ControllerConfig},
    watcher, Controller, WatchStreamExt,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use vm_provider::config::{vc_endpoint, PROVIDER_CONFIG_MAP_NAME};
use vm_provider::VmProviderInterface;

/// Scheduling knobs for the VirtualMachine controller.
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub debounce: Duration,
    pub concurrency: u16,
    /// Steady-state requeue after a successful reconcile
    pub resync: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(5),
            concurrency: 3,
            resync: Duration::from_secs(600),
        }
    }
}

struct Context {
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
    resync: Duration,
}

fn object_ref_key(vm: &VirtualMachine) -> String {
    format!("{}/{}", vm.namespace().unwrap_or_default(), vm.name_any())
}

fn operation(vm: &VirtualMachine) -> &'static str {
    if vm.metadata.deletion_timestamp.is_some() {
        "delete"
    } else {
        "apply"
    }
}

async fn reconcile(vm: Arc<VirtualMachine>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = object_ref_key(&vm);
    debug!("Reconciling VirtualMachine {}", key);
    let started = Instant::now();

    match ctx.reconciler.reconcile_virtual_machine(&vm).await {
        Ok(result) => {
            ctx.metrics.record(operation(&vm), result, started.elapsed());
            ctx.reconciler.reset_backoff(&key);
            Ok(Action::requeue(ctx.resync))
        }
        Err(e) => {
            ctx.metrics.record(operation(&vm), e.metric_label(), started.elapsed());
            Err(e)
        }
    }
}

fn error_policy(vm: Arc<VirtualMachine>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = object_ref_key(&vm);
    let delay = ctx.reconciler.next_requeue(&key);
    error!("Reconciliation error for VirtualMachine {}: {} (retrying in {:?})", key, error, delay);
    Action::requeue(delay)
}

/// Watch VirtualMachines until the stream ends.
pub async fn watch_virtual_machines(
    api: Api<VirtualMachine>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
    settings: WatchSettings,
) -> Result<(), ControllerError> {
    info!(
        "Starting VirtualMachine watcher (debounce {:?}, concurrency {})",
        settings.debounce, settings.concurrency
    );

    let controller_config = ControllerConfig::default()
        .debounce(settings.debounce)
        .concurrency(settings.concurrency);
    let ctx = Arc::new(Context {
        reconciler,
        metrics: Arc::clone(&metrics),
        resync: settings.resync,
    });

    metrics.set_ready(true);
    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!("VirtualMachine controller error: {}", e);
            }
        })
        .await;
    metrics.set_ready(false);

    Ok(())
}

/// Record `observed` and report whether it replaces a different endpoint.
///
/// The first endpoint seen is the one sessions were built from.
pub fn endpoint_changed(last: &mut Option<(String, u16)>, observed: (String, u16)) -> bool {
    let changed = last.as_ref().is_some_and(|previous| *previous != observed);
    *last = Some(observed);
    changed
}

/// Follow the provider ConfigMap and push vCenter endpoint changes to the provider.
pub async fn watch_provider_config(
    api: Api<ConfigMap>,
    provider: Arc<dyn VmProviderInterface>,
) -> Result<(), ControllerError> {
    info!("Starting provider ConfigMap watcher for {}", PROVIDER_CONFIG_MAP_NAME);
    let config = watcher::Config::default().fields(&format!("metadata.name={}", PROVIDER_CONFIG_MAP_NAME));
    let mut stream = watcher(api, config).default_backoff().applied_objects().boxed();
    let mut endpoint = None;

    while let Some(event) = stream.next().await {
        let config_map = match event {
            Ok(config_map) => config_map,
            Err(e) => {
                warn!("Provider ConfigMap watch error: {}", e);
                continue;
            }
        };
        let observed = match vc_endpoint(&config_map.data.unwrap_or_default()) {
            Ok(observed) => observed,
            Err(e) => {
                warn!("Ignoring provider ConfigMap update: {}", e);
                continue;
            }
        };
        if endpoint_changed(&mut endpoint, observed.clone()) {
            info!("vCenter endpoint changed to {}:{}", observed.0, observed.1);
            provider.update_vc_pnid(&observed.0, observed.1).await?;
        }
    }

    Err(ControllerError::Watch("provider ConfigMap watch ended".to_string()))
}
