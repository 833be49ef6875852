//! Main controller implementation.
//!
//! `Controller` wires the vSphere provider to the cluster and runs the
//! VirtualMachine watcher, the provider ConfigMap watcher and the
//! probe/metrics server side by side.

use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::watcher::{watch_provider_config, watch_virtual_machines, WatchSettings};
use crds::VirtualMachine;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vm_provider::config::{parse_extra_config, EXTRA_CONFIG_ENV};
use vm_provider::{
    ConfigSource, KubeConfigSource, KubeNetworkInterfaceClient, NetworkInterfaceClient, ProviderConfig,
    StaticConfigSource, VSphereVmProvider, VmProviderInterface,
};

const DEFAULT_OPERATOR_NAMESPACE: &str = "vmware-system-vmop";
const DEFAULT_METRICS_PORT: u16 = 8080;

/// Operator settings read from the environment.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Namespace holding the provider ConfigMap and credentials
    pub operator_namespace: String,
    pub metrics_port: u16,
    pub watch: WatchSettings,
    /// Provider configuration comes from `VSPHERE_*` variables instead of the cluster
    pub config_from_env: bool,
    pub extra_config: BTreeMap<String, String>,
}

impl ControllerSettings {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| -> Result<Option<u64>, ControllerError> {
            lookup(key)
                .filter(|v| !v.is_empty())
                .map(|v| {
                    v.trim()
                        .parse()
                        .map_err(|e| ControllerError::InvalidConfig(format!("{} {:?}: {}", key, v, e)))
                })
                .transpose()
        };

        let mut watch = WatchSettings::default();
        if let Some(secs) = number("RECONCILE_DEBOUNCE_SECS")? {
            watch.debounce = Duration::from_secs(secs);
        }
        if let Some(secs) = number("RESYNC_PERIOD_SECS")? {
            watch.resync = Duration::from_secs(secs);
        }
        if let Some(concurrency) = number("MAX_CONCURRENT_RECONCILES")? {
            watch.concurrency = u16::try_from(concurrency)
                .map_err(|_| ControllerError::InvalidConfig(format!("MAX_CONCURRENT_RECONCILES {} is too large", concurrency)))?;
        }
        let metrics_port = match number("METRICS_PORT")? {
            Some(port) => u16::try_from(port)
                .map_err(|_| ControllerError::InvalidConfig(format!("METRICS_PORT {} is not a port", port)))?,
            None => DEFAULT_METRICS_PORT,
        };
        let extra_config = match lookup(EXTRA_CONFIG_ENV).filter(|v| !v.is_empty()) {
            Some(json) => parse_extra_config(&json)?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|v| !v.is_empty()),
            operator_namespace: lookup("POD_NAMESPACE")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_OPERATOR_NAMESPACE.to_string()),
            metrics_port,
            watch,
            config_from_env: lookup("VSPHERE_PNID").is_some_and(|v| !v.is_empty()),
            extra_config,
        })
    }
}

/// Main controller for VirtualMachine management.
pub struct Controller {
    provider: Arc<dyn VmProviderInterface>,
    vm_watcher: JoinHandle<Result<(), ControllerError>>,
    config_watcher: Option<JoinHandle<Result<(), ControllerError>>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(settings: ControllerSettings) -> Result<Self, ControllerError> {
        info!("Initializing VM Operator");

        let client = Client::try_default().await?;

        let config_source: Arc<dyn ConfigSource> = if settings.config_from_env {
            info!("Using vSphere provider configuration from the environment");
            Arc::new(StaticConfigSource::new(ProviderConfig::from_env()?))
        } else {
            info!(
                "Using vSphere provider configuration from ConfigMap in {}",
                settings.operator_namespace
            );
            Arc::new(KubeConfigSource::new(
                client.clone(),
                settings.operator_namespace.clone(),
                settings.extra_config.clone(),
            ))
        };
        let network_interfaces: Arc<dyn NetworkInterfaceClient> = Arc::new(KubeNetworkInterfaceClient::new(client.clone()));
        let provider: Arc<dyn VmProviderInterface> =
            Arc::new(VSphereVmProvider::from_config_source(config_source, Some(network_interfaces)));

        let metrics = Arc::new(
            Metrics::new().map_err(|e| ControllerError::InvalidConfig(format!("metrics registry: {}", e)))?,
        );
        let reconciler = Arc::new(Reconciler::new(client.clone(), Arc::clone(&provider)));

        let vm_api: Api<VirtualMachine> = match settings.watch_namespace.as_deref() {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        };

        let vm_watcher = {
            let metrics = Arc::clone(&metrics);
            let watch = settings.watch;
            tokio::spawn(async move { watch_virtual_machines(vm_api, reconciler, metrics, watch).await })
        };

        let config_watcher = (!settings.config_from_env).then(|| {
            let api: Api<ConfigMap> = Api::namespaced(client.clone(), &settings.operator_namespace);
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { watch_provider_config(api, provider).await })
        });

        let metrics_server = {
            let port = settings.metrics_port;
            tokio::spawn(async move { metrics::serve(metrics, port).await })
        };

        Ok(Self {
            provider,
            vm_watcher,
            config_watcher,
            metrics_server,
        })
    }

    /// Runs the controller until a watcher stops or the process is signalled.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("VM Operator running");
        let Controller {
            provider,
            mut vm_watcher,
            config_watcher,
            mut metrics_server,
        } = self;

        let config_watcher = async move {
            match config_watcher {
                Some(handle) => handle.await,
                None => future::pending().await,
            }
        };

        // The VirtualMachine watcher returns Ok once a termination signal arrives.
        let result = tokio::select! {
            result = &mut vm_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("VirtualMachine watcher panicked: {}", e)))
                    .and_then(|r| r)
            }
            result = config_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Provider ConfigMap watcher panicked: {}", e)))
                    .and_then(|r| r)
            }
            result = &mut metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))
                    .and_then(|r| r)
                    .and_then(|()| Err::<(), _>(ControllerError::Watch("Metrics server stopped".to_string())))
            }
        };

        if let Err(e) = &result {
            warn!("VM Operator stopping: {}", e);
        }
        info!("Logging out of vCenter sessions");
        provider.clear_sessions().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn settings_default_to_cluster_config() {
        let settings = ControllerSettings::from_lookup(env(&[])).unwrap();
        assert_eq!(settings.watch_namespace, None);
        assert_eq!(settings.operator_namespace, DEFAULT_OPERATOR_NAMESPACE);
        assert_eq!(settings.metrics_port, 8080);
        assert_eq!(settings.watch.concurrency, 3);
        assert_eq!(settings.watch.debounce, Duration::from_secs(5));
        assert!(!settings.config_from_env);
        assert!(settings.extra_config.is_empty());
    }

    #[test]
    fn settings_read_overrides() {
        let settings = ControllerSettings::from_lookup(env(&[
            ("WATCH_NAMESPACE", "team-a"),
            ("POD_NAMESPACE", "vmop"),
            ("METRICS_PORT", "9090"),
            ("MAX_CONCURRENT_RECONCILES", "8"),
            ("RESYNC_PERIOD_SECS", "120"),
            ("VSPHERE_PNID", "vc.example.com"),
            ("JSON_EXTRA_CONFIG", r#"{"guestinfo.a":"1"}"#),
        ]))
        .unwrap();
        assert_eq!(settings.watch_namespace.as_deref(), Some("team-a"));
        assert_eq!(settings.operator_namespace, "vmop");
        assert_eq!(settings.metrics_port, 9090);
        assert_eq!(settings.watch.concurrency, 8);
        assert_eq!(settings.watch.resync, Duration::from_secs(120));
        assert!(settings.config_from_env);
        assert_eq!(settings.extra_config.get("guestinfo.a").map(String::as_str), Some("1"));
    }

    #[test]
    fn settings_reject_bad_numbers() {
        assert!(matches!(
            ControllerSettings::from_lookup(env(&[("METRICS_PORT", "70000")])),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            ControllerSettings::from_lookup(env(&[("RECONCILE_DEBOUNCE_SECS", "soon")])),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            ControllerSettings::from_lookup(env(&[("JSON_EXTRA_CONFIG", "{")])),
            Err(ControllerError::Provider(_))
        ));
    }
}
