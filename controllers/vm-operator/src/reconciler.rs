//! Reconciliation logic for VirtualMachine resources.
//!
//! The reconciler resolves what the provider needs from the cluster (the VM
//! class, bootstrap metadata, storage policy), hands the VM to the lifecycle
//! functions and writes the finalizer, annotations and status back.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::lifecycle;
use crate::reconcile_helpers::{
    add_finalizer_patch, has_finalizer, metadata_from_config_map, object_key, provider_annotations_patch,
    remove_finalizer_patch, status_needs_update, status_patch, storage_profile_id,
};
use crds::{VirtualMachine, VirtualMachineClass, VirtualMachinePhase};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use vm_provider::{VmConfigArgs, VmProviderInterface};

/// Backoff state for a resource
#[derive(Debug, Clone, Default)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

/// Reconciles VirtualMachine resources through a VM provider.
pub struct Reconciler {
    client: Client,
    provider: Arc<dyn VmProviderInterface>,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    pub fn new(client: Client, provider: Arc<dyn VmProviderInterface>) -> Self {
        Self {
            client,
            provider,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn provider(&self) -> &Arc<dyn VmProviderInterface> {
        &self.provider
    }

    fn backoff_states(&self) -> MutexGuard<'_, HashMap<String, BackoffState>> {
        self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay before retrying `key` after another failure.
    pub fn next_requeue(&self, key: &str) -> Duration {
        let mut states = self.backoff_states();
        let state = states.entry(key.to_string()).or_default();
        state.increment_error();
        let delay = state.backoff.next_backoff();
        debug!("{} failed {} time(s) in a row, retrying in {:?}", key, state.error_count, delay);
        delay
    }

    /// Forget the failure history of `key` after a successful reconcile.
    pub fn reset_backoff(&self, key: &str) {
        self.backoff_states().remove(key);
    }

    /// Bring the backend in line with `vm`.
    ///
    /// Returns what was done: `created`, `updated`, `deleted` or `skipped`.
    pub async fn reconcile_virtual_machine(&self, vm: &VirtualMachine) -> Result<&'static str, ControllerError> {
        let (namespace, name) = object_key(vm)?;
        let api: Api<VirtualMachine> = Api::namespaced(self.client.clone(), &namespace);

        if vm.metadata.deletion_timestamp.is_some() {
            return self.reconcile_delete(&api, vm, &namespace, &name).await;
        }

        if !has_finalizer(&vm.metadata) {
            debug!("Adding finalizer to VirtualMachine {}/{}", namespace, name);
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&add_finalizer_patch(&vm.metadata)))
                .await?;
        }

        let args = self.resolve_config_args(&namespace, vm).await?;
        let mut updated = vm.clone();
        let result = lifecycle::reconcile_normal(self.provider.as_ref(), &mut updated, &args).await;

        // Whatever the provider managed to observe is written back, even on failure.
        let persisted = self.persist(&api, &name, vm, &updated).await;
        let outcome = result?;
        persisted?;
        Ok(outcome.as_str())
    }

    async fn reconcile_delete(
        &self,
        api: &Api<VirtualMachine>,
        vm: &VirtualMachine,
        namespace: &str,
        name: &str,
    ) -> Result<&'static str, ControllerError> {
        if !has_finalizer(&vm.metadata) {
            debug!("VirtualMachine {}/{} is being deleted without our finalizer", namespace, name);
            return Ok("skipped");
        }

        let mut deleting = vm.clone();
        lifecycle::set_phase(&mut deleting, VirtualMachinePhase::Deleting);
        self.update_status(api, name, vm, &deleting).await?;

        lifecycle::reconcile_delete(self.provider.as_ref(), &mut deleting).await?;
        info!("Deleted VirtualMachine {}/{}, removing finalizer", namespace, name);

        // The status write bumped the resourceVersion.
        let current = api.get(name).await?;
        api.patch(name, &PatchParams::default(), &Patch::Merge(&remove_finalizer_patch(&current.metadata)))
            .await?;
        Ok("deleted")
    }

    /// Class, bootstrap metadata and storage policy for `vm`.
    async fn resolve_config_args(&self, namespace: &str, vm: &VirtualMachine) -> Result<VmConfigArgs, ControllerError> {
        let classes: Api<VirtualMachineClass> = Api::all(self.client.clone());
        let class = classes
            .get_opt(&vm.spec.class_name)
            .await?
            .ok_or_else(|| ControllerError::ClassNotFound(vm.spec.class_name.clone()))?;

        let metadata = match vm.spec.vm_metadata.as_ref().and_then(|m| m.config_map_name.as_deref()) {
            Some(config_map_name) => {
                let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                let config_map = config_maps
                    .get_opt(config_map_name)
                    .await?
                    .ok_or_else(|| ControllerError::MetadataNotFound(format!("{}/{}", namespace, config_map_name)))?;
                metadata_from_config_map(&config_map)
            }
            None => BTreeMap::new(),
        };

        let storage_parameters = match vm.spec.storage_class.as_deref() {
            Some(storage_class) => {
                let storage_classes: Api<StorageClass> = Api::all(self.client.clone());
                let found = storage_classes.get_opt(storage_class).await?;
                if found.is_none() {
                    warn!("StorageClass {} not found, using the class storage policy", storage_class);
                }
                found.and_then(|sc| sc.parameters)
            }
            None => None,
        };

        Ok(VmConfigArgs {
            storage_profile_id: storage_profile_id(&class.spec, storage_parameters.as_ref()),
            class: class.spec,
            metadata,
        })
    }

    async fn persist(
        &self,
        api: &Api<VirtualMachine>,
        name: &str,
        current: &VirtualMachine,
        updated: &VirtualMachine,
    ) -> Result<(), ControllerError> {
        let result = async {
            if let Some(patch) = provider_annotations_patch(&current.metadata, &updated.metadata) {
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
            }
            self.update_status(api, name, current, updated).await
        }
        .await;
        if let Err(e) = &result {
            warn!("Failed to write back VirtualMachine {}: {}", name, e);
        }
        result
    }

    async fn update_status(
        &self,
        api: &Api<VirtualMachine>,
        name: &str,
        current: &VirtualMachine,
        updated: &VirtualMachine,
    ) -> Result<(), ControllerError> {
        let Some(status) = updated.status.as_ref() else {
            return Ok(());
        };
        if !status_needs_update(current.status.as_ref(), status) {
            debug!("Status of VirtualMachine {} unchanged", name);
            return Ok(());
        }
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch(status)))
            .await?;
        Ok(())
    }
}
