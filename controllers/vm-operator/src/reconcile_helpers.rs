//! Helper functions for VirtualMachine reconciliation
//!
//! Pure functions that build patches and resolve inputs, kept apart from the
//! Kubernetes plumbing in the reconciler so they can be tested directly.

use crate::error::ControllerError;
use crds::{VirtualMachine, VirtualMachineClassSpec, VirtualMachineStatus};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use vm_provider::provider::{VM_MOREF_ANNOTATION, VM_PROVIDER_ANNOTATION};

/// Finalizer guarding deletion of the backing VM.
pub const FINALIZER: &str = "virtualmachine.vmoperator.vmware.com";

/// StorageClass parameter naming the vSphere storage policy.
pub const STORAGE_POLICY_PARAMETER: &str = "storagePolicyID";

/// Namespace and name of a VirtualMachine.
pub fn object_key(vm: &VirtualMachine) -> Result<(String, String), ControllerError> {
    let namespace = vm
        .metadata
        .namespace
        .clone()
        .ok_or(ControllerError::MissingObjectKey("namespace"))?;
    let name = vm.metadata.name.clone().ok_or(ControllerError::MissingObjectKey("name"))?;
    Ok((namespace, name))
}

pub fn has_finalizer(metadata: &ObjectMeta) -> bool {
    metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|name| name == FINALIZER))
}

/// Merge patch setting the finalizer list with ours added.
pub fn add_finalizer_patch(metadata: &ObjectMeta) -> serde_json::Value {
    let mut finalizers = metadata.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == FINALIZER) {
        finalizers.push(FINALIZER.to_string());
    }
    finalizers_patch(metadata, finalizers)
}

/// Merge patch setting the finalizer list with ours removed.
pub fn remove_finalizer_patch(metadata: &ObjectMeta) -> serde_json::Value {
    let finalizers: Vec<String> = metadata
        .finalizers
        .iter()
        .flatten()
        .filter(|f| f.as_str() != FINALIZER)
        .cloned()
        .collect();
    finalizers_patch(metadata, finalizers)
}

// resourceVersion turns a concurrent finalizer edit into a conflict.
fn finalizers_patch(metadata: &ObjectMeta, finalizers: Vec<String>) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "resourceVersion": metadata.resource_version,
            "finalizers": finalizers,
        }
    })
}

/// Whether the status changed enough to be written back.
pub fn status_needs_update(current: Option<&VirtualMachineStatus>, desired: &VirtualMachineStatus) -> bool {
    current != Some(desired)
}

pub fn status_patch(status: &VirtualMachineStatus) -> serde_json::Value {
    serde_json::json!({ "status": status })
}

/// Merge patch copying provider annotations that differ in `updated`.
pub fn provider_annotations_patch(current: &ObjectMeta, updated: &ObjectMeta) -> Option<serde_json::Value> {
    let updated_annotations = updated.annotations.as_ref()?;
    let current_annotations = current.annotations.clone().unwrap_or_default();

    let changed: BTreeMap<&str, &String> = [VM_PROVIDER_ANNOTATION, VM_MOREF_ANNOTATION]
        .into_iter()
        .filter_map(|key| updated_annotations.get(key).map(|value| (key, value)))
        .filter(|(key, value)| current_annotations.get(*key) != Some(*value))
        .collect();
    if changed.is_empty() {
        return None;
    }
    Some(serde_json::json!({ "metadata": { "annotations": changed } }))
}

/// Bootstrap metadata carried by a ConfigMap. Binary data is not delivered.
pub fn metadata_from_config_map(config_map: &ConfigMap) -> BTreeMap<String, String> {
    config_map.data.clone().unwrap_or_default()
}

/// Storage policy for the VM's disks.
///
/// The StorageClass parameter wins over the class policy.
pub fn storage_profile_id(
    class: &VirtualMachineClassSpec,
    storage_class_parameters: Option<&BTreeMap<String, String>>,
) -> Option<String> {
    storage_class_parameters
        .and_then(|p| p.get(STORAGE_POLICY_PARAMETER))
        .filter(|id| !id.is_empty())
        .cloned()
        .or_else(|| class.policies.storage_policy_id.clone())
}
