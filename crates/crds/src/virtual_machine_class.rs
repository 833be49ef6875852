//! VirtualMachineClass CRD
//!
//! Hardware sizing and resource policy shared by virtual machines.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vmoperator.vmware.com",
    version = "v1alpha1",
    kind = "VirtualMachineClass",
    shortname = "vmclass"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineClassSpec {
    /// Virtual hardware
    pub hardware: VirtualMachineClassHardware,

    /// Resource reservations and limits
    #[serde(default)]
    pub policies: VirtualMachineClassPolicies,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineClassHardware {
    /// Virtual CPU count
    pub cpus: i64,

    /// Memory size as a Kubernetes quantity (e.g. "2Gi")
    pub memory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineClassPolicies {
    #[serde(default)]
    pub resources: VirtualMachineClassResources,

    /// Storage policy applied to the VM and its disks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_policy_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineClassResources {
    /// Reservations
    #[serde(default)]
    pub requests: VirtualMachineResourceSpec,

    /// Limits
    #[serde(default)]
    pub limits: VirtualMachineResourceSpec,
}

/// CPU (in Hz quantity) and memory (in bytes quantity); empty means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineResourceSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory: String,
}
