//! VirtualMachine CRD
//!
//! Desired state of a tenant virtual machine and the status observed on vSphere.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata transport delivering bootstrap key/values through VM extra-config.
pub const TRANSPORT_EXTRA_CONFIG: &str = "ExtraConfig";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vmoperator.vmware.com",
    version = "v1alpha1",
    kind = "VirtualMachine",
    namespaced,
    status = "VirtualMachineStatus",
    shortname = "vm"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Image to clone or deploy from; empty means create from scratch
    #[serde(default)]
    pub image_name: String,

    /// Name of the VirtualMachineClass describing the hardware
    pub class_name: String,

    /// Desired power state (defaults to powered on)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<VirtualMachinePowerState>,

    /// Network interfaces, in attachment order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<VirtualMachineNetworkInterface>,

    /// Bootstrap metadata source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_metadata: Option<VirtualMachineMetadata>,

    /// Storage class used to pick the storage policy of disks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineNetworkInterface {
    /// Logical network name
    pub network_name: String,

    /// Network type ("" for the standard vSphere provider, "nsx-t")
    #[serde(default)]
    pub network_type: String,

    /// Ethernet card model ("vmxnet3" when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethernet_card_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineMetadata {
    /// ConfigMap holding the metadata key/values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,

    /// Delivery mechanism; only "ExtraConfig" is supported
    #[serde(default)]
    pub transport: String,
}

/// Power state of a virtual machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum VirtualMachinePowerState {
    #[default]
    #[serde(alias = "PoweredOn")]
    PoweredOn,
    #[serde(alias = "PoweredOff")]
    PoweredOff,
    #[serde(alias = "Suspended")]
    Suspended,
}

impl std::fmt::Display for VirtualMachinePowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PoweredOn => "poweredOn",
            Self::PoweredOff => "poweredOff",
            Self::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// Host the VM runs on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Observed power state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<VirtualMachinePowerState>,

    /// Lifecycle phase; owned by the reconciler, never by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<VirtualMachinePhase>,

    /// Primary guest IP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_ip: Option<String>,

    /// BIOS UUID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bios_uuid: Option<String>,

    /// vCenter instance UUID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_uuid: Option<String>,

    /// Managed object id of the backing VM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
}

/// Lifecycle phase of a virtual machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum VirtualMachinePhase {
    #[default]
    #[serde(alias = "unknown")]
    Unknown,
    #[serde(alias = "creating")]
    Creating,
    #[serde(alias = "created")]
    Created,
    #[serde(alias = "deleting")]
    Deleting,
    #[serde(alias = "deleted")]
    Deleted,
}

impl VirtualMachineSpec {
    /// Desired power state, powered on when unset.
    #[must_use]
    pub fn desired_power_state(&self) -> VirtualMachinePowerState {
        self.power_state.unwrap_or_default()
    }
}
