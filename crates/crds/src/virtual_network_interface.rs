//! VirtualNetworkInterface CRD
//!
//! NSX-T logical port requested for a VM NIC. The NSX container plugin
//! fills in the status once the port is realized.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vmware.com",
    version = "v1alpha1",
    kind = "VirtualNetworkInterface",
    namespaced,
    status = "VirtualNetworkInterfaceStatus",
    shortname = "vnetif"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkInterfaceSpec {
    /// Virtual network the interface attaches to
    pub virtual_network: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkInterfaceStatus {
    #[serde(default)]
    pub conditions: Vec<InterfaceCondition>,

    /// NSX logical port id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,

    #[serde(default)]
    pub ip_addresses: Vec<InterfaceIpAddress>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<InterfaceProviderStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceIpAddress {
    pub ip: String,
    #[serde(default)]
    pub subnet_mask: String,
    #[serde(default)]
    pub gateway: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceProviderStatus {
    /// NSX logical switch backing the port
    #[serde(default)]
    pub nsx_logical_switch_id: String,
}

impl VirtualNetworkInterfaceStatus {
    /// True once the plugin reports the Ready condition.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.condition_type == "Ready" && c.status == "True")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_requires_true_condition() {
        let mut status = VirtualNetworkInterfaceStatus::default();
        assert!(!status.is_ready());
        status.conditions.push(InterfaceCondition {
            condition_type: "Ready".to_string(),
            status: "False".to_string(),
            ..Default::default()
        });
        assert!(!status.is_ready());
        status.conditions[0].status = "True".to_string();
        assert!(status.is_ready());
    }
}
