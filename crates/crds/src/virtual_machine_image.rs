//! VirtualMachineImage CRD
//!
//! Images surfaced from the vSphere inventory or a content library.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Image source for templates found in the VM inventory.
pub const IMAGE_SOURCE_INVENTORY: &str = "Inventory";
/// Image source for content library items.
pub const IMAGE_SOURCE_CONTENT_LIBRARY: &str = "Content Library";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vmoperator.vmware.com",
    version = "v1alpha1",
    kind = "VirtualMachineImage",
    namespaced,
    status = "VirtualMachineImageStatus",
    shortname = "vmimage"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineImageSpec {
    /// Image type ("VM", "ovf")
    #[serde(rename = "type")]
    pub image_type: String,

    /// Where the image comes from
    pub image_source_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineImageStatus {
    /// Backend UUID of the image
    #[serde(default)]
    pub uuid: String,

    /// Backend-internal identifier
    #[serde(default)]
    pub internal_id: String,

    /// Power state of inventory templates
    #[serde(default)]
    pub power_state: String,
}
