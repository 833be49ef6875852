//! VirtualMachineImage records for inventory VMs and library items.

use crate::error::ProviderError;
use crate::resources::{power_state_from_backend, VirtualMachine};
use crds::{
    VirtualMachineImage, VirtualMachineImageSpec, VirtualMachineImageStatus, IMAGE_SOURCE_CONTENT_LIBRARY,
    IMAGE_SOURCE_INVENTORY,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use vsphere_client::LibraryItem;

/// Image type of inventory VMs used as clone sources.
pub const IMAGE_TYPE_VM: &str = "VM";

fn metadata(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Image record of a content library item.
pub fn image_from_library_item(namespace: &str, item: &LibraryItem) -> VirtualMachineImage {
    VirtualMachineImage {
        metadata: metadata(namespace, &item.name),
        spec: VirtualMachineImageSpec {
            image_type: item.item_type.clone(),
            image_source_type: IMAGE_SOURCE_CONTENT_LIBRARY.to_string(),
        },
        status: Some(VirtualMachineImageStatus {
            uuid: item.id.clone(),
            internal_id: item.name.clone(),
            power_state: String::new(),
        }),
    }
}

/// Image record of an inventory VM, read live from vCenter.
pub async fn image_from_vm(namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachineImage, ProviderError> {
    let properties = vm.properties().await?;
    Ok(VirtualMachineImage {
        metadata: metadata(namespace, vm.name()),
        spec: VirtualMachineImageSpec {
            image_type: IMAGE_TYPE_VM.to_string(),
            image_source_type: IMAGE_SOURCE_INVENTORY.to_string(),
        },
        status: Some(VirtualMachineImageStatus {
            uuid: properties.bios_uuid.unwrap_or_default(),
            internal_id: vm.managed_object_id().to_string(),
            power_state: power_state_from_backend(properties.power_state).to_string(),
        }),
    })
}
