//! Inventory operations for MockVSphereClient
//!
//! Handles object lookups, VM properties, network backings, and placement

use super::{MockOperation, MockVSphereClient};
use crate::error::VSphereError;
use crate::models::*;

pub fn find_object(
    client: &MockVSphereClient,
    kind: ObjectKind,
    name: &str,
    _datacenter: Option<&ManagedObjectReference>,
) -> Result<ManagedObjectReference, VSphereError> {
    client.check(MockOperation::FindObject)?;

    let found: Vec<ManagedObjectReference> = if kind == ObjectKind::VirtualMachine {
        client.vms
            .lock()
            .unwrap()
            .values()
            .filter(|vm| vm.name == name)
            .map(|vm| vm.reference.clone())
            .collect()
    } else {
        client.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.kind == kind)
            .filter(|o| o.name == name || (kind.accepts_id_lookup() && o.reference.value == name))
            .map(|o| o.reference.clone())
            .collect()
    };

    VSphereError::expect_single(kind, name, found)
}

pub fn resource_pool_owner(
    client: &MockVSphereClient,
    pool: &ManagedObjectReference,
) -> Result<ManagedObjectReference, VSphereError> {
    client.check(MockOperation::ResourcePoolOwner)?;
    client.pool_owners
        .lock()
        .unwrap()
        .get(&pool.value)
        .cloned()
        .ok_or_else(|| VSphereError::not_found(ObjectKind::Cluster, format!("owner of {}", pool.value)))
}

pub fn object_name(client: &MockVSphereClient, object: &ManagedObjectReference) -> Result<String, VSphereError> {
    client.check(MockOperation::ObjectName)?;
    if let Some(vm) = client.vms.lock().unwrap().get(&object.value) {
        return Ok(vm.name.clone());
    }
    client.objects
        .lock()
        .unwrap()
        .iter()
        .find(|o| o.reference == *object)
        .map(|o| o.name.clone())
        .ok_or_else(|| VSphereError::not_found(ObjectKind::from_path(&object.kind), object.value.clone()))
}

pub fn list_virtual_machines(
    client: &MockVSphereClient,
    _datacenter: &ManagedObjectReference,
    pattern: &str,
) -> Result<Vec<VirtualMachineSummary>, VSphereError> {
    client.check(MockOperation::ListVirtualMachines)?;
    let mut summaries: Vec<VirtualMachineSummary> = client.vms
        .lock()
        .unwrap()
        .values()
        .filter(|vm| pattern == "*" || vm.name == pattern)
        .map(|vm| VirtualMachineSummary {
            reference: vm.reference.clone(),
            name: vm.name.clone(),
            power_state: vm.power_state,
        })
        .collect();
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(summaries)
}

pub fn virtual_machine_properties(
    client: &MockVSphereClient,
    vm: &ManagedObjectReference,
) -> Result<VirtualMachineProperties, VSphereError> {
    client.check(MockOperation::VirtualMachineProperties)?;
    let vms = client.vms.lock().unwrap();
    let vm = vms
        .get(&vm.value)
        .ok_or_else(|| VSphereError::not_found(ObjectKind::VirtualMachine, vm.value.clone()))?;

    Ok(VirtualMachineProperties {
        reference: vm.reference.clone(),
        name: vm.name.clone(),
        power_state: vm.power_state,
        host: vm.host.clone(),
        ip_address: vm.ip_address.clone(),
        bios_uuid: vm.bios_uuid.clone(),
        instance_uuid: vm.instance_uuid.clone(),
        guest_heartbeat: vm.guest_heartbeat,
        devices: vm.devices.clone(),
    })
}

pub fn network_backing(
    client: &MockVSphereClient,
    network: &ManagedObjectReference,
) -> Result<EthernetCardBacking, VSphereError> {
    client.check(MockOperation::NetworkBacking)?;
    client.backings
        .lock()
        .unwrap()
        .get(&network.value)
        .cloned()
        .ok_or_else(|| VSphereError::InvalidRequest(format!("no backing for network {}", network.value)))
}

pub fn place_vm(
    client: &MockVSphereClient,
    _cluster: &ManagedObjectReference,
    spec: &PlacementSpec,
) -> Result<PlacementResult, VSphereError> {
    client.check(MockOperation::PlaceVm)?;
    *client.last_placement.lock().unwrap() = Some(spec.clone());
    Ok(client.placement.lock().unwrap().clone())
}
