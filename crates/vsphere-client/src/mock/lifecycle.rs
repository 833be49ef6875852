//! VM lifecycle operations for MockVSphereClient
//!
//! Device changes are applied the way vCenter applies them: adds get a
//! positive key, edits replace by key, removes drop by key.

use super::{MockOperation, MockVSphereClient, MockVm};
use crate::error::VSphereError;
use crate::models::*;

/// First key handed to added devices
const FIRST_DEVICE_KEY: i32 = 4000;

fn apply_device_changes(vm: &mut MockVm, changes: &[VirtualDeviceConfigSpec]) {
    for change in changes {
        let mut device = change.device.clone();
        match change.operation {
            DeviceOperation::Add => {
                let next_key = vm.devices.iter().map(VirtualDevice::key).max().unwrap_or(FIRST_DEVICE_KEY - 1).max(FIRST_DEVICE_KEY - 1) + 1;
                device.set_key(next_key);
                vm.devices.push(device);
            }
            DeviceOperation::Edit => {
                if let Some(existing) = vm.devices.iter_mut().find(|d| d.key() == device.key()) {
                    *existing = device;
                }
            }
            DeviceOperation::Remove => {
                vm.devices.retain(|d| d.key() != device.key());
            }
        }
    }
}

fn task_failed(vm: &ManagedObjectReference, message: &str) -> VSphereError {
    VSphereError::TaskFailed {
        task: format!("task-{}", vm.value),
        message: message.to_string(),
    }
}

fn not_found(vm: &ManagedObjectReference) -> VSphereError {
    VSphereError::not_found(ObjectKind::VirtualMachine, vm.value.clone())
}

pub fn create_vm(
    client: &MockVSphereClient,
    folder: &ManagedObjectReference,
    pool: &ManagedObjectReference,
    host: Option<&ManagedObjectReference>,
    config: &VirtualMachineConfigSpec,
) -> Result<ManagedObjectReference, VSphereError> {
    client.check(MockOperation::CreateVm)?;
    let name = config
        .name
        .clone()
        .ok_or_else(|| VSphereError::InvalidRequest("config spec has no name".to_string()))?;
    if client.vm(&name).is_some() {
        return Err(task_failed(folder, &format!("The name '{}' already exists.", name)));
    }

    let id = client.next_id();
    let mut vm = client.new_vm(format!("vm-{}", id), &name, Vec::new());
    vm.folder = Some(folder.clone());
    vm.pool = Some(pool.clone());
    vm.host = host.map(|h| h.value.clone());
    apply_device_changes(&mut vm, &config.device_change);
    vm.applied_configs.push(config.clone());

    let reference = vm.reference.clone();
    client.vms.lock().unwrap().insert(reference.value.clone(), vm);
    Ok(reference)
}

pub fn clone_vm(
    client: &MockVSphereClient,
    source: &ManagedObjectReference,
    folder: &ManagedObjectReference,
    name: &str,
    spec: &VirtualMachineCloneSpec,
) -> Result<ManagedObjectReference, VSphereError> {
    client.check(MockOperation::CloneVm)?;
    let source_devices = client.vms
        .lock()
        .unwrap()
        .get(&source.value)
        .map(|vm| vm.devices.clone())
        .ok_or_else(|| not_found(source))?;
    if client.vm(name).is_some() {
        return Err(task_failed(folder, &format!("The name '{}' already exists.", name)));
    }
    *client.last_clone.lock().unwrap() = Some(spec.clone());

    let id = client.next_id();
    let mut vm = client.new_vm(format!("vm-{}", id), name, source_devices);
    vm.folder = Some(folder.clone());
    vm.pool = spec.location.pool.clone();
    vm.host = spec.location.host.as_ref().map(|h| h.value.clone());
    apply_device_changes(&mut vm, &spec.location.device_change);
    if let Some(config) = &spec.config {
        apply_device_changes(&mut vm, &config.device_change);
        vm.applied_configs.push(config.clone());
    }
    if spec.power_on {
        vm.power_state = PowerState::PoweredOn;
    }
    vm.customization = spec.customization.clone();

    let reference = vm.reference.clone();
    client.vms.lock().unwrap().insert(reference.value.clone(), vm);
    Ok(reference)
}

pub fn reconfigure_vm(
    client: &MockVSphereClient,
    vm: &ManagedObjectReference,
    spec: &VirtualMachineConfigSpec,
) -> Result<(), VSphereError> {
    client.check(MockOperation::ReconfigureVm)?;
    let mut vms = client.vms.lock().unwrap();
    let target = vms.get_mut(&vm.value).ok_or_else(|| not_found(vm))?;
    apply_device_changes(target, &spec.device_change);
    target.applied_configs.push(spec.clone());
    Ok(())
}

pub fn customize_vm(
    client: &MockVSphereClient,
    vm: &ManagedObjectReference,
    spec: &CustomizationSpec,
) -> Result<(), VSphereError> {
    client.check(MockOperation::CustomizeVm)?;
    let mut vms = client.vms.lock().unwrap();
    let target = vms.get_mut(&vm.value).ok_or_else(|| not_found(vm))?;
    if target.power_state != PowerState::PoweredOff {
        return Err(task_failed(vm, "The operation is not allowed in the current state."));
    }
    target.customization = Some(spec.clone());
    Ok(())
}

pub fn set_power_state(
    client: &MockVSphereClient,
    operation: MockOperation,
    vm: &ManagedObjectReference,
    state: PowerState,
) -> Result<(), VSphereError> {
    client.check(operation)?;
    let mut vms = client.vms.lock().unwrap();
    let target = vms.get_mut(&vm.value).ok_or_else(|| not_found(vm))?;
    if target.power_state == state {
        return Err(task_failed(vm, "The attempted operation cannot be performed in the current state."));
    }
    target.power_state = state;
    Ok(())
}

pub fn shutdown_guest(client: &MockVSphereClient, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
    client.check(MockOperation::ShutdownGuest)?;
    let mut vms = client.vms.lock().unwrap();
    let target = vms.get_mut(&vm.value).ok_or_else(|| not_found(vm))?;
    if !target.tools_running {
        return Err(VSphereError::Api("ToolsUnavailable".to_string()));
    }
    target.power_state = PowerState::PoweredOff;
    Ok(())
}

pub fn destroy_vm(client: &MockVSphereClient, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
    client.check(MockOperation::DestroyVm)?;
    let mut vms = client.vms.lock().unwrap();
    let target = vms.get(&vm.value).ok_or_else(|| not_found(vm))?;
    if target.power_state == PowerState::PoweredOn {
        return Err(task_failed(vm, "The attempted operation cannot be performed in the current state (Powered on)."));
    }
    vms.remove(&vm.value);
    Ok(())
}
