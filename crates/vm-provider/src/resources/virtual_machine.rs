//! Remote VM handle.
//!
//! A `VirtualMachine` pairs a VM's name with its managed object reference and
//! the authenticated client it was resolved through. Every query reads live
//! state from vCenter; nothing is cached on the handle.

use crate::error::{ProviderError, VSphereResultExt};
use crds::{VirtualMachinePowerState, VirtualMachineStatus};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use vsphere_client::{
    CustomizationSpec, GuestHeartbeatStatus, ManagedObjectReference, PowerState, VSphereClientTrait,
    VirtualDevice, VirtualMachineConfigSpec, VirtualMachineProperties,
};

/// Map a backend power state onto the resource model.
pub fn power_state_from_backend(state: PowerState) -> VirtualMachinePowerState {
    match state {
        PowerState::PoweredOn => VirtualMachinePowerState::PoweredOn,
        PowerState::PoweredOff => VirtualMachinePowerState::PoweredOff,
        PowerState::Suspended => VirtualMachinePowerState::Suspended,
    }
}

/// Handle to a VM living in vCenter.
#[derive(Clone)]
pub struct VirtualMachine {
    name: String,
    reference: ManagedObjectReference,
    client: Arc<dyn VSphereClientTrait>,
}

impl fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("name", &self.name)
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}

impl VirtualMachine {
    pub fn new(name: impl Into<String>, reference: ManagedObjectReference, client: Arc<dyn VSphereClientTrait>) -> Self {
        Self {
            name: name.into(),
            reference,
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reference(&self) -> &ManagedObjectReference {
        &self.reference
    }

    /// Managed object id, e.g. `vm-42`
    pub fn managed_object_id(&self) -> &str {
        &self.reference.value
    }

    pub async fn properties(&self) -> Result<VirtualMachineProperties, ProviderError> {
        self.client
            .virtual_machine_properties(&self.reference)
            .await
            .with_context(|| format!("failed to read properties of VM {}", self.name))
    }

    pub async fn devices(&self) -> Result<Vec<VirtualDevice>, ProviderError> {
        Ok(self.properties().await?.devices)
    }

    /// Ethernet cards currently attached.
    pub async fn network_devices(&self) -> Result<Vec<VirtualDevice>, ProviderError> {
        Ok(self.devices().await?.into_iter().filter(VirtualDevice::is_ethernet_card).collect())
    }

    pub async fn disks(&self) -> Result<Vec<VirtualDevice>, ProviderError> {
        Ok(self.devices().await?.into_iter().filter(VirtualDevice::is_disk).collect())
    }

    pub async fn power_state(&self) -> Result<VirtualMachinePowerState, ProviderError> {
        Ok(power_state_from_backend(self.properties().await?.power_state))
    }

    pub async fn guest_heartbeat(&self) -> Result<GuestHeartbeatStatus, ProviderError> {
        Ok(self.properties().await?.guest_heartbeat)
    }

    /// Drive the VM to `desired`; a no-op when it is already there.
    pub async fn set_power_state(&self, desired: VirtualMachinePowerState) -> Result<(), ProviderError> {
        let current = self.power_state().await?;
        if current == desired {
            debug!("VM {} already {}", self.name, desired);
            return Ok(());
        }

        info!("Changing power state of VM {} from {} to {}", self.name, current, desired);
        let result = match desired {
            VirtualMachinePowerState::PoweredOn => self.client.power_on_vm(&self.reference).await,
            VirtualMachinePowerState::PoweredOff => self.client.power_off_vm(&self.reference).await,
            VirtualMachinePowerState::Suspended => self.client.suspend_vm(&self.reference).await,
        };
        result.with_context(|| format!("failed to change power state of VM {} to {}", self.name, desired))
    }

    pub async fn reconfigure(&self, spec: &VirtualMachineConfigSpec) -> Result<(), ProviderError> {
        self.client
            .reconfigure_vm(&self.reference, spec)
            .await
            .with_context(|| format!("failed to reconfigure VM {}", self.name))
    }

    pub async fn customize(&self, spec: &CustomizationSpec) -> Result<(), ProviderError> {
        self.client
            .customize_vm(&self.reference, spec)
            .await
            .with_context(|| format!("failed to customize VM {}", self.name))
    }

    pub async fn shutdown_guest(&self) -> Result<(), ProviderError> {
        self.client
            .shutdown_guest(&self.reference)
            .await
            .with_context(|| format!("failed to shut down guest of VM {}", self.name))
    }

    pub async fn destroy(&self) -> Result<(), ProviderError> {
        self.client
            .destroy_vm(&self.reference)
            .await
            .with_context(|| format!("failed to destroy VM {}", self.name))
    }

    /// Observed status; the phase is left unset for the caller to own.
    pub async fn status(&self) -> Result<VirtualMachineStatus, ProviderError> {
        let properties = self.properties().await?;
        Ok(VirtualMachineStatus {
            host: properties.host,
            power_state: Some(power_state_from_backend(properties.power_state)),
            phase: None,
            vm_ip: properties.ip_address,
            bios_uuid: properties.bios_uuid,
            instance_uuid: properties.instance_uuid,
            unique_id: Some(self.reference.value.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsphere_client::{MockOperation, MockVSphereClient, VirtualDisk, VirtualEthernetCard};

    fn handle(mock: &MockVSphereClient, name: &str) -> VirtualMachine {
        let reference = mock.add_vm(
            name,
            vec![
                VirtualDevice::VirtualVmxnet3(VirtualEthernetCard { key: 4000, ..Default::default() }),
                VirtualDevice::VirtualDisk(VirtualDisk { key: 2000, ..Default::default() }),
            ],
        );
        VirtualMachine::new(name, reference, Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn set_power_state_is_noop_when_already_there() {
        let mock = MockVSphereClient::new("https://vc.test");
        let vm = handle(&mock, "web");

        vm.set_power_state(VirtualMachinePowerState::PoweredOff).await.unwrap();
        assert_eq!(mock.calls(MockOperation::PowerOff), 0);

        vm.set_power_state(VirtualMachinePowerState::PoweredOn).await.unwrap();
        assert_eq!(mock.calls(MockOperation::PowerOn), 1);
        assert_eq!(vm.power_state().await.unwrap(), VirtualMachinePowerState::PoweredOn);
    }

    #[tokio::test]
    async fn device_queries_split_by_type() {
        let mock = MockVSphereClient::new("https://vc.test");
        let vm = handle(&mock, "web");
        assert_eq!(vm.network_devices().await.unwrap().len(), 1);
        assert_eq!(vm.disks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_leaves_phase_unset() {
        let mock = MockVSphereClient::new("https://vc.test");
        let vm = handle(&mock, "web");
        mock.update_vm(vm.reference(), |v| {
            v.ip_address = Some("10.0.0.5".to_string());
            v.host = Some("esx-01".to_string());
        });

        let status = vm.status().await.unwrap();
        assert_eq!(status.phase, None);
        assert_eq!(status.vm_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(status.host.as_deref(), Some("esx-01"));
        assert_eq!(status.unique_id.as_deref(), Some(vm.managed_object_id()));
        assert_eq!(status.power_state, Some(VirtualMachinePowerState::PoweredOff));
    }

    #[tokio::test]
    async fn backend_failures_carry_context() {
        let mock = MockVSphereClient::new("https://vc.test");
        let vm = handle(&mock, "web");
        mock.fail(MockOperation::ReconfigureVm, "InvalidDeviceSpec");

        let err = vm.reconfigure(&VirtualMachineConfigSpec::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to reconfigure VM web: vSphere API error: InvalidDeviceSpec");
    }
}
