//! Provider-facing half of VirtualMachine reconciliation.
//!
//! These functions drive a `VmProviderInterface` and own the lifecycle phase.
//! They only touch the in-memory object; persisting the result is left to the
//! reconciler.

use crds::{VirtualMachine, VirtualMachinePhase};
use tracing::{debug, info};
use vm_provider::{ProviderError, VmConfigArgs, VmProviderInterface};

/// What a normal reconcile did on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Created,
    Updated,
}

impl LifecycleOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleOutcome::Created => "created",
            LifecycleOutcome::Updated => "updated",
        }
    }
}

pub fn set_phase(vm: &mut VirtualMachine, phase: VirtualMachinePhase) {
    vm.status.get_or_insert_with(Default::default).phase = Some(phase);
}

pub fn phase(vm: &VirtualMachine) -> Option<VirtualMachinePhase> {
    vm.status.as_ref().and_then(|s| s.phase)
}

/// Create the VM if the provider does not know it, otherwise update it.
///
/// The phase is `Creating` while the create runs and `Created` once it or
/// any later update succeeds. A failed create leaves the phase at `Creating`.
pub async fn reconcile_normal(
    provider: &dyn VmProviderInterface,
    vm: &mut VirtualMachine,
    args: &VmConfigArgs,
) -> Result<LifecycleOutcome, ProviderError> {
    let (namespace, name) = vm_provider::provider::vm_identity(vm)?;
    let (namespace, name) = (namespace.to_string(), name.to_string());

    if !provider.does_virtual_machine_exist(&namespace, &name).await? {
        info!("VirtualMachine {}/{} does not exist on {}, creating", namespace, name, provider.name());
        set_phase(vm, VirtualMachinePhase::Creating);
        provider.create_virtual_machine(vm, args).await?;
        set_phase(vm, VirtualMachinePhase::Created);
        return Ok(LifecycleOutcome::Created);
    }

    debug!("VirtualMachine {}/{} exists, updating", namespace, name);
    provider.update_virtual_machine(vm, args).await?;
    if phase(vm) != Some(VirtualMachinePhase::Created) {
        set_phase(vm, VirtualMachinePhase::Created);
    }
    Ok(LifecycleOutcome::Updated)
}

/// Tear the VM down. The phase is `Deleting` until the provider reports
/// success, then `Deleted`.
pub async fn reconcile_delete(provider: &dyn VmProviderInterface, vm: &mut VirtualMachine) -> Result<(), ProviderError> {
    set_phase(vm, VirtualMachinePhase::Deleting);
    provider.delete_virtual_machine(vm).await?;
    set_phase(vm, VirtualMachinePhase::Deleted);
    Ok(())
}
