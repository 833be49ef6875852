//! In-memory VM provider for testing reconcilers
//!
//! `FakeVmProvider` keeps VMs keyed by namespace/name and implements the same
//! lifecycle contract as the vSphere provider. Each operation can be replaced
//! with a hook, e.g. to inject failures.

use crate::error::{ProviderError, ResourceKind};
use crate::provider::{add_provider_annotations, merge_status, vm_identity, VmConfigArgs, VmProviderInterface};
use async_trait::async_trait;
use crds::{VirtualMachineImage, VirtualMachineStatus};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use vsphere_client::GuestHeartbeatStatus;

type ExistsFn = Box<dyn Fn(&str, &str) -> Result<bool, ProviderError> + Send + Sync>;
type MutateFn = Box<dyn Fn(&mut crds::VirtualMachine, &VmConfigArgs) -> Result<(), ProviderError> + Send + Sync>;
type DeleteFn = Box<dyn Fn(&crds::VirtualMachine) -> Result<(), ProviderError> + Send + Sync>;

/// Operations of the fake that are counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOperation {
    Exists,
    Create,
    Update,
    Delete,
    GuestHeartbeat,
    ListImages,
    GetImage,
    DeleteNamespaceSession,
    ClearSessions,
    UpdateVcPnid,
}

#[derive(Default)]
struct Hooks {
    exists: Option<ExistsFn>,
    create: Option<MutateFn>,
    update: Option<MutateFn>,
    delete: Option<DeleteFn>,
}

#[derive(Default)]
struct State {
    vms: HashMap<(String, String), crds::VirtualMachine>,
    images: HashMap<(String, String), VirtualMachineImage>,
    calls: HashMap<FakeOperation, usize>,
    next_id: u64,
}

#[derive(Default)]
pub struct FakeVmProvider {
    state: Mutex<State>,
    hooks: Mutex<Hooks>,
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

impl FakeVmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hooks(&self) -> MutexGuard<'_, Hooks> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self, operation: FakeOperation) {
        *self.state().calls.entry(operation).or_insert(0) += 1;
    }

    /// Number of times an operation was invoked
    pub fn calls(&self, operation: FakeOperation) -> usize {
        self.state().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Snapshot of a VM held by the fake
    pub fn vm(&self, namespace: &str, name: &str) -> Option<crds::VirtualMachine> {
        self.state().vms.get(&key(namespace, name)).cloned()
    }

    pub fn vm_count(&self) -> usize {
        self.state().vms.len()
    }

    /// Add an image (for test setup)
    pub fn add_image(&self, namespace: &str, image: VirtualMachineImage) {
        let name = image.metadata.name.clone().unwrap_or_default();
        self.state().images.insert(key(namespace, &name), image);
    }

    pub fn set_exists_fn(&self, f: impl Fn(&str, &str) -> Result<bool, ProviderError> + Send + Sync + 'static) {
        self.hooks().exists = Some(Box::new(f));
    }

    pub fn set_create_fn(
        &self,
        f: impl Fn(&mut crds::VirtualMachine, &VmConfigArgs) -> Result<(), ProviderError> + Send + Sync + 'static,
    ) {
        self.hooks().create = Some(Box::new(f));
    }

    pub fn set_update_fn(
        &self,
        f: impl Fn(&mut crds::VirtualMachine, &VmConfigArgs) -> Result<(), ProviderError> + Send + Sync + 'static,
    ) {
        self.hooks().update = Some(Box::new(f));
    }

    pub fn set_delete_fn(&self, f: impl Fn(&crds::VirtualMachine) -> Result<(), ProviderError> + Send + Sync + 'static) {
        self.hooks().delete = Some(Box::new(f));
    }

    /// Drop all hooks and stored objects
    pub fn reset(&self) {
        *self.hooks() = Hooks::default();
        *self.state() = State::default();
    }

    fn observed_status(vm: &crds::VirtualMachine, unique_id: String) -> VirtualMachineStatus {
        VirtualMachineStatus {
            power_state: Some(vm.spec.desired_power_state()),
            unique_id: Some(unique_id),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VmProviderInterface for FakeVmProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn does_virtual_machine_exist(&self, namespace: &str, name: &str) -> Result<bool, ProviderError> {
        self.count(FakeOperation::Exists);
        if let Some(f) = &self.hooks().exists {
            return f(namespace, name);
        }
        Ok(self.state().vms.contains_key(&key(namespace, name)))
    }

    async fn create_virtual_machine(
        &self,
        vm: &mut crds::VirtualMachine,
        args: &VmConfigArgs,
    ) -> Result<(), ProviderError> {
        self.count(FakeOperation::Create);
        if let Some(f) = &self.hooks().create {
            return f(vm, args);
        }
        let (namespace, name) = vm_identity(vm)?;
        let id = key(namespace, name);

        let mut state = self.state();
        if state.vms.contains_key(&id) {
            return Err(ProviderError::AlreadyExists {
                kind: ResourceKind::VirtualMachine,
                name: format!("{}/{}", id.0, id.1),
            });
        }
        state.next_id += 1;
        let unique_id = format!("vm-{}", state.next_id);
        vm.status = Some(merge_status(vm.status.as_ref(), Self::observed_status(vm, unique_id.clone())));
        add_provider_annotations(&mut vm.metadata, &unique_id);
        state.vms.insert(id, vm.clone());
        Ok(())
    }

    async fn update_virtual_machine(
        &self,
        vm: &mut crds::VirtualMachine,
        args: &VmConfigArgs,
    ) -> Result<(), ProviderError> {
        self.count(FakeOperation::Update);
        if let Some(f) = &self.hooks().update {
            return f(vm, args);
        }
        let (namespace, name) = vm_identity(vm)?;
        let id = key(namespace, name);

        let mut state = self.state();
        let stored = state
            .vms
            .get_mut(&id)
            .ok_or_else(|| ProviderError::not_found(ResourceKind::VirtualMachine, format!("{}/{}", id.0, id.1)))?;
        let unique_id = stored
            .status
            .as_ref()
            .and_then(|s| s.unique_id.clone())
            .unwrap_or_default();
        vm.status = Some(merge_status(vm.status.as_ref(), Self::observed_status(vm, unique_id)));
        *stored = vm.clone();
        Ok(())
    }

    async fn delete_virtual_machine(&self, vm: &crds::VirtualMachine) -> Result<(), ProviderError> {
        self.count(FakeOperation::Delete);
        if let Some(f) = &self.hooks().delete {
            return f(vm);
        }
        let (namespace, name) = vm_identity(vm)?;
        self.state().vms.remove(&key(namespace, name));
        Ok(())
    }

    async fn guest_heartbeat(&self, vm: &crds::VirtualMachine) -> Result<GuestHeartbeatStatus, ProviderError> {
        self.count(FakeOperation::GuestHeartbeat);
        let (namespace, name) = vm_identity(vm)?;
        if self.state().vms.contains_key(&key(namespace, name)) {
            Ok(GuestHeartbeatStatus::Green)
        } else {
            Err(ProviderError::not_found(ResourceKind::VirtualMachine, format!("{}/{}", namespace, name)))
        }
    }

    async fn list_virtual_machine_images(&self, namespace: &str) -> Result<Vec<VirtualMachineImage>, ProviderError> {
        self.count(FakeOperation::ListImages);
        let state = self.state();
        let mut images: Vec<VirtualMachineImage> = state
            .images
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, image)| image.clone())
            .collect();
        images.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(images)
    }

    async fn get_virtual_machine_image(&self, namespace: &str, name: &str) -> Result<VirtualMachineImage, ProviderError> {
        self.count(FakeOperation::GetImage);
        self.state()
            .images
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ProviderError::not_found(ResourceKind::VirtualMachineImage, name))
    }

    async fn delete_namespace_session(&self, _namespace: &str) {
        self.count(FakeOperation::DeleteNamespaceSession);
    }

    async fn clear_sessions(&self) {
        self.count(FakeOperation::ClearSessions);
    }

    async fn update_vc_pnid(&self, _pnid: &str, _port: u16) -> Result<(), ProviderError> {
        self.count(FakeOperation::UpdateVcPnid);
        Ok(())
    }
}
