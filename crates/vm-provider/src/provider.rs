//! vSphere VM provider.
//!
//! `VSphereVmProvider` implements the lifecycle contract the reconciler calls.
//! Each call obtains the tenant's session from the `SessionManager`, delegates
//! to it, classifies lookup failures against the VM's `namespace/name` and
//! merges observed state into the resource status.

use crate::config::ConfigSource;
use crate::error::{ProviderError, ResourceKind};
use crate::network::NetworkInterfaceClient;
use crate::resources::VirtualMachine;
use crate::sequence::DeleteSequence;
use crate::session::{check_metadata_transport, Session};
use crate::session_manager::{SessionManager, VSphereSessionFactory};
use async_trait::async_trait;
use crds::{VirtualMachineClassSpec, VirtualMachineImage, VirtualMachineStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use vsphere_client::GuestHeartbeatStatus;

/// Name the provider registers under.
pub const PROVIDER_NAME: &str = "vsphere";

/// Annotation naming the provider that manages a VM.
pub const VM_PROVIDER_ANNOTATION: &str = "vmoperator.vmware.com/vmprovider";
/// Annotation holding the managed object id of the backing VM.
pub const VM_MOREF_ANNOTATION: &str = "vsphere.vmoperator.vmware.com/moref";

/// Inputs to create and update besides the VM resource itself.
#[derive(Debug, Clone, Default)]
pub struct VmConfigArgs {
    pub class: VirtualMachineClassSpec,
    /// Bootstrap key/values delivered through the metadata transport
    pub metadata: BTreeMap<String, String>,
    pub storage_profile_id: Option<String>,
}

/// Lifecycle contract of a VM provider.
#[async_trait]
pub trait VmProviderInterface: Send + Sync {
    fn name(&self) -> &'static str;

    async fn does_virtual_machine_exist(&self, namespace: &str, name: &str) -> Result<bool, ProviderError>;

    /// Create the backing VM and fill in the observed status.
    ///
    /// Fails with `AlreadyExists` when the VM is already there.
    async fn create_virtual_machine(
        &self,
        vm: &mut crds::VirtualMachine,
        args: &VmConfigArgs,
    ) -> Result<(), ProviderError>;

    /// Reconfigure the VM from its current spec, then apply the desired power state.
    async fn update_virtual_machine(
        &self,
        vm: &mut crds::VirtualMachine,
        args: &VmConfigArgs,
    ) -> Result<(), ProviderError>;

    /// Tear the VM down. A VM that is already gone counts as deleted.
    async fn delete_virtual_machine(&self, vm: &crds::VirtualMachine) -> Result<(), ProviderError>;

    async fn guest_heartbeat(&self, vm: &crds::VirtualMachine) -> Result<GuestHeartbeatStatus, ProviderError>;

    async fn list_virtual_machine_images(&self, namespace: &str) -> Result<Vec<VirtualMachineImage>, ProviderError>;

    async fn get_virtual_machine_image(&self, namespace: &str, name: &str) -> Result<VirtualMachineImage, ProviderError>;

    /// Drop the cached session of a tenant.
    async fn delete_namespace_session(&self, namespace: &str);

    /// Drop every cached session.
    async fn clear_sessions(&self);

    /// Switch to a new vCenter endpoint.
    async fn update_vc_pnid(&self, pnid: &str, port: u16) -> Result<(), ProviderError>;
}

/// Namespace and name of a VM resource.
pub fn vm_identity(vm: &crds::VirtualMachine) -> Result<(&str, &str), ProviderError> {
    let namespace = vm
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| ProviderError::InvalidConfig("VirtualMachine has no namespace".to_string()))?;
    let name = vm
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ProviderError::InvalidConfig("VirtualMachine has no name".to_string()))?;
    Ok((namespace, name))
}

/// Observed status with the caller's phase carried over.
pub fn merge_status(current: Option<&VirtualMachineStatus>, observed: VirtualMachineStatus) -> VirtualMachineStatus {
    VirtualMachineStatus {
        phase: current.and_then(|s| s.phase),
        ..observed
    }
}

/// Record the provider and managed object id on the resource.
pub fn add_provider_annotations(metadata: &mut ObjectMeta, managed_object_id: &str) {
    let annotations = metadata.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(VM_PROVIDER_ANNOTATION.to_string(), PROVIDER_NAME.to_string());
    annotations.insert(VM_MOREF_ANNOTATION.to_string(), managed_object_id.to_string());
}

pub struct VSphereVmProvider {
    sessions: Arc<SessionManager>,
}

impl VSphereVmProvider {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Provider connecting to vCenter over HTTP with per-tenant config from `config_source`.
    pub fn from_config_source(
        config_source: Arc<dyn ConfigSource>,
        network_interfaces: Option<Arc<dyn NetworkInterfaceClient>>,
    ) -> Self {
        let factory = VSphereSessionFactory::new(network_interfaces);
        Self::new(Arc::new(SessionManager::new(config_source, Arc::new(factory))))
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Backing VM of `namespace/name`, with lookup failures classified.
    async fn lookup(&self, session: &Session, namespace: &str, name: &str) -> Result<VirtualMachine, ProviderError> {
        session
            .lookup_vm(name)
            .await
            .map_err(|e| e.classify(ResourceKind::VirtualMachine, &format!("{}/{}", namespace, name)))
    }

    async fn update_status(&self, vm: &mut crds::VirtualMachine, handle: &VirtualMachine) -> Result<(), ProviderError> {
        let observed = handle.status().await?;
        vm.status = Some(merge_status(vm.status.as_ref(), observed));
        Ok(())
    }
}

#[async_trait]
impl VmProviderInterface for VSphereVmProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn does_virtual_machine_exist(&self, namespace: &str, name: &str) -> Result<bool, ProviderError> {
        let session = self.sessions.get_session(namespace).await?;
        match self.lookup(&session, namespace, name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_virtual_machine(
        &self,
        vm: &mut crds::VirtualMachine,
        args: &VmConfigArgs,
    ) -> Result<(), ProviderError> {
        check_metadata_transport(&vm.spec)?;
        let (namespace, name) = vm_identity(vm)?;
        let (namespace, name) = (namespace.to_string(), name.to_string());
        info!("Creating VirtualMachine {}/{}", namespace, name);

        let session = self.sessions.get_session(&namespace).await?;
        match self.lookup(&session, &namespace, &name).await {
            Ok(_) => {
                return Err(ProviderError::AlreadyExists {
                    kind: ResourceKind::VirtualMachine,
                    name: format!("{}/{}", namespace, name),
                })
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let handle = if vm.spec.image_name.is_empty() {
            session
                .create_virtual_machine(&namespace, &name, &vm.spec, &args.class, &args.metadata)
                .await?
        } else {
            session
                .clone_virtual_machine(
                    &namespace,
                    &name,
                    &vm.spec,
                    &args.class,
                    &args.metadata,
                    args.storage_profile_id.as_deref(),
                )
                .await?
        };

        self.update_status(vm, &handle).await?;
        add_provider_annotations(&mut vm.metadata, handle.managed_object_id());
        info!("Created VirtualMachine {}/{} as {}", namespace, name, handle.managed_object_id());
        Ok(())
    }

    async fn update_virtual_machine(
        &self,
        vm: &mut crds::VirtualMachine,
        args: &VmConfigArgs,
    ) -> Result<(), ProviderError> {
        check_metadata_transport(&vm.spec)?;
        let (namespace, name) = vm_identity(vm)?;
        let (namespace, name) = (namespace.to_string(), name.to_string());
        debug!("Updating VirtualMachine {}/{}", namespace, name);

        let session = self.sessions.get_session(&namespace).await?;
        let handle = self.lookup(&session, &namespace, &name).await?;

        let device_change = session.device_change_specs(&namespace, &name, &vm.spec, &handle).await?;
        let config = session.config_spec(&name, &vm.spec, &args.class, &args.metadata, device_change)?;
        handle.reconfigure(&config).await?;
        handle.set_power_state(vm.spec.desired_power_state()).await?;

        self.update_status(vm, &handle).await
    }

    async fn delete_virtual_machine(&self, vm: &crds::VirtualMachine) -> Result<(), ProviderError> {
        let (namespace, name) = vm_identity(vm)?;
        info!("Deleting VirtualMachine {}/{}", namespace, name);

        let session = self.sessions.get_session(namespace).await?;
        let handle = match self.lookup(&session, namespace, name).await {
            Ok(handle) => handle,
            Err(e) if e.is_not_found() => {
                info!("VirtualMachine {}/{} is already gone", namespace, name);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match DeleteSequence::new(&handle, session.shutdown_timeout()).execute().await {
            Err(e) if e.is_not_found() => {
                info!("VirtualMachine {}/{} disappeared while being deleted", namespace, name);
                Ok(())
            }
            result => result,
        }
    }

    async fn guest_heartbeat(&self, vm: &crds::VirtualMachine) -> Result<GuestHeartbeatStatus, ProviderError> {
        let (namespace, name) = vm_identity(vm)?;
        let session = self.sessions.get_session(namespace).await?;
        self.lookup(&session, namespace, name).await?.guest_heartbeat().await
    }

    async fn list_virtual_machine_images(&self, namespace: &str) -> Result<Vec<VirtualMachineImage>, ProviderError> {
        let session = self.sessions.get_session(namespace).await?;
        session.list_images(namespace).await
    }

    async fn get_virtual_machine_image(&self, namespace: &str, name: &str) -> Result<VirtualMachineImage, ProviderError> {
        let session = self.sessions.get_session(namespace).await?;
        session
            .get_image(namespace, name)
            .await
            .map_err(|e| e.classify(ResourceKind::VirtualMachineImage, name))
    }

    async fn delete_namespace_session(&self, namespace: &str) {
        self.sessions.invalidate(namespace).await;
    }

    async fn clear_sessions(&self) {
        self.sessions.invalidate_all().await;
    }

    async fn update_vc_pnid(&self, pnid: &str, port: u16) -> Result<(), ProviderError> {
        if pnid.is_empty() {
            return Err(ProviderError::InvalidConfig("vCenter PNID must not be empty".to_string()));
        }
        self.sessions.update_endpoint(pnid, port).await;
        Ok(())
    }
}
