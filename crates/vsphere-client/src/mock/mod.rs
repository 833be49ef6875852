//! Mock VSphereClient for unit testing
//!
//! This module provides an in-memory implementation of `VSphereClientTrait`
//! for tests that need a vCenter without running one.
//!
//! The mock is organized into domain-specific modules:
//! - `inventory.rs` - object lookups, VM properties, network backings, placement
//! - `lifecycle.rs` - create, clone, reconfigure, customize, power, destroy
//! - `catalog.rs` - content library sessions, items, and OVF deployment
//!
//! Every call is counted per `MockOperation`, and any operation can be made
//! to fail with `fail` or to time out with `stall`.

mod catalog;
mod inventory;
mod lifecycle;

use crate::error::VSphereError;
use crate::models::*;
use crate::vsphere_trait::VSphereClientTrait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Operations of the mock that can be counted or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Login,
    Logout,
    FindObject,
    ResourcePoolOwner,
    ObjectName,
    ListVirtualMachines,
    VirtualMachineProperties,
    NetworkBacking,
    PlaceVm,
    CreateVm,
    CloneVm,
    ReconfigureVm,
    CustomizeVm,
    PowerOn,
    PowerOff,
    Suspend,
    ShutdownGuest,
    DestroyVm,
    CatalogLogin,
    CatalogLogout,
    GetLibrary,
    FindLibrary,
    ListLibraryItems,
    FindLibraryItems,
    GetLibraryItem,
    DeployLibraryItem,
}

/// Inventory object known to the mock
#[derive(Debug, Clone)]
pub struct MockObject {
    pub kind: ObjectKind,
    pub name: String,
    pub reference: ManagedObjectReference,
}

/// Virtual machine held by the mock
#[derive(Debug, Clone)]
pub struct MockVm {
    pub reference: ManagedObjectReference,
    pub name: String,
    pub folder: Option<ManagedObjectReference>,
    pub pool: Option<ManagedObjectReference>,
    pub power_state: PowerState,
    pub host: Option<String>,
    pub ip_address: Option<String>,
    pub bios_uuid: Option<String>,
    pub instance_uuid: Option<String>,
    pub guest_heartbeat: GuestHeartbeatStatus,
    pub tools_running: bool,
    pub devices: Vec<VirtualDevice>,
    /// Specs applied by create and every reconfigure, oldest first
    pub applied_configs: Vec<VirtualMachineConfigSpec>,
    pub customization: Option<CustomizationSpec>,
}

/// Mock VSphereClient for testing
///
/// Clones share state, so a test can keep a handle while a session owns
/// another.
#[derive(Debug, Clone)]
pub struct MockVSphereClient {
    pub(crate) base_url: String,
    pub(crate) objects: Arc<Mutex<Vec<MockObject>>>,
    pub(crate) pool_owners: Arc<Mutex<HashMap<String, ManagedObjectReference>>>,
    pub(crate) backings: Arc<Mutex<HashMap<String, EthernetCardBacking>>>,
    pub(crate) vms: Arc<Mutex<HashMap<String, MockVm>>>,
    pub(crate) libraries: Arc<Mutex<HashMap<String, ContentLibrary>>>,
    pub(crate) library_items: Arc<Mutex<HashMap<String, LibraryItem>>>,
    pub(crate) placement: Arc<Mutex<PlacementResult>>,
    pub(crate) last_placement: Arc<Mutex<Option<PlacementSpec>>>,
    pub(crate) last_clone: Arc<Mutex<Option<VirtualMachineCloneSpec>>>,
    pub(crate) last_deployment: Arc<Mutex<Option<LibraryItemDeployment>>>,
    pub(crate) logged_in: Arc<Mutex<bool>>,
    pub(crate) catalog_sessions: Arc<Mutex<HashSet<String>>>,
    pub(crate) failures: Arc<Mutex<HashMap<MockOperation, String>>>,
    pub(crate) stalled: Arc<Mutex<HashSet<MockOperation>>>,
    pub(crate) delays: Arc<Mutex<HashMap<MockOperation, Duration>>>,
    pub(crate) calls: Arc<Mutex<HashMap<MockOperation, usize>>>,
    // Counter for generating IDs
    pub(crate) next_id: Arc<Mutex<u64>>,
}

impl MockVSphereClient {
    /// Create a new, empty mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Arc::new(Mutex::new(Vec::new())),
            pool_owners: Arc::new(Mutex::new(HashMap::new())),
            backings: Arc::new(Mutex::new(HashMap::new())),
            vms: Arc::new(Mutex::new(HashMap::new())),
            libraries: Arc::new(Mutex::new(HashMap::new())),
            library_items: Arc::new(Mutex::new(HashMap::new())),
            placement: Arc::new(Mutex::new(PlacementResult {
                host: Some(ManagedObjectReference::of(ObjectKind::Host, "host-1")),
                datastore: Some(ManagedObjectReference::of(ObjectKind::Datastore, "datastore-1")),
            })),
            last_placement: Arc::new(Mutex::new(None)),
            last_clone: Arc::new(Mutex::new(None)),
            last_deployment: Arc::new(Mutex::new(None)),
            logged_in: Arc::new(Mutex::new(false)),
            catalog_sessions: Arc::new(Mutex::new(HashSet::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            stalled: Arc::new(Mutex::new(HashSet::new())),
            delays: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Add an inventory object (for test setup)
    pub fn add_object(&self, kind: ObjectKind, name: &str, id: &str) -> ManagedObjectReference {
        let reference = ManagedObjectReference::of(kind, id);
        self.objects.lock().unwrap().push(MockObject {
            kind,
            name: name.to_string(),
            reference: reference.clone(),
        });
        reference
    }

    /// Make a cluster the owner of a resource pool (for test setup)
    pub fn set_pool_owner(&self, pool: &ManagedObjectReference, cluster: &ManagedObjectReference) {
        self.pool_owners.lock().unwrap().insert(pool.value.clone(), cluster.clone());
    }

    /// Add a standard network with its backing (for test setup)
    pub fn add_network(&self, name: &str, id: &str) -> ManagedObjectReference {
        let reference = self.add_object(ObjectKind::Network, name, id);
        self.backings.lock().unwrap().insert(
            id.to_string(),
            EthernetCardBacking::Network(NetworkBackingInfo {
                device_name: name.to_string(),
                network: Some(reference.clone()),
            }),
        );
        reference
    }

    /// Add a powered-off VM with the given devices (for test setup)
    pub fn add_vm(&self, name: &str, devices: Vec<VirtualDevice>) -> ManagedObjectReference {
        let id = self.next_id();
        let vm = self.new_vm(format!("vm-{}", id), name, devices);
        let reference = vm.reference.clone();
        self.vms.lock().unwrap().insert(reference.value.clone(), vm);
        reference
    }

    /// Change a VM held by the mock (for test setup)
    pub fn update_vm(&self, reference: &ManagedObjectReference, update: impl FnOnce(&mut MockVm)) {
        if let Some(vm) = self.vms.lock().unwrap().get_mut(&reference.value) {
            update(vm);
        }
    }

    /// Add a content library (for test setup)
    pub fn add_library(&self, id: &str, name: &str) {
        self.libraries.lock().unwrap().insert(
            id.to_string(),
            ContentLibrary {
                id: id.to_string(),
                name: name.to_string(),
                library_type: "LOCAL".to_string(),
            },
        );
    }

    /// Add a library item (for test setup)
    pub fn add_library_item(&self, library_id: &str, id: &str, name: &str, item_type: &str) {
        self.library_items.lock().unwrap().insert(
            id.to_string(),
            LibraryItem {
                id: id.to_string(),
                name: name.to_string(),
                library_id: library_id.to_string(),
                item_type: item_type.to_string(),
                description: None,
            },
        );
    }

    /// Set the host/datastore returned by placement
    pub fn set_placement(&self, placement: PlacementResult) {
        *self.placement.lock().unwrap() = placement;
    }

    /// Make an operation fail with an API error until cleared
    pub fn fail(&self, operation: MockOperation, message: &str) {
        self.failures.lock().unwrap().insert(operation, message.to_string());
    }

    /// Make the backend task of an operation never finish, so the call
    /// ends the way `VSphereClient` ends it once the task timeout runs out
    pub fn stall(&self, operation: MockOperation) {
        self.stalled.lock().unwrap().insert(operation);
    }

    /// Make an operation take `delay` before it does anything. Only catalog
    /// logout honours it.
    pub fn delay(&self, operation: MockOperation, delay: Duration) {
        self.delays.lock().unwrap().insert(operation, delay);
    }

    async fn pause(&self, operation: MockOperation) {
        let delay = self.delays.lock().unwrap().get(&operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Stop failing or stalling an operation
    pub fn clear_failure(&self, operation: MockOperation) {
        self.failures.lock().unwrap().remove(&operation);
        self.stalled.lock().unwrap().remove(&operation);
    }

    /// Number of times an operation was invoked
    pub fn calls(&self, operation: MockOperation) -> usize {
        self.calls.lock().unwrap().get(&operation).copied().unwrap_or(0)
    }

    /// Whether the primary session is open
    pub fn is_logged_in(&self) -> bool {
        *self.logged_in.lock().unwrap()
    }

    /// Number of catalog sessions not yet logged out
    pub fn open_catalog_sessions(&self) -> usize {
        self.catalog_sessions.lock().unwrap().len()
    }

    /// Snapshot of a VM by name
    pub fn vm(&self, name: &str) -> Option<MockVm> {
        self.vms.lock().unwrap().values().find(|vm| vm.name == name).cloned()
    }

    /// Number of VMs held by the mock
    pub fn vm_count(&self) -> usize {
        self.vms.lock().unwrap().len()
    }

    pub fn last_placement(&self) -> Option<PlacementSpec> {
        self.last_placement.lock().unwrap().clone()
    }

    pub fn last_clone(&self) -> Option<VirtualMachineCloneSpec> {
        self.last_clone.lock().unwrap().clone()
    }

    pub fn last_deployment(&self) -> Option<LibraryItemDeployment> {
        self.last_deployment.lock().unwrap().clone()
    }

    /// Count the call and return the injected failure, if any
    pub(crate) fn check(&self, operation: MockOperation) -> Result<(), VSphereError> {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;
        if self.stalled.lock().unwrap().contains(&operation) {
            return Err(VSphereError::TaskTimeout(format!("task-{}", self.next_id())));
        }
        match self.failures.lock().unwrap().get(&operation) {
            Some(message) => Err(VSphereError::Api(message.clone())),
            None => Ok(()),
        }
    }

    /// Generate next ID
    pub(crate) fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        current
    }

    pub(crate) fn new_vm(&self, id: String, name: &str, devices: Vec<VirtualDevice>) -> MockVm {
        MockVm {
            bios_uuid: Some(format!("4200{}-bios", id)),
            instance_uuid: Some(format!("5000{}-instance", id)),
            reference: ManagedObjectReference::of(ObjectKind::VirtualMachine, id),
            name: name.to_string(),
            folder: None,
            pool: None,
            power_state: PowerState::PoweredOff,
            host: None,
            ip_address: None,
            guest_heartbeat: GuestHeartbeatStatus::Gray,
            tools_running: false,
            devices,
            applied_configs: Vec::new(),
            customization: None,
        }
    }
}

#[async_trait::async_trait]
impl VSphereClientTrait for MockVSphereClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn login(&self) -> Result<(), VSphereError> {
        self.check(MockOperation::Login)?;
        *self.logged_in.lock().unwrap() = true;
        Ok(())
    }

    async fn logout(&self) -> Result<(), VSphereError> {
        self.check(MockOperation::Logout)?;
        *self.logged_in.lock().unwrap() = false;
        Ok(())
    }

    // Inventory - delegated to inventory module
    async fn find_object(&self, kind: ObjectKind, name: &str, datacenter: Option<&ManagedObjectReference>) -> Result<ManagedObjectReference, VSphereError> {
        inventory::find_object(self, kind, name, datacenter)
    }

    async fn resource_pool_owner(&self, pool: &ManagedObjectReference) -> Result<ManagedObjectReference, VSphereError> {
        inventory::resource_pool_owner(self, pool)
    }

    async fn object_name(&self, object: &ManagedObjectReference) -> Result<String, VSphereError> {
        inventory::object_name(self, object)
    }

    async fn list_virtual_machines(&self, datacenter: &ManagedObjectReference, pattern: &str) -> Result<Vec<VirtualMachineSummary>, VSphereError> {
        inventory::list_virtual_machines(self, datacenter, pattern)
    }

    async fn virtual_machine_properties(&self, vm: &ManagedObjectReference) -> Result<VirtualMachineProperties, VSphereError> {
        inventory::virtual_machine_properties(self, vm)
    }

    async fn network_backing(&self, network: &ManagedObjectReference) -> Result<EthernetCardBacking, VSphereError> {
        inventory::network_backing(self, network)
    }

    async fn place_vm(&self, cluster: &ManagedObjectReference, spec: &PlacementSpec) -> Result<PlacementResult, VSphereError> {
        inventory::place_vm(self, cluster, spec)
    }

    // VM lifecycle - delegated to lifecycle module
    async fn create_vm(&self, folder: &ManagedObjectReference, pool: &ManagedObjectReference, host: Option<&ManagedObjectReference>, config: &VirtualMachineConfigSpec) -> Result<ManagedObjectReference, VSphereError> {
        lifecycle::create_vm(self, folder, pool, host, config)
    }

    async fn clone_vm(&self, source: &ManagedObjectReference, folder: &ManagedObjectReference, name: &str, spec: &VirtualMachineCloneSpec) -> Result<ManagedObjectReference, VSphereError> {
        lifecycle::clone_vm(self, source, folder, name, spec)
    }

    async fn reconfigure_vm(&self, vm: &ManagedObjectReference, spec: &VirtualMachineConfigSpec) -> Result<(), VSphereError> {
        lifecycle::reconfigure_vm(self, vm, spec)
    }

    async fn customize_vm(&self, vm: &ManagedObjectReference, spec: &CustomizationSpec) -> Result<(), VSphereError> {
        lifecycle::customize_vm(self, vm, spec)
    }

    async fn power_on_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
        lifecycle::set_power_state(self, MockOperation::PowerOn, vm, PowerState::PoweredOn)
    }

    async fn power_off_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
        lifecycle::set_power_state(self, MockOperation::PowerOff, vm, PowerState::PoweredOff)
    }

    async fn suspend_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
        lifecycle::set_power_state(self, MockOperation::Suspend, vm, PowerState::Suspended)
    }

    async fn shutdown_guest(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
        lifecycle::shutdown_guest(self, vm)
    }

    async fn destroy_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
        lifecycle::destroy_vm(self, vm)
    }

    // Content library - delegated to catalog module
    async fn catalog_login(&self) -> Result<RestSession, VSphereError> {
        catalog::catalog_login(self)
    }

    async fn catalog_logout(&self, session: &RestSession) -> Result<(), VSphereError> {
        self.pause(MockOperation::CatalogLogout).await;
        catalog::catalog_logout(self, session)
    }

    async fn get_library(&self, session: &RestSession, id: &str) -> Result<ContentLibrary, VSphereError> {
        catalog::get_library(self, session, id)
    }

    async fn find_library_by_name(&self, session: &RestSession, name: &str) -> Result<ContentLibrary, VSphereError> {
        catalog::find_library_by_name(self, session, name)
    }

    async fn list_library_items(&self, session: &RestSession, library_id: &str) -> Result<Vec<LibraryItem>, VSphereError> {
        catalog::list_library_items(self, session, library_id)
    }

    async fn find_library_items(&self, session: &RestSession, library_id: &str, name: &str) -> Result<Vec<String>, VSphereError> {
        catalog::find_library_items(self, session, library_id, name)
    }

    async fn get_library_item(&self, session: &RestSession, item_id: &str) -> Result<LibraryItem, VSphereError> {
        catalog::get_library_item(self, session, item_id)
    }

    async fn deploy_library_item(&self, session: &RestSession, item_id: &str, deployment: &LibraryItemDeployment) -> Result<ManagedObjectReference, VSphereError> {
        catalog::deploy_library_item(self, session, item_id, deployment)
    }
}
