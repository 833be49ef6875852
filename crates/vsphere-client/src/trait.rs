//! VSphereClient trait for mocking
//!
//! This trait abstracts the vCenter client so sessions can be exercised
//! against the in-memory mock. The concrete `VSphereClient` implements it
//! over HTTP.

use crate::error::VSphereError;
use crate::models::*;

/// Trait for vCenter operations
///
/// Lifecycle calls that start a backend task resolve once the task reaches
/// success or error. All async methods must be `Send` to work with Tokio's
/// work-stealing runtime.
#[async_trait::async_trait]
pub trait VSphereClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    // Session
    async fn login(&self) -> Result<(), VSphereError>;
    async fn logout(&self) -> Result<(), VSphereError>;

    // Inventory
    async fn find_object(&self, kind: ObjectKind, name: &str, datacenter: Option<&ManagedObjectReference>) -> Result<ManagedObjectReference, VSphereError>;
    async fn resource_pool_owner(&self, pool: &ManagedObjectReference) -> Result<ManagedObjectReference, VSphereError>;
    async fn object_name(&self, object: &ManagedObjectReference) -> Result<String, VSphereError>;
    async fn list_virtual_machines(&self, datacenter: &ManagedObjectReference, pattern: &str) -> Result<Vec<VirtualMachineSummary>, VSphereError>;
    async fn virtual_machine_properties(&self, vm: &ManagedObjectReference) -> Result<VirtualMachineProperties, VSphereError>;
    async fn network_backing(&self, network: &ManagedObjectReference) -> Result<EthernetCardBacking, VSphereError>;
    async fn place_vm(&self, cluster: &ManagedObjectReference, spec: &PlacementSpec) -> Result<PlacementResult, VSphereError>;

    // VM lifecycle
    async fn create_vm(&self, folder: &ManagedObjectReference, pool: &ManagedObjectReference, host: Option<&ManagedObjectReference>, config: &VirtualMachineConfigSpec) -> Result<ManagedObjectReference, VSphereError>;
    async fn clone_vm(&self, source: &ManagedObjectReference, folder: &ManagedObjectReference, name: &str, spec: &VirtualMachineCloneSpec) -> Result<ManagedObjectReference, VSphereError>;
    async fn reconfigure_vm(&self, vm: &ManagedObjectReference, spec: &VirtualMachineConfigSpec) -> Result<(), VSphereError>;
    async fn customize_vm(&self, vm: &ManagedObjectReference, spec: &CustomizationSpec) -> Result<(), VSphereError>;
    async fn power_on_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError>;
    async fn power_off_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError>;
    async fn suspend_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError>;
    async fn shutdown_guest(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError>;
    async fn destroy_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError>;

    // Content library, on a scoped REST session
    async fn catalog_login(&self) -> Result<RestSession, VSphereError>;
    async fn catalog_logout(&self, session: &RestSession) -> Result<(), VSphereError>;
    async fn get_library(&self, session: &RestSession, id: &str) -> Result<ContentLibrary, VSphereError>;
    async fn find_library_by_name(&self, session: &RestSession, name: &str) -> Result<ContentLibrary, VSphereError>;
    async fn list_library_items(&self, session: &RestSession, library_id: &str) -> Result<Vec<LibraryItem>, VSphereError>;
    async fn find_library_items(&self, session: &RestSession, library_id: &str, name: &str) -> Result<Vec<String>, VSphereError>;
    async fn get_library_item(&self, session: &RestSession, item_id: &str) -> Result<LibraryItem, VSphereError>;
    async fn deploy_library_item(&self, session: &RestSession, item_id: &str, deployment: &LibraryItemDeployment) -> Result<ManagedObjectReference, VSphereError>;
}
