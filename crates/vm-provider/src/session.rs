//! Per-tenant vCenter session.
//!
//! A `Session` owns one authenticated client and the placement targets
//! resolved for its tenant at construction. Those references never change
//! afterwards; a tenant whose configuration changes gets a new session.
//!
//! Configuration descriptors are rebuilt from the desired spec on every call
//! and never cached on the session.

use crate::catalog::CatalogSession;
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ResourceKind, VSphereResultExt};
use crate::image::{image_from_library_item, image_from_vm};
use crate::network::{DefaultNetworkProvider, NetworkInterfaceClient, NetworkProvider, NetworkProviders, NsxtNetworkProvider};
use crate::quantity::{cpu_quantity_to_mhz, memory_quantity_to_mb, parse_optional_quantity, parse_quantity, Quantity};
use crate::resources::VirtualMachine;
use crds::{
    VirtualMachineClassSpec, VirtualMachineImage, VirtualMachinePowerState, VirtualMachineSpec,
    TRANSPORT_EXTRA_CONFIG,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vsphere_client::{
    ContentLibrary, CustomizationAdapterMapping, CustomizationGlobalIpSettings, CustomizationIdentity,
    CustomizationIpGenerator, CustomizationIpSettings, CustomizationName, CustomizationSpec, DeploymentSpec,
    DeploymentTarget, DeviceOperation, LibraryItem, LibraryItemDeployment, ManagedObjectReference, ObjectKind,
    OptionValue, PlacementResult, PlacementSpec, PlacementType, ResourceAllocationInfo, RestSession,
    VSphereClientTrait, VirtualDeviceConfigSpec, VirtualMachineCloneSpec, VirtualMachineConfigSpec,
    VirtualMachineFileInfo, VirtualMachineProfileSpec, VirtualMachineRelocateSpec,
};

/// Annotation set on every VM the provider creates or reconfigures.
pub const VM_ANNOTATION: &str = "Virtual Machine managed by the VM Operator";

/// Temporary key of the first device added by a descriptor; later devices
/// count down from here so they never collide with existing keys.
pub const FIRST_NEW_DEVICE_KEY: i32 = -100;

/// Library item types that can be deployed as a VM.
pub fn is_supported_deploy_type(item_type: &str) -> bool {
    item_type == "ovf"
}

/// A resolved inventory object together with the name it was configured by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedReference {
    pub name: String,
    pub reference: ManagedObjectReference,
}

/// Authenticated, pre-resolved context for one tenant.
pub struct Session {
    tenant: String,
    client: Arc<dyn VSphereClientTrait>,
    datacenter: ManagedObjectReference,
    cluster: Option<ManagedObjectReference>,
    resource_pool: Option<ManagedObjectReference>,
    folder: Option<ManagedObjectReference>,
    datastore: Option<NamedReference>,
    network: Option<NamedReference>,
    content_library: Option<ContentLibrary>,
    extra_config: BTreeMap<String, String>,
    shutdown_timeout: Duration,
    networks: NetworkProviders,
    logged_out: AtomicBool,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = |r: Option<&ManagedObjectReference>| r.map_or_else(|| "-".to_string(), |r| r.value.clone());
        write!(
            f,
            "tenant={:?} datacenter={} cluster={} pool={} folder={} datastore={} network={} library={}",
            self.tenant,
            self.datacenter.value,
            value(self.cluster.as_ref()),
            value(self.resource_pool.as_ref()),
            value(self.folder.as_ref()),
            self.datastore.as_ref().map_or("-", |d| d.name.as_str()),
            self.network.as_ref().map_or("-", |n| n.name.as_str()),
            self.content_library.as_ref().map_or("-", |l| l.name.as_str()),
        )
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({})", self)
    }
}

async fn resolve(
    client: &Arc<dyn VSphereClientTrait>,
    kind: ObjectKind,
    resource: ResourceKind,
    name: &str,
    datacenter: Option<&ManagedObjectReference>,
) -> Result<ManagedObjectReference, ProviderError> {
    client
        .find_object(kind, name, datacenter)
        .await
        .with_context(|| format!("failed to init {} {:?}", resource, name))
        .map_err(|e| e.classify(resource, name))
}

/// Look the content source up as a library id, then as a library name.
async fn resolve_content_library(
    client: &Arc<dyn VSphereClientTrait>,
    source: &str,
) -> Result<ContentLibrary, ProviderError> {
    let catalog = CatalogSession::open(client).await?;
    let result = match client.get_library(catalog.rest(), source).await {
        Ok(library) => Ok(library),
        Err(e) => {
            debug!("Content library {} not found by id ({}), trying by name", source, e);
            client.find_library_by_name(catalog.rest(), source).await
        }
    };
    catalog.close().await;

    result
        .with_context(|| format!("failed to init content library {:?}", source))
        .map_err(|e| e.classify(ResourceKind::ContentLibrary, source))
}

impl Session {
    /// Resolve the tenant's placement targets on an already logged-in client.
    ///
    /// On failure the client is logged out before the error is returned.
    pub async fn connect(
        tenant: &str,
        config: &ProviderConfig,
        client: Arc<dyn VSphereClientTrait>,
        network_interfaces: Option<Arc<dyn NetworkInterfaceClient>>,
    ) -> Result<Self, ProviderError> {
        match Self::configure(tenant, config, Arc::clone(&client), network_interfaces).await {
            Ok(session) => {
                info!("New session created and configured: {}", session);
                Ok(session)
            }
            Err(e) => {
                if let Err(logout) = client.logout().await {
                    warn!("Failed to log out after session setup for {:?} failed: {}", tenant, logout);
                }
                Err(e)
            }
        }
    }

    async fn configure(
        tenant: &str,
        config: &ProviderConfig,
        client: Arc<dyn VSphereClientTrait>,
        network_interfaces: Option<Arc<dyn NetworkInterfaceClient>>,
    ) -> Result<Self, ProviderError> {
        let datacenter = resolve(&client, ObjectKind::Datacenter, ResourceKind::Datacenter, &config.datacenter, None).await?;
        let dc = Some(&datacenter);

        // Pool, folder and datastore are only needed to place VMs; image
        // listing works without them.
        let mut resource_pool = None;
        let mut cluster = None;
        if !config.resource_pool.is_empty() {
            let pool = resolve(&client, ObjectKind::ResourcePool, ResourceKind::ResourcePool, &config.resource_pool, dc).await?;
            let owner = client
                .resource_pool_owner(&pool)
                .await
                .with_context(|| format!("failed to init cluster of resource pool {:?}", config.resource_pool))?;
            resource_pool = Some(pool);
            cluster = Some(owner);
        }

        let folder = if config.folder.is_empty() {
            None
        } else {
            Some(resolve(&client, ObjectKind::Folder, ResourceKind::Folder, &config.folder, dc).await?)
        };

        let datastore = if config.datastore.is_empty() {
            None
        } else {
            Some(NamedReference {
                name: config.datastore.clone(),
                reference: resolve(&client, ObjectKind::Datastore, ResourceKind::Datastore, &config.datastore, dc).await?,
            })
        };

        let network = if config.network.is_empty() {
            None
        } else {
            let reference = resolve(&client, ObjectKind::Network, ResourceKind::Network, &config.network, dc).await?;
            info!("Using default network {} for {:?}", config.network, tenant);
            Some(NamedReference {
                name: config.network.clone(),
                reference,
            })
        };

        let content_library = if config.content_source.is_empty() {
            None
        } else {
            Some(resolve_content_library(&client, &config.content_source).await?)
        };

        let default_provider: Arc<dyn NetworkProvider> =
            Arc::new(DefaultNetworkProvider::new(Arc::clone(&client), datacenter.clone()));
        let nsxt_provider = network_interfaces.map(|interfaces| {
            Arc::new(NsxtNetworkProvider::new(interfaces, config.network_wait_timeout)) as Arc<dyn NetworkProvider>
        });

        Ok(Self {
            tenant: tenant.to_string(),
            client,
            datacenter,
            cluster,
            resource_pool,
            folder,
            datastore,
            network,
            content_library,
            extra_config: config.extra_config.clone(),
            shutdown_timeout: config.shutdown_timeout,
            networks: NetworkProviders::new(default_provider, nsxt_provider),
            logged_out: AtomicBool::new(false),
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn client(&self) -> &Arc<dyn VSphereClientTrait> {
        &self.client
    }

    pub fn datacenter(&self) -> &ManagedObjectReference {
        &self.datacenter
    }

    pub fn cluster(&self) -> Option<&ManagedObjectReference> {
        self.cluster.as_ref()
    }

    pub fn resource_pool(&self) -> Option<&ManagedObjectReference> {
        self.resource_pool.as_ref()
    }

    pub fn folder(&self) -> Option<&ManagedObjectReference> {
        self.folder.as_ref()
    }

    pub fn datastore(&self) -> Option<&NamedReference> {
        self.datastore.as_ref()
    }

    pub fn network(&self) -> Option<&NamedReference> {
        self.network.as_ref()
    }

    pub fn content_library(&self) -> Option<&ContentLibrary> {
        self.content_library.as_ref()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    /// Log the client out. Only the first call reaches vCenter.
    pub async fn logout(&self) {
        if self.logged_out.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.client.logout().await {
            Ok(()) => info!("Logged out session for {:?}", self.tenant),
            Err(e) => warn!("Failed to log out session for {:?}: {}", self.tenant, e),
        }
    }

    fn required<'a, T>(&self, value: Option<&'a T>, what: &str) -> Result<&'a T, ProviderError> {
        value.ok_or_else(|| ProviderError::InvalidConfig(format!("no {} configured for tenant {:?}", what, self.tenant)))
    }

    /// Find a VM by name in the session datacenter.
    pub async fn lookup_vm(&self, name: &str) -> Result<VirtualMachine, ProviderError> {
        let reference = self
            .client
            .find_object(ObjectKind::VirtualMachine, name, Some(&self.datacenter))
            .await
            .with_context(|| format!("failed to find VM {}", name))?;
        Ok(VirtualMachine::new(name, reference, Arc::clone(&self.client)))
    }

    /// VMs whose name matches `pattern`; `*` lists all of them.
    pub async fn list_virtual_machines(&self, pattern: &str) -> Result<Vec<VirtualMachine>, ProviderError> {
        match self.client.list_virtual_machines(&self.datacenter, pattern).await {
            Ok(summaries) => Ok(summaries
                .into_iter()
                .map(|s| VirtualMachine::new(s.name, s.reference, Arc::clone(&self.client)))
                .collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("failed to list VMs matching {:?}", pattern)),
        }
    }

    /// Configuration descriptor for `vm_name` built from its class.
    pub fn config_spec(
        &self,
        vm_name: &str,
        vm_spec: &VirtualMachineSpec,
        class: &VirtualMachineClassSpec,
        metadata: &BTreeMap<String, String>,
        device_change: Vec<VirtualDeviceConfigSpec>,
    ) -> Result<VirtualMachineConfigSpec, ProviderError> {
        config_spec_from_class(vm_name, vm_spec, class, metadata, &self.extra_config, device_change)
    }

    /// One new NIC per declared interface, keyed -100, -101, ...
    pub async fn device_specs_from_vm(
        &self,
        namespace: &str,
        vm_name: &str,
        vm_spec: &VirtualMachineSpec,
    ) -> Result<Vec<VirtualDeviceConfigSpec>, ProviderError> {
        // Reject unsupported network types before touching vCenter
        let providers = vm_spec
            .network_interfaces
            .iter()
            .map(|interface| self.networks.for_type(&interface.network_type))
            .collect::<Result<Vec<_>, _>>()?;

        let mut specs = Vec::with_capacity(providers.len());
        let mut key = FIRST_NEW_DEVICE_KEY;
        for (interface, provider) in vm_spec.network_interfaces.iter().zip(providers) {
            let mut vnic = provider.create_vnic(namespace, vm_name, interface).await?;
            vnic.set_key(key);
            key -= 1;
            specs.push(VirtualDeviceConfigSpec::add(vnic));
        }
        Ok(specs)
    }

    /// Network device changes that bring `vm` to the declared interfaces.
    ///
    /// With no declared interfaces existing NICs are kept, and moved onto the
    /// default network when one is configured. Otherwise every existing NIC
    /// is removed and the declared set is added, so guest NIC order may
    /// change across updates.
    pub async fn device_change_specs(
        &self,
        namespace: &str,
        vm_name: &str,
        vm_spec: &VirtualMachineSpec,
        vm: &VirtualMachine,
    ) -> Result<Vec<VirtualDeviceConfigSpec>, ProviderError> {
        if vm_spec.network_interfaces.is_empty() {
            let Some(network) = &self.network else {
                return Ok(Vec::new());
            };
            let existing = vm.network_devices().await?;
            if existing.is_empty() {
                return Ok(Vec::new());
            }
            let backing = self
                .client
                .network_backing(&network.reference)
                .await
                .with_context(|| format!("unable to create ethernet card backing for network {}", network.name))?;

            return Ok(existing
                .into_iter()
                .filter_map(|mut device| {
                    device.as_ethernet_card_mut()?.backing = Some(backing.clone());
                    Some(VirtualDeviceConfigSpec::edit(device))
                })
                .collect());
        }

        let mut specs: Vec<VirtualDeviceConfigSpec> = vm
            .network_devices()
            .await?
            .into_iter()
            .map(VirtualDeviceConfigSpec::remove)
            .collect();
        specs.extend(self.device_specs_from_vm(namespace, vm_name, vm_spec).await?);
        Ok(specs)
    }

    /// Host and datastore for placing a copy of `source` in the session cluster.
    pub async fn resolve_placement(
        &self,
        source: &ManagedObjectReference,
        config: &VirtualMachineConfigSpec,
        relocate: &VirtualMachineRelocateSpec,
        placement_type: PlacementType,
    ) -> Result<PlacementResult, ProviderError> {
        let cluster = self.required(self.cluster.as_ref(), "cluster")?;
        let spec = PlacementSpec {
            placement_type,
            vm: Some(source.clone()),
            config_spec: Some(config.clone()),
            relocate_spec: Some(relocate.clone()),
        };
        self.client
            .place_vm(cluster, &spec)
            .await
            .with_context(|| format!("failed to compute placement for {} in cluster {}", source, cluster))
    }

    /// Provisioning descriptor for cloning `source` into `vm_name`.
    #[allow(clippy::too_many_arguments, reason = "mirrors clone_virtual_machine plus the resolved source VM")]
    pub async fn clone_spec(
        &self,
        namespace: &str,
        vm_name: &str,
        source: &VirtualMachine,
        vm_spec: &VirtualMachineSpec,
        class: &VirtualMachineClassSpec,
        metadata: &BTreeMap<String, String>,
        storage_profile_id: Option<&str>,
    ) -> Result<VirtualMachineCloneSpec, ProviderError> {
        let pool = self.required(self.resource_pool.as_ref(), "resource pool")?;
        let folder = self.required(self.folder.as_ref(), "folder")?;

        let (disk_specs, profile) = storage_profile_specs(source, storage_profile_id).await?;
        let mut device_change = self.device_change_specs(namespace, vm_name, vm_spec, source).await?;
        device_change.extend(disk_specs);

        let config = self.config_spec(vm_name, vm_spec, class, metadata, Vec::new())?;
        let mut location = VirtualMachineRelocateSpec {
            folder: Some(folder.clone()),
            pool: Some(pool.clone()),
            device_change,
            profile,
            ..Default::default()
        };
        let placement = self
            .resolve_placement(source.reference(), &config, &location, PlacementType::Clone)
            .await?;
        location.host = placement.host;
        location.datastore = placement.datastore;

        Ok(VirtualMachineCloneSpec {
            location,
            config: Some(config),
            power_on: vm_spec.power_state == Some(VirtualMachinePowerState::PoweredOn),
            template: false,
            // No full memory clones
            memory: Some(false),
            customization: None,
        })
    }

    /// Guest customization for interfaces whose network assigns addresses.
    ///
    /// Blocks until each such interface is realized, bounded by the network
    /// wait timeout. `None` when no interface needs it. Interfaces without
    /// exactly one address are skipped.
    pub async fn customization_spec(
        &self,
        namespace: &str,
        vm_name: &str,
        vm_spec: &VirtualMachineSpec,
    ) -> Result<Option<CustomizationSpec>, ProviderError> {
        let mut assigned = false;
        let mut nic_setting_map = Vec::new();
        for interface in &vm_spec.network_interfaces {
            let provider = self.networks.for_type(&interface.network_type)?;
            let Some(addressing) = provider.guest_addressing(namespace, vm_name, interface).await? else {
                continue;
            };
            assigned = true;

            let [address] = addressing.ip_addresses.as_slice() else {
                warn!(
                    "Not customizing interface {} of VM {}/{}: expected one IP address, found {}",
                    interface.network_name,
                    namespace,
                    vm_name,
                    addressing.ip_addresses.len()
                );
                continue;
            };
            nic_setting_map.push(CustomizationAdapterMapping {
                mac_address: addressing.mac_address.clone(),
                adapter: CustomizationIpSettings {
                    ip: CustomizationIpGenerator::Fixed {
                        ip_address: address.ip.clone(),
                    },
                    subnet_mask: Some(address.subnet_mask.clone()).filter(|m| !m.is_empty()),
                    gateway: Some(address.gateway.clone()).into_iter().filter(|g| !g.is_empty()).collect(),
                },
            });
        }

        if !assigned {
            return Ok(None);
        }
        // Linux guests only
        Ok(Some(CustomizationSpec {
            identity: CustomizationIdentity::LinuxPrep {
                host_name: CustomizationName::Fixed {
                    name: vm_name.to_string(),
                },
                hw_clock_utc: true,
            },
            global_ip_settings: CustomizationGlobalIpSettings::default(),
            nic_setting_map,
        }))
    }

    async fn customize(&self, namespace: &str, vm_spec: &VirtualMachineSpec, vm: &VirtualMachine) -> Result<(), ProviderError> {
        if let Some(spec) = self.customization_spec(namespace, vm.name(), vm_spec).await? {
            info!("Customizing guest of VM {}/{}", namespace, vm.name());
            vm.customize(&spec).await?;
        }
        Ok(())
    }

    /// Create a VM from scratch in the session folder and pool, then power it on.
    pub async fn create_virtual_machine(
        &self,
        namespace: &str,
        vm_name: &str,
        vm_spec: &VirtualMachineSpec,
        class: &VirtualMachineClassSpec,
        metadata: &BTreeMap<String, String>,
    ) -> Result<VirtualMachine, ProviderError> {
        let folder = self.required(self.folder.as_ref(), "folder")?;
        let pool = self.required(self.resource_pool.as_ref(), "resource pool")?;
        let datastore = self.required(self.datastore.as_ref(), "datastore")?;

        let device_change = self.device_specs_from_vm(namespace, vm_name, vm_spec).await?;
        let mut config = self.config_spec(vm_name, vm_spec, class, metadata, device_change)?;
        config.files = Some(VirtualMachineFileInfo {
            vm_path_name: format!("[{}]", datastore.name),
        });

        info!(
            "Creating VM {}/{} in folder {} and resource pool {}",
            namespace, vm_name, folder.value, pool.value
        );
        let reference = self
            .client
            .create_vm(folder, pool, None, &config)
            .await
            .with_context(|| format!("failed to create new VM {}", vm_name))?;
        let vm = VirtualMachine::new(vm_name, reference, Arc::clone(&self.client));

        self.customize(namespace, vm_spec, &vm).await?;
        vm.set_power_state(VirtualMachinePowerState::PoweredOn).await?;
        Ok(vm)
    }

    /// Materialize a VM from its image.
    ///
    /// With a content library the image is a library item that is deployed
    /// and then reconfigured with the declared NICs. Without one the image is
    /// an inventory VM that is cloned.
    pub async fn clone_virtual_machine(
        &self,
        namespace: &str,
        vm_name: &str,
        vm_spec: &VirtualMachineSpec,
        class: &VirtualMachineClassSpec,
        metadata: &BTreeMap<String, String>,
        storage_profile_id: Option<&str>,
    ) -> Result<VirtualMachine, ProviderError> {
        if let Some(library) = &self.content_library {
            return self
                .deploy_from_library(library, namespace, vm_name, vm_spec, storage_profile_id)
                .await;
        }

        let folder = self.required(self.folder.as_ref(), "folder")?;
        let source = self
            .lookup_vm(&vm_spec.image_name)
            .await
            .map_err(|e| e.classify(ResourceKind::VirtualMachineImage, &vm_spec.image_name))?;

        let mut clone_spec = self
            .clone_spec(namespace, vm_name, &source, vm_spec, class, metadata, storage_profile_id)
            .await?;
        let customization = self.customization_spec(namespace, vm_name, vm_spec).await?;
        // Customization needs the clone powered off
        let power_on = clone_spec.power_on;
        if customization.is_some() {
            clone_spec.power_on = false;
        }

        info!("Cloning VM {}/{} from {}", namespace, vm_name, source.name());
        let reference = self
            .client
            .clone_vm(source.reference(), folder, vm_name, &clone_spec)
            .await
            .with_context(|| format!("failed to clone new VM {} from {}", vm_name, source.name()))?;
        let vm = VirtualMachine::new(vm_name, reference, Arc::clone(&self.client));

        if let Some(spec) = customization {
            info!("Customizing guest of VM {}/{}", namespace, vm_name);
            vm.customize(&spec).await?;
            if power_on {
                vm.set_power_state(VirtualMachinePowerState::PoweredOn).await?;
            }
        }
        Ok(vm)
    }

    async fn deploy_from_library(
        &self,
        library: &ContentLibrary,
        namespace: &str,
        vm_name: &str,
        vm_spec: &VirtualMachineSpec,
        storage_profile_id: Option<&str>,
    ) -> Result<VirtualMachine, ProviderError> {
        let catalog = CatalogSession::open(&self.client).await?;
        let deployed = self
            .deploy_library_item(catalog.rest(), library, vm_name, &vm_spec.image_name, storage_profile_id)
            .await;
        catalog.close().await;
        let vm = VirtualMachine::new(vm_name, deployed?, Arc::clone(&self.client));

        let device_change = self.device_change_specs(namespace, vm_name, vm_spec, &vm).await?;
        vm.reconfigure(&VirtualMachineConfigSpec {
            device_change,
            ..Default::default()
        })
        .await?;

        self.customize(namespace, vm_spec, &vm).await?;
        Ok(vm)
    }

    async fn deploy_library_item(
        &self,
        rest: &RestSession,
        library: &ContentLibrary,
        vm_name: &str,
        image_name: &str,
        storage_profile_id: Option<&str>,
    ) -> Result<ManagedObjectReference, ProviderError> {
        let item = self.find_library_item(rest, library, image_name).await?;
        let pool = self.required(self.resource_pool.as_ref(), "resource pool")?;

        let mut deployment_spec = DeploymentSpec {
            name: vm_name.to_string(),
            accept_all_eula: true,
            storage_profile_id: storage_profile_id.filter(|p| !p.is_empty()).map(str::to_string),
            default_datastore_id: None,
        };
        if deployment_spec.storage_profile_id.is_none() {
            let datastore = self.required(self.datastore.as_ref(), "datastore")?;
            info!("No storage profile for VM {}, deploying to datastore {}", vm_name, datastore.name);
            deployment_spec.default_datastore_id = Some(datastore.reference.value.clone());
        }
        let deployment = LibraryItemDeployment {
            deployment_spec,
            target: DeploymentTarget {
                resource_pool_id: pool.value.clone(),
                folder_id: self.folder.as_ref().map(|f| f.value.clone()),
                host_id: None,
            },
        };

        info!("Deploying library item {} ({}) as VM {}", item.name, item.id, vm_name);
        self.client
            .deploy_library_item(rest, &item.id, &deployment)
            .await
            .with_context(|| format!("failed to deploy new VM {} from {}", vm_name, image_name))
    }

    /// The one deployable library item called `name`.
    async fn find_library_item(
        &self,
        rest: &RestSession,
        library: &ContentLibrary,
        name: &str,
    ) -> Result<LibraryItem, ProviderError> {
        let ids = self
            .client
            .find_library_items(rest, &library.id, name)
            .await
            .with_context(|| format!("failed to find item {} in content library {}", name, library.name))?;

        let id = match ids.as_slice() {
            [] => return Err(ProviderError::not_found(ResourceKind::VirtualMachineImage, name)),
            [id] => id,
            many => {
                return Err(ProviderError::MultipleFound {
                    kind: ResourceKind::VirtualMachineImage,
                    name: name.to_string(),
                    count: many.len(),
                })
            }
        };

        let item = self
            .client
            .get_library_item(rest, id)
            .await
            .with_context(|| format!("failed to read library item {}", id))
            .map_err(|e| e.classify(ResourceKind::VirtualMachineImage, name))?;
        if !is_supported_deploy_type(&item.item_type) {
            return Err(ProviderError::UnsupportedImageType(item.item_type));
        }
        Ok(item)
    }

    /// Images available to the tenant: deployable library items when a
    /// content library is configured, inventory VMs otherwise.
    pub async fn list_images(&self, namespace: &str) -> Result<Vec<VirtualMachineImage>, ProviderError> {
        if let Some(library) = &self.content_library {
            let catalog = CatalogSession::open(&self.client).await?;
            let items = self.client.list_library_items(catalog.rest(), &library.id).await;
            catalog.close().await;

            let items = items.with_context(|| format!("failed to list items of content library {}", library.name))?;
            return Ok(items
                .iter()
                .filter(|item| is_supported_deploy_type(&item.item_type))
                .map(|item| image_from_library_item(namespace, item))
                .collect());
        }

        let mut images = Vec::new();
        for vm in self.list_virtual_machines("*").await? {
            match image_from_vm(namespace, &vm).await {
                Ok(image) => images.push(image),
                // Deleted between listing and reading it
                Err(e) if e.is_not_found() => debug!("Skipping image {}: {}", vm.name(), e),
                Err(e) => return Err(e),
            }
        }
        Ok(images)
    }

    /// Image `name`, from the content library when one is configured.
    pub async fn get_image(&self, namespace: &str, name: &str) -> Result<VirtualMachineImage, ProviderError> {
        if let Some(library) = &self.content_library {
            let catalog = CatalogSession::open(&self.client).await?;
            let item = self.find_library_item(catalog.rest(), library, name).await;
            catalog.close().await;
            return Ok(image_from_library_item(namespace, &item?));
        }

        let vm = self.lookup_vm(name).await?;
        image_from_vm(namespace, &vm).await
    }
}

/// Build a configuration descriptor from a class.
///
/// Reservations and limits are only set for non-zero quantities. Extra-config
/// is only produced for the ExtraConfig transport: `metadata` merged over
/// `global_extra_config`.
pub fn config_spec_from_class(
    vm_name: &str,
    vm_spec: &VirtualMachineSpec,
    class: &VirtualMachineClassSpec,
    metadata: &BTreeMap<String, String>,
    global_extra_config: &BTreeMap<String, String>,
    device_change: Vec<VirtualDeviceConfigSpec>,
) -> Result<VirtualMachineConfigSpec, ProviderError> {
    let extra_config = match &vm_spec.vm_metadata {
        None => Vec::new(),
        Some(m) if m.transport == TRANSPORT_EXTRA_CONFIG => merge_extra_config(metadata, global_extra_config),
        Some(m) => return Err(ProviderError::UnsupportedTransport(m.transport.clone())),
    };

    let num_cpus = i32::try_from(class.hardware.cpus)
        .map_err(|_| ProviderError::InvalidConfig(format!("CPU count {} is out of range", class.hardware.cpus)))?;
    let memory = parse_quantity(&class.hardware.memory)?;
    let resources = &class.policies.resources;

    Ok(VirtualMachineConfigSpec {
        name: Some(vm_name.to_string()),
        num_cpus: Some(num_cpus),
        memory_mb: Some(memory_quantity_to_mb(&memory)),
        cpu_allocation: allocation(&resources.requests.cpu, &resources.limits.cpu, cpu_quantity_to_mhz)?,
        memory_allocation: allocation(&resources.requests.memory, &resources.limits.memory, memory_quantity_to_mb)?,
        extra_config,
        annotation: Some(VM_ANNOTATION.to_string()),
        device_change,
        ..Default::default()
    })
}

/// Fail early on a metadata transport the provider cannot deliver.
pub fn check_metadata_transport(vm_spec: &VirtualMachineSpec) -> Result<(), ProviderError> {
    match &vm_spec.vm_metadata {
        Some(m) if m.transport != TRANSPORT_EXTRA_CONFIG => Err(ProviderError::UnsupportedTransport(m.transport.clone())),
        _ => Ok(()),
    }
}

fn allocation(
    reservation: &str,
    limit: &str,
    convert: fn(&Quantity) -> i64,
) -> Result<Option<ResourceAllocationInfo>, ProviderError> {
    let value = |s: &str| -> Result<Option<i64>, ProviderError> {
        Ok(parse_optional_quantity(s)?.filter(|q| !q.is_zero()).map(|q| convert(&q)))
    };
    let info = ResourceAllocationInfo {
        reservation: value(reservation)?,
        limit: value(limit)?,
    };
    Ok(if info.is_empty() { None } else { Some(info) })
}

/// Global extra-config with VM metadata applied on top, sorted by key.
pub fn merge_extra_config(
    metadata: &BTreeMap<String, String>,
    global_extra_config: &BTreeMap<String, String>,
) -> Vec<OptionValue> {
    let mut merged = global_extra_config.clone();
    merged.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
        .into_iter()
        .map(|(key, value)| OptionValue { key, value })
        .collect()
}

/// Disk edits and the VM profile that associate `vm` with a storage policy.
async fn storage_profile_specs(
    vm: &VirtualMachine,
    storage_profile_id: Option<&str>,
) -> Result<(Vec<VirtualDeviceConfigSpec>, Vec<VirtualMachineProfileSpec>), ProviderError> {
    let Some(profile_id) = storage_profile_id.filter(|p| !p.is_empty()) else {
        return Ok((Vec::new(), Vec::new()));
    };
    let profile = vec![VirtualMachineProfileSpec::defined(profile_id)];
    let disks = vm
        .disks()
        .await?
        .into_iter()
        .map(|device| VirtualDeviceConfigSpec {
            operation: DeviceOperation::Edit,
            device,
            profile: profile.clone(),
        })
        .collect();
    Ok((disks, profile))
}
