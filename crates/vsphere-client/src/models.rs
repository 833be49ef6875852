//! vSphere data models
//!
//! Request and response types for the Automation REST API (`/api/...`) and
//! the VI/JSON API (`/sdk/vim25/{release}/...`). VI/JSON polymorphic types
//! carry their concrete type in the `_typeName` discriminator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kinds of inventory objects the client can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Datacenter,
    Cluster,
    ResourcePool,
    Folder,
    Datastore,
    Network,
    VirtualMachine,
    Host,
    ContentLibrary,
    LibraryItem,
}

impl ObjectKind {
    /// Collection segment under `/api/vcenter/`.
    pub fn rest_collection(self) -> &'static str {
        match self {
            Self::Datacenter => "datacenter",
            Self::Cluster => "cluster",
            Self::ResourcePool => "resource-pool",
            Self::Folder => "folder",
            Self::Datastore => "datastore",
            Self::Network => "network",
            Self::VirtualMachine => "vm",
            Self::Host => "host",
            Self::ContentLibrary => "content/library",
            Self::LibraryItem => "content/library/item",
        }
    }

    /// Identifier field in a REST list summary.
    pub fn rest_id_field(self) -> &'static str {
        match self {
            Self::ResourcePool => "resource_pool",
            Self::VirtualMachine => "vm",
            Self::ContentLibrary | Self::LibraryItem => "id",
            other => other.rest_collection(),
        }
    }

    /// Managed object type name used by VI/JSON.
    pub fn vim_type(self) -> &'static str {
        match self {
            Self::Datacenter => "Datacenter",
            Self::Cluster => "ClusterComputeResource",
            Self::ResourcePool => "ResourcePool",
            Self::Folder => "Folder",
            Self::Datastore => "Datastore",
            Self::Network => "Network",
            Self::VirtualMachine => "VirtualMachine",
            Self::Host => "HostSystem",
            Self::ContentLibrary => "ContentLibrary",
            Self::LibraryItem => "ContentLibraryItem",
        }
    }

    /// Best-effort kind of the object an API path addresses.
    pub fn from_path(path: &str) -> Self {
        let path = path.to_ascii_lowercase();
        const PATTERNS: &[(&str, ObjectKind)] = &[
            ("library/item", ObjectKind::LibraryItem),
            ("library-item", ObjectKind::LibraryItem),
            ("content/library", ObjectKind::ContentLibrary),
            ("resource-pool", ObjectKind::ResourcePool),
            ("resourcepool", ObjectKind::ResourcePool),
            ("folder", ObjectKind::Folder),
            ("datastore", ObjectKind::Datastore),
            ("network", ObjectKind::Network),
            ("portgroup", ObjectKind::Network),
            ("cluster", ObjectKind::Cluster),
            ("datacenter", ObjectKind::Datacenter),
            ("host", ObjectKind::Host),
        ];
        PATTERNS
            .iter()
            .find(|(pattern, _)| path.contains(pattern))
            .map_or(ObjectKind::VirtualMachine, |(_, kind)| *kind)
    }

    /// Whether a bare managed object id is accepted in place of a name.
    pub fn accepts_id_lookup(self) -> bool {
        matches!(self, Self::ResourcePool | Self::Folder)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Datacenter => "datacenter",
            Self::Cluster => "cluster",
            Self::ResourcePool => "resource pool",
            Self::Folder => "folder",
            Self::Datastore => "datastore",
            Self::Network => "network",
            Self::VirtualMachine => "virtual machine",
            Self::Host => "host",
            Self::ContentLibrary => "content library",
            Self::LibraryItem => "library item",
        };
        f.write_str(s)
    }
}

/// Reference to a server-side managed object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedObjectReference {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl ManagedObjectReference {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Reference to an object of a known kind.
    pub fn of(kind: ObjectKind, value: impl Into<String>) -> Self {
        Self::new(kind.vim_type(), value)
    }
}

impl fmt::Display for ManagedObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Backend power state of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

/// Guest heartbeat colour reported by VMware Tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GuestHeartbeatStatus {
    #[default]
    Gray,
    Green,
    Yellow,
    Red,
}

// ============================================================================
// Devices
// ============================================================================

/// Virtual device of a VM, tagged by its VI/JSON type name.
///
/// Device types the provider does not edit are kept verbatim in `Other` so a
/// read-modify-write never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_typeName")]
pub enum VirtualDevice {
    VirtualVmxnet3(VirtualEthernetCard),
    VirtualVmxnet3Vrdma(VirtualEthernetCard),
    VirtualVmxnet2(VirtualEthernetCard),
    VirtualVmxnet(VirtualEthernetCard),
    VirtualE1000(VirtualEthernetCard),
    VirtualE1000e(VirtualEthernetCard),
    VirtualPCNet32(VirtualEthernetCard),
    VirtualSriovEthernetCard(VirtualEthernetCard),
    VirtualDisk(VirtualDisk),
    #[serde(untagged)]
    Other(Value),
}

impl VirtualDevice {
    /// Ethernet card of the given model ("vmxnet3", "vmxnet2", "e1000", "e1000e", "pcnet32").
    pub fn ethernet_card(model: &str, card: VirtualEthernetCard) -> Option<Self> {
        match model {
            "vmxnet3" => Some(Self::VirtualVmxnet3(card)),
            "vmxnet2" => Some(Self::VirtualVmxnet2(card)),
            "e1000" => Some(Self::VirtualE1000(card)),
            "e1000e" => Some(Self::VirtualE1000e(card)),
            "pcnet32" => Some(Self::VirtualPCNet32(card)),
            _ => None,
        }
    }

    pub fn key(&self) -> i32 {
        match self {
            Self::VirtualDisk(disk) => disk.key,
            Self::Other(value) => value
                .get("key")
                .and_then(Value::as_i64)
                .and_then(|key| i32::try_from(key).ok())
                .unwrap_or_default(),
            other => other.as_ethernet_card().map_or(0, |card| card.key),
        }
    }

    pub fn set_key(&mut self, key: i32) {
        match self {
            Self::VirtualDisk(disk) => disk.key = key,
            Self::Other(Value::Object(fields)) => {
                fields.insert("key".to_string(), Value::from(key));
            }
            other => {
                if let Some(card) = other.as_ethernet_card_mut() {
                    card.key = key;
                }
            }
        }
    }

    pub fn as_ethernet_card(&self) -> Option<&VirtualEthernetCard> {
        match self {
            Self::VirtualVmxnet3(card)
            | Self::VirtualVmxnet3Vrdma(card)
            | Self::VirtualVmxnet2(card)
            | Self::VirtualVmxnet(card)
            | Self::VirtualE1000(card)
            | Self::VirtualE1000e(card)
            | Self::VirtualPCNet32(card)
            | Self::VirtualSriovEthernetCard(card) => Some(card),
            Self::VirtualDisk(_) | Self::Other(_) => None,
        }
    }

    pub fn as_ethernet_card_mut(&mut self) -> Option<&mut VirtualEthernetCard> {
        match self {
            Self::VirtualVmxnet3(card)
            | Self::VirtualVmxnet3Vrdma(card)
            | Self::VirtualVmxnet2(card)
            | Self::VirtualVmxnet(card)
            | Self::VirtualE1000(card)
            | Self::VirtualE1000e(card)
            | Self::VirtualPCNet32(card)
            | Self::VirtualSriovEthernetCard(card) => Some(card),
            Self::VirtualDisk(_) | Self::Other(_) => None,
        }
    }

    pub fn is_ethernet_card(&self) -> bool {
        self.as_ethernet_card().is_some()
    }

    pub fn is_disk(&self) -> bool {
        matches!(self, Self::VirtualDisk(_))
    }
}

/// Fields shared by every ethernet card subtype. Fields the provider does
/// not touch (`connectable`, `controllerKey`, `unitNumber`, ...) ride along
/// in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualEthernetCard {
    pub key: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backing: Option<EthernetCardBacking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Network backing of an ethernet card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_typeName")]
pub enum EthernetCardBacking {
    #[serde(rename = "VirtualEthernetCardNetworkBackingInfo")]
    Network(NetworkBackingInfo),
    #[serde(rename = "VirtualEthernetCardDistributedVirtualPortBackingInfo")]
    DistributedPort(DistributedPortBackingInfo),
    #[serde(rename = "VirtualEthernetCardOpaqueNetworkBackingInfo")]
    Opaque(OpaqueNetworkBackingInfo),
    /// Backing types the provider never builds, kept as read
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBackingInfo {
    pub device_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<ManagedObjectReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedPortBackingInfo {
    pub port: DistributedVirtualSwitchPortConnection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedVirtualSwitchPortConnection {
    pub switch_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portgroup_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpaqueNetworkBackingInfo {
    pub opaque_network_id: String,
    pub opaque_network_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDisk {
    pub key: i32,
    #[serde(default)]
    pub capacity_in_kb: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_key: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_number: Option<i32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Device change operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceOperation {
    Add,
    Edit,
    Remove,
}

/// Storage policy applied to a VM or disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_typeName")]
pub enum VirtualMachineProfileSpec {
    #[serde(rename = "VirtualMachineDefinedProfileSpec", rename_all = "camelCase")]
    Defined { profile_id: String },
}

impl VirtualMachineProfileSpec {
    pub fn defined(profile_id: impl Into<String>) -> Self {
        Self::Defined {
            profile_id: profile_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDeviceConfigSpec {
    pub operation: DeviceOperation,
    pub device: VirtualDevice,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile: Vec<VirtualMachineProfileSpec>,
}

impl VirtualDeviceConfigSpec {
    pub fn add(device: VirtualDevice) -> Self {
        Self {
            operation: DeviceOperation::Add,
            device,
            profile: Vec::new(),
        }
    }

    pub fn edit(device: VirtualDevice) -> Self {
        Self {
            operation: DeviceOperation::Edit,
            device,
            profile: Vec::new(),
        }
    }

    pub fn remove(device: VirtualDevice) -> Self {
        Self {
            operation: DeviceOperation::Remove,
            device,
            profile: Vec::new(),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAllocationInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl ResourceAllocationInfo {
    pub fn is_empty(&self) -> bool {
        self.reservation.is_none() && self.limit.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineFileInfo {
    pub vm_path_name: String,
}

/// Desired VM configuration (VI `VirtualMachineConfigSpec`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "numCPUs", default, skip_serializing_if = "Option::is_none")]
    pub num_cpus: Option<i32>,
    #[serde(rename = "memoryMB", default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_allocation: Option<ResourceAllocationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_allocation: Option<ResourceAllocationInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_config: Vec<OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_change: Vec<VirtualDeviceConfigSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<VirtualMachineFileInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vm_profile: Vec<VirtualMachineProfileSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineRelocateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<ManagedObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<ManagedObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<ManagedObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore: Option<ManagedObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_change: Vec<VirtualDeviceConfigSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile: Vec<VirtualMachineProfileSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineCloneSpec {
    pub location: VirtualMachineRelocateSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<VirtualMachineConfigSpec>,
    pub power_on: bool,
    pub template: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customization: Option<CustomizationSpec>,
}

// ============================================================================
// Placement
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlacementType {
    Create,
    Clone,
    Relocate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementSpec {
    pub placement_type: PlacementType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm: Option<ManagedObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_spec: Option<VirtualMachineConfigSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relocate_spec: Option<VirtualMachineRelocateSpec>,
}

/// Host and datastore chosen by DRS for a placement request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementResult {
    pub host: Option<ManagedObjectReference>,
    pub datastore: Option<ManagedObjectReference>,
}

// ============================================================================
// Guest customization
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizationSpec {
    pub identity: CustomizationIdentity,
    pub global_ip_settings: CustomizationGlobalIpSettings,
    #[serde(default)]
    pub nic_setting_map: Vec<CustomizationAdapterMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_typeName")]
pub enum CustomizationIdentity {
    #[serde(rename = "CustomizationLinuxPrep", rename_all = "camelCase")]
    LinuxPrep {
        host_name: CustomizationName,
        #[serde(rename = "hwClockUTC")]
        hw_clock_utc: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_typeName")]
pub enum CustomizationName {
    #[serde(rename = "CustomizationFixedName")]
    Fixed { name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizationGlobalIpSettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_server_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizationAdapterMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    pub adapter: CustomizationIpSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizationIpSettings {
    pub ip: CustomizationIpGenerator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_mask: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateway: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_typeName")]
pub enum CustomizationIpGenerator {
    #[serde(rename = "CustomizationFixedIp", rename_all = "camelCase")]
    Fixed { ip_address: String },
    #[serde(rename = "CustomizationDhcpIpGenerator")]
    Dhcp,
}

// ============================================================================
// Inventory views
// ============================================================================

/// One entry of a VM listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineSummary {
    pub reference: ManagedObjectReference,
    pub name: String,
    pub power_state: PowerState,
}

/// Properties of a VM read in one round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachineProperties {
    pub reference: ManagedObjectReference,
    pub name: String,
    pub power_state: PowerState,
    pub host: Option<String>,
    pub ip_address: Option<String>,
    pub bios_uuid: Option<String>,
    pub instance_uuid: Option<String>,
    pub guest_heartbeat: GuestHeartbeatStatus,
    pub devices: Vec<VirtualDevice>,
}

// ============================================================================
// Content library
// ============================================================================

/// Token of a scoped REST session used for catalog calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestSession {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLibrary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub library_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: String,
    pub name: String,
    pub library_id: String,
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub name: String,
    pub accept_all_eula: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_datastore_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub resource_pool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
}

/// Request body of an OVF library item deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItemDeployment {
    pub deployment_spec: DeploymentSpec,
    pub target: DeploymentTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_round_trips_type_name() {
        let card = VirtualDevice::VirtualVmxnet3(VirtualEthernetCard {
            key: -100,
            backing: Some(EthernetCardBacking::Network(NetworkBackingInfo {
                device_name: "VM Network".to_string(),
                network: Some(ManagedObjectReference::new("Network", "network-1")),
            })),
            address_type: Some("generated".to_string()),
            ..Default::default()
        });
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["_typeName"], "VirtualVmxnet3");
        assert_eq!(json["backing"]["_typeName"], "VirtualEthernetCardNetworkBackingInfo");
        assert_eq!(json["backing"]["deviceName"], "VM Network");
        let back: VirtualDevice = serde_json::from_value(json).unwrap();
        assert_eq!(back, card);
    }

    fn hardware_devices() -> Vec<VirtualDevice> {
        serde_json::from_value(serde_json::json!([
            {
                "_typeName": "VirtualVmxnet3",
                "key": 4000,
                "controllerKey": 100,
                "unitNumber": 7,
                "connectable": { "_typeName": "VirtualDeviceConnectInfo", "connected": true, "startConnected": true },
                "backing": { "_typeName": "VirtualEthernetCardNetworkBackingInfo", "deviceName": "VM Network" },
                "addressType": "assigned",
                "macAddress": "00:50:56:aa:bb:cc"
            },
            {
                "_typeName": "VirtualSriovEthernetCard",
                "key": 4001,
                "controllerKey": 100,
                "backing": { "_typeName": "VirtualEthernetCardLegacyNetworkBackingInfo", "deviceName": "vmnic4" }
            },
            { "_typeName": "VirtualIDEController", "key": 200, "busNumber": 0 }
        ]))
        .unwrap()
    }

    #[test]
    fn every_device_is_kept_when_read() {
        let devices = hardware_devices();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices.iter().filter(|d| d.is_ethernet_card()).count(), 2);
        assert!(matches!(devices[1], VirtualDevice::VirtualSriovEthernetCard(_)));
        assert!(matches!(devices[2], VirtualDevice::Other(_)));
        assert_eq!(devices.iter().map(VirtualDevice::key).collect::<Vec<_>>(), vec![4000, 4001, 200]);

        let sriov = devices[1].as_ethernet_card().unwrap();
        assert!(matches!(sriov.backing, Some(EthernetCardBacking::Other(_))));
    }

    #[test]
    fn edited_card_keeps_unmodelled_fields() {
        let mut device = hardware_devices().remove(0);
        device.as_ethernet_card_mut().unwrap().backing = Some(EthernetCardBacking::Network(NetworkBackingInfo {
            device_name: "web-net".to_string(),
            network: Some(ManagedObjectReference::new("Network", "network-2")),
        }));

        let json = serde_json::to_value(VirtualDeviceConfigSpec::edit(device)).unwrap();
        let device = &json["device"];
        assert_eq!(json["operation"], "edit");
        assert_eq!(device["_typeName"], "VirtualVmxnet3");
        assert_eq!(device["key"], 4000);
        assert_eq!(device["controllerKey"], 100);
        assert_eq!(device["unitNumber"], 7);
        assert_eq!(device["connectable"]["connected"], true);
        assert_eq!(device["macAddress"], "00:50:56:aa:bb:cc");
        assert_eq!(device["backing"]["deviceName"], "web-net");
    }

    #[test]
    fn removed_devices_are_sent_back_as_read() {
        let devices = hardware_devices();
        let sriov = serde_json::to_value(VirtualDeviceConfigSpec::remove(devices[1].clone())).unwrap();
        assert_eq!(sriov["device"]["_typeName"], "VirtualSriovEthernetCard");
        assert_eq!(sriov["device"]["controllerKey"], 100);
        assert_eq!(sriov["device"]["backing"]["_typeName"], "VirtualEthernetCardLegacyNetworkBackingInfo");

        let controller = serde_json::to_value(&devices[2]).unwrap();
        assert_eq!(controller, serde_json::json!({ "_typeName": "VirtualIDEController", "key": 200, "busNumber": 0 }));
    }

    #[test]
    fn config_spec_uses_vim_field_names() {
        let spec = VirtualMachineConfigSpec {
            num_cpus: Some(2),
            memory_mb: Some(1024),
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["numCPUs"], 2);
        assert_eq!(json["memoryMB"], 1024);
        assert!(json.get("deviceChange").is_none());
    }

    #[test]
    fn set_key_reaches_nested_card() {
        let mut disk = VirtualDevice::VirtualDisk(VirtualDisk::default());
        disk.set_key(7);
        assert_eq!(disk.key(), 7);
        let mut card = VirtualDevice::ethernet_card("e1000", VirtualEthernetCard::default()).unwrap();
        card.set_key(-101);
        assert_eq!(card.key(), -101);
        assert!(VirtualDevice::ethernet_card("token-ring", VirtualEthernetCard::default()).is_none());
    }
}
