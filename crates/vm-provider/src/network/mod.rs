//! Network providers.
//!
//! A network provider turns a VM's declared network interface into a new
//! ethernet card. The provider is picked by the interface's network type.

mod default;
mod nsxt;

pub use default::DefaultNetworkProvider;
pub use nsxt::{nsxt_interface_name, KubeNetworkInterfaceClient, NetworkInterfaceClient, NsxtNetworkProvider};

use crate::error::ProviderError;
use async_trait::async_trait;
use crds::{InterfaceIpAddress, VirtualMachineNetworkInterface};
use std::sync::Arc;
use vsphere_client::VirtualDevice;

/// Network type served by the standard vSphere provider.
pub const NETWORK_TYPE_DEFAULT: &str = "";
/// Distributed port groups, also served by the standard provider.
pub const NETWORK_TYPE_VDS: &str = "vsphere-distributed";
/// NSX-T logical switches.
pub const NETWORK_TYPE_NSXT: &str = "nsx-t";

/// Card model used when an interface does not name one.
pub const DEFAULT_ETHERNET_CARD_TYPE: &str = "vmxnet3";

/// Guest addressing assigned by the network for one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceAddressing {
    pub mac_address: Option<String>,
    pub ip_addresses: Vec<InterfaceIpAddress>,
}

#[async_trait]
pub trait NetworkProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build a new, unkeyed ethernet card for `interface` of VM `vm_name`.
    async fn create_vnic(
        &self,
        namespace: &str,
        vm_name: &str,
        interface: &VirtualMachineNetworkInterface,
    ) -> Result<VirtualDevice, ProviderError>;

    /// Addressing the guest must be customized with, if the network assigns it.
    async fn guest_addressing(
        &self,
        _namespace: &str,
        _vm_name: &str,
        _interface: &VirtualMachineNetworkInterface,
    ) -> Result<Option<InterfaceAddressing>, ProviderError> {
        Ok(None)
    }
}

/// Network providers available to a session.
#[derive(Clone)]
pub struct NetworkProviders {
    default: Arc<dyn NetworkProvider>,
    nsxt: Option<Arc<dyn NetworkProvider>>,
}

impl std::fmt::Debug for NetworkProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkProviders")
            .field("default", &self.default.name())
            .field("nsxt", &self.nsxt.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl NetworkProviders {
    pub fn new(default: Arc<dyn NetworkProvider>, nsxt: Option<Arc<dyn NetworkProvider>>) -> Self {
        Self { default, nsxt }
    }

    /// Provider for a network type. Unknown types, and `nsx-t` when no NSX-T
    /// provider is wired in, are rejected as unsupported.
    pub fn for_type(&self, network_type: &str) -> Result<&dyn NetworkProvider, ProviderError> {
        match network_type {
            NETWORK_TYPE_DEFAULT | NETWORK_TYPE_VDS => Ok(self.default.as_ref()),
            NETWORK_TYPE_NSXT => self
                .nsxt
                .as_deref()
                .ok_or_else(|| ProviderError::UnsupportedNetworkType(network_type.to_string())),
            other => Err(ProviderError::UnsupportedNetworkType(other.to_string())),
        }
    }
}
