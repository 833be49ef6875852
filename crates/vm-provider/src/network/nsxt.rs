//! NSX-T networking.
//!
//! Each NIC is backed by a `VirtualNetworkInterface` object that the NSX
//! container plugin realizes into a logical port. The card can only be built
//! once the plugin has published the port id, MAC and logical switch.

use super::default::ethernet_card_for;
use super::{InterfaceAddressing, NetworkProvider};
use crate::error::ProviderError;
use async_trait::async_trait;
use crds::{
    VirtualMachineNetworkInterface, VirtualNetworkInterface, VirtualNetworkInterfaceSpec,
    VirtualNetworkInterfaceStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vsphere_client::{EthernetCardBacking, OpaqueNetworkBackingInfo, VirtualDevice, VirtualEthernetCard};

/// Opaque network type of NSX-T logical switches.
pub const NSX_LOGICAL_SWITCH_TYPE: &str = "nsx.LogicalSwitch";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Name of the interface object backing `network_name` on `vm_name`.
pub fn nsxt_interface_name(vm_name: &str, network_name: &str) -> String {
    format!("{}-{}-lsp", vm_name, network_name)
}

/// Access to `VirtualNetworkInterface` objects.
#[async_trait]
pub trait NetworkInterfaceClient: Send + Sync {
    /// Create the interface object unless it already exists.
    async fn ensure_interface(&self, namespace: &str, name: &str, virtual_network: &str) -> Result<(), ProviderError>;

    /// Current status, `None` while the object or its status is absent.
    async fn interface_status(&self, namespace: &str, name: &str) -> Result<Option<VirtualNetworkInterfaceStatus>, ProviderError>;
}

/// `NetworkInterfaceClient` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeNetworkInterfaceClient {
    client: Client,
}

impl KubeNetworkInterfaceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NetworkInterfaceClient for KubeNetworkInterfaceClient {
    async fn ensure_interface(&self, namespace: &str, name: &str, virtual_network: &str) -> Result<(), ProviderError> {
        let api: Api<VirtualNetworkInterface> = Api::namespaced(self.client.clone(), namespace);
        if api.get_opt(name).await?.is_some() {
            return Ok(());
        }

        let interface = VirtualNetworkInterface {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: VirtualNetworkInterfaceSpec {
                virtual_network: virtual_network.to_string(),
            },
            status: None,
        };
        if let Err(e) = api.create(&PostParams::default(), &interface).await {
            // Lost a create race with another reconcile
            if api.get_opt(name).await?.is_none() {
                return Err(e.into());
            }
        } else {
            info!("Created VirtualNetworkInterface {}/{}", namespace, name);
        }
        Ok(())
    }

    async fn interface_status(&self, namespace: &str, name: &str) -> Result<Option<VirtualNetworkInterfaceStatus>, ProviderError> {
        let api: Api<VirtualNetworkInterface> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.and_then(|i| i.status))
    }
}

/// NSX-T network provider.
#[derive(Clone)]
pub struct NsxtNetworkProvider {
    interfaces: Arc<dyn NetworkInterfaceClient>,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl NsxtNetworkProvider {
    pub fn new(interfaces: Arc<dyn NetworkInterfaceClient>, wait_timeout: Duration) -> Self {
        Self {
            interfaces,
            wait_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wait until the plugin reports the interface Ready, bounded by the wait timeout.
    pub async fn wait_for_interface_status(&self, namespace: &str, name: &str) -> Result<VirtualNetworkInterfaceStatus, ProviderError> {
        let poll = async {
            loop {
                match self.interfaces.interface_status(namespace, name).await? {
                    Some(status) if status.is_ready() => return Ok(status),
                    _ => {
                        debug!("Waiting for VirtualNetworkInterface {}/{}", namespace, name);
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        };

        tokio::time::timeout(self.wait_timeout, poll).await.map_err(|_elapsed| {
            ProviderError::Timeout(format!("waiting for VirtualNetworkInterface {}/{} to become ready", namespace, name))
        })?
    }

    async fn ready_interface(
        &self,
        namespace: &str,
        vm_name: &str,
        interface: &VirtualMachineNetworkInterface,
    ) -> Result<VirtualNetworkInterfaceStatus, ProviderError> {
        let name = nsxt_interface_name(vm_name, &interface.network_name);
        self.interfaces.ensure_interface(namespace, &name, &interface.network_name).await?;
        self.wait_for_interface_status(namespace, &name).await
    }
}

#[async_trait]
impl NetworkProvider for NsxtNetworkProvider {
    fn name(&self) -> &'static str {
        "nsx-t"
    }

    async fn create_vnic(
        &self,
        namespace: &str,
        vm_name: &str,
        interface: &VirtualMachineNetworkInterface,
    ) -> Result<VirtualDevice, ProviderError> {
        let status = self.ready_interface(namespace, vm_name, interface).await?;

        let logical_switch = status
            .provider_status
            .as_ref()
            .map(|p| p.nsx_logical_switch_id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidConfig(format!(
                    "VirtualNetworkInterface {} has no NSX logical switch",
                    nsxt_interface_name(vm_name, &interface.network_name)
                ))
            })?;

        ethernet_card_for(
            interface,
            VirtualEthernetCard {
                backing: Some(EthernetCardBacking::Opaque(OpaqueNetworkBackingInfo {
                    opaque_network_id: logical_switch,
                    opaque_network_type: NSX_LOGICAL_SWITCH_TYPE.to_string(),
                })),
                external_id: status.interface_id,
                address_type: status.mac_address.as_ref().map(|_| "manual".to_string()),
                mac_address: status.mac_address,
                ..Default::default()
            },
        )
    }

    async fn guest_addressing(
        &self,
        namespace: &str,
        vm_name: &str,
        interface: &VirtualMachineNetworkInterface,
    ) -> Result<Option<InterfaceAddressing>, ProviderError> {
        let status = self.ready_interface(namespace, vm_name, interface).await?;
        Ok(Some(InterfaceAddressing {
            mac_address: status.mac_address,
            ip_addresses: status.ip_addresses,
        }))
    }
}
