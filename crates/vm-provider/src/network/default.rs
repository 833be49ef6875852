//! Standard vSphere networking: standard, distributed and opaque networks
//! found by name in the session datacenter.

use super::{NetworkProvider, DEFAULT_ETHERNET_CARD_TYPE};
use crate::error::{ProviderError, ResourceKind, VSphereResultExt};
use async_trait::async_trait;
use crds::VirtualMachineNetworkInterface;
use std::sync::Arc;
use vsphere_client::{ManagedObjectReference, ObjectKind, VSphereClientTrait, VirtualDevice, VirtualEthernetCard};

#[derive(Clone)]
pub struct DefaultNetworkProvider {
    client: Arc<dyn VSphereClientTrait>,
    datacenter: ManagedObjectReference,
}

impl DefaultNetworkProvider {
    pub fn new(client: Arc<dyn VSphereClientTrait>, datacenter: ManagedObjectReference) -> Self {
        Self { client, datacenter }
    }
}

/// Ethernet card of the interface's model around `card`.
pub(crate) fn ethernet_card_for(
    interface: &VirtualMachineNetworkInterface,
    card: VirtualEthernetCard,
) -> Result<VirtualDevice, ProviderError> {
    let model = interface.ethernet_card_type.as_deref().unwrap_or(DEFAULT_ETHERNET_CARD_TYPE);
    VirtualDevice::ethernet_card(model, card)
        .ok_or_else(|| ProviderError::InvalidConfig(format!("unsupported ethernet card type {:?}", model)))
}

#[async_trait]
impl NetworkProvider for DefaultNetworkProvider {
    fn name(&self) -> &'static str {
        "vsphere"
    }

    async fn create_vnic(
        &self,
        _namespace: &str,
        _vm_name: &str,
        interface: &VirtualMachineNetworkInterface,
    ) -> Result<VirtualDevice, ProviderError> {
        let network = self
            .client
            .find_object(ObjectKind::Network, &interface.network_name, Some(&self.datacenter))
            .await
            .with_context(|| format!("failed to find network {}", interface.network_name))
            .map_err(|e| e.classify(ResourceKind::Network, &interface.network_name))?;

        let backing = self
            .client
            .network_backing(&network)
            .await
            .with_context(|| format!("failed to read backing of network {}", interface.network_name))?;

        ethernet_card_for(
            interface,
            VirtualEthernetCard {
                backing: Some(backing),
                address_type: Some("generated".to_string()),
                ..Default::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsphere_client::{EthernetCardBacking, MockVSphereClient};

    fn interface(network: &str, card: Option<&str>) -> VirtualMachineNetworkInterface {
        VirtualMachineNetworkInterface {
            network_name: network.to_string(),
            network_type: String::new(),
            ethernet_card_type: card.map(str::to_string),
        }
    }

    fn provider(mock: &MockVSphereClient) -> DefaultNetworkProvider {
        let dc = mock.add_object(ObjectKind::Datacenter, "dc0", "datacenter-1");
        DefaultNetworkProvider::new(Arc::new(mock.clone()), dc)
    }

    #[tokio::test]
    async fn builds_card_backed_by_named_network() {
        let mock = MockVSphereClient::new("https://vc.test");
        mock.add_network("web-net", "network-7");
        let vnic = provider(&mock).create_vnic("ns", "web", &interface("web-net", None)).await.unwrap();

        assert!(matches!(vnic, VirtualDevice::VirtualVmxnet3(_)));
        let card = vnic.as_ethernet_card().unwrap();
        assert!(matches!(&card.backing, Some(EthernetCardBacking::Network(b)) if b.device_name == "web-net"));
    }

    #[tokio::test]
    async fn honours_card_model_and_rejects_unknown_ones() {
        let mock = MockVSphereClient::new("https://vc.test");
        mock.add_network("web-net", "network-7");
        let provider = provider(&mock);

        let vnic = provider.create_vnic("ns", "web", &interface("web-net", Some("e1000e"))).await.unwrap();
        assert!(matches!(vnic, VirtualDevice::VirtualE1000e(_)));

        let err = provider.create_vnic("ns", "web", &interface("web-net", Some("ne2000"))).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn missing_network_is_not_found() {
        let mock = MockVSphereClient::new("https://vc.test");
        let err = provider(&mock).create_vnic("ns", "web", &interface("nope", None)).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { kind: ResourceKind::Network, .. }));
    }
}
