//! Test utilities for unit testing sessions and the provider
//!
//! This module provides a standard mock inventory, resource builders and an
//! in-memory `NetworkInterfaceClient`.

use crate::config::{Credentials, ProviderConfig, StaticConfigSource};
use crate::error::{ProviderError, VSphereResultExt};
use crate::network::NetworkInterfaceClient;
use crate::provider::VSphereVmProvider;
use crate::session::Session;
use crate::session_manager::{SessionFactory, SessionManager};
use async_trait::async_trait;
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use vsphere_client::{
    EthernetCardBacking, MockVSphereClient, NetworkBackingInfo, ObjectKind, VSphereClientTrait, VirtualDevice,
    VirtualDisk, VirtualEthernetCard,
};

pub const TEST_DATACENTER: &str = "dc0";
pub const TEST_RESOURCE_POOL: &str = "tenant-pool";
pub const TEST_FOLDER: &str = "tenant-folder";
pub const TEST_DATASTORE: &str = "ds0";
pub const TEST_NETWORK: &str = "vm-network";

/// Mock vCenter holding the standard placement inventory.
pub fn create_test_inventory() -> MockVSphereClient {
    let mock = MockVSphereClient::new("https://vc.test");
    mock.add_object(ObjectKind::Datacenter, TEST_DATACENTER, "datacenter-1");
    let cluster = mock.add_object(ObjectKind::Cluster, "cluster0", "domain-c8");
    let pool = mock.add_object(ObjectKind::ResourcePool, TEST_RESOURCE_POOL, "resgroup-9");
    mock.set_pool_owner(&pool, &cluster);
    mock.add_object(ObjectKind::Folder, TEST_FOLDER, "group-v10");
    mock.add_object(ObjectKind::Datastore, TEST_DATASTORE, "datastore-11");
    mock.add_network(TEST_NETWORK, "network-12");
    mock.add_network("web-net", "network-13");
    mock
}

/// Provider configuration pointing at the standard inventory.
pub fn create_test_config() -> ProviderConfig {
    let mut config = ProviderConfig::new(
        "vc.test",
        Credentials {
            username: "administrator@vsphere.local".to_string(),
            password: "secret".to_string(),
        },
        TEST_DATACENTER,
    );
    config.resource_pool = TEST_RESOURCE_POOL.to_string();
    config.folder = TEST_FOLDER.to_string();
    config.datastore = TEST_DATASTORE.to_string();
    config
}

/// Builds every session on one shared mock client.
#[derive(Clone)]
pub struct MockSessionFactory {
    mock: MockVSphereClient,
    network_interfaces: Option<Arc<dyn NetworkInterfaceClient>>,
}

impl MockSessionFactory {
    pub fn new(mock: MockVSphereClient) -> Self {
        Self {
            mock,
            network_interfaces: None,
        }
    }

    #[must_use]
    pub fn with_network_interfaces(mut self, network_interfaces: Arc<dyn NetworkInterfaceClient>) -> Self {
        self.network_interfaces = Some(network_interfaces);
        self
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn create_session(&self, tenant: &str, config: &ProviderConfig) -> Result<Session, ProviderError> {
        let client: Arc<dyn VSphereClientTrait> = Arc::new(self.mock.clone());
        client.login().await.with_context(|| "failed to log in".to_string())?;
        Session::connect(tenant, config, client, self.network_interfaces.clone()).await
    }
}

/// Session for the `test-ns` tenant on the mock.
pub async fn create_test_session(mock: &MockVSphereClient, config: &ProviderConfig) -> Session {
    MockSessionFactory::new(mock.clone())
        .create_session("test-ns", config)
        .await
        .unwrap()
}

/// Provider whose sessions all run against `mock`.
pub fn create_test_provider(mock: &MockVSphereClient, config: ProviderConfig) -> VSphereVmProvider {
    let manager = SessionManager::new(
        Arc::new(StaticConfigSource::new(config)),
        Arc::new(MockSessionFactory::new(mock.clone())),
    );
    VSphereVmProvider::new(Arc::new(manager))
}

/// Helper to create a test VirtualMachine resource
pub fn create_test_vm(namespace: &str, name: &str, image_name: &str) -> VirtualMachine {
    VirtualMachine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: VirtualMachineSpec {
            image_name: image_name.to_string(),
            class_name: "small".to_string(),
            ..Default::default()
        },
        status: None,
    }
}

/// Helper to create a network interface on the default provider
pub fn create_test_interface(network_name: &str) -> VirtualMachineNetworkInterface {
    VirtualMachineNetworkInterface {
        network_name: network_name.to_string(),
        network_type: String::new(),
        ethernet_card_type: None,
    }
}

/// Class with 2 vCPUs, 4Gi of memory and a CPU reservation
pub fn create_test_class() -> VirtualMachineClassSpec {
    VirtualMachineClassSpec {
        hardware: VirtualMachineClassHardware {
            cpus: 2,
            memory: "4Gi".to_string(),
        },
        policies: VirtualMachineClassPolicies {
            resources: VirtualMachineClassResources {
                requests: VirtualMachineResourceSpec {
                    cpu: "1000M".to_string(),
                    memory: String::new(),
                },
                limits: VirtualMachineResourceSpec {
                    cpu: "2000M".to_string(),
                    memory: "4Gi".to_string(),
                },
            },
            storage_policy_id: None,
        },
    }
}

/// vmxnet3 card attached to a standard network
pub fn create_test_nic(key: i32, network: &str) -> VirtualDevice {
    VirtualDevice::VirtualVmxnet3(VirtualEthernetCard {
        key,
        backing: Some(EthernetCardBacking::Network(NetworkBackingInfo {
            device_name: network.to_string(),
            network: None,
        })),
        address_type: Some("generated".to_string()),
        ..Default::default()
    })
}

pub fn create_test_disk(key: i32) -> VirtualDevice {
    VirtualDevice::VirtualDisk(VirtualDisk {
        key,
        capacity_in_kb: 16 * 1024 * 1024,
        controller_key: Some(1000),
        unit_number: Some(0),
        ..Default::default()
    })
}

/// Realized interface status with a single address.
pub fn ready_interface_status(ip: &str) -> VirtualNetworkInterfaceStatus {
    VirtualNetworkInterfaceStatus {
        conditions: vec![InterfaceCondition {
            condition_type: "Ready".to_string(),
            status: "True".to_string(),
            reason: None,
            message: None,
        }],
        interface_id: Some("port-1".to_string()),
        mac_address: Some("00:50:56:00:00:01".to_string()),
        ip_addresses: vec![InterfaceIpAddress {
            ip: ip.to_string(),
            subnet_mask: "255.255.255.0".to_string(),
            gateway: "10.1.0.1".to_string(),
        }],
        provider_status: Some(InterfaceProviderStatus {
            nsx_logical_switch_id: "ls-1".to_string(),
        }),
    }
}

/// In-memory `VirtualNetworkInterface` store
///
/// Clones share state. Objects never get a status unless a test sets one.
#[derive(Debug, Clone, Default)]
pub struct FakeNetworkInterfaces {
    statuses: Arc<Mutex<HashMap<(String, String), VirtualNetworkInterfaceStatus>>>,
    ensured: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeNetworkInterfaces {
    pub fn set_status(&self, namespace: &str, name: &str, status: VirtualNetworkInterfaceStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), status);
    }

    /// Interfaces requested so far, as (namespace, name)
    pub fn ensured(&self) -> Vec<(String, String)> {
        self.ensured.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkInterfaceClient for FakeNetworkInterfaces {
    async fn ensure_interface(&self, namespace: &str, name: &str, _virtual_network: &str) -> Result<(), ProviderError> {
        let key = (namespace.to_string(), name.to_string());
        let mut ensured = self.ensured.lock().unwrap();
        if !ensured.contains(&key) {
            ensured.push(key);
        }
        Ok(())
    }

    async fn interface_status(&self, namespace: &str, name: &str) -> Result<Option<VirtualNetworkInterfaceStatus>, ProviderError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}
