//! Unit tests for session configuration, device diffing and placement

#[cfg(test)]
mod tests {
    use crate::error::{ProviderError, ResourceKind};
    use crate::network::nsxt_interface_name;
    use crate::resources::VirtualMachine;
    use crate::session::*;
    use crate::session_manager::SessionFactory;
    use crate::test_utils::*;
    use crds::{
        VirtualMachineMetadata, VirtualMachineNetworkInterface, VirtualMachinePowerState, InterfaceIpAddress,
        TRANSPORT_EXTRA_CONFIG,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use vsphere_client::{
        CustomizationIdentity, CustomizationIpGenerator, DeviceOperation, EthernetCardBacking, ManagedObjectReference,
        MockOperation, MockVSphereClient, ObjectKind, PlacementResult, PlacementType, PowerState, VirtualDevice,
        VirtualEthernetCard,
    };

    fn nsxt_interface(network: &str) -> VirtualMachineNetworkInterface {
        VirtualMachineNetworkInterface {
            network_name: network.to_string(),
            network_type: "nsx-t".to_string(),
            ethernet_card_type: None,
        }
    }

    fn handle(mock: &MockVSphereClient, name: &str, devices: Vec<VirtualDevice>) -> VirtualMachine {
        let reference = mock.add_vm(name, devices);
        VirtualMachine::new(name, reference, Arc::new(mock.clone()))
    }

    async fn nsxt_session(mock: &MockVSphereClient, interfaces: &FakeNetworkInterfaces) -> Session {
        MockSessionFactory::new(mock.clone())
            .with_network_interfaces(Arc::new(interfaces.clone()))
            .create_session("test-ns", &create_test_config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_resolves_placement_targets() {
        let mock = create_test_inventory();
        let session = create_test_session(&mock, &create_test_config()).await;

        assert_eq!(session.tenant(), "test-ns");
        assert_eq!(session.datacenter().value, "datacenter-1");
        assert_eq!(session.resource_pool().map(|r| r.value.as_str()), Some("resgroup-9"));
        assert_eq!(session.cluster().map(|r| r.value.as_str()), Some("domain-c8"));
        assert_eq!(session.folder().map(|r| r.value.as_str()), Some("group-v10"));
        assert_eq!(session.datastore().map(|d| d.reference.value.as_str()), Some("datastore-11"));
        assert!(session.network().is_none());
        assert!(session.content_library().is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_logs_out() {
        let mock = create_test_inventory();
        let mut config = create_test_config();
        config.datastore = "missing-ds".to_string();

        let err = MockSessionFactory::new(mock.clone())
            .create_session("test-ns", &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::NotFound { kind: ResourceKind::Datastore, ref name } if name == "missing-ds"
        ));
        assert_eq!(mock.calls(MockOperation::Logout), 1);
        assert!(!mock.is_logged_in());
    }

    #[tokio::test]
    async fn test_content_source_resolves_by_id_then_name() {
        let mock = create_test_inventory();
        mock.add_library("lib-7", "golden-images");

        let mut config = create_test_config();
        config.content_source = "lib-7".to_string();
        let by_id = create_test_session(&mock, &config).await;
        assert_eq!(by_id.content_library().map(|l| l.name.as_str()), Some("golden-images"));

        config.content_source = "golden-images".to_string();
        let by_name = create_test_session(&mock, &config).await;
        assert_eq!(by_name.content_library().map(|l| l.id.as_str()), Some("lib-7"));
        assert_eq!(mock.open_catalog_sessions(), 0);
    }

    #[tokio::test]
    async fn test_new_devices_get_unique_negative_keys() {
        let mock = create_test_inventory();
        let session = create_test_session(&mock, &create_test_config()).await;
        let mut spec = create_test_vm("test-ns", "web", "").spec;
        spec.network_interfaces = vec![create_test_interface(TEST_NETWORK), create_test_interface("web-net")];

        let specs = session.device_specs_from_vm("test-ns", "web", &spec).await.unwrap();
        let keys: Vec<i32> = specs.iter().map(|s| s.device.key()).collect();
        assert_eq!(keys, vec![FIRST_NEW_DEVICE_KEY, FIRST_NEW_DEVICE_KEY - 1]);
        assert!(specs.iter().all(|s| s.operation == DeviceOperation::Add));
    }

    #[tokio::test]
    async fn test_unsupported_network_type_fails_before_vcenter() {
        let mock = create_test_inventory();
        let session = create_test_session(&mock, &create_test_config()).await;
        let mut spec = create_test_vm("test-ns", "web", "").spec;
        spec.network_interfaces = vec![
            create_test_interface(TEST_NETWORK),
            VirtualMachineNetworkInterface {
                network_name: "overlay".to_string(),
                network_type: "geneve".to_string(),
                ethernet_card_type: None,
            },
        ];
        let lookups = mock.calls(MockOperation::FindObject);

        let err = session.device_specs_from_vm("test-ns", "web", &spec).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedNetworkType(ref t) if t == "geneve"));
        assert_eq!(mock.calls(MockOperation::FindObject), lookups);
    }

    #[tokio::test]
    async fn test_default_network_edits_existing_backings() {
        let mock = create_test_inventory();
        let mut config = create_test_config();
        config.network = "web-net".to_string();
        let session = create_test_session(&mock, &config).await;
        let vm = handle(
            &mock,
            "web",
            vec![create_test_nic(4000, TEST_NETWORK), create_test_nic(4001, TEST_NETWORK), create_test_disk(2000)],
        );
        let spec = create_test_vm("test-ns", "web", "").spec;

        let changes = session.device_change_specs("test-ns", "web", &spec, &vm).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.operation == DeviceOperation::Edit));
        let keys: Vec<i32> = changes.iter().map(|c| c.device.key()).collect();
        assert_eq!(keys, vec![4000, 4001]);
        for change in &changes {
            let backing = change.device.as_ethernet_card().and_then(|c| c.backing.as_ref());
            assert!(matches!(backing, Some(EthernetCardBacking::Network(b)) if b.device_name == "web-net"));
        }
    }

    #[tokio::test]
    async fn test_no_interfaces_and_no_default_network_leaves_nics() {
        let mock = create_test_inventory();
        let session = create_test_session(&mock, &create_test_config()).await;
        let vm = handle(&mock, "web", vec![create_test_nic(4000, TEST_NETWORK)]);
        let spec = create_test_vm("test-ns", "web", "").spec;

        assert!(session.device_change_specs("test-ns", "web", &spec, &vm).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_declared_interfaces_replace_all_nics() {
        let mock = create_test_inventory();
        let session = create_test_session(&mock, &create_test_config()).await;
        let vm = handle(
            &mock,
            "web",
            vec![create_test_nic(4000, TEST_NETWORK), create_test_nic(4001, TEST_NETWORK)],
        );
        let mut spec = create_test_vm("test-ns", "web", "").spec;
        spec.network_interfaces = vec![create_test_interface("web-net")];

        let changes = session.device_change_specs("test-ns", "web", &spec, &vm).await.unwrap();
        let operations: Vec<DeviceOperation> = changes.iter().map(|c| c.operation).collect();
        assert_eq!(operations, vec![DeviceOperation::Remove, DeviceOperation::Remove, DeviceOperation::Add]);
        assert_eq!(changes[2].device.key(), FIRST_NEW_DEVICE_KEY);
    }

    fn passthrough_devices() -> Vec<VirtualDevice> {
        let mut vmxnet3 = create_test_nic(4000, TEST_NETWORK);
        let card = vmxnet3.as_ethernet_card_mut().unwrap();
        card.extra.insert("controllerKey".to_string(), serde_json::json!(100));
        card.extra.insert("connectable".to_string(), serde_json::json!({ "connected": true }));
        let sriov = VirtualDevice::VirtualSriovEthernetCard(VirtualEthernetCard {
            key: 4001,
            ..Default::default()
        });
        let controller = VirtualDevice::Other(serde_json::json!({ "_typeName": "VirtualPCIController", "key": 100 }));
        vec![vmxnet3, sriov, controller]
    }

    #[tokio::test]
    async fn test_declared_interfaces_replace_every_nic_subtype() {
        let mock = create_test_inventory();
        let session = create_test_session(&mock, &create_test_config()).await;
        let vm = handle(&mock, "web", passthrough_devices());
        let mut spec = create_test_vm("test-ns", "web", "").spec;
        spec.network_interfaces = vec![create_test_interface("web-net")];

        let changes = session.device_change_specs("test-ns", "web", &spec, &vm).await.unwrap();
        let removed: Vec<i32> = changes
            .iter()
            .filter(|c| c.operation == DeviceOperation::Remove)
            .map(|c| c.device.key())
            .collect();
        assert_eq!(removed, vec![4000, 4001]);
        assert_eq!(changes.len(), 3);
    }

    #[tokio::test]
    async fn test_default_network_edit_keeps_device_state() {
        let mock = create_test_inventory();
        let mut config = create_test_config();
        config.network = "web-net".to_string();
        let session = create_test_session(&mock, &config).await;
        let vm = handle(&mock, "web", passthrough_devices());
        let spec = create_test_vm("test-ns", "web", "").spec;

        let changes = session.device_change_specs("test-ns", "web", &spec, &vm).await.unwrap();
        assert_eq!(changes.len(), 2);
        let edit = serde_json::to_value(&changes[0]).unwrap();
        assert_eq!(edit["device"]["controllerKey"], 100);
        assert_eq!(edit["device"]["connectable"]["connected"], true);
        assert_eq!(edit["device"]["backing"]["deviceName"], "web-net");
        assert!(matches!(changes[1].device, VirtualDevice::VirtualSriovEthernetCard(_)));
    }

    #[test]
    fn test_config_spec_converts_class_quantities() {
        let spec = create_test_vm("test-ns", "web", "").spec;
        let mut class = create_test_class();
        class.hardware.memory = "1500000000".to_string();

        let config = config_spec_from_class("web", &spec, &class, &BTreeMap::new(), &BTreeMap::new(), Vec::new()).unwrap();
        assert_eq!(config.name.as_deref(), Some("web"));
        assert_eq!(config.num_cpus, Some(2));
        assert_eq!(config.memory_mb, Some(1431));
        assert_eq!(config.annotation.as_deref(), Some(VM_ANNOTATION));

        let cpu = config.cpu_allocation.unwrap();
        assert_eq!(cpu.reservation, Some(1000));
        assert_eq!(cpu.limit, Some(2000));
        let memory = config.memory_allocation.unwrap();
        assert_eq!(memory.reservation, None);
        assert_eq!(memory.limit, Some(4096));
        assert!(config.extra_config.is_empty());
    }

    #[test]
    fn test_zero_quantities_leave_allocation_unset() {
        let spec = create_test_vm("test-ns", "web", "").spec;
        let mut class = create_test_class();
        class.policies.resources.requests.cpu = "0".to_string();
        class.policies.resources.limits.cpu = String::new();

        let config = config_spec_from_class("web", &spec, &class, &BTreeMap::new(), &BTreeMap::new(), Vec::new()).unwrap();
        assert!(config.cpu_allocation.is_none());
    }

    #[test]
    fn test_extra_config_metadata_wins_over_global() {
        let mut spec = create_test_vm("test-ns", "web", "").spec;
        spec.vm_metadata = Some(VirtualMachineMetadata {
            config_map_name: Some("bootstrap".to_string()),
            transport: TRANSPORT_EXTRA_CONFIG.to_string(),
        });
        let metadata: BTreeMap<String, String> = [("guestinfo.userdata".to_string(), "vm".to_string())].into();
        let global: BTreeMap<String, String> = [
            ("guestinfo.userdata".to_string(), "global".to_string()),
            ("guestinfo.dns".to_string(), "10.0.0.53".to_string()),
        ]
        .into();

        let config = config_spec_from_class("web", &spec, &create_test_class(), &metadata, &global, Vec::new()).unwrap();
        let pairs: Vec<(&str, &str)> = config
            .extra_config
            .iter()
            .map(|o| (o.key.as_str(), o.value.as_str()))
            .collect();
        assert_eq!(pairs, vec![("guestinfo.dns", "10.0.0.53"), ("guestinfo.userdata", "vm")]);
    }

    #[test]
    fn test_other_transports_are_rejected() {
        let mut spec = create_test_vm("test-ns", "web", "").spec;
        spec.vm_metadata = Some(VirtualMachineMetadata {
            config_map_name: None,
            transport: "OvfEnv".to_string(),
        });

        let err = config_spec_from_class("web", &spec, &create_test_class(), &BTreeMap::new(), &BTreeMap::new(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedTransport(_)));
        assert!(check_metadata_transport(&spec).is_err());
    }

    #[tokio::test]
    async fn test_clone_spec_carries_placement_and_storage_profile() {
        let mock = create_test_inventory();
        mock.set_placement(PlacementResult {
            host: Some(ManagedObjectReference::of(ObjectKind::Host, "host-33")),
            datastore: Some(ManagedObjectReference::of(ObjectKind::Datastore, "datastore-44")),
        });
        let session = create_test_session(&mock, &create_test_config()).await;
        let source = handle(&mock, "ubuntu", vec![create_test_disk(2000), create_test_nic(4000, TEST_NETWORK)]);
        let spec = create_test_vm("test-ns", "web", "ubuntu").spec;

        let clone = session
            .clone_spec("test-ns", "web", &source, &spec, &create_test_class(), &BTreeMap::new(), Some("profile-gold"))
            .await
            .unwrap();

        assert_eq!(clone.location.host.map(|h| h.value), Some("host-33".to_string()));
        assert_eq!(clone.location.datastore.map(|d| d.value), Some("datastore-44".to_string()));
        assert_eq!(clone.location.pool.map(|p| p.value), Some("resgroup-9".to_string()));
        assert_eq!(clone.location.profile.len(), 1);
        let disk_edit = &clone.location.device_change[0];
        assert_eq!(disk_edit.operation, DeviceOperation::Edit);
        assert!(disk_edit.device.is_disk());
        assert_eq!(disk_edit.profile.len(), 1);
        assert!(!clone.power_on);
        assert_eq!(clone.memory, Some(false));

        let placement = mock.last_placement().unwrap();
        assert_eq!(placement.placement_type, PlacementType::Clone);
        assert_eq!(placement.vm.map(|v| v.value), Some(source.managed_object_id().to_string()));
    }

    #[tokio::test]
    async fn test_customization_uses_realized_addresses() {
        let mock = create_test_inventory();
        let interfaces = FakeNetworkInterfaces::default();
        interfaces.set_status("test-ns", &nsxt_interface_name("web", "tenant-net"), ready_interface_status("10.1.0.4"));
        let session = nsxt_session(&mock, &interfaces).await;
        let mut spec = create_test_vm("test-ns", "web", "").spec;
        spec.network_interfaces = vec![nsxt_interface("tenant-net")];

        let customization = session.customization_spec("test-ns", "web", &spec).await.unwrap().unwrap();
        assert!(matches!(
            &customization.identity,
            CustomizationIdentity::LinuxPrep { hw_clock_utc: true, .. }
        ));
        let [mapping] = customization.nic_setting_map.as_slice() else {
            panic!("expected one adapter mapping");
        };
        assert_eq!(mapping.mac_address.as_deref(), Some("00:50:56:00:00:01"));
        assert!(matches!(
            &mapping.adapter.ip,
            CustomizationIpGenerator::Fixed { ip_address } if ip_address == "10.1.0.4"
        ));
        assert_eq!(mapping.adapter.gateway, vec!["10.1.0.1".to_string()]);
    }

    #[tokio::test]
    async fn test_interface_without_single_address_is_skipped() {
        let mock = create_test_inventory();
        let interfaces = FakeNetworkInterfaces::default();
        let mut status = ready_interface_status("10.1.0.4");
        status.ip_addresses.push(InterfaceIpAddress {
            ip: "10.1.0.5".to_string(),
            subnet_mask: "255.255.255.0".to_string(),
            gateway: "10.1.0.1".to_string(),
        });
        interfaces.set_status("test-ns", &nsxt_interface_name("web", "tenant-net"), status);
        let session = nsxt_session(&mock, &interfaces).await;
        let mut spec = create_test_vm("test-ns", "web", "").spec;
        spec.network_interfaces = vec![nsxt_interface("tenant-net")];

        let customization = session.customization_spec("test-ns", "web", &spec).await.unwrap().unwrap();
        assert!(customization.nic_setting_map.is_empty());
    }

    #[tokio::test]
    async fn test_default_networks_need_no_customization() {
        let mock = create_test_inventory();
        let session = create_test_session(&mock, &create_test_config()).await;
        let mut spec = create_test_vm("test-ns", "web", "").spec;
        spec.network_interfaces = vec![create_test_interface(TEST_NETWORK)];

        assert!(session.customization_spec("test-ns", "web", &spec).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_customizes_before_power_on() {
        let mock = create_test_inventory();
        let interfaces = FakeNetworkInterfaces::default();
        interfaces.set_status("test-ns", &nsxt_interface_name("web", "tenant-net"), ready_interface_status("10.1.0.4"));
        let session = nsxt_session(&mock, &interfaces).await;
        let mut spec = create_test_vm("test-ns", "web", "").spec;
        spec.network_interfaces = vec![nsxt_interface("tenant-net")];

        let vm = session
            .create_virtual_machine("test-ns", "web", &spec, &create_test_class(), &BTreeMap::new())
            .await
            .unwrap();

        let backing = mock.vm("web").unwrap();
        assert!(backing.customization.is_some());
        assert_eq!(backing.power_state, PowerState::PoweredOn);
        assert_eq!(backing.pool.map(|p| p.value), Some("resgroup-9".to_string()));
        let files = backing.applied_configs[0].files.clone().unwrap();
        assert_eq!(files.vm_path_name, format!("[{}]", TEST_DATASTORE));
        assert_eq!(vm.power_state().await.unwrap(), VirtualMachinePowerState::PoweredOn);
    }

    #[tokio::test]
    async fn test_library_item_of_other_type_is_not_deployable() {
        let mock = create_test_inventory();
        mock.add_library("lib-1", "images");
        mock.add_library_item("lib-1", "item-1", "readme", "file");
        let mut config = create_test_config();
        config.content_source = "lib-1".to_string();
        let session = create_test_session(&mock, &config).await;
        let spec = create_test_vm("test-ns", "web", "readme").spec;

        let err = session
            .clone_virtual_machine("test-ns", "web", &spec, &create_test_class(), &BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedImageType(ref t) if t == "file"));
        assert!(session.list_images("test-ns").await.unwrap().is_empty());
        assert_eq!(mock.open_catalog_sessions(), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_library_item_is_an_error() {
        let mock = create_test_inventory();
        mock.add_library("lib-1", "images");
        mock.add_library_item("lib-1", "item-1", "ubuntu", "ovf");
        mock.add_library_item("lib-1", "item-2", "ubuntu", "ovf");
        let mut config = create_test_config();
        config.content_source = "lib-1".to_string();
        let session = create_test_session(&mock, &config).await;

        let err = session.get_image("test-ns", "ubuntu").await.unwrap_err();
        assert!(matches!(err, ProviderError::MultipleFound { count: 2, .. }));
        assert_eq!(mock.open_catalog_sessions(), 0);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let mock = create_test_inventory();
        let session = create_test_session(&mock, &create_test_config()).await;

        session.logout().await;
        session.logout().await;
        assert!(session.is_logged_out());
        assert_eq!(mock.calls(MockOperation::Logout), 1);
    }
}
