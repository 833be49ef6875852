//! Unit tests for reconcile_helpers module

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconcile_helpers::*;
    use crate::test_utils::create_test_vm;
    use crds::{VirtualMachineClassSpec, VirtualMachinePhase, VirtualMachineStatus};
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use vm_provider::provider::{VM_MOREF_ANNOTATION, VM_PROVIDER_ANNOTATION};

    fn annotated(pairs: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            annotations: Some(pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_object_key_requires_namespace() {
        let mut vm = create_test_vm("team-a", "web");
        assert_eq!(object_key(&vm).unwrap(), ("team-a".to_string(), "web".to_string()));

        vm.metadata.namespace = None;
        assert!(matches!(object_key(&vm), Err(ControllerError::MissingObjectKey("namespace"))));
    }

    #[test]
    fn test_add_finalizer_keeps_others() {
        let metadata = ObjectMeta {
            finalizers: Some(vec!["other.example.com".to_string()]),
            resource_version: Some("7".to_string()),
            ..Default::default()
        };
        assert!(!has_finalizer(&metadata));

        let patch = add_finalizer_patch(&metadata);
        assert_eq!(
            patch,
            serde_json::json!({
                "metadata": {
                    "resourceVersion": "7",
                    "finalizers": ["other.example.com", FINALIZER],
                }
            })
        );
    }

    #[test]
    fn test_add_finalizer_is_idempotent() {
        let metadata = ObjectMeta {
            finalizers: Some(vec![FINALIZER.to_string()]),
            ..Default::default()
        };
        assert!(has_finalizer(&metadata));
        assert_eq!(add_finalizer_patch(&metadata)["metadata"]["finalizers"], serde_json::json!([FINALIZER]));
    }

    #[test]
    fn test_remove_finalizer_leaves_empty_list() {
        let metadata = ObjectMeta {
            finalizers: Some(vec![FINALIZER.to_string()]),
            ..Default::default()
        };
        // An empty list (not null) clears the finalizers in a merge patch
        assert_eq!(remove_finalizer_patch(&metadata)["metadata"]["finalizers"], serde_json::json!([]));
    }

    #[test]
    fn test_status_needs_update() {
        let status = VirtualMachineStatus {
            phase: Some(VirtualMachinePhase::Created),
            unique_id: Some("vm-42".to_string()),
            ..Default::default()
        };
        assert!(status_needs_update(None, &status));
        assert!(!status_needs_update(Some(&status), &status));

        let moved = VirtualMachineStatus {
            host: Some("host-7".to_string()),
            ..status.clone()
        };
        assert!(status_needs_update(Some(&status), &moved));
    }

    #[test]
    fn test_status_patch_uses_wire_names() {
        let status = VirtualMachineStatus {
            phase: Some(VirtualMachinePhase::Creating),
            vm_ip: Some("10.0.0.4".to_string()),
            ..Default::default()
        };
        assert_eq!(
            status_patch(&status),
            serde_json::json!({ "status": { "phase": "Creating", "vmIp": "10.0.0.4" } })
        );
    }

    #[test]
    fn test_provider_annotations_patch_only_changes() {
        let current = annotated(&[(VM_PROVIDER_ANNOTATION, "vsphere")]);
        let updated = annotated(&[(VM_PROVIDER_ANNOTATION, "vsphere"), (VM_MOREF_ANNOTATION, "vm-42")]);

        let patch = provider_annotations_patch(&current, &updated).unwrap();
        assert_eq!(
            patch,
            serde_json::json!({ "metadata": { "annotations": { VM_MOREF_ANNOTATION: "vm-42" } } })
        );
        assert!(provider_annotations_patch(&updated, &updated).is_none());
        assert!(provider_annotations_patch(&current, &ObjectMeta::default()).is_none());
    }

    #[test]
    fn test_metadata_from_config_map() {
        let config_map = ConfigMap {
            data: Some(BTreeMap::from([("guestinfo.userdata".to_string(), "abc".to_string())])),
            ..Default::default()
        };
        assert_eq!(metadata_from_config_map(&config_map).len(), 1);
        assert!(metadata_from_config_map(&ConfigMap::default()).is_empty());
    }

    #[test]
    fn test_storage_profile_prefers_storage_class() {
        let mut class = VirtualMachineClassSpec::default();
        assert_eq!(storage_profile_id(&class, None), None);

        class.policies.storage_policy_id = Some("policy-class".to_string());
        assert_eq!(storage_profile_id(&class, None).as_deref(), Some("policy-class"));

        let parameters = BTreeMap::from([(STORAGE_POLICY_PARAMETER.to_string(), "policy-sc".to_string())]);
        assert_eq!(storage_profile_id(&class, Some(&parameters)).as_deref(), Some("policy-sc"));

        let blank = BTreeMap::from([(STORAGE_POLICY_PARAMETER.to_string(), String::new())]);
        assert_eq!(storage_profile_id(&class, Some(&blank)).as_deref(), Some("policy-class"));
    }
}
