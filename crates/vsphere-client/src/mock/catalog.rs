//! Content library operations for MockVSphereClient
//!
//! Every call except login requires an open catalog session.

use super::{MockOperation, MockVSphereClient};
use crate::error::VSphereError;
use crate::models::*;

fn require_session(client: &MockVSphereClient, session: &RestSession) -> Result<(), VSphereError> {
    if client.catalog_sessions.lock().unwrap().contains(&session.token) {
        Ok(())
    } else {
        Err(VSphereError::Authentication(format!("unknown catalog session {}", session.token)))
    }
}

pub fn catalog_login(client: &MockVSphereClient) -> Result<RestSession, VSphereError> {
    client.check(MockOperation::CatalogLogin)?;
    let token = format!("catalog-{}", client.next_id());
    client.catalog_sessions.lock().unwrap().insert(token.clone());
    Ok(RestSession { token })
}

pub fn catalog_logout(client: &MockVSphereClient, session: &RestSession) -> Result<(), VSphereError> {
    client.check(MockOperation::CatalogLogout)?;
    client.catalog_sessions.lock().unwrap().remove(&session.token);
    Ok(())
}

pub fn get_library(client: &MockVSphereClient, session: &RestSession, id: &str) -> Result<ContentLibrary, VSphereError> {
    client.check(MockOperation::GetLibrary)?;
    require_session(client, session)?;
    client.libraries
        .lock()
        .unwrap()
        .get(id)
        .cloned()
        .ok_or_else(|| VSphereError::not_found(ObjectKind::ContentLibrary, id))
}

pub fn find_library_by_name(client: &MockVSphereClient, session: &RestSession, name: &str) -> Result<ContentLibrary, VSphereError> {
    client.check(MockOperation::FindLibrary)?;
    require_session(client, session)?;
    let found: Vec<ContentLibrary> = client.libraries
        .lock()
        .unwrap()
        .values()
        .filter(|l| l.name == name)
        .cloned()
        .collect();
    VSphereError::expect_single(ObjectKind::ContentLibrary, name, found)
}

pub fn list_library_items(client: &MockVSphereClient, session: &RestSession, library_id: &str) -> Result<Vec<LibraryItem>, VSphereError> {
    client.check(MockOperation::ListLibraryItems)?;
    require_session(client, session)?;
    let mut items: Vec<LibraryItem> = client.library_items
        .lock()
        .unwrap()
        .values()
        .filter(|i| i.library_id == library_id)
        .cloned()
        .collect();
    items.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(items)
}

pub fn find_library_items(client: &MockVSphereClient, session: &RestSession, library_id: &str, name: &str) -> Result<Vec<String>, VSphereError> {
    client.check(MockOperation::FindLibraryItems)?;
    require_session(client, session)?;
    Ok(client.library_items
        .lock()
        .unwrap()
        .values()
        .filter(|i| i.library_id == library_id && i.name == name)
        .map(|i| i.id.clone())
        .collect())
}

pub fn get_library_item(client: &MockVSphereClient, session: &RestSession, item_id: &str) -> Result<LibraryItem, VSphereError> {
    client.check(MockOperation::GetLibraryItem)?;
    require_session(client, session)?;
    client.library_items
        .lock()
        .unwrap()
        .get(item_id)
        .cloned()
        .ok_or_else(|| VSphereError::not_found(ObjectKind::LibraryItem, item_id))
}

/// Deploys a VM carrying the single NIC an OVF template typically ships with
pub fn deploy_library_item(
    client: &MockVSphereClient,
    session: &RestSession,
    item_id: &str,
    deployment: &LibraryItemDeployment,
) -> Result<ManagedObjectReference, VSphereError> {
    client.check(MockOperation::DeployLibraryItem)?;
    require_session(client, session)?;
    if !client.library_items.lock().unwrap().contains_key(item_id) {
        return Err(VSphereError::not_found(ObjectKind::LibraryItem, item_id));
    }
    *client.last_deployment.lock().unwrap() = Some(deployment.clone());

    let template_nic = VirtualDevice::VirtualVmxnet3(VirtualEthernetCard {
        key: 4000,
        backing: Some(EthernetCardBacking::Network(NetworkBackingInfo {
            device_name: "VM Network".to_string(),
            network: None,
        })),
        address_type: Some("generated".to_string()),
        ..Default::default()
    });
    let id = client.next_id();
    let mut vm = client.new_vm(format!("vm-{}", id), &deployment.deployment_spec.name, vec![template_nic]);
    vm.pool = Some(ManagedObjectReference::of(ObjectKind::ResourcePool, deployment.target.resource_pool_id.clone()));
    vm.folder = deployment
        .target
        .folder_id
        .as_ref()
        .map(|f| ManagedObjectReference::of(ObjectKind::Folder, f.clone()));

    let reference = vm.reference.clone();
    client.vms.lock().unwrap().insert(reference.value.clone(), vm);
    Ok(reference)
}
