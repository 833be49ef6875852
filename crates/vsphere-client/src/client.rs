//! vCenter API client
//!
//! Inventory lookups and the content library go through the Automation REST
//! API (`/api/...`); VM lifecycle, placement and device properties go through
//! VI/JSON (`/sdk/vim25/{release}/...`). One login yields the session token
//! used by both.

use crate::common::HttpClient;
use crate::error::VSphereError;
use crate::models::*;
use crate::vsphere_trait::VSphereClientTrait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// VI/JSON release used when none is configured
pub const DEFAULT_API_RELEASE: &str = "8.0.1.0";

/// Connection settings for a vCenter endpoint
#[derive(Clone)]
pub struct VSphereClientConfig {
    /// vCenter host name or PNID
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// VI/JSON release segment
    pub api_release: String,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Upper bound on waiting for a backend task
    pub task_timeout: Duration,
    /// Delay between task state polls
    pub task_poll_interval: Duration,
}

impl fmt::Debug for VSphereClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VSphereClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .field("api_release", &self.api_release)
            .finish_non_exhaustive()
    }
}

impl VSphereClientConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            insecure: false,
            api_release: DEFAULT_API_RELEASE.to_string(),
            request_timeout: Duration::from_secs(30),
            task_timeout: Duration::from_secs(600),
            task_poll_interval: Duration::from_millis(500),
        }
    }
}

/// vCenter API client
#[derive(Debug)]
pub struct VSphereClient {
    http: HttpClient,
    config: VSphereClientConfig,
    session: RwLock<Option<String>>,
}

impl VSphereClient {
    /// Create a new client; no session is opened until `login`
    pub fn new(config: VSphereClientConfig) -> Result<Self, VSphereError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(config.request_timeout)
            .build()?;

        let base_url = format!("https://{}:{}", config.host, config.port);

        Ok(Self {
            http: HttpClient::new(client, base_url),
            config,
            session: RwLock::new(None),
        })
    }

    async fn token(&self) -> Result<String, VSphereError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| VSphereError::Authentication("no active vCenter session".to_string()))
    }

    /// Path of a VI/JSON property or method on a managed object
    fn vim_path(&self, object: &ManagedObjectReference, member: &str) -> String {
        format!(
            "/sdk/vim25/{}/{}/{}/{}",
            self.config.api_release, object.kind, object.value, member
        )
    }

    async fn vim_get<T: serde::de::DeserializeOwned>(&self, object: &ManagedObjectReference, property: &str) -> Result<T, VSphereError> {
        let token = self.token().await?;
        self.http.get(&token, &self.vim_path(object, property)).await
    }

    /// Invoke a `*_Task` method and wait for the task to finish
    async fn run_task(&self, object: &ManagedObjectReference, method: &str, body: Value) -> Result<Value, VSphereError> {
        let token = self.token().await?;
        let task: ManagedObjectReference = self.http.post(&token, &self.vim_path(object, method), &body).await?;
        debug!("Started {} on {} as {}", method, object, task.value);
        self.wait_for_task(&token, &task).await
    }

    async fn wait_for_task(&self, token: &str, task: &ManagedObjectReference) -> Result<Value, VSphereError> {
        let path = self.vim_path(task, "info");
        let poll = async {
            loop {
                let info: TaskInfo = self.http.get(token, &path).await?;
                match info.state.as_str() {
                    "success" => return Ok(info.result.unwrap_or(Value::Null)),
                    "error" => {
                        let message = info
                            .error
                            .and_then(|e| e.localized_message)
                            .unwrap_or_else(|| "unknown task error".to_string());
                        return Err(VSphereError::TaskFailed {
                            task: task.value.clone(),
                            message,
                        });
                    }
                    _ => tokio::time::sleep(self.config.task_poll_interval).await,
                }
            }
        };

        tokio::time::timeout(self.config.task_timeout, poll)
            .await
            .map_err(|_elapsed| VSphereError::TaskTimeout(task.value.clone()))?
    }

    fn task_result_reference(result: Value) -> Result<ManagedObjectReference, VSphereError> {
        Ok(serde_json::from_value(result)?)
    }
}

#[derive(Debug, Deserialize)]
struct TaskInfo {
    state: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<TaskError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskError {
    #[serde(default)]
    localized_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmSummary {
    #[serde(default)]
    config: VmSummaryConfig,
    #[serde(default)]
    runtime: VmSummaryRuntime,
    #[serde(default)]
    guest: VmSummaryGuest,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmSummaryConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    instance_uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmSummaryRuntime {
    power_state: PowerState,
    #[serde(default)]
    host: Option<ManagedObjectReference>,
}

impl Default for VmSummaryRuntime {
    fn default() -> Self {
        Self {
            power_state: PowerState::PoweredOff,
            host: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmSummaryGuest {
    #[serde(default)]
    ip_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VmConfigInfo {
    #[serde(default)]
    hardware: VmHardware,
}

#[derive(Debug, Default, Deserialize)]
struct VmHardware {
    #[serde(default)]
    device: Vec<VirtualDevice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortgroupConfig {
    key: String,
    distributed_virtual_switch: ManagedObjectReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpaqueNetworkSummary {
    opaque_network_id: String,
    opaque_network_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct PlacementResponse {
    #[serde(default)]
    recommendations: Vec<PlacementRecommendation>,
}

#[derive(Debug, Default, Deserialize)]
struct PlacementRecommendation {
    #[serde(default)]
    action: Vec<PlacementAction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlacementAction {
    #[serde(default)]
    target_host: Option<ManagedObjectReference>,
    #[serde(default)]
    relocate_spec: Option<PlacementRelocate>,
}

#[derive(Debug, Default, Deserialize)]
struct PlacementRelocate {
    #[serde(default)]
    datastore: Option<ManagedObjectReference>,
}

#[derive(Debug, Deserialize)]
struct DeploymentResult {
    succeeded: bool,
    #[serde(default)]
    resource_id: Option<DeployedResource>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DeployedResource {
    id: String,
}

/// REST VM listing reports power states in upper snake case
fn rest_power_state(value: &str) -> PowerState {
    match value {
        "POWERED_ON" => PowerState::PoweredOn,
        "SUSPENDED" => PowerState::Suspended,
        _ => PowerState::PoweredOff,
    }
}

/// VI type of a REST network summary
fn network_vim_type(summary: &Value) -> &'static str {
    match summary.get("type").and_then(Value::as_str) {
        Some("DISTRIBUTED_PORTGROUP") => "DistributedVirtualPortgroup",
        Some("OPAQUE_NETWORK") => "OpaqueNetwork",
        _ => "Network",
    }
}

fn relabel_not_found(err: VSphereError, kind: ObjectKind, name: &str) -> VSphereError {
    match err {
        VSphereError::NotFound { .. } => VSphereError::not_found(kind, name),
        other => other,
    }
}

#[async_trait::async_trait]
impl VSphereClientTrait for VSphereClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn login(&self) -> Result<(), VSphereError> {
        let token = self.http.create_session(&self.config.username, &self.config.password).await?;
        *self.session.write().await = Some(token);
        debug!("Logged in to {}", self.http.base_url());
        Ok(())
    }

    async fn logout(&self) -> Result<(), VSphereError> {
        let Some(token) = self.session.write().await.take() else {
            return Ok(());
        };
        self.http.delete_session(&token).await?;
        debug!("Logged out of {}", self.http.base_url());
        Ok(())
    }

    async fn find_object(&self, kind: ObjectKind, name: &str, datacenter: Option<&ManagedObjectReference>) -> Result<ManagedObjectReference, VSphereError> {
        if matches!(kind, ObjectKind::ContentLibrary | ObjectKind::LibraryItem) {
            return Err(VSphereError::InvalidRequest(format!("{} lookups go through the catalog session", kind)));
        }
        let token = self.token().await?;

        let mut filters = vec![("names", name)];
        if let Some(dc) = datacenter.filter(|_| kind != ObjectKind::Datacenter) {
            filters.push(("datacenters", dc.value.as_str()));
        }
        let path = format!("/api/vcenter/{}?{}", kind.rest_collection(), self.http.build_query_string(&filters));
        let mut summaries: Vec<Value> = self.http.get(&token, &path).await?;

        if summaries.is_empty() && kind.accepts_id_lookup() {
            let id_filter = format!("{}s", kind.rest_id_field());
            let path = format!(
                "/api/vcenter/{}?{}",
                kind.rest_collection(),
                self.http.build_query_string(&[(id_filter.as_str(), name)])
            );
            summaries = self.http.get(&token, &path).await?;
        }

        let found: Vec<ManagedObjectReference> = summaries
            .iter()
            .filter_map(|summary| {
                let id = summary.get(kind.rest_id_field())?.as_str()?;
                let vim_type = if kind == ObjectKind::Network {
                    network_vim_type(summary)
                } else {
                    kind.vim_type()
                };
                Some(ManagedObjectReference::new(vim_type, id))
            })
            .collect();

        VSphereError::expect_single(kind, name, found)
    }

    async fn resource_pool_owner(&self, pool: &ManagedObjectReference) -> Result<ManagedObjectReference, VSphereError> {
        self.vim_get(pool, "owner").await
    }

    async fn object_name(&self, object: &ManagedObjectReference) -> Result<String, VSphereError> {
        self.vim_get(object, "name").await
    }

    async fn list_virtual_machines(&self, datacenter: &ManagedObjectReference, pattern: &str) -> Result<Vec<VirtualMachineSummary>, VSphereError> {
        let token = self.token().await?;
        let mut filters = vec![("datacenters", datacenter.value.as_str())];
        if pattern != "*" {
            filters.push(("names", pattern));
        }
        let path = format!("/api/vcenter/vm?{}", self.http.build_query_string(&filters));
        let summaries: Vec<Value> = self.http.get(&token, &path).await?;

        Ok(summaries
            .iter()
            .filter_map(|summary| {
                Some(VirtualMachineSummary {
                    reference: ManagedObjectReference::of(ObjectKind::VirtualMachine, summary.get("vm")?.as_str()?),
                    name: summary.get("name")?.as_str()?.to_string(),
                    power_state: rest_power_state(summary.get("power_state").and_then(Value::as_str).unwrap_or_default()),
                })
            })
            .collect())
    }

    async fn virtual_machine_properties(&self, vm: &ManagedObjectReference) -> Result<VirtualMachineProperties, VSphereError> {
        let summary: VmSummary = self.vim_get(vm, "summary").await?;
        let heartbeat: Option<GuestHeartbeatStatus> = self.vim_get(vm, "guestHeartbeatStatus").await?;
        let config: Option<VmConfigInfo> = self.vim_get(vm, "config").await?;

        let devices = config.unwrap_or_default().hardware.device;

        let host = match &summary.runtime.host {
            Some(host) => match self.object_name(host).await {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!("Failed to read name of host {}: {}", host, e);
                    Some(host.value.clone())
                }
            },
            None => None,
        };

        Ok(VirtualMachineProperties {
            reference: vm.clone(),
            name: summary.config.name,
            power_state: summary.runtime.power_state,
            host,
            ip_address: summary.guest.ip_address,
            bios_uuid: summary.config.uuid,
            instance_uuid: summary.config.instance_uuid,
            guest_heartbeat: heartbeat.unwrap_or_default(),
            devices,
        })
    }

    async fn network_backing(&self, network: &ManagedObjectReference) -> Result<EthernetCardBacking, VSphereError> {
        match network.kind.as_str() {
            "Network" => Ok(EthernetCardBacking::Network(NetworkBackingInfo {
                device_name: self.object_name(network).await?,
                network: Some(network.clone()),
            })),
            "DistributedVirtualPortgroup" => {
                let config: PortgroupConfig = self.vim_get(network, "config").await?;
                let switch_uuid: String = self.vim_get(&config.distributed_virtual_switch, "uuid").await?;
                Ok(EthernetCardBacking::DistributedPort(DistributedPortBackingInfo {
                    port: DistributedVirtualSwitchPortConnection {
                        switch_uuid,
                        portgroup_key: Some(config.key),
                    },
                }))
            }
            "OpaqueNetwork" => {
                let summary: OpaqueNetworkSummary = self.vim_get(network, "summary").await?;
                Ok(EthernetCardBacking::Opaque(OpaqueNetworkBackingInfo {
                    opaque_network_id: summary.opaque_network_id,
                    opaque_network_type: summary.opaque_network_type,
                }))
            }
            other => Err(VSphereError::InvalidRequest(format!("unsupported network type {}", other))),
        }
    }

    async fn place_vm(&self, cluster: &ManagedObjectReference, spec: &PlacementSpec) -> Result<PlacementResult, VSphereError> {
        let token = self.token().await?;
        let response: PlacementResponse = self
            .http
            .post(&token, &self.vim_path(cluster, "PlaceVm"), &json!({ "placementSpec": spec }))
            .await?;

        response
            .recommendations
            .into_iter()
            .flat_map(|r| r.action)
            .find(|a| a.target_host.is_some())
            .map(|action| PlacementResult {
                host: action.target_host,
                datastore: action.relocate_spec.and_then(|r| r.datastore),
            })
            .ok_or_else(|| VSphereError::Api(format!("no placement recommendations from cluster {}", cluster.value)))
    }

    async fn create_vm(&self, folder: &ManagedObjectReference, pool: &ManagedObjectReference, host: Option<&ManagedObjectReference>, config: &VirtualMachineConfigSpec) -> Result<ManagedObjectReference, VSphereError> {
        let mut body = json!({ "config": config, "pool": pool });
        if let Some(host) = host {
            body["host"] = json!(host);
        }
        let result = self.run_task(folder, "CreateVM_Task", body).await?;
        Self::task_result_reference(result)
    }

    async fn clone_vm(&self, source: &ManagedObjectReference, folder: &ManagedObjectReference, name: &str, spec: &VirtualMachineCloneSpec) -> Result<ManagedObjectReference, VSphereError> {
        let body = json!({ "folder": folder, "name": name, "spec": spec });
        let result = self.run_task(source, "CloneVM_Task", body).await?;
        Self::task_result_reference(result)
    }

    async fn reconfigure_vm(&self, vm: &ManagedObjectReference, spec: &VirtualMachineConfigSpec) -> Result<(), VSphereError> {
        self.run_task(vm, "ReconfigVM_Task", json!({ "spec": spec })).await?;
        Ok(())
    }

    async fn customize_vm(&self, vm: &ManagedObjectReference, spec: &CustomizationSpec) -> Result<(), VSphereError> {
        self.run_task(vm, "CustomizeVM_Task", json!({ "spec": spec })).await?;
        Ok(())
    }

    async fn power_on_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
        self.run_task(vm, "PowerOnVM_Task", json!({})).await?;
        Ok(())
    }

    async fn power_off_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
        self.run_task(vm, "PowerOffVM_Task", json!({})).await?;
        Ok(())
    }

    async fn suspend_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
        self.run_task(vm, "SuspendVM_Task", json!({})).await?;
        Ok(())
    }

    async fn shutdown_guest(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
        let token = self.token().await?;
        self.http.post_no_content(&token, &self.vim_path(vm, "ShutdownGuest"), &json!({})).await
    }

    async fn destroy_vm(&self, vm: &ManagedObjectReference) -> Result<(), VSphereError> {
        self.run_task(vm, "Destroy_Task", json!({})).await?;
        Ok(())
    }

    async fn catalog_login(&self) -> Result<RestSession, VSphereError> {
        let token = self.http.create_session(&self.config.username, &self.config.password).await?;
        Ok(RestSession { token })
    }

    async fn catalog_logout(&self, session: &RestSession) -> Result<(), VSphereError> {
        self.http.delete_session(&session.token).await
    }

    async fn get_library(&self, session: &RestSession, id: &str) -> Result<ContentLibrary, VSphereError> {
        let path = format!("/api/content/library/{}", urlencoding::encode(id));
        self.http
            .get(&session.token, &path)
            .await
            .map_err(|e| relabel_not_found(e, ObjectKind::ContentLibrary, id))
    }

    async fn find_library_by_name(&self, session: &RestSession, name: &str) -> Result<ContentLibrary, VSphereError> {
        let ids: Vec<String> = self
            .http
            .post(&session.token, "/api/content/library?action=find", &json!({ "name": name }))
            .await?;
        let id = VSphereError::expect_single(ObjectKind::ContentLibrary, name, ids)?;
        self.get_library(session, &id).await
    }

    async fn list_library_items(&self, session: &RestSession, library_id: &str) -> Result<Vec<LibraryItem>, VSphereError> {
        let path = format!("/api/content/library/item?library_id={}", urlencoding::encode(library_id));
        let ids: Vec<String> = self.http.get(&session.token, &path).await?;

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            items.push(self.get_library_item(session, &id).await?);
        }
        Ok(items)
    }

    async fn find_library_items(&self, session: &RestSession, library_id: &str, name: &str) -> Result<Vec<String>, VSphereError> {
        self.http
            .post(
                &session.token,
                "/api/content/library/item?action=find",
                &json!({ "library_id": library_id, "name": name }),
            )
            .await
    }

    async fn get_library_item(&self, session: &RestSession, item_id: &str) -> Result<LibraryItem, VSphereError> {
        let path = format!("/api/content/library/item/{}", urlencoding::encode(item_id));
        self.http
            .get(&session.token, &path)
            .await
            .map_err(|e| relabel_not_found(e, ObjectKind::LibraryItem, item_id))
    }

    async fn deploy_library_item(&self, session: &RestSession, item_id: &str, deployment: &LibraryItemDeployment) -> Result<ManagedObjectReference, VSphereError> {
        let path = format!("/api/vcenter/ovf/library-item/{}?action=deploy", urlencoding::encode(item_id));
        let result: DeploymentResult = self.http.post(&session.token, &path, deployment).await?;

        match result {
            DeploymentResult { succeeded: true, resource_id: Some(resource), .. } => {
                Ok(ManagedObjectReference::of(ObjectKind::VirtualMachine, resource.id))
            }
            DeploymentResult { error, .. } => Err(VSphereError::Api(format!(
                "deployment of library item {} failed: {}",
                item_id,
                error.map(|e| e.to_string()).unwrap_or_else(|| "no resource returned".to_string())
            ))),
        }
    }
}
