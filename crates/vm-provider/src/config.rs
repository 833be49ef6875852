//! Provider configuration.
//!
//! A `ProviderConfig` describes one vCenter endpoint and where tenant VMs are
//! placed in it. Configuration is resolved per tenant through a
//! `ConfigSource`, so namespaces can override the resource pool and folder.

use crate::error::ProviderError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use vsphere_client::VSphereClientConfig;

/// Environment variable holding the global extra-config as a JSON object.
pub const EXTRA_CONFIG_ENV: &str = "JSON_EXTRA_CONFIG";

/// Name of the provider ConfigMap in the operator namespace.
pub const PROVIDER_CONFIG_MAP_NAME: &str = "vsphere.provider.config.vmoperator.vmware.com";
/// Name of the Secret holding vCenter credentials.
pub const PROVIDER_CREDENTIALS_SECRET_NAME: &str = "wcp-vmop-sa-vc-auth";

/// Namespace annotation overriding the resource pool.
pub const NAMESPACE_RESOURCE_POOL_ANNOTATION: &str = "vmware-system-resource-pool";
/// Namespace annotation overriding the VM folder.
pub const NAMESPACE_FOLDER_ANNOTATION: &str = "vmware-system-vm-folder";

const DEFAULT_PORT: u16 = 443;
const DEFAULT_NETWORK_WAIT_SECS: u64 = 60;
const DEFAULT_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_TASK_SECS: u64 = 600;

/// vCenter credentials. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration of one vCenter endpoint and placement targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub vc_pnid: String,
    pub vc_port: u16,
    pub insecure_skip_tls_verify: bool,
    pub credentials: Credentials,
    pub datacenter: String,
    /// Resource pool name or managed object id; empty when unset
    pub resource_pool: String,
    /// VM folder name or managed object id; empty when unset
    pub folder: String,
    pub datastore: String,
    /// Network used when a VM declares no interfaces
    pub network: String,
    /// Content library id or name; empty means images come from inventory
    pub content_source: String,
    /// Extra-config applied to every VM; VM metadata wins on conflict
    pub extra_config: BTreeMap<String, String>,
    pub network_wait_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub task_timeout: Duration,
}

impl ProviderConfig {
    /// Configuration with required fields and defaults for the rest.
    pub fn new(vc_pnid: impl Into<String>, credentials: Credentials, datacenter: impl Into<String>) -> Self {
        Self {
            vc_pnid: vc_pnid.into(),
            vc_port: DEFAULT_PORT,
            insecure_skip_tls_verify: false,
            credentials,
            datacenter: datacenter.into(),
            resource_pool: String::new(),
            folder: String::new(),
            datastore: String::new(),
            network: String::new(),
            content_source: String::new(),
            extra_config: BTreeMap::new(),
            network_wait_timeout: Duration::from_secs(DEFAULT_NETWORK_WAIT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_SECS),
            task_timeout: Duration::from_secs(DEFAULT_TASK_SECS),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from a key lookup with the environment variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ProviderError::InvalidConfig(format!("{} environment variable is required", key)))
        };
        let optional = |key: &str| lookup(key).unwrap_or_default();

        let mut config = Self::new(
            required("VSPHERE_PNID")?,
            Credentials {
                username: required("VSPHERE_USERNAME")?,
                password: required("VSPHERE_PASSWORD")?,
            },
            required("VSPHERE_DATACENTER")?,
        );
        if let Some(port) = lookup("VSPHERE_PORT") {
            config.vc_port = parse_port(&port)?;
        }
        config.insecure_skip_tls_verify = parse_bool(&optional("VSPHERE_INSECURE"));
        config.resource_pool = optional("VSPHERE_RESOURCE_POOL");
        config.folder = optional("VSPHERE_FOLDER");
        config.datastore = optional("VSPHERE_DATASTORE");
        config.network = optional("VSPHERE_NETWORK");
        config.content_source = optional("VSPHERE_CONTENT_SOURCE");
        config.extra_config = parse_extra_config(&optional(EXTRA_CONFIG_ENV))?;
        if let Some(secs) = lookup("NETWORK_WAIT_TIMEOUT_SECS") {
            config.network_wait_timeout = parse_seconds("NETWORK_WAIT_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("SHUTDOWN_TIMEOUT_SECS") {
            config.shutdown_timeout = parse_seconds("SHUTDOWN_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("TASK_TIMEOUT_SECS") {
            config.task_timeout = parse_seconds("TASK_TIMEOUT_SECS", &secs)?;
        }
        Ok(config)
    }

    /// Build configuration from provider ConfigMap data and credentials.
    ///
    /// The global extra-config still comes from the environment.
    pub fn from_config_map_data(
        data: &BTreeMap<String, String>,
        credentials: Credentials,
        extra_config: BTreeMap<String, String>,
    ) -> Result<Self, ProviderError> {
        let get = |key: &str| data.get(key).cloned().unwrap_or_default();
        let (vc_pnid, vc_port) = vc_endpoint(data)?;
        let datacenter = get("Datacenter");
        if datacenter.is_empty() {
            return Err(ProviderError::InvalidConfig(format!("{} has no Datacenter", PROVIDER_CONFIG_MAP_NAME)));
        }

        let mut config = Self::new(vc_pnid, credentials, datacenter);
        config.vc_port = vc_port;
        config.insecure_skip_tls_verify = parse_bool(&get("InsecureSkipTLSVerify"));
        config.resource_pool = get("ResourcePool");
        config.folder = get("Folder");
        config.datastore = get("Datastore");
        config.network = get("Network");
        config.content_source = get("ContentSource");
        config.extra_config = extra_config;
        Ok(config)
    }

    /// Apply per-tenant placement overrides from namespace annotations.
    pub fn apply_namespace_overrides(&mut self, annotations: &BTreeMap<String, String>) {
        if let Some(pool) = annotations.get(NAMESPACE_RESOURCE_POOL_ANNOTATION).filter(|v| !v.is_empty()) {
            self.resource_pool.clone_from(pool);
        }
        if let Some(folder) = annotations.get(NAMESPACE_FOLDER_ANNOTATION).filter(|v| !v.is_empty()) {
            self.folder.clone_from(folder);
        }
    }

    /// Settings for the vCenter client.
    pub fn client_config(&self) -> VSphereClientConfig {
        let mut config = VSphereClientConfig::new(
            self.vc_pnid.clone(),
            self.vc_port,
            self.credentials.username.clone(),
            self.credentials.password.clone(),
        );
        config.insecure = self.insecure_skip_tls_verify;
        config.task_timeout = self.task_timeout;
        config
    }
}

/// vCenter PNID and port named by provider ConfigMap data.
pub fn vc_endpoint(data: &BTreeMap<String, String>) -> Result<(String, u16), ProviderError> {
    let pnid = data.get("VcPNID").map(|v| v.trim()).unwrap_or_default();
    if pnid.is_empty() {
        return Err(ProviderError::InvalidConfig(format!("{} has no VcPNID", PROVIDER_CONFIG_MAP_NAME)));
    }
    let port = match data.get("VcPort").filter(|p| !p.is_empty()) {
        Some(port) => parse_port(port)?,
        None => DEFAULT_PORT,
    };
    Ok((pnid.to_string(), port))
}

fn parse_port(value: &str) -> Result<u16, ProviderError> {
    value
        .trim()
        .parse()
        .map_err(|e| ProviderError::InvalidConfig(format!("invalid vCenter port {:?}: {}", value, e)))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration, ProviderError> {
    value
        .trim()
        .parse()
        .map(Duration::from_secs)
        .map_err(|e| ProviderError::InvalidConfig(format!("invalid {} {:?}: {}", key, value, e)))
}

/// Parse the global extra-config JSON object; empty input means none.
pub fn parse_extra_config(json: &str) -> Result<BTreeMap<String, String>, ProviderError> {
    if json.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(json)
        .map_err(|e| ProviderError::InvalidConfig(format!("invalid {}: {}", EXTRA_CONFIG_ENV, e)))
}

/// Resolves the configuration a tenant's session is built from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn provider_config(&self, tenant: &str) -> Result<ProviderConfig, ProviderError>;
}

/// The same configuration for every tenant.
#[derive(Debug, Clone)]
pub struct StaticConfigSource {
    config: ProviderConfig,
}

impl StaticConfigSource {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn provider_config(&self, _tenant: &str) -> Result<ProviderConfig, ProviderError> {
        Ok(self.config.clone())
    }
}

/// Reads the provider ConfigMap and credential Secret from the operator
/// namespace and applies tenant namespace annotations on top.
#[derive(Clone)]
pub struct KubeConfigSource {
    client: Client,
    operator_namespace: String,
    extra_config: BTreeMap<String, String>,
}

impl fmt::Debug for KubeConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeConfigSource")
            .field("operator_namespace", &self.operator_namespace)
            .finish_non_exhaustive()
    }
}

impl KubeConfigSource {
    pub fn new(client: Client, operator_namespace: impl Into<String>, extra_config: BTreeMap<String, String>) -> Self {
        Self {
            client,
            operator_namespace: operator_namespace.into(),
            extra_config,
        }
    }

    async fn credentials(&self) -> Result<Credentials, ProviderError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.operator_namespace);
        let secret = secrets.get(PROVIDER_CREDENTIALS_SECRET_NAME).await?;
        let field = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| String::from_utf8_lossy(&v.0).into_owned())
                .ok_or_else(|| {
                    ProviderError::InvalidConfig(format!("secret {} has no {}", PROVIDER_CREDENTIALS_SECRET_NAME, key))
                })
        };
        Ok(Credentials {
            username: field("username")?,
            password: field("password")?,
        })
    }
}

#[async_trait]
impl ConfigSource for KubeConfigSource {
    async fn provider_config(&self, tenant: &str) -> Result<ProviderConfig, ProviderError> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.operator_namespace);
        let config_map = config_maps.get(PROVIDER_CONFIG_MAP_NAME).await?;
        let data = config_map.data.unwrap_or_default();

        let mut config = ProviderConfig::from_config_map_data(&data, self.credentials().await?, self.extra_config.clone())?;

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        if let Some(namespace) = namespaces.get_opt(tenant).await? {
            let annotations = namespace.metadata.annotations.unwrap_or_default();
            config.apply_namespace_overrides(&annotations);
        }
        debug!(
            "Resolved provider config for {}: datacenter={} pool={} folder={}",
            tenant, config.datacenter, config.resource_pool, config.folder
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("VSPHERE_PNID", "vc.example.com"),
        ("VSPHERE_USERNAME", "administrator@vsphere.local"),
        ("VSPHERE_PASSWORD", "secret"),
        ("VSPHERE_DATACENTER", "dc0"),
    ];

    #[test]
    fn from_lookup_applies_defaults() {
        let config = ProviderConfig::from_lookup(env(BASE)).unwrap();
        assert_eq!(config.vc_port, 443);
        assert!(config.resource_pool.is_empty());
        assert!(config.extra_config.is_empty());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn from_lookup_requires_datacenter() {
        let err = ProviderConfig::from_lookup(env(&BASE[..3])).unwrap_err();
        assert!(err.to_string().contains("VSPHERE_DATACENTER"));
    }

    #[test]
    fn extra_config_is_parsed_from_json() {
        let mut pairs = BASE.to_vec();
        pairs.push((EXTRA_CONFIG_ENV, r#"{"guestinfo.a":"1","guestinfo.b":"2"}"#));
        let config = ProviderConfig::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.extra_config.get("guestinfo.a").map(String::as_str), Some("1"));
        assert_eq!(config.extra_config.len(), 2);
    }

    #[test]
    fn malformed_extra_config_is_rejected() {
        assert!(matches!(parse_extra_config("{not json"), Err(ProviderError::InvalidConfig(_))));
    }

    #[test]
    fn namespace_annotations_override_placement() {
        let data: BTreeMap<String, String> = [
            ("VcPNID", "vc.example.com"),
            ("VcPort", "8443"),
            ("Datacenter", "dc0"),
            ("ResourcePool", "shared-pool"),
            ("Folder", "shared-folder"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let creds = Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
        };
        let mut config = ProviderConfig::from_config_map_data(&data, creds, BTreeMap::new()).unwrap();
        assert_eq!(config.vc_port, 8443);

        let annotations: BTreeMap<String, String> =
            [(NAMESPACE_RESOURCE_POOL_ANNOTATION.to_string(), "resgroup-12".to_string())].into_iter().collect();
        config.apply_namespace_overrides(&annotations);
        assert_eq!(config.resource_pool, "resgroup-12");
        assert_eq!(config.folder, "shared-folder");
    }

    #[test]
    fn vc_endpoint_defaults_port() {
        let mut data = BTreeMap::new();
        assert!(matches!(vc_endpoint(&data), Err(ProviderError::InvalidConfig(_))));

        data.insert("VcPNID".to_string(), "vc.example.com".to_string());
        assert_eq!(vc_endpoint(&data).unwrap(), ("vc.example.com".to_string(), 443));

        data.insert("VcPort".to_string(), "not-a-port".to_string());
        assert!(vc_endpoint(&data).is_err());
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
