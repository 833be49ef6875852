//! vSphere VM Provider
//!
//! Reconciles `VirtualMachine` resources against vCenter. The provider keeps
//! one authenticated [`Session`] per tenant namespace in a [`SessionManager`],
//! builds configuration descriptors from the VM class, diffs network devices,
//! computes placement and drives create, clone, update and delete.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vm_provider::{ProviderConfig, StaticConfigSource, VSphereVmProvider, VmProviderInterface};
//!
//! # async fn example() -> Result<(), vm_provider::ProviderError> {
//! let config = ProviderConfig::from_env()?;
//! let provider = VSphereVmProvider::from_config_source(Arc::new(StaticConfigSource::new(config)), None);
//!
//! for image in provider.list_virtual_machine_images("team-a").await? {
//!     println!("{:?}", image.metadata.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod image;
pub mod network;
pub mod provider;
pub mod quantity;
pub mod resources;
pub mod sequence;
pub mod session;
pub mod session_manager;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;
#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;

#[cfg(test)]
mod session_test;

pub use config::{ConfigSource, Credentials, KubeConfigSource, ProviderConfig, StaticConfigSource};
pub use error::{ProviderError, ResourceKind};
pub use network::{KubeNetworkInterfaceClient, NetworkInterfaceClient};
pub use provider::{VSphereVmProvider, VmConfigArgs, VmProviderInterface, PROVIDER_NAME};
pub use resources::VirtualMachine;
pub use session::Session;
pub use session_manager::{SessionFactory, SessionManager, VSphereSessionFactory};
#[cfg(any(test, feature = "test-util"))]
pub use fake::{FakeOperation, FakeVmProvider};
