//! vSphere API Client
//!
//! A Rust client library for the vCenter endpoints the VM provider needs:
//! inventory lookups, VM lifecycle tasks, DRS placement, guest
//! customization, and content library deployment.
//!
//! # Example
//!
//! ```no_run
//! use vsphere_client::{ObjectKind, VSphereClient, VSphereClientConfig, VSphereClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = VSphereClient::new(VSphereClientConfig::new(
//!     "vcenter.example.com",
//!     443,
//!     "administrator@vsphere.local",
//!     "secret",
//! ))?;
//! client.login().await?;
//!
//! let datacenter = client.find_object(ObjectKind::Datacenter, "dc0", None).await?;
//! for vm in client.list_virtual_machines(&datacenter, "*").await? {
//!     println!("{} {:?}", vm.name, vm.power_state);
//! }
//!
//! client.logout().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod vsphere_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{VSphereClient, VSphereClientConfig};
pub use common::HttpClient;
pub use error::VSphereError;
pub use models::*;
pub use vsphere_trait::VSphereClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockOperation, MockVSphereClient};
