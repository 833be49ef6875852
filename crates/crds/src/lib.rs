//! VM Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed by the vSphere VM provider
//! and the vm-operator controller.

pub mod virtual_machine;
pub mod virtual_machine_class;
pub mod virtual_machine_image;
pub mod virtual_network_interface;

pub use virtual_machine::*;
pub use virtual_machine_class::*;
pub use virtual_machine_image::*;
pub use virtual_network_interface::*;
