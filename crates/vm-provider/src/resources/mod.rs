//! Handles on remote vCenter resources.

pub mod virtual_machine;

pub use virtual_machine::{power_state_from_backend, VirtualMachine};
