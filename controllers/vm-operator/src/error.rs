//! Controller-specific error types.
//!
//! Provider failures are wrapped as they are; everything else the controller
//! does on its own (Kubernetes calls, configuration, the HTTP server) gets
//! its own variant.

use kube::Error as KubeError;
use thiserror::Error;
use vm_provider::ProviderError;

/// Errors that can occur in the VM Operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// VM provider error
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Object lacks the namespace or name needed to address it
    #[error("Object has no {0}")]
    MissingObjectKey(&'static str),

    /// VirtualMachineClass referenced by a VM does not exist
    #[error("VirtualMachineClass not found: {0}")]
    ClassNotFound(String),

    /// ConfigMap named by a VM's metadata does not exist
    #[error("Metadata ConfigMap not found: {0}")]
    MetadataNotFound(String),

    /// Probe/metrics server failed
    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Short label for the reconcile outcome metric.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) => "kube",
            ControllerError::Provider(e) if e.is_not_found() => "not_found",
            ControllerError::Provider(e) if e.is_timeout() => "timeout",
            ControllerError::Provider(_) => "provider",
            ControllerError::InvalidConfig(_) | ControllerError::MissingObjectKey(_) => "invalid",
            ControllerError::ClassNotFound(_) | ControllerError::MetadataNotFound(_) => "dependency",
            ControllerError::Server(_) | ControllerError::Watch(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_timeouts_get_their_own_label() {
        let timeout = ControllerError::Provider(ProviderError::SequenceStep {
            step: "destroy",
            source: Box::new(ProviderError::Timeout("waiting for task task-9".to_string())),
        });
        assert_eq!(timeout.metric_label(), "timeout");
        assert_eq!(ControllerError::Provider(ProviderError::InvalidConfig("x".to_string())).metric_label(), "provider");
        assert_eq!(ControllerError::ClassNotFound("small".to_string()).metric_label(), "dependency");
    }
}
