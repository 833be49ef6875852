//! Provider error taxonomy.
//!
//! Lookup failures are classified into typed `NotFound` / `MultipleFound`
//! errors carrying the resource kind and identifier. Everything else from
//! vCenter passes through wrapped with context.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use vsphere_client::VSphereError;

/// Kind of domain resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    VirtualMachine,
    VirtualMachineImage,
    ContentLibrary,
    Datacenter,
    ResourcePool,
    Folder,
    Datastore,
    Network,
    Cluster,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::VirtualMachine => "VirtualMachine",
            Self::VirtualMachineImage => "VirtualMachineImage",
            Self::ContentLibrary => "ContentLibrary",
            Self::Datacenter => "Datacenter",
            Self::ResourcePool => "ResourcePool",
            Self::Folder => "Folder",
            Self::Datastore => "Datastore",
            Self::Network => "Network",
            Self::Cluster => "Cluster",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the vSphere VM provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} {name:?} is ambiguous: {count} objects match")]
    MultipleFound {
        kind: ResourceKind,
        name: String,
        count: usize,
    },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("unsupported metadata transport {0:?}")]
    UnsupportedTransport(String),

    #[error("unsupported network type {0:?}")]
    UnsupportedNetworkType(String),

    #[error("unsupported image type {0:?}")]
    UnsupportedImageType(String),

    #[error("invalid quantity {value:?}: {reason}")]
    InvalidQuantity { value: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("timed out {0}")]
    Timeout(String),

    #[error("{context}: {source}")]
    VSphere {
        context: String,
        #[source]
        source: VSphereError,
    },

    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("session for {tenant:?} unavailable: {source}")]
    Session {
        tenant: String,
        #[source]
        source: Arc<ProviderError>,
    },

    #[error("session for {0:?} was invalidated while it was being built")]
    SessionInvalidated(String),

    #[error("{step} step failed: {source}")]
    SequenceStep {
        step: &'static str,
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// True for `NotFound`, including one wrapped by session or sequence layers.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::VSphere { source, .. } => source.is_not_found(),
            Self::SequenceStep { source, .. } => source.is_not_found(),
            Self::Session { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_multiple_found(&self) -> bool {
        match self {
            Self::MultipleFound { .. } => true,
            Self::VSphere { source, .. } => source.is_multiple_found(),
            Self::SequenceStep { source, .. } => source.is_multiple_found(),
            Self::Session { source, .. } => source.is_multiple_found(),
            _ => false,
        }
    }

    /// True for `Timeout`, including one raised inside a session or sequence step.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::SequenceStep { source, .. } => source.is_timeout(),
            Self::Session { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Reclassify a lookup failure as a typed error about `kind`/`name`.
    ///
    /// Errors that are not lookup failures are returned unchanged.
    #[must_use]
    pub fn classify(self, kind: ResourceKind, name: &str) -> Self {
        match self {
            Self::VSphere {
                source: VSphereError::NotFound { .. },
                ..
            } => Self::not_found(kind, name),
            Self::VSphere {
                source: VSphereError::MultipleFound { count, .. },
                ..
            } => Self::MultipleFound {
                kind,
                name: name.to_string(),
                count,
            },
            other => other,
        }
    }
}

/// Attach context to vCenter errors.
///
/// A backend task that outlived the task timeout becomes `Timeout`; every
/// other failure is wrapped as `VSphere`.
pub trait VSphereResultExt<T> {
    fn with_context<F: FnOnce() -> String>(self, context: F) -> Result<T, ProviderError>;
}

impl<T> VSphereResultExt<T> for Result<T, VSphereError> {
    fn with_context<F: FnOnce() -> String>(self, context: F) -> Result<T, ProviderError> {
        self.map_err(|source| match source {
            VSphereError::TaskTimeout(task) => {
                ProviderError::Timeout(format!("waiting for task {} ({})", task, context()))
            }
            source => ProviderError::VSphere {
                context: context(),
                source,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsphere_client::ObjectKind;

    fn wrapped(source: VSphereError) -> ProviderError {
        Err::<(), _>(source).with_context(|| "failed to find VM".to_string()).unwrap_err()
    }

    #[test]
    fn classify_maps_lookup_failures() {
        let err = wrapped(VSphereError::not_found(ObjectKind::VirtualMachine, "vm-1"))
            .classify(ResourceKind::VirtualMachine, "ns/web");
        assert!(matches!(err, ProviderError::NotFound { kind: ResourceKind::VirtualMachine, ref name } if name == "ns/web"));

        let err = wrapped(VSphereError::MultipleFound {
            kind: ObjectKind::VirtualMachine,
            name: "web".to_string(),
            count: 3,
        })
        .classify(ResourceKind::VirtualMachine, "web");
        assert!(matches!(err, ProviderError::MultipleFound { count: 3, .. }));
    }

    #[test]
    fn classify_passes_other_errors_through() {
        let err = wrapped(VSphereError::Api("boom".to_string())).classify(ResourceKind::VirtualMachine, "web");
        assert_eq!(err.to_string(), "failed to find VM: vSphere API error: boom");
        assert!(!err.is_not_found());
    }

    #[test]
    fn task_timeout_is_a_timeout() {
        let err = Err::<(), _>(VSphereError::TaskTimeout("task-9".to_string()))
            .with_context(|| "failed to destroy VM web".to_string())
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert_eq!(err.to_string(), "timed out waiting for task task-9 (failed to destroy VM web)");

        let step = ProviderError::SequenceStep {
            step: "destroy",
            source: Box::new(err),
        };
        assert!(step.is_timeout());
        assert!(!wrapped(VSphereError::Api("boom".to_string())).is_timeout());
    }

    #[test]
    fn not_found_is_seen_through_wrappers() {
        let inner = ProviderError::not_found(ResourceKind::VirtualMachine, "web");
        let err = ProviderError::SequenceStep {
            step: "destroy",
            source: Box::new(inner),
        };
        assert!(err.is_not_found());
        assert!(!err.is_multiple_found());
    }
}
