//! vSphere client errors

use crate::models::ObjectKind;
use thiserror::Error;

/// Errors that can occur when interacting with vCenter
#[derive(Debug, Error)]
pub enum VSphereError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// vCenter returned an error
    #[error("vSphere API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Login rejected or session expired
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Lookup matched nothing
    #[error("{kind} {name:?} not found")]
    NotFound { kind: ObjectKind, name: String },

    /// Lookup matched more than one object
    #[error("{kind} {name:?} resolves to {count} objects")]
    MultipleFound {
        kind: ObjectKind,
        name: String,
        count: usize,
    },

    /// Backend task finished in the error state
    #[error("Task {task} failed: {message}")]
    TaskFailed { task: String, message: String },

    /// Backend task did not finish in time
    #[error("Task {0} did not complete in time")]
    TaskTimeout(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl VSphereError {
    pub fn not_found(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_multiple_found(&self) -> bool {
        matches!(self, Self::MultipleFound { .. })
    }

    /// Classify the ids returned by a lookup: exactly one is a match.
    pub fn expect_single<T>(kind: ObjectKind, name: &str, mut found: Vec<T>) -> Result<T, Self> {
        match found.len() {
            0 => Err(Self::not_found(kind, name)),
            1 => Ok(found.remove(0)),
            count => Err(Self::MultipleFound {
                kind,
                name: name.to_string(),
                count,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_single_classifies_matches() {
        let none: Vec<u8> = Vec::new();
        assert!(VSphereError::expect_single(ObjectKind::Folder, "f", none).unwrap_err().is_not_found());
        assert_eq!(VSphereError::expect_single(ObjectKind::Folder, "f", vec![3]).unwrap(), 3);
        let err = VSphereError::expect_single(ObjectKind::VirtualMachine, "web", vec![1, 2]).unwrap_err();
        assert!(err.is_multiple_found());
        assert_eq!(err.to_string(), "virtual machine \"web\" resolves to 2 objects");
    }
}
