//! Error types for the filesystem provisioner

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for provisioner operations
pub type Result<T> = std::result::Result<T, ProvisionerError>;

/// Failure kinds reported to callers
///
/// Domain kinds are surfaced verbatim; every other fault collapses into
/// `InternalFailure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    InsufficientSpace,
    InstanceCreationFailed,
    InstanceNotFound,
    InstanceDeletionFailed,
    InternalFailure,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::InsufficientSpace => "insufficient-space",
            FailureKind::InstanceCreationFailed => "instance-creation-failed",
            FailureKind::InstanceNotFound => "instance-not-found",
            FailureKind::InstanceDeletionFailed => "instance-deletion-failed",
            FailureKind::InternalFailure => "internal-failure",
        };
        f.write_str(name)
    }
}

/// Core error type for provisioner operations
#[derive(Error, Debug)]
pub enum ProvisionerError {
    /// The capacity pool cannot hold one more full-size instance
    #[error("Insufficient space: requesting {requested}MB, {available}MB available")]
    InsufficientSpace { requested: u64, available: u64 },

    /// The backend could not materialize an instance
    #[error("Failed to create filesystem instance {name}: {reason}")]
    InstanceCreationFailed { name: String, reason: String },

    /// No instance with this id is registered
    #[error("Could not find filesystem instance {0}")]
    InstanceNotFound(String),

    /// The backend could not tear an instance down
    #[error("Failed to delete filesystem instance {instance_id}: {reason}")]
    InstanceDeletionFailed { instance_id: String, reason: String },

    /// A record with this service id is already registered
    #[error("Service id already registered: {0}")]
    ServiceIdCollision(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProvisionerError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an instance creation failure for the attempted name
    pub fn creation_failed(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InstanceCreationFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an instance deletion failure
    pub fn deletion_failed(instance_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InstanceDeletionFailed {
            instance_id: instance_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Failure kind as reported to callers
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InsufficientSpace { .. } => FailureKind::InsufficientSpace,
            Self::InstanceCreationFailed { .. } => FailureKind::InstanceCreationFailed,
            Self::InstanceNotFound(_) => FailureKind::InstanceNotFound,
            Self::InstanceDeletionFailed { .. } => FailureKind::InstanceDeletionFailed,
            _ => FailureKind::InternalFailure,
        }
    }

    /// Whether this error is an expected domain failure safe to show callers
    pub fn is_domain(&self) -> bool {
        self.kind() != FailureKind::InternalFailure
    }
}
