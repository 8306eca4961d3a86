//! Caller-facing request and reply shapes
//!
//! Replies follow a two-tier failure policy: expected domain failures
//! (capacity, not found, backend create/delete) reach the caller with their
//! kind and message; anything else is logged here and reported as an opaque
//! internal failure.

use fsprov_core::{
    BindingOptions, FailureKind, OrphanBuckets, ProvisionRequest, ProvisionerError, ServiceHandle,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Description sent for every non-domain failure
pub const INTERNAL_FAILURE_DESCRIPTION: &str = "Internal failure";

/// Failure payload delivered to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFailure {
    /// Failure kind
    pub code: FailureKind,
    /// Human-readable message
    pub description: String,
}

impl ServiceFailure {
    /// Map an error onto what the caller may see
    pub fn from_error(err: &ProvisionerError) -> Self {
        if err.is_domain() {
            Self {
                code: err.kind(),
                description: err.to_string(),
            }
        } else {
            warn!(error = %err, "Unexpected failure, reporting internal failure");
            Self::internal()
        }
    }

    /// Opaque internal failure
    pub fn internal() -> Self {
        Self {
            code: FailureKind::InternalFailure,
            description: INTERNAL_FAILURE_DESCRIPTION.to_string(),
        }
    }
}

impl From<ProvisionerError> for ServiceFailure {
    fn from(err: ProvisionerError) -> Self {
        Self::from_error(&err)
    }
}

/// Outcome of one caller-facing operation
pub type Reply<T> = std::result::Result<T, ServiceFailure>;

/// Wire form of a reply: `{"success": bool, "response": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Whether the operation succeeded
    pub success: bool,
    /// Operation payload, or the [`ServiceFailure`] on failure
    pub response: serde_json::Value,
}

impl ReplyEnvelope {
    /// Encode a reply
    pub fn from_reply<T: Serialize>(reply: &Reply<T>) -> Self {
        let encoded = match reply {
            Ok(payload) => serde_json::to_value(payload).map(|v| (true, v)),
            Err(failure) => serde_json::to_value(failure).map(|v| (false, v)),
        };
        match encoded {
            Ok((success, response)) => Self { success, response },
            Err(e) => {
                warn!(error = %e, "Failed to encode reply");
                Self::failure(&ServiceFailure::internal())
            }
        }
    }

    /// Envelope for a failure
    pub fn failure(failure: &ServiceFailure) -> Self {
        Self {
            success: false,
            response: serde_json::json!({
                "code": failure.code,
                "description": failure.description,
            }),
        }
    }
}

/// One request on the gateway request stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GatewayRequest {
    /// Sweep storage for orphans
    CheckOrphan {
        /// Handles the caller knows about
        #[serde(default)]
        handles: Vec<ServiceHandle>,
    },
    /// Log orphans
    PurgeOrphan {
        /// Orphaned instance ids per node
        #[serde(default)]
        orphan_instances: OrphanBuckets,
        /// Orphaned binding ids per node
        #[serde(default)]
        orphan_bindings: OrphanBuckets,
    },
    /// Provision a new instance
    Provision {
        /// Plan and version
        request: ProvisionRequest,
        /// Previously issued handle being restored
        #[serde(default)]
        existing_handle: Option<ServiceHandle>,
    },
    /// Destroy an instance
    Unprovision {
        /// Instance to destroy
        instance_id: String,
    },
    /// Bind to an instance
    Bind {
        /// Instance to bind to
        instance_id: String,
        /// Opaque caller options stored with the binding
        #[serde(default)]
        binding_options: BindingOptions,
        /// Previously issued binding being restored
        #[serde(default)]
        existing_binding: Option<ServiceHandle>,
    },
    /// Unbind from an instance
    Unbind {
        /// Instance the binding belongs to
        instance_id: String,
        /// Binding to release
        binding_id: String,
        /// Opaque caller options
        #[serde(default)]
        binding_options: BindingOptions,
    },
    /// Current capacity pool
    Capacity,
    /// Latest orphan report
    OrphanReport,
}

impl GatewayRequest {
    /// Operation name, for logging
    pub fn op(&self) -> &'static str {
        match self {
            GatewayRequest::CheckOrphan { .. } => "check_orphan",
            GatewayRequest::PurgeOrphan { .. } => "purge_orphan",
            GatewayRequest::Provision { .. } => "provision",
            GatewayRequest::Unprovision { .. } => "unprovision",
            GatewayRequest::Bind { .. } => "bind",
            GatewayRequest::Unbind { .. } => "unbind",
            GatewayRequest::Capacity => "capacity",
            GatewayRequest::OrphanReport => "orphan_report",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_failures_are_verbatim() {
        let failure = ServiceFailure::from(ProvisionerError::InstanceNotFound("abc".into()));
        assert_eq!(failure.code, FailureKind::InstanceNotFound);
        assert_eq!(failure.description, "Could not find filesystem instance abc");
    }

    #[test]
    fn test_internal_failures_are_opaque() {
        let failure = ServiceFailure::from(ProvisionerError::Io(std::io::Error::other(
            "/var/vcap/services/filesystem/storage: permission denied",
        )));
        assert_eq!(failure, ServiceFailure::internal());
        assert!(!failure.description.contains("permission"));
    }

    #[test]
    fn test_envelope_shapes() {
        let ok: Reply<()> = Ok(());
        let envelope = ReplyEnvelope::from_reply(&ok);
        assert!(envelope.success);
        assert_eq!(envelope.response, serde_json::Value::Null);

        let err: Reply<()> = Err(ServiceFailure::from(ProvisionerError::InsufficientSpace {
            requested: 2048,
            available: 0,
        }));
        let envelope = ReplyEnvelope::from_reply(&err);
        assert!(!envelope.success);
        assert_eq!(envelope.response["code"], "InsufficientSpace");
    }

    #[test]
    fn test_request_parsing() {
        let request: GatewayRequest = serde_json::from_str(
            r#"{"op":"bind","instance_id":"abc","binding_options":{"mode":"ro"}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            GatewayRequest::Bind {
                instance_id: "abc".to_string(),
                binding_options: serde_json::json!({"mode": "ro"}),
                existing_binding: None,
            }
        );
        assert_eq!(request.op(), "bind");

        let request: GatewayRequest =
            serde_json::from_str(r#"{"op":"check_orphan","handles":[{"service_id":"a"}]}"#).unwrap();
        assert_eq!(
            request,
            GatewayRequest::CheckOrphan {
                handles: vec![ServiceHandle::id_only("a")]
            }
        );

        let request: GatewayRequest = serde_json::from_str(r#"{"op":"capacity"}"#).unwrap();
        assert_eq!(request, GatewayRequest::Capacity);
    }
}
