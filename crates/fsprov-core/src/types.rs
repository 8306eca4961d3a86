//! Core types shared across filesystem provisioner components

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Directory-name prefix the backend puts in front of every instance id
pub const INSTANCE_DIR_PREFIX: &str = "filesystem-";

/// Free-form options attached to a binding by the caller
pub type BindingOptions = serde_json::Value;

/// Orphaned identities grouped by node bucket
pub type OrphanBuckets = BTreeMap<String, Vec<String>>;

/// Access credentials for one filesystem instance
///
/// Produced once when the instance is created and copied unchanged into every
/// binding derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub private_key: String,
    pub user: String,
    pub dir: String,
    pub host: String,
}

/// Incoming provision request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ProvisionRequest {
    pub fn new(plan: impl Into<String>) -> Self {
        Self {
            plan: plan.into(),
            version: None,
        }
    }
}

/// Request-derived payload section of a configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationData {
    /// Set only on binding records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_options: Option<BindingOptions>,
}

/// Configuration echoed back to callers and kept with each record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfiguration {
    pub plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Credentials carried over from a restored handle, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub data: ConfigurationData,
}

impl ServiceConfiguration {
    /// Build the configuration for a provision request
    pub fn from_request(request: &ProvisionRequest) -> Self {
        Self {
            plan: request.plan.clone(),
            version: request.version.clone(),
            credentials: None,
            data: ConfigurationData::default(),
        }
    }

    /// Prefer previously issued credentials when echoing the request
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Copy of this configuration marked as a binding
    pub fn for_binding(&self, options: BindingOptions) -> Self {
        let mut config = self.clone();
        config.data.binding_options = Some(options);
        config
    }

    pub fn binding_options(&self) -> Option<&BindingOptions> {
        self.data.binding_options.as_ref()
    }
}

/// A provisioned filesystem instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub service_id: String,
    pub configuration: ServiceConfiguration,
    pub credentials: Credentials,
}

/// A credential grant derived from an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub service_id: String,
    /// Instance this binding was derived from
    pub instance_id: String,
    pub configuration: ServiceConfiguration,
    pub credentials: Credentials,
}

/// One registry entry: an instance or a binding
///
/// Instances and bindings share a single id namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceRecord {
    Instance(InstanceRecord),
    Binding(BindingRecord),
}

impl ServiceRecord {
    pub fn service_id(&self) -> &str {
        match self {
            ServiceRecord::Instance(r) => &r.service_id,
            ServiceRecord::Binding(r) => &r.service_id,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        match self {
            ServiceRecord::Instance(r) => &r.credentials,
            ServiceRecord::Binding(r) => &r.credentials,
        }
    }

    pub fn configuration(&self) -> &ServiceConfiguration {
        match self {
            ServiceRecord::Instance(r) => &r.configuration,
            ServiceRecord::Binding(r) => &r.configuration,
        }
    }

    pub fn is_binding(&self) -> bool {
        matches!(self, ServiceRecord::Binding(_))
    }

    pub fn as_instance(&self) -> Option<&InstanceRecord> {
        match self {
            ServiceRecord::Instance(r) => Some(r),
            ServiceRecord::Binding(_) => None,
        }
    }

    /// Caller-facing handle for this record
    pub fn to_handle(&self) -> ServiceHandle {
        ServiceHandle {
            service_id: self.service_id().to_string(),
            configuration: Some(self.configuration().clone()),
            credentials: Some(self.credentials().clone()),
        }
    }
}

/// Caller-facing handle for a provisioned instance or binding
///
/// Handles handed back in for orphan checks may carry only `service_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ServiceConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl ServiceHandle {
    /// Handle carrying only an identity
    pub fn id_only(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            configuration: None,
            credentials: None,
        }
    }
}

/// What the backend hands back after materializing an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInstance {
    pub instance_id: String,
    pub user: String,
    pub dir: String,
    pub private_key: String,
}

impl BackendInstance {
    /// Credentials for this instance as reachable through `host`
    pub fn credentials(&self, host: impl Into<String>) -> Credentials {
        Credentials {
            private_key: self.private_key.clone(),
            user: self.user.clone(),
            dir: self.dir.clone(),
            host: host.into(),
        }
    }
}

/// Default location of instance directories
pub const DEFAULT_STORAGE_ROOT: &str = "/var/vcap/services/filesystem/storage";

/// Default orphan-report bucket
pub const DEFAULT_NODE_ID: &str = "gateway";

/// Default bound on a single backend call
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 60;

/// Gateway configuration as read from `filesystem_gateway.yml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Capacity units (MB) granted to every instance
    pub max_fs_size: u64,

    /// Total capacity units (MB) in the pool
    pub available_storage: u64,

    /// Host placed into every credential set
    pub host: String,

    /// Directory holding one `filesystem-<id>` directory per instance
    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    /// Orphan-report bucket for this gateway
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Upper bound on a single backend create/destroy call
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
}

fn default_storage_root() -> String {
    DEFAULT_STORAGE_ROOT.to_string()
}

fn default_node_id() -> String {
    DEFAULT_NODE_ID.to_string()
}

fn default_backend_timeout_secs() -> u64 {
    DEFAULT_BACKEND_TIMEOUT_SECS
}

impl GatewayConfig {
    /// Create a config with default storage root, node id and timeout
    pub fn new(max_fs_size: u64, available_storage: u64, host: impl Into<String>) -> Self {
        Self {
            max_fs_size,
            available_storage,
            host: host.into(),
            storage_root: default_storage_root(),
            node_id: default_node_id(),
            backend_timeout_secs: default_backend_timeout_secs(),
        }
    }

    /// Set the storage root
    pub fn with_storage_root(mut self, root: impl Into<String>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Set the backend timeout
    pub fn with_backend_timeout_secs(mut self, secs: u64) -> Self {
        self.backend_timeout_secs = secs;
        self
    }

    /// Backend timeout as a duration
    pub fn backend_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.backend_timeout_secs)
    }

    /// Reject configurations the capacity model cannot work with
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.max_fs_size == 0 {
            return Err(crate::error::ProvisionerError::config(
                "max_fs_size must be greater than zero",
            ));
        }
        if self.host.trim().is_empty() {
            return Err(crate::error::ProvisionerError::config("host must not be empty"));
        }
        if self.backend_timeout_secs == 0 {
            return Err(crate::error::ProvisionerError::config(
                "backend_timeout_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Strip the storage prefix from a directory name, recovering the instance id
pub fn instance_id_from_dir_name(name: &str) -> Option<&str> {
    name.strip_prefix(INSTANCE_DIR_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Directory name the backend uses for an instance id
pub fn dir_name_for_instance(instance_id: &str) -> String {
    format!("{}{}", INSTANCE_DIR_PREFIX, instance_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_credentials() -> Credentials {
        Credentials {
            private_key: "key".to_string(),
            user: "fs-1234".to_string(),
            dir: "/storage/filesystem-1234".to_string(),
            host: "10.0.0.5".to_string(),
        }
    }

    #[test]
    fn test_instance_id_from_dir_name() {
        assert_eq!(instance_id_from_dir_name("filesystem-abc"), Some("abc"));
        assert_eq!(instance_id_from_dir_name("filesystem-"), None);
        assert_eq!(instance_id_from_dir_name("lost+found"), None);
        assert_eq!(dir_name_for_instance("abc"), "filesystem-abc");
    }

    #[test]
    fn test_for_binding_sets_only_binding_options() {
        let config = ServiceConfiguration::from_request(&ProvisionRequest::new("free"));
        let bound = config.for_binding(serde_json::json!({"mode": "rw"}));

        assert!(config.binding_options().is_none());
        assert_eq!(bound.plan, "free");
        assert_eq!(bound.binding_options(), Some(&serde_json::json!({"mode": "rw"})));
    }

    #[test]
    fn test_record_serialization_is_tagged() {
        let record = ServiceRecord::Binding(BindingRecord {
            service_id: "b-1".to_string(),
            instance_id: "i-1".to_string(),
            configuration: ServiceConfiguration::default()
                .for_binding(serde_json::json!({})),
            credentials: sample_credentials(),
        });

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "binding");
        assert_eq!(json["instance_id"], "i-1");
        assert_eq!(json["configuration"]["data"]["binding_options"], serde_json::json!({}));
    }

    #[test]
    fn test_handle_accepts_bare_service_id() {
        let handle: ServiceHandle = serde_json::from_str(r#"{"service_id":"abc"}"#).unwrap();
        assert_eq!(handle, ServiceHandle::id_only("abc"));
    }

    #[test]
    fn test_backend_instance_credentials() {
        let instance = BackendInstance {
            instance_id: "1234".to_string(),
            user: "fs-1234".to_string(),
            dir: "/storage/filesystem-1234".to_string(),
            private_key: "key".to_string(),
        };
        assert_eq!(instance.credentials("10.0.0.5"), sample_credentials());
    }

    #[test]
    fn test_gateway_config_defaults_from_yaml() {
        let yaml = "max_fs_size: 2048\navailable_storage: 10240\nhost: 10.0.0.5\n";
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config, GatewayConfig::new(2048, 10240, "10.0.0.5"));
        assert_eq!(config.storage_root, DEFAULT_STORAGE_ROOT);
        assert_eq!(config.node_id, "gateway");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gateway_config_validation() {
        assert!(GatewayConfig::new(0, 10240, "h").validate().is_err());
        assert!(GatewayConfig::new(2048, 10240, "  ").validate().is_err());
        assert!(GatewayConfig::new(2048, 10240, "h")
            .with_backend_timeout_secs(0)
            .validate()
            .is_err());
    }
}
