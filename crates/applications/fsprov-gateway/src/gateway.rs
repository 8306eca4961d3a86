//! Caller-facing gateway
//!
//! Wires one registry, one backend and one configuration source into the
//! lifecycle and the orphan reconciler, and exposes the six service operations
//! with replies shaped for the request stream.

use crate::backend::{storage_guard, LocalDirBackend};
use crate::capacity::CapacitySnapshot;
use crate::config::YamlConfigFile;
use crate::orphan::{OrphanReconciler, OrphanReport, OrphanSummary};
use crate::protocol::{GatewayRequest, Reply, ReplyEnvelope};
use crate::provisioner::Provisioner;
use crate::registry::Registry;
use fsprov_core::{
    BindingOptions, ConfigSource, InstanceBackend, OrphanBuckets, ProvisionRequest, Result,
    ServiceHandle,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Filesystem service gateway
pub struct FilesystemGateway {
    provisioner: Provisioner,
    reconciler: OrphanReconciler,
}

impl FilesystemGateway {
    /// Create a gateway with a fresh, empty registry
    pub fn new(
        backend: Arc<dyn InstanceBackend>,
        config: Arc<dyn ConfigSource>,
        node_id: impl Into<String>,
    ) -> Self {
        let registry = Registry::shared();
        let guard = storage_guard();
        let reconciler =
            OrphanReconciler::new(registry.clone(), backend.clone(), guard.clone(), node_id);
        let provisioner = Provisioner::new(registry, backend, config, guard);
        Self {
            provisioner,
            reconciler,
        }
    }

    /// Create a gateway backed by local directories, configured from a YAML file
    ///
    /// The storage root and node id are read once here; capacity settings are
    /// re-read from the file on every provision.
    pub async fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = YamlConfigFile::new(path.as_ref());
        let config = source.load().await?;
        info!(
            storage_root = %config.storage_root,
            node_id = %config.node_id,
            max_fs_size = config.max_fs_size,
            available_storage = config.available_storage,
            "Starting filesystem gateway"
        );
        let backend = Arc::new(LocalDirBackend::new(&config.storage_root));
        Ok(Self::new(backend, Arc::new(source), config.node_id))
    }

    /// Lifecycle operations
    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// Orphan detection
    pub fn reconciler(&self) -> &OrphanReconciler {
        &self.reconciler
    }

    /// Sweep storage for instances none of `handles` refers to
    pub async fn check_orphan(&self, handles: &[ServiceHandle]) -> Reply<OrphanSummary> {
        Ok(self.reconciler.detect_orphans(handles).await?)
    }

    /// Log orphaned instances
    pub async fn purge_orphan(
        &self,
        orphan_instances: &OrphanBuckets,
        orphan_bindings: &OrphanBuckets,
    ) -> Reply<()> {
        self.reconciler.purge_orphans(orphan_instances, orphan_bindings);
        Ok(())
    }

    /// Provision a new instance, optionally restoring `existing_handle`
    pub async fn provision_service(
        &self,
        request: &ProvisionRequest,
        existing_handle: Option<&ServiceHandle>,
    ) -> Reply<ServiceHandle> {
        Ok(self.provisioner.provision(request, existing_handle).await?)
    }

    /// Destroy an instance and drop its bindings
    pub async fn unprovision_service(&self, instance_id: &str) -> Reply<()> {
        Ok(self.provisioner.unprovision(instance_id).await?)
    }

    /// Bind to a live instance, optionally restoring `existing_binding`
    pub async fn bind_instance(
        &self,
        instance_id: &str,
        binding_options: BindingOptions,
        existing_binding: Option<&ServiceHandle>,
    ) -> Reply<ServiceHandle> {
        Ok(self
            .provisioner
            .bind(instance_id, binding_options, existing_binding)
            .await?)
    }

    /// Acknowledge an unbind
    pub async fn unbind_instance(
        &self,
        instance_id: &str,
        binding_id: &str,
        binding_options: &BindingOptions,
    ) -> Reply<()> {
        self.provisioner
            .unbind(instance_id, binding_id, binding_options)
            .await;
        Ok(())
    }

    /// Current capacity pool
    pub async fn capacity(&self) -> Reply<CapacitySnapshot> {
        Ok(self.provisioner.capacity().await?)
    }

    /// Latest orphan report
    pub async fn orphan_report(&self) -> Reply<OrphanReport> {
        Ok(self.reconciler.report().await)
    }

    /// Run one request to completion
    pub async fn handle(&self, request: GatewayRequest) -> ReplyEnvelope {
        debug!(op = request.op(), "Handling request");
        match request {
            GatewayRequest::CheckOrphan { handles } => {
                ReplyEnvelope::from_reply(&self.check_orphan(&handles).await)
            }
            GatewayRequest::PurgeOrphan {
                orphan_instances,
                orphan_bindings,
            } => ReplyEnvelope::from_reply(
                &self.purge_orphan(&orphan_instances, &orphan_bindings).await,
            ),
            GatewayRequest::Provision {
                request,
                existing_handle,
            } => ReplyEnvelope::from_reply(
                &self
                    .provision_service(&request, existing_handle.as_ref())
                    .await,
            ),
            GatewayRequest::Unprovision { instance_id } => {
                ReplyEnvelope::from_reply(&self.unprovision_service(&instance_id).await)
            }
            GatewayRequest::Bind {
                instance_id,
                binding_options,
                existing_binding,
            } => ReplyEnvelope::from_reply(
                &self
                    .bind_instance(&instance_id, binding_options, existing_binding.as_ref())
                    .await,
            ),
            GatewayRequest::Unbind {
                instance_id,
                binding_id,
                binding_options,
            } => ReplyEnvelope::from_reply(
                &self
                    .unbind_instance(&instance_id, &binding_id, &binding_options)
                    .await,
            ),
            GatewayRequest::Capacity => ReplyEnvelope::from_reply(&self.capacity().await),
            GatewayRequest::OrphanReport => {
                ReplyEnvelope::from_reply(&self.orphan_report().await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::StaticConfig;
    use fsprov_core::{FailureKind, GatewayConfig};
    use serde_json::json;

    fn gateway() -> (FilesystemGateway, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let config = StaticConfig(GatewayConfig::new(2048, 4096, "10.0.0.5"));
        (
            FilesystemGateway::new(backend.clone(), Arc::new(config), "gateway"),
            backend,
        )
    }

    #[tokio::test]
    async fn test_full_request_flow() {
        let (gateway, _backend) = gateway();

        let reply = gateway
            .handle(serde_json::from_value(json!({"op": "provision", "request": {"plan": "free"}})).unwrap())
            .await;
        assert!(reply.success);
        let instance_id = reply.response["service_id"].as_str().unwrap().to_string();
        assert_eq!(reply.response["credentials"]["host"], "10.0.0.5");

        let reply = gateway
            .handle(GatewayRequest::Bind {
                instance_id: instance_id.clone(),
                binding_options: json!({}),
                existing_binding: None,
            })
            .await;
        assert!(reply.success);
        assert_eq!(reply.response["configuration"]["data"]["binding_options"], json!({}));

        let reply = gateway.handle(GatewayRequest::Capacity).await;
        assert_eq!(reply.response["instances"], 1);
        assert_eq!(reply.response["available"], 2048);

        let reply = gateway
            .handle(GatewayRequest::Unprovision { instance_id })
            .await;
        assert!(reply.success);
        assert!(gateway.provisioner().registry().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_domain_failures_reach_caller() {
        let (gateway, _backend) = gateway();

        let failure = gateway.unprovision_service("nope").await.unwrap_err();
        assert_eq!(failure.code, FailureKind::InstanceNotFound);

        let request = ProvisionRequest::new("free");
        gateway.provision_service(&request, None).await.unwrap();
        gateway.provision_service(&request, None).await.unwrap();
        let failure = gateway.provision_service(&request, None).await.unwrap_err();
        assert_eq!(failure.code, FailureKind::InsufficientSpace);
    }

    #[tokio::test]
    async fn test_check_orphan_reply() {
        let (gateway, backend) = gateway();
        backend.insert_foreign("a");
        backend.insert_foreign("b");

        let reply = gateway
            .handle(GatewayRequest::CheckOrphan {
                handles: vec![ServiceHandle::id_only("a")],
            })
            .await;
        assert!(reply.success);
        assert_eq!(reply.response["instance_orphan_count"], 1);

        let reply = gateway.handle(GatewayRequest::OrphanReport).await;
        assert_eq!(reply.response["instances"]["gateway"], json!(["b"]));

        let reply = gateway
            .handle(GatewayRequest::PurgeOrphan {
                orphan_instances: OrphanBuckets::from([("gateway".to_string(), vec!["b".to_string()])]),
                orphan_bindings: OrphanBuckets::new(),
            })
            .await;
        assert!(reply.success);
        assert!(backend.contains("b"));
    }

    #[tokio::test]
    async fn test_unbind_always_acks() {
        let (gateway, _backend) = gateway();
        let reply = gateway
            .handle(GatewayRequest::Unbind {
                instance_id: "x".to_string(),
                binding_id: "y".to_string(),
                binding_options: json!(null),
            })
            .await;
        assert!(reply.success);
        assert_eq!(reply.response, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_from_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = tmp.path().join("storage");
        let config_path = tmp.path().join("filesystem_gateway.yml");
        std::fs::write(
            &config_path,
            format!(
                "max_fs_size: 1024\navailable_storage: 2048\nhost: 127.0.0.1\nstorage_root: {}\n",
                storage.display()
            ),
        )
        .unwrap();

        let gateway = FilesystemGateway::from_config_file(&config_path).await.unwrap();
        let handle = gateway
            .provision_service(&ProvisionRequest::new("free"), None)
            .await
            .unwrap();

        let dir = handle.credentials.unwrap().dir;
        assert!(std::path::Path::new(&dir).is_dir());
        assert!(dir.starts_with(&storage.display().to_string()));
    }
}
