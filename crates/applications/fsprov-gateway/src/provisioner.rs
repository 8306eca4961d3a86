//! Provisioning lifecycle
//!
//! State transitions over the registry:
//!
//! ```text
//! provision    capacity check ─► reserve ─► backend create ─► insert instance
//! unprovision  mark tearing down ─► backend destroy ─► remove instance + bindings
//! bind         lookup instance ─► copy credentials ─► insert binding
//! unbind       no-op (binding stays until its instance is unprovisioned)
//! ```
//!
//! ## Concurrency
//!
//! Registry read-modify-write sequences run under the registry mutex. Backend
//! calls never hold it: capacity is reserved before the call and released
//! once the outcome is recorded, and an instance being torn down is hidden
//! from `bind` and a second `unprovision` until the destroy call returns. Both
//! are guards, so a caller dropping the future mid-call releases them too.
//! Every backend call is bounded by `backend_timeout_secs`.

use crate::backend::StorageGuard;
use crate::capacity::{self, CapacitySnapshot};
use crate::registry::SharedRegistry;
use fsprov_core::{
    BackendInstance, BindingOptions, BindingRecord, ConfigSource, InstanceBackend, InstanceRecord,
    ProvisionRequest, ProvisionerError, Result, ServiceConfiguration, ServiceHandle,
    ServiceRecord, DEFAULT_BACKEND_TIMEOUT_SECS,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix used on lifecycle log lines
pub const SERVICE_DESCRIPTION: &str = "Filesystem";

/// Lifecycle operations over a shared registry
pub struct Provisioner {
    registry: SharedRegistry,
    backend: Arc<dyn InstanceBackend>,
    config: Arc<dyn ConfigSource>,
    storage_guard: StorageGuard,
}

impl Provisioner {
    /// Create a provisioner
    pub fn new(
        registry: SharedRegistry,
        backend: Arc<dyn InstanceBackend>,
        config: Arc<dyn ConfigSource>,
        storage_guard: StorageGuard,
    ) -> Self {
        Self {
            registry,
            backend,
            config,
            storage_guard,
        }
    }

    /// The registry this provisioner mutates
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Current capacity pool, against freshly loaded configuration
    pub async fn capacity(&self) -> Result<CapacitySnapshot> {
        let config = self.config.load().await?;
        let instances = self.registry.lock().await.committed_instances();
        Ok(CapacitySnapshot::new(&config, instances))
    }

    /// Provision a new filesystem instance
    ///
    /// `existing` is a previously issued handle being restored; its credentials
    /// are echoed in the configuration, but the stored record always carries
    /// the id and credentials of the freshly created instance.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
        existing: Option<&ServiceHandle>,
    ) -> Result<ServiceHandle> {
        debug!(
            "[{}] Attempting to provision instance (request={:?})",
            SERVICE_DESCRIPTION, request
        );
        let name = Uuid::new_v4().to_string();

        let config = self.config.load().await?;
        let per_fs = config.max_fs_size;
        let total_fs = config.available_storage;

        let reservation = {
            let mut registry = self.registry.lock().await;
            let committed = registry.committed_instances();
            if !capacity::fits(committed, per_fs, total_fs) {
                warn!(
                    "[{}] Insufficient space, requesting {}MB, have {} provisioned services",
                    SERVICE_DESCRIPTION, per_fs, committed
                );
                return Err(ProvisionerError::InsufficientSpace {
                    requested: per_fs,
                    available: capacity::available(committed, per_fs, total_fs),
                });
            }
            registry.reserve()
        };

        let _storage = self.storage_guard.read().await;
        let instance = match self
            .create_instance(&name, per_fs, config.backend_timeout())
            .await
        {
            Ok(instance) => instance,
            Err(e) => {
                warn!(name = %name, error = %e, "[{}] Instance creation failed", SERVICE_DESCRIPTION);
                return Err(e);
            }
        };

        let configuration = ServiceConfiguration::from_request(request)
            .with_credentials(existing.and_then(|h| h.credentials.clone()));
        let record = ServiceRecord::Instance(InstanceRecord {
            service_id: instance.instance_id.clone(),
            configuration,
            credentials: instance.credentials(config.host.as_str()),
        });

        let inserted = {
            let mut registry = self.registry.lock().await;
            let inserted = registry.insert(record.clone());
            drop(reservation);
            inserted
        };

        if let Err(e) = inserted {
            warn!(
                instance_id = %instance.instance_id,
                error = %e,
                "[{}] Created instance could not be registered, destroying it",
                SERVICE_DESCRIPTION
            );
            if let Err(cleanup) = self
                .destroy_instance(&instance.instance_id, config.backend_timeout())
                .await
            {
                warn!(
                    instance_id = %instance.instance_id,
                    error = %cleanup,
                    "[{}] Unregistered instance left in storage as an orphan",
                    SERVICE_DESCRIPTION
                );
            }
            return Err(e);
        }

        info!(
            instance_id = %instance.instance_id,
            name = %name,
            size_limit_mb = per_fs,
            "[{}] Successfully provisioned service",
            SERVICE_DESCRIPTION
        );
        Ok(record.to_handle())
    }

    /// Call the backend, mapping every failure mode onto creation failure
    async fn create_instance(
        &self,
        name: &str,
        size_limit: u64,
        timeout: Duration,
    ) -> Result<BackendInstance> {
        match tokio::time::timeout(timeout, self.backend.create_instance(size_limit)).await {
            Err(_) => Err(ProvisionerError::creation_failed(
                name,
                format!("backend timed out after {:?}", timeout),
            )),
            Ok(Err(e)) => Err(ProvisionerError::creation_failed(name, e)),
            Ok(Ok(None)) => Err(ProvisionerError::creation_failed(
                name,
                "backend returned no instance",
            )),
            Ok(Ok(Some(instance))) if instance.instance_id.trim().is_empty() => Err(
                ProvisionerError::creation_failed(name, "backend returned an empty instance id"),
            ),
            Ok(Ok(Some(instance))) => Ok(instance),
        }
    }

    /// Call the backend, mapping every failure mode onto deletion failure
    async fn destroy_instance(&self, instance_id: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.backend.destroy_instance(instance_id)).await {
            Err(_) => Err(ProvisionerError::deletion_failed(
                instance_id,
                format!("backend timed out after {:?}", timeout),
            )),
            Ok(Err(e @ ProvisionerError::InstanceDeletionFailed { .. })) => Err(e),
            Ok(Err(e)) => Err(ProvisionerError::deletion_failed(instance_id, e)),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Destroy an instance and remove it together with all its bindings
    pub async fn unprovision(&self, instance_id: &str) -> Result<()> {
        debug!(
            "[{}] Attempting to unprovision instance (instance id={})",
            SERVICE_DESCRIPTION, instance_id
        );

        let teardown = self.registry.lock().await.begin_teardown(instance_id)?;
        let timeout = self.backend_timeout().await;

        let _storage = self.storage_guard.read().await;
        if let Err(e) = self.destroy_instance(instance_id, timeout).await {
            warn!(instance_id = %instance_id, error = %e, "[{}] Instance teardown failed", SERVICE_DESCRIPTION);
            return Err(e);
        }

        let mut registry = self.registry.lock().await;
        let removed = registry.remove_instance_cascade(instance_id);
        drop(teardown);
        info!(
            instance_id = %instance_id,
            bindings_removed = removed.len().saturating_sub(1),
            "[{}] Successfully unprovisioned service",
            SERVICE_DESCRIPTION
        );
        Ok(())
    }

    /// Bind to an instance
    ///
    /// `existing` restores a previously issued binding under its old id. The
    /// binding always carries the instance's credentials.
    pub async fn bind(
        &self,
        instance_id: &str,
        binding_options: BindingOptions,
        existing: Option<&ServiceHandle>,
    ) -> Result<ServiceHandle> {
        debug!("[{}] Attempting to bind to service {}", SERVICE_DESCRIPTION, instance_id);

        let mut registry = self.registry.lock().await;
        let instance = registry
            .live_instance(instance_id)
            .ok_or_else(|| ProvisionerError::InstanceNotFound(instance_id.to_string()))?;
        let configuration = instance.configuration.for_binding(binding_options);
        let credentials = instance.credentials.clone();

        let service_id = match existing {
            Some(handle) => {
                if let Some(ServiceRecord::Binding(current)) = registry.get(&handle.service_id) {
                    if current.instance_id == instance_id {
                        debug!(
                            binding_id = %handle.service_id,
                            "[{}] Binding already restored",
                            SERVICE_DESCRIPTION
                        );
                        return Ok(ServiceRecord::Binding(current.clone()).to_handle());
                    }
                }
                if handle.credentials.as_ref().is_some_and(|c| c != &credentials) {
                    warn!(
                        binding_id = %handle.service_id,
                        instance_id = %instance_id,
                        "[{}] Restored binding credentials differ from instance, using instance credentials",
                        SERVICE_DESCRIPTION
                    );
                }
                handle.service_id.clone()
            }
            None => registry.unused_id(),
        };

        let record = ServiceRecord::Binding(BindingRecord {
            service_id,
            instance_id: instance_id.to_string(),
            configuration,
            credentials,
        });
        registry.insert(record.clone())?;

        debug!(
            binding_id = %record.service_id(),
            instance_id = %instance_id,
            "[{}] Bound",
            SERVICE_DESCRIPTION
        );
        Ok(record.to_handle())
    }

    /// Unbind from an instance
    ///
    /// Always succeeds and leaves the binding record in place; bindings are
    /// only removed when their instance is unprovisioned.
    pub async fn unbind(&self, instance_id: &str, binding_id: &str, binding_options: &BindingOptions) {
        let known = self.registry.lock().await.contains(binding_id);
        debug!(
            binding_id = %binding_id,
            known,
            binding_options = %binding_options,
            "[{}] Attempting to unbind to service {}",
            SERVICE_DESCRIPTION,
            instance_id
        );
    }

    async fn backend_timeout(&self) -> Duration {
        match self.config.load().await {
            Ok(config) => config.backend_timeout(),
            Err(e) => {
                warn!(error = %e, "Could not load configuration, using default backend timeout");
                Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS)
            }
        }
    }
}
