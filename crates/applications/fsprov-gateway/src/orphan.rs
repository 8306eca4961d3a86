//! Orphan detection
//!
//! An orphan is an instance directory in storage whose id matches none of the
//! service handles the caller still knows about. The caller's persisted handle
//! list is the reference, not the registry: the registry is rebuilt empty on
//! restart and cannot prove an instance unreferenced.
//!
//! ## Safety
//!
//! Detection only. Purging logs what would be reclaimed and deletes nothing;
//! removing instance storage is left to an operator.
//!
//! Bindings are not observable in storage, so there is no binding orphan
//! concept for this service.

use crate::backend::StorageGuard;
use crate::provisioner::SERVICE_DESCRIPTION;
use crate::registry::SharedRegistry;
use chrono::{DateTime, Utc};
use fsprov_core::{instance_id_from_dir_name, InstanceBackend, OrphanBuckets, Result, ServiceHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Result of the latest orphan sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanReport {
    /// Orphaned instance ids per node bucket
    pub instances: OrphanBuckets,

    /// Registry instances whose storage directory is gone
    pub missing_instances: Vec<String>,

    /// When the sweep finished
    pub checked_at: Option<DateTime<Utc>>,
}

impl OrphanReport {
    fn clear(&mut self) {
        self.instances.clear();
        self.missing_instances.clear();
        self.checked_at = None;
    }

    /// Total orphaned instances across buckets
    pub fn instance_orphan_count(&self) -> usize {
        self.instances.values().map(Vec::len).sum()
    }

    /// Whether the sweep found nothing
    pub fn is_empty(&self) -> bool {
        self.instance_orphan_count() == 0 && self.missing_instances.is_empty()
    }
}

/// Counts returned to the caller after a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanSummary {
    /// Storage instances no known handle refers to
    pub instance_orphan_count: usize,
    /// Registered instances absent from storage
    pub missing_instance_count: usize,
}

/// Compares storage ground truth against known handles
pub struct OrphanReconciler {
    registry: SharedRegistry,
    backend: Arc<dyn InstanceBackend>,
    storage_guard: StorageGuard,
    node_id: String,
    report: RwLock<OrphanReport>,
}

impl OrphanReconciler {
    /// Create a reconciler reporting into the `node_id` bucket
    pub fn new(
        registry: SharedRegistry,
        backend: Arc<dyn InstanceBackend>,
        storage_guard: StorageGuard,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            backend,
            storage_guard,
            node_id: node_id.into(),
            report: RwLock::new(OrphanReport::default()),
        }
    }

    /// Bucket this reconciler reports into
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Snapshot of the latest report
    pub async fn report(&self) -> OrphanReport {
        self.report.read().await.clone()
    }

    /// Sweep storage and record every instance not covered by `known_handles`
    ///
    /// The previous report is cleared first, even if the sweep then fails.
    /// Never mutates the registry.
    pub async fn detect_orphans(&self, known_handles: &[ServiceHandle]) -> Result<OrphanSummary> {
        debug!("[{}] Check if there are orphans", SERVICE_DESCRIPTION);

        let mut report = self.report.write().await;
        report.clear();

        let _storage = self.storage_guard.write().await;
        let names = self.backend.enumerate_storage_roots().await?;

        let observed: Vec<&str> = names
            .iter()
            .filter_map(|name| {
                let id = instance_id_from_dir_name(name);
                if id.is_none() {
                    debug!(entry = %name, "Skipping storage entry without instance prefix");
                }
                id
            })
            .collect();

        let known: HashSet<&str> = known_handles.iter().map(|h| h.service_id.as_str()).collect();
        let orphans: Vec<String> = observed
            .iter()
            .filter(|id| !known.contains(*id))
            .map(|id| id.to_string())
            .collect();
        if !orphans.is_empty() {
            report.instances.insert(self.node_id.clone(), orphans);
        }

        let observed: HashSet<&str> = observed.into_iter().collect();
        {
            let registry = self.registry.lock().await;
            let mut missing: Vec<String> = registry
                .instance_ids()
                .into_iter()
                .filter(|id| !observed.contains(id.as_str()) && !registry.is_tearing_down(id))
                .collect();
            missing.sort();
            report.missing_instances = missing;
        }
        report.checked_at = Some(Utc::now());

        let summary = OrphanSummary {
            instance_orphan_count: report.instance_orphan_count(),
            missing_instance_count: report.missing_instances.len(),
        };

        debug!("Staging Orphans: Instances: {}", summary.instance_orphan_count);
        for id in &report.missing_instances {
            warn!(instance_id = %id, "[{}] Registered instance has no storage directory", SERVICE_DESCRIPTION);
        }

        Ok(summary)
    }

    /// Log orphaned instances. Deletes nothing.
    pub fn purge_orphans(&self, orphan_instances: &OrphanBuckets, orphan_bindings: &OrphanBuckets) {
        match orphan_instances.get(&self.node_id) {
            Some(ids) if !ids.is_empty() => {
                for id in ids {
                    warn!("Instance {} is an orphan", id);
                }
            }
            _ => info!("No orphans"),
        }

        for (node, ids) in orphan_instances {
            if node != &self.node_id && !ids.is_empty() {
                debug!(node = %node, count = ids.len(), "Ignoring orphans reported for another node");
            }
        }

        let binding_count: usize = orphan_bindings.values().map(Vec::len).sum();
        if binding_count > 0 {
            debug!(
                count = binding_count,
                "[{}] Binding orphans are not tracked, ignoring",
                SERVICE_DESCRIPTION
            );
        }
    }
}
