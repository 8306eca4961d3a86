//! Instance backend adapters
//!
//! - [`LocalDirBackend`]: one directory per instance under a storage root
//! - [`MemoryBackend`]: in-process backend with failure injection, for
//!   embedding and tests
//!
//! Quota enforcement and account provisioning for the generated users live
//! outside this process; the local backend only materializes the directory,
//! its metadata file and an opaque access key.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use fsprov_core::{
    dir_name_for_instance, BackendInstance, InstanceBackend, ProvisionerError, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Serializes storage sweeps against backend create/destroy calls.
///
/// Lifecycle operations hold the read side around their backend call and the
/// registry update that follows it; an orphan sweep holds the write side.
pub type StorageGuard = Arc<RwLock<()>>;

/// Create a fresh storage guard
pub fn storage_guard() -> StorageGuard {
    Arc::new(RwLock::new(()))
}

/// Metadata file written into every instance directory
pub const METADATA_FILE: &str = ".instance.json";

const KEY_HEADER: &str = "-----BEGIN FSPROV ACCESS KEY-----";
const KEY_FOOTER: &str = "-----END FSPROV ACCESS KEY-----";

/// Contents of [`METADATA_FILE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    /// Backend-assigned instance id
    pub instance_id: String,
    /// Account name owning the directory
    pub user: String,
    /// Quota the instance was created with
    pub size_limit_mb: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Generate an armoured opaque access key
pub fn generate_access_key() -> String {
    let mut material = Vec::with_capacity(32);
    material.extend_from_slice(Uuid::new_v4().as_bytes());
    material.extend_from_slice(Uuid::new_v4().as_bytes());
    format!("{}\n{}\n{}\n", KEY_HEADER, STANDARD.encode(material), KEY_FOOTER)
}

/// Account name for an instance
fn user_for_instance(instance_id: &str) -> String {
    let short: String = instance_id.chars().take(8).collect();
    format!("fs-{}", short)
}

/// Ids end up in paths; refuse anything that could escape the storage root
fn is_safe_instance_id(instance_id: &str) -> bool {
    !instance_id.is_empty()
        && instance_id != "."
        && instance_id != ".."
        && !instance_id.contains(['/', '\\', '\0'])
}

/// Backend storing each instance as `<root>/filesystem-<id>`
#[derive(Debug, Clone)]
pub struct LocalDirBackend {
    root: PathBuf,
}

impl LocalDirBackend {
    /// Create a backend rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for an instance id
    pub fn instance_dir(&self, instance_id: &str) -> PathBuf {
        self.root.join(dir_name_for_instance(instance_id))
    }

    /// Read the metadata file of an instance
    pub async fn read_metadata(&self, instance_id: &str) -> Result<InstanceMetadata> {
        let raw = tokio::fs::read(self.instance_dir(instance_id).join(METADATA_FILE)).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write_metadata(&self, dir: &Path, metadata: &InstanceMetadata) -> Result<()> {
        let raw = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::write(dir.join(METADATA_FILE), raw).await?;
        Ok(())
    }
}

#[async_trait]
impl InstanceBackend for LocalDirBackend {
    async fn create_instance(&self, size_limit: u64) -> Result<Option<BackendInstance>> {
        tokio::fs::create_dir_all(&self.root).await?;

        let instance_id = Uuid::new_v4().simple().to_string();
        let dir = self.instance_dir(&instance_id);
        tokio::fs::create_dir(&dir).await?;

        let metadata = InstanceMetadata {
            instance_id: instance_id.clone(),
            user: user_for_instance(&instance_id),
            size_limit_mb: size_limit,
            created_at: Utc::now(),
        };

        if let Err(e) = self.write_metadata(&dir, &metadata).await {
            warn!(dir = %dir.display(), error = %e, "Failed to write instance metadata, removing directory");
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                warn!(dir = %dir.display(), error = %cleanup, "Failed to remove half-created instance");
            }
            return Err(e);
        }

        info!(
            instance_id = %instance_id,
            dir = %dir.display(),
            size_limit_mb = size_limit,
            "Created filesystem instance"
        );

        Ok(Some(BackendInstance {
            instance_id,
            user: metadata.user,
            dir: dir.display().to_string(),
            private_key: generate_access_key(),
        }))
    }

    async fn destroy_instance(&self, instance_id: &str) -> Result<()> {
        if !is_safe_instance_id(instance_id) {
            return Err(ProvisionerError::deletion_failed(instance_id, "invalid instance id"));
        }

        let dir = self.instance_dir(instance_id);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ProvisionerError::deletion_failed(instance_id, "not a directory"));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    instance_id = %instance_id,
                    dir = %dir.display(),
                    "Instance directory already gone, treating as destroyed"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        tokio::fs::remove_dir_all(&dir).await?;
        info!(instance_id = %instance_id, dir = %dir.display(), "Destroyed filesystem instance");
        Ok(())
    }

    async fn enumerate_storage_roots(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(root = %self.root.display(), "Storage root does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => debug!(name = ?raw, "Skipping non UTF-8 storage entry"),
            }
        }
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    /// instance id -> size limit
    instances: BTreeMap<String, u64>,
    fail_next_create: bool,
    return_nothing_next: bool,
    fail_next_destroy: bool,
    create_delay: Option<Duration>,
    next_instance_id: Option<String>,
}

/// In-process backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next create call fail
    pub fn fail_next_create(&self) {
        self.state().fail_next_create = true;
    }

    /// Make the next create call return nothing
    pub fn return_nothing_next(&self) {
        self.state().return_nothing_next = true;
    }

    /// Make the next destroy call fail
    pub fn fail_next_destroy(&self) {
        self.state().fail_next_destroy = true;
    }

    /// Delay every create call
    pub fn set_create_delay(&self, delay: Duration) {
        self.state().create_delay = Some(delay);
    }

    /// Use `instance_id` for the next created instance
    pub fn set_next_instance_id(&self, instance_id: impl Into<String>) {
        self.state().next_instance_id = Some(instance_id.into());
    }

    /// Drop an instance from storage without going through the lifecycle
    pub fn remove_foreign(&self, instance_id: &str) {
        self.state().instances.remove(instance_id);
    }

    /// Plant an instance in storage without going through the lifecycle
    pub fn insert_foreign(&self, instance_id: impl Into<String>) {
        self.state().instances.insert(instance_id.into(), 0);
    }

    /// Whether storage holds this instance
    pub fn contains(&self, instance_id: &str) -> bool {
        self.state().instances.contains_key(instance_id)
    }

    /// Number of instances in storage
    pub fn instance_count(&self) -> usize {
        self.state().instances.len()
    }

    /// Size limit an instance was created with
    pub fn size_limit(&self, instance_id: &str) -> Option<u64> {
        self.state().instances.get(instance_id).copied()
    }
}

#[async_trait]
impl InstanceBackend for MemoryBackend {
    async fn create_instance(&self, size_limit: u64) -> Result<Option<BackendInstance>> {
        let delay = self.state().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_create) {
            return Err(ProvisionerError::internal("injected create failure"));
        }
        if std::mem::take(&mut state.return_nothing_next) {
            return Ok(None);
        }

        let instance_id = state
            .next_instance_id
            .take()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        state.instances.insert(instance_id.clone(), size_limit);

        Ok(Some(BackendInstance {
            user: user_for_instance(&instance_id),
            dir: format!("/memory/{}", dir_name_for_instance(&instance_id)),
            private_key: generate_access_key(),
            instance_id,
        }))
    }

    async fn destroy_instance(&self, instance_id: &str) -> Result<()> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_destroy) {
            return Err(ProvisionerError::deletion_failed(instance_id, "injected destroy failure"));
        }
        if state.instances.remove(instance_id).is_none() {
            warn!(instance_id = %instance_id, "Instance already gone, treating as destroyed");
        }
        Ok(())
    }

    async fn enumerate_storage_roots(&self) -> Result<Vec<String>> {
        Ok(self
            .state()
            .instances
            .keys()
            .map(|id| dir_name_for_instance(id))
            .collect())
    }
}
