//! Core traits for the filesystem provisioner
//!
//! The InstanceBackend trait is the only way the lifecycle touches physical
//! storage. The ConfigSource trait is polled on every capacity check.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::*;

/// Boundary to the system that creates and destroys physical instances.
///
/// Implementations perform slow, blocking-ish I/O. Callers bound every call
/// with a timeout and never hold registry locks across one.
#[async_trait]
pub trait InstanceBackend: Send + Sync {
    /// Materialize an instance limited to `size_limit` capacity units.
    ///
    /// `Ok(None)` means the backend produced nothing; callers treat it as a
    /// creation failure.
    async fn create_instance(&self, size_limit: u64) -> Result<Option<BackendInstance>>;

    /// Tear down the instance with this id
    async fn destroy_instance(&self, instance_id: &str) -> Result<()>;

    /// Names of every instance directory currently in storage.
    ///
    /// Each name embeds an instance id behind [`INSTANCE_DIR_PREFIX`].
    async fn enumerate_storage_roots(&self) -> Result<Vec<String>>;
}

/// Source of live gateway configuration
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Load the current configuration. Called fresh on every capacity check.
    async fn load(&self) -> Result<GatewayConfig>;
}
