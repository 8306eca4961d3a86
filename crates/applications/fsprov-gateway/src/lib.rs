//! # Filesystem Service Gateway
//!
//! Capacity-bounded provisioning of filesystem instances for a multi-tenant
//! storage service.
//!
//! ## Architecture
//!
//! ```text
//! request stream ──► FilesystemGateway
//!                     ├── Provisioner ──────┐  provision / unprovision / bind / unbind
//!                     │    └── capacity     ├──► Registry (in-memory, shared)
//!                     └── OrphanReconciler ─┘  check / purge orphans
//!                              │
//!                              └──► InstanceBackend (LocalDirBackend: <root>/filesystem-<id>)
//! ```
//!
//! The gateway keeps two stores consistent:
//! - the registry: what this process believes is provisioned (volatile)
//! - backend storage: the instance directories that actually exist
//!
//! Provisioning never overcommits the pool, unprovisioning removes an instance
//! together with all its bindings in one step, and orphan sweeps report (never
//! delete) storage nobody holds a handle for.
//!
//! See [`provisioner`] and [`orphan`] for details.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod capacity;
pub mod config;
pub mod gateway;
pub mod orphan;
pub mod protocol;
pub mod provisioner;
pub mod registry;

// ============================================================================
// Public exports
// ============================================================================

// Gateway facade
pub use gateway::FilesystemGateway;

// Lifecycle
pub use provisioner::{Provisioner, SERVICE_DESCRIPTION};

// Registry
pub use registry::{Registry, SharedRegistry};

// Capacity model
pub use capacity::{available, fits, CapacitySnapshot};

// Orphan detection
pub use orphan::{OrphanReconciler, OrphanReport, OrphanSummary};

// Backends
pub use backend::{storage_guard, InstanceMetadata, LocalDirBackend, MemoryBackend, StorageGuard};

// Configuration
pub use config::{default_config_path, StaticConfig, YamlConfigFile};

// Request/reply shapes
pub use protocol::{GatewayRequest, Reply, ReplyEnvelope, ServiceFailure};

// Error handling
pub use fsprov_core::{ProvisionerError, Result};
