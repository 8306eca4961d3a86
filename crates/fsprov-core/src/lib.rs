//! Filesystem Provisioner Core - Shared types and traits
//!
//! This crate defines the core abstractions used across:
//! - fsprov-gateway (lifecycle, registry, orphan sweeps)
//! - fsprov (request-loop binary)
//!
//! Key types:
//! - ServiceRecord (tagged instance/binding record) and Credentials
//! - InstanceBackend trait (interface to the physical storage backend)
//! - ConfigSource trait (live gateway configuration)
//! - Error types

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
