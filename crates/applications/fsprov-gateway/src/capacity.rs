//! Capacity admission control
//!
//! Every instance consumes exactly `per_unit_size` capacity units (MB) out of a
//! fixed pool. A new instance is only granted when a full unit is still free:
//!
//! ```text
//! available = total - instances * per_unit_size
//! admit     = available >= per_unit_size
//! ```
//!
//! Bindings never consume capacity.

use fsprov_core::GatewayConfig;
use serde::{Deserialize, Serialize};

/// Capacity units still free in the pool
///
/// Saturates at zero when the pool is already overcommitted (for example
/// after the configured total was lowered).
pub fn available(instance_count: u64, per_unit_size: u64, total_capacity: u64) -> u64 {
    total_capacity.saturating_sub(instance_count.saturating_mul(per_unit_size))
}

/// Whether one more full-size instance fits into the pool
pub fn fits(instance_count: u64, per_unit_size: u64, total_capacity: u64) -> bool {
    let Some(used) = instance_count.checked_mul(per_unit_size) else {
        return false;
    };
    match total_capacity.checked_sub(used) {
        Some(free) => free >= per_unit_size,
        None => false,
    }
}

/// Point-in-time view of the capacity pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    /// Total capacity units in the pool
    pub total: u64,

    /// Units granted to each instance
    pub per_instance: u64,

    /// Instances counted against the pool (including in-flight reservations)
    pub instances: u64,

    /// Units still free
    pub available: u64,
}

impl CapacitySnapshot {
    /// Snapshot for `instances` against the pool described by `config`
    pub fn new(config: &GatewayConfig, instances: u64) -> Self {
        Self {
            total: config.available_storage,
            per_instance: config.max_fs_size,
            instances,
            available: available(instances, config.max_fs_size, config.available_storage),
        }
    }

    /// Whether one more instance would be admitted
    pub fn admits_one_more(&self) -> bool {
        fits(self.instances, self.per_instance, self.total)
    }

    /// Number of further instances the pool can hold
    pub fn remaining_slots(&self) -> u64 {
        if self.per_instance == 0 {
            return 0;
        }
        self.available / self.per_instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_units_fit_in_pool() {
        // 10240MB pool, 2048MB per instance
        for count in 0..5 {
            assert!(fits(count, 2048, 10240), "instance #{} should fit", count + 1);
        }
        assert!(!fits(5, 2048, 10240));
    }

    #[test]
    fn test_partial_unit_is_rejected() {
        // 904MB left after two instances is not enough for a third 2048MB unit
        assert!(fits(0, 2048, 5000));
        assert!(fits(1, 2048, 5000));
        assert!(!fits(2, 2048, 5000));
        assert_eq!(available(2, 2048, 5000), 904);
    }

    #[test]
    fn test_overcommitted_pool_saturates() {
        // Total lowered below what is already provisioned
        assert_eq!(available(4, 2048, 4096), 0);
        assert!(!fits(4, 2048, 4096));
    }

    #[test]
    fn test_overflow_never_fits() {
        assert!(!fits(u64::MAX, 2, u64::MAX));
        assert_eq!(available(u64::MAX, 2, 100), 0);
    }

    #[test]
    fn test_snapshot() {
        let config = GatewayConfig::new(2048, 10240, "10.0.0.5");
        let snapshot = CapacitySnapshot::new(&config, 3);

        assert_eq!(snapshot.available, 4096);
        assert_eq!(snapshot.remaining_slots(), 2);
        assert!(snapshot.admits_one_more());

        let full = CapacitySnapshot::new(&config, 5);
        assert_eq!(full.remaining_slots(), 0);
        assert!(!full.admits_one_more());
    }
}
