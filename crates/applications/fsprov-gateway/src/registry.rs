//! In-memory registry of provisioned instances and bindings
//!
//! The registry is what this process believes is provisioned. It is rebuilt
//! empty on every start and never persisted.
//!
//! Instances and bindings share one id namespace. Bindings record the instance
//! they were derived from, so unprovisioning an instance can remove all of them
//! in the same critical section.
//!
//! Besides committed records the registry tracks two kinds of in-flight work:
//! - capacity reservations for provisions whose backend call has not returned
//! - instances whose teardown is in progress (still counted against capacity,
//!   no longer bindable)
//!
//! Both are handed out as guards ([`Reservation`], [`Teardown`]) that undo
//! themselves on drop, so a provision or unprovision future dropped while its
//! backend call is in flight gives back what it held.

use fsprov_core::{
    BindingRecord, InstanceRecord, ProvisionerError, Result, ServiceRecord,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Registry shared between the lifecycle and the orphan reconciler
pub type SharedRegistry = Arc<Mutex<Registry>>;

/// Mapping from service id to record
#[derive(Debug, Default)]
pub struct Registry {
    records: HashMap<String, ServiceRecord>,
    pending_provisions: Arc<AtomicU64>,
    tearing_down: TeardownSet,
}

type TeardownSet = Arc<std::sync::Mutex<HashSet<String>>>;

fn lock_teardown_set(set: &TeardownSet) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One unit of capacity held for an in-flight provision, released on drop
#[derive(Debug)]
#[must_use = "the reservation is released as soon as it is dropped"]
pub struct Reservation {
    pending: Arc<AtomicU64>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Marks an instance as being torn down until dropped
#[derive(Debug)]
#[must_use = "the instance becomes live again as soon as the teardown is dropped"]
pub struct Teardown {
    instance_id: String,
    tearing_down: TeardownSet,
}

impl Teardown {
    /// Instance being torn down
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        lock_teardown_set(&self.tearing_down).remove(&self.instance_id);
    }
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry wrapped for sharing
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Look up any record by service id
    pub fn get(&self, service_id: &str) -> Option<&ServiceRecord> {
        self.records.get(service_id)
    }

    /// Whether any record holds this service id
    pub fn contains(&self, service_id: &str) -> bool {
        self.records.contains_key(service_id)
    }

    /// Look up a live instance (not a binding, not being torn down)
    pub fn live_instance(&self, instance_id: &str) -> Option<&InstanceRecord> {
        if self.is_tearing_down(instance_id) {
            return None;
        }
        self.records.get(instance_id).and_then(ServiceRecord::as_instance)
    }

    /// Insert a record under its own service id
    ///
    /// Fails if any record, instance or binding, already holds the id.
    pub fn insert(&mut self, record: ServiceRecord) -> Result<()> {
        let id = record.service_id().to_string();
        if self.records.contains_key(&id) {
            return Err(ProvisionerError::ServiceIdCollision(id));
        }
        self.records.insert(id, record);
        Ok(())
    }

    /// Generate a v4 id not held by any record
    pub fn unused_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.records.contains_key(&id) {
                return id;
            }
        }
    }

    /// Number of instance records (bindings excluded)
    pub fn instance_count(&self) -> u64 {
        self.records.values().filter(|r| !r.is_binding()).count() as u64
    }

    /// Instances counted against capacity, including in-flight reservations
    pub fn committed_instances(&self) -> u64 {
        self.instance_count() + self.pending_provisions()
    }

    /// Number of provisions whose backend call is in flight
    pub fn pending_provisions(&self) -> u64 {
        self.pending_provisions.load(Ordering::SeqCst)
    }

    /// Hold one unit of capacity for an in-flight provision
    ///
    /// Drop the reservation once the instance record is inserted, or as soon
    /// as the provision fails.
    pub fn reserve(&mut self) -> Reservation {
        self.pending_provisions.fetch_add(1, Ordering::SeqCst);
        Reservation {
            pending: self.pending_provisions.clone(),
        }
    }

    /// Mark a live instance as being torn down
    ///
    /// The instance is live again once the returned guard is dropped, unless
    /// it was removed with [`Registry::remove_instance_cascade`] in between.
    pub fn begin_teardown(&mut self, instance_id: &str) -> Result<Teardown> {
        if self.live_instance(instance_id).is_none() {
            return Err(ProvisionerError::InstanceNotFound(instance_id.to_string()));
        }
        lock_teardown_set(&self.tearing_down).insert(instance_id.to_string());
        Ok(Teardown {
            instance_id: instance_id.to_string(),
            tearing_down: self.tearing_down.clone(),
        })
    }

    /// Whether an instance's teardown is in progress
    pub fn is_tearing_down(&self, instance_id: &str) -> bool {
        lock_teardown_set(&self.tearing_down).contains(instance_id)
    }

    /// Bindings derived from an instance
    pub fn bindings_of(&self, instance_id: &str) -> Vec<&BindingRecord> {
        self.records
            .values()
            .filter_map(|r| match r {
                ServiceRecord::Binding(b) if b.instance_id == instance_id => Some(b),
                _ => None,
            })
            .collect()
    }

    /// Remove an instance and every binding derived from it
    ///
    /// Returns the removed records, instance first. Empty if the id is not an
    /// instance.
    pub fn remove_instance_cascade(&mut self, instance_id: &str) -> Vec<ServiceRecord> {
        lock_teardown_set(&self.tearing_down).remove(instance_id);

        let Some(instance) = self.records.get(instance_id) else {
            return Vec::new();
        };
        if instance.is_binding() {
            return Vec::new();
        }

        let binding_ids: Vec<String> = self
            .bindings_of(instance_id)
            .into_iter()
            .map(|b| b.service_id.clone())
            .collect();

        let mut removed = Vec::with_capacity(binding_ids.len() + 1);
        if let Some(record) = self.records.remove(instance_id) {
            removed.push(record);
        }
        for id in binding_ids {
            if let Some(record) = self.records.remove(&id) {
                removed.push(record);
            }
        }
        removed
    }

    /// Ids of every instance record
    pub fn instance_ids(&self) -> Vec<String> {
        self.records
            .values()
            .filter(|r| !r.is_binding())
            .map(|r| r.service_id().to_string())
            .collect()
    }

    /// Every record, instances and bindings
    pub fn records(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.records.values()
    }

    /// Number of records, instances and bindings
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
