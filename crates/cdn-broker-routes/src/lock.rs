//! Per-instance serialisation.
//!
//! Reconciliation of a route races the CDN/IAM deploy sequence if two
//! invocations overlap, so the manager guarantees at most one in-flight
//! reconciliation per `instance_id`. Distinct instances proceed in
//! parallel. The map is reference-counted so entries disappear when the
//! last holder releases them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct LockEntry {
    mutex: Arc<AsyncMutex<()>>,
    holders: usize,
}

/// A map of asynchronous mutexes keyed by instance ID.
#[derive(Default)]
pub struct InstanceLocks {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
}

impl InstanceLocks {
    /// Create an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for the given instance, waiting if another holder
    /// is in flight.
    pub async fn acquire(&self, instance_id: &str) -> InstanceGuard {
        let mutex = {
            let mut entries = self.entries.lock();
            let entry = entries
                .entry(instance_id.to_owned())
                .or_insert_with(|| LockEntry {
                    mutex: Arc::new(AsyncMutex::new(())),
                    holders: 0,
                });
            entry.holders += 1;
            Arc::clone(&entry.mutex)
        };

        let held = mutex.lock_owned().await;

        InstanceGuard {
            held: Some(held),
            instance_id: instance_id.to_owned(),
            entries: Arc::clone(&self.entries),
        }
    }

    /// Number of instances with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no instance currently holds or awaits a lock.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for InstanceLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLocks")
            .field("entries", &self.len())
            .finish()
    }
}

/// Holds the per-instance lock until dropped.
pub struct InstanceGuard {
    held: Option<OwnedMutexGuard<()>>,
    instance_id: String,
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        // Release the mutex before pruning so a waiter can proceed.
        self.held.take();

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&self.instance_id) {
            entry.holders -= 1;
            if entry.holders == 0 {
                entries.remove(&self.instance_id);
            }
        }
    }
}

impl std::fmt::Debug for InstanceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceGuard")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}
