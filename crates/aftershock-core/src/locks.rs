//! Per-event serialization.
//!
//! Events may be processed concurrently, but two evaluations of the same
//! event id never overlap: the versioning gate reads the ledger and the
//! saga appends to it, and an interleaving would let both see the same
//! last entry.

use std::collections::BTreeMap;
use std::sync::Arc;

use aftershock_types::EventId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of one async mutex per event id.
#[derive(Debug, Clone, Default)]
pub struct EventLocks {
    locks: Arc<Mutex<BTreeMap<EventId, Arc<Mutex<()>>>>>,
}

impl EventLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `event_id`.
    ///
    /// The returned guard releases the event when dropped.
    pub async fn acquire(&self, event_id: &EventId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(event_id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop registry entries nobody holds or waits for.
    pub async fn prune(&self) {
        self.locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of registered event ids.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Whether no event id is registered.
    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}
