//! C3: per-family `EntitySyncStatus` and `last_sync_at`. A single
//! [`parking_lot::Mutex`] owned exclusively by this component serializes all
//! mutations — no other component ever locks it, and it is never held across
//! an await (every method below is synchronous internally).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reconcile_core::{EntitySyncStatus, SyncState};

struct Inner {
    statuses: HashMap<String, EntitySyncStatus>,
    last_sync_at: HashMap<String, DateTime<Utc>>,
}

pub struct MetadataStore {
    inner: Mutex<Inner>,
}

impl MetadataStore {
    pub fn new() -> Self {
        MetadataStore {
            inner: Mutex::new(Inner {
                statuses: HashMap::new(),
                last_sync_at: HashMap::new(),
            }),
        }
    }

    pub fn register(&self, family: &str) {
        self.inner
            .lock()
            .statuses
            .entry(family.to_string())
            .or_insert_with(|| EntitySyncStatus::new(family));
    }

    pub fn unregister(&self, family: &str) {
        let mut inner = self.inner.lock();
        inner.statuses.remove(family);
        inner.last_sync_at.remove(family);
    }

    pub fn get_status(&self, family: &str) -> Option<EntitySyncStatus> {
        self.inner.lock().statuses.get(family).cloned()
    }

    pub fn all_statuses(&self) -> Vec<EntitySyncStatus> {
        self.inner.lock().statuses.values().cloned().collect()
    }

    pub fn set_status(&self, family: &str, f: impl FnOnce(&mut EntitySyncStatus)) {
        let mut inner = self.inner.lock();
        let status = inner
            .statuses
            .entry(family.to_string())
            .or_insert_with(|| EntitySyncStatus::new(family));
        f(status);
    }

    pub fn last_sync_at(&self, family: &str) -> Option<DateTime<Utc>> {
        self.inner.lock().last_sync_at.get(family).copied()
    }

    pub fn set_last_sync_at(&self, family: &str, t: DateTime<Utc>) {
        self.inner.lock().last_sync_at.insert(family.to_string(), t);
    }

    /// Deletes terminal-state family statuses whose last transition predates
    /// `older_than`. Active (`syncing`/`preparing`) families are never
    /// touched regardless of age.
    pub fn cleanup(&self, older_than: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        inner.statuses.retain(|family, status| {
            let terminal = matches!(status.state, SyncState::Completed | SyncState::Failed | SyncState::Cancelled);
            let stale = status
                .last_full_sync_at
                .into_iter()
                .chain(status.last_incremental_sync_at)
                .max()
                .map(|t| t < older_than)
                .unwrap_or(false);
            if terminal && stale {
                inner.last_sync_at.remove(family);
                false
            } else {
                true
            }
        });
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        MetadataStore::new()
    }
}
