//! C2: reads the pending/deleted/modified-after views over a [`LocalStore`]
//! family. No write-ahead log — the local store is the sole source of truth
//! for `needs_sync`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reconcile_core::{LocalStore, Snapshot, SyncResult};

pub struct ChangeTracker {
    store: Arc<dyn LocalStore>,
}

impl ChangeTracker {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        ChangeTracker { store }
    }

    /// Local snapshots with `needs_sync = true`, oldest `last_modified` first.
    pub async fn pending(&self, family: &str, limit: Option<usize>) -> SyncResult<Vec<Snapshot>> {
        self.store.fetch_pending(family, limit).await
    }

    pub async fn deleted(&self, family: &str, since: Option<DateTime<Utc>>) -> SyncResult<Vec<Snapshot>> {
        self.store.fetch_deleted(family, since).await
    }

    pub async fn modified_after(
        &self,
        family: &str,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> SyncResult<Vec<Snapshot>> {
        self.store.fetch_modified_after(family, since, limit).await
    }
}
