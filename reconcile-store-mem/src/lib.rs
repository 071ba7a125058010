//! Reference, in-memory implementation of the local record store contract
//! (`reconcile_core::LocalStore`). The real local persistence engine is out
//! of scope (spec §1) — this crate stands in for it in tests and examples.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reconcile_core::{ApplyOutcome, LocalStore, Snapshot, SyncId, SyncResult};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, HashMap<SyncId, Snapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Seed or overwrite a local record directly, bypassing sync
    /// bookkeeping. Used by tests and by a host application's write path
    /// (the engine itself never constructs snapshots out of thin air).
    pub fn put_local(&self, family: &str, snapshot: Snapshot) {
        self.tables
            .write()
            .entry(family.to_string())
            .or_default()
            .insert(snapshot.sync_id.clone(), snapshot);
    }

    pub fn remove(&self, family: &str, id: &SyncId) {
        if let Some(table) = self.tables.write().get_mut(family) {
            table.remove(id);
        }
    }

    fn snapshot_of(&self, family: &str) -> Vec<Snapshot> {
        self.tables
            .read()
            .get(family)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn fetch_pending(&self, family: &str, limit: Option<usize>) -> SyncResult<Vec<Snapshot>> {
        let mut pending: Vec<Snapshot> = self
            .snapshot_of(family)
            .into_iter()
            .filter(|s| s.needs_sync())
            .collect();
        pending.sort_by_key(|s| s.last_modified);
        if let Some(limit) = limit {
            pending.truncate(limit);
        }
        Ok(pending)
    }

    async fn fetch_by_sync_id(&self, family: &str, id: &SyncId) -> SyncResult<Option<Snapshot>> {
        Ok(self.tables.read().get(family).and_then(|t| t.get(id).cloned()))
    }

    async fn fetch_modified_after(
        &self,
        family: &str,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> SyncResult<Vec<Snapshot>> {
        let mut out: Vec<Snapshot> = self
            .snapshot_of(family)
            .into_iter()
            .filter(|s| s.last_modified > since)
            .collect();
        out.sort_by_key(|s| s.last_modified);
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn fetch_deleted(&self, family: &str, since: Option<DateTime<Utc>>) -> SyncResult<Vec<Snapshot>> {
        let mut out: Vec<Snapshot> = self
            .snapshot_of(family)
            .into_iter()
            .filter(|s| s.is_deleted && since.map(|t| s.last_modified > t).unwrap_or(true))
            .collect();
        out.sort_by_key(|s| s.last_modified);
        Ok(out)
    }

    async fn apply_remote(&self, family: &str, snapshots: Vec<Snapshot>) -> SyncResult<Vec<ApplyOutcome>> {
        let mut outcomes = Vec::with_capacity(snapshots.len());
        let mut table = self.tables.write();
        let entry = table.entry(family.to_string()).or_default();
        for snapshot in snapshots {
            let id = snapshot.sync_id.clone();
            entry.insert(id.clone(), snapshot);
            outcomes.push(ApplyOutcome {
                sync_id: id,
                applied: true,
                error: None,
            });
        }
        Ok(outcomes)
    }

    async fn mark_synced(&self, family: &str, ids: &[SyncId], at: DateTime<Utc>) -> SyncResult<()> {
        if let Some(table) = self.tables.write().get_mut(family) {
            for id in ids {
                if let Some(snapshot) = table.get_mut(id) {
                    if snapshot.last_modified <= at {
                        snapshot.mark_synced(at);
                    }
                }
            }
        }
        Ok(())
    }

    async fn mark_all_synced_for_family(&self, family: &str, at: DateTime<Utc>) -> SyncResult<()> {
        if let Some(table) = self.tables.write().get_mut(family) {
            for snapshot in table.values_mut() {
                if snapshot.last_modified <= at {
                    snapshot.mark_synced(at);
                }
            }
        }
        Ok(())
    }

    async fn fetch_all(&self, family: &str) -> SyncResult<Vec<Snapshot>> {
        Ok(self.snapshot_of(family))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_core::Payload;

    fn payload() -> Payload {
        [("title".to_string(), serde_json::json!("A"))].into_iter().collect()
    }

    #[tokio::test]
    async fn pending_orders_oldest_first() {
        let store = MemoryStore::new();
        let mut older = Snapshot::new("a", "todos", payload());
        older.last_modified = Utc::now() - chrono::Duration::hours(1);
        let newer = Snapshot::new("b", "todos", payload());
        store.put_local("todos", newer.clone());
        store.put_local("todos", older.clone());

        let pending = store.fetch_pending("todos", None).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].sync_id, "a");
        assert_eq!(pending[1].sync_id, "b");
    }

    #[tokio::test]
    async fn mark_synced_clears_needs_sync() {
        let store = MemoryStore::new();
        let snapshot = Snapshot::new("a", "todos", payload());
        let modified_at = snapshot.last_modified;
        store.put_local("todos", snapshot);

        store.mark_synced("todos", &["a".to_string()], modified_at).await.unwrap();
        let fetched = store.fetch_by_sync_id("todos", &"a".to_string()).await.unwrap().unwrap();
        assert!(!fetched.needs_sync());
    }

    #[tokio::test]
    async fn apply_remote_is_idempotent() {
        let store = MemoryStore::new();
        let snapshot = Snapshot::new("a", "todos", payload());
        let outcomes = store.apply_remote("todos", vec![snapshot.clone()]).await.unwrap();
        assert!(outcomes[0].applied);
        let outcomes2 = store.apply_remote("todos", vec![snapshot]).await.unwrap();
        assert!(outcomes2[0].applied);
        assert_eq!(store.fetch_all("todos").await.unwrap().len(), 1);
    }
}
