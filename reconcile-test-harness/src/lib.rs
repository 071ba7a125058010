//! Contract tests any `LocalStore`/`RemoteCollaborator` implementation must
//! pass, plus the golden end-to-end scenarios and concurrency checks driven
//! against the reference `reconcile-engine`/`reconcile-store-mem`/
//! `reconcile-transport-http` stack.

use reconcile_core::{LocalStore, Payload, RemoteCollaborator, Snapshot, SyncError, SyncResult};

/// Checks any `LocalStore` implementation must satisfy, independent of how
/// it actually persists records.
#[derive(Debug, Clone)]
pub struct StoreContract;

impl StoreContract {
    /// A snapshot applied via `apply_remote` is fetchable by id, and
    /// counted exactly once in `fetch_all` even if applied twice.
    pub async fn apply_remote_round_trips<S: LocalStore>(store: &S, family: &str) -> SyncResult<()> {
        let snapshot = Snapshot::new("contract-apply", family, Payload::new());
        store.apply_remote(family, vec![snapshot.clone()]).await?;
        let fetched = store.fetch_by_sync_id(family, &snapshot.sync_id).await?;
        if fetched.is_none() {
            return Err(harness_err("apply_remote did not persist the record"));
        }
        store.apply_remote(family, vec![snapshot.clone()]).await?;
        let all = store.fetch_all(family).await?;
        let count = all.iter().filter(|s| s.sync_id == snapshot.sync_id).count();
        if count != 1 {
            return Err(harness_err("apply_remote duplicated a record on re-apply"));
        }
        Ok(())
    }

    /// `mark_synced` at or after `last_modified` clears `needs_sync`.
    pub async fn mark_synced_clears_pending<S: LocalStore>(store: &S, family: &str) -> SyncResult<()> {
        let snapshot = Snapshot::new("contract-synced", family, Payload::new());
        let modified_at = snapshot.last_modified;
        store.apply_remote(family, vec![snapshot.clone()]).await?;

        let pending_before = store.fetch_pending(family, None).await?;
        if !pending_before.iter().any(|s| s.sync_id == snapshot.sync_id) {
            return Err(harness_err("freshly applied record was not pending"));
        }

        store.mark_synced(family, &[snapshot.sync_id.clone()], modified_at).await?;
        let pending_after = store.fetch_pending(family, None).await?;
        if pending_after.iter().any(|s| s.sync_id == snapshot.sync_id) {
            return Err(harness_err("mark_synced did not clear pending state"));
        }
        Ok(())
    }

    /// `fetch_modified_after(since)` is strictly exclusive of `since`.
    pub async fn fetch_modified_after_is_exclusive<S: LocalStore>(store: &S, family: &str) -> SyncResult<()> {
        let snapshot = Snapshot::new("contract-boundary", family, Payload::new());
        let since = snapshot.last_modified;
        store.apply_remote(family, vec![snapshot.clone()]).await?;
        let at_boundary = store.fetch_modified_after(family, since, None).await?;
        if at_boundary.iter().any(|s| s.sync_id == snapshot.sync_id) {
            return Err(harness_err("fetch_modified_after included a record at the boundary"));
        }
        Ok(())
    }
}

/// Checks any `RemoteCollaborator` implementation must satisfy.
#[derive(Debug, Clone)]
pub struct RemoteContract;

impl RemoteContract {
    pub async fn upsert_then_fetch_round_trips<R: RemoteCollaborator>(remote: &R, family: &str) -> SyncResult<()> {
        let snapshot = Snapshot::new("remote-contract-upsert", family, Payload::new());
        let outcomes = remote.upsert_batch(family, &[snapshot.clone()]).await?;
        if !outcomes.iter().all(|o| o.accepted) {
            return Err(harness_err("upsert_batch rejected a fresh record"));
        }
        let fetched = remote.fetch(family, &snapshot.sync_id).await?;
        if fetched.is_none() {
            return Err(harness_err("fetch did not find the upserted record"));
        }
        Ok(())
    }

    /// `delete` tombstones in place: the record stays visible to `fetch`
    /// with `is_deleted = true` rather than disappearing (spec §6).
    pub async fn delete_then_fetch_is_tombstoned<R: RemoteCollaborator>(remote: &R, family: &str) -> SyncResult<()> {
        let snapshot = Snapshot::new("remote-contract-delete", family, Payload::new());
        remote.upsert_batch(family, &[snapshot.clone()]).await?;
        remote.delete(family, &snapshot.sync_id).await?;
        match remote.fetch(family, &snapshot.sync_id).await? {
            Some(s) if s.is_deleted => Ok(()),
            Some(_) => Err(harness_err("delete did not mark the record deleted")),
            None => Err(harness_err("delete removed the record instead of tombstoning it")),
        }
    }

    pub async fn table_exists_reflects_upserts<R: RemoteCollaborator>(remote: &R, family: &str) -> SyncResult<()> {
        if remote.table_exists(family).await? {
            return Err(harness_err("table_exists true before any upsert"));
        }
        let snapshot = Snapshot::new("remote-contract-exists", family, Payload::new());
        remote.upsert_batch(family, &[snapshot]).await?;
        if !remote.table_exists(family).await? {
            return Err(harness_err("table_exists false after an upsert"));
        }
        Ok(())
    }
}

fn harness_err(msg: &str) -> SyncError {
    SyncError::StoreFailure { kind: msg.to_string() }
}


#[cfg(test)]
mod concurrency_tests {
    use reconcile_core::{OperationContext, OperationType, SyncError};
    use reconcile_engine::OperationRegistry;

    /// `max_concurrent_syncs` caps total in-flight operations across every
    /// family, independent of the per-family duplicate-fingerprint check.
    #[test]
    fn concurrency_cap_rejects_beyond_max() {
        let registry = OperationRegistry::new(1);
        let a = OperationContext::new(OperationType::Full, "todos", None);
        let b = OperationContext::new(OperationType::Full, "notes", None);
        registry.register(a).unwrap();
        let err = registry.register(b).unwrap_err();
        assert!(matches!(err, SyncError::TooManyConcurrentOperations { .. }));
    }
}
