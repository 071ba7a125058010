//! C6: the full/incremental/record sync pipelines. Orchestrates C1-C5,
//! C7-C9 into the single "fetch → compare → upload → download → apply →
//! mark" operation described in spec §4.6. Uploads precede downloads within
//! one operation so the remote becomes the source of truth for survivorship
//! decisions already made locally.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use chrono::{DateTime, Utc};
use reconcile_core::{
    ChosenVersion, FullSyncResult, IncrementalSyncResult, LocalStore, OperationContext, OperationType,
    RemoteCollaborator, Snapshot, SyncConflict, SyncError, SyncPolicy, SyncResult, SyncState,
};
use tracing::{info, instrument, warn};

use crate::change_tracker::ChangeTracker;
use crate::conflict_detector::ConflictDetector;
use crate::conflict_resolver::ConflictResolver;
use crate::metadata_store::MetadataStore;
use crate::registry::OperationRegistry;

pub struct SyncManager {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteCollaborator>,
    tracker: ChangeTracker,
    detector: ConflictDetector,
    resolver: Arc<ConflictResolver>,
    metadata: Arc<MetadataStore>,
    registry: Arc<OperationRegistry>,
}

impl SyncManager {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteCollaborator>,
        resolver: Arc<ConflictResolver>,
        metadata: Arc<MetadataStore>,
        registry: Arc<OperationRegistry>,
    ) -> Self {
        SyncManager {
            store: store.clone(),
            remote,
            tracker: ChangeTracker::new(store),
            detector: ConflictDetector::new(),
            resolver,
            metadata,
            registry,
        }
    }

    #[instrument(skip(self, policy))]
    pub async fn full_sync(&self, family: &str, policy: &SyncPolicy, requesting_user: Option<String>) -> SyncResult<FullSyncResult> {
        let ctx = OperationContext::new(OperationType::Full, family, requesting_user);
        let op_id = self.registry.register(ctx)?;
        self.metadata.register(family);
        self.metadata.set_status(family, |s| s.state = SyncState::Syncing);
        self.refresh_pending_count(family).await?;

        let started = StdInstant::now();
        let op_started_at = Utc::now();
        let result = self
            .run_with_timeout(
                policy,
                self.run_pipeline(&op_id, family, policy, chrono::DateTime::<Utc>::from(std::time::UNIX_EPOCH), op_started_at),
            )
            .await;
        self.registry.unregister(&op_id);
        self.refresh_pending_count(family).await?;

        match result {
            Ok((uploaded, downloaded, conflicts_total, conflicts_manual, per_record_errors, manual_conflicts)) => {
                self.metadata.set_status(family, |s| {
                    s.state = SyncState::Completed;
                    s.last_full_sync_at = Some(op_started_at);
                    s.last_error = None;
                });
                Ok(FullSyncResult {
                    uploaded,
                    downloaded,
                    conflicts_total,
                    conflicts_manual,
                    duration_ms: started.elapsed().as_millis() as u64,
                    per_record_errors,
                    manual_conflicts,
                })
            }
            Err(err) => {
                self.metadata.set_status(family, |s| {
                    s.state = SyncState::Failed;
                    s.last_error = Some(err.user_message());
                });
                Err(err)
            }
        }
    }

    #[instrument(skip(self, policy))]
    pub async fn incremental_sync(
        &self,
        family: &str,
        policy: &SyncPolicy,
        requesting_user: Option<String>,
    ) -> SyncResult<IncrementalSyncResult> {
        let t0 = self.metadata.last_sync_at(family);
        let Some(t0) = t0 else {
            let full = self.full_sync(family, policy, requesting_user).await?;
            return Ok(IncrementalSyncResult {
                uploaded: full.uploaded,
                downloaded: full.downloaded,
                conflicts_total: full.conflicts_total,
                conflicts_manual: full.conflicts_manual,
                duration_ms: full.duration_ms,
                fell_back_to_full: true,
                per_record_errors: full.per_record_errors,
                manual_conflicts: full.manual_conflicts,
            });
        };

        let ctx = OperationContext::new(OperationType::Incremental, family, requesting_user);
        let op_id = self.registry.register(ctx)?;
        self.metadata.set_status(family, |s| s.state = SyncState::Syncing);
        self.refresh_pending_count(family).await?;

        let started = StdInstant::now();
        let op_started_at = Utc::now();
        let result = self
            .run_with_timeout(policy, self.run_pipeline(&op_id, family, policy, t0, op_started_at))
            .await;
        self.registry.unregister(&op_id);
        self.refresh_pending_count(family).await?;

        match result {
            Ok((uploaded, downloaded, conflicts_total, conflicts_manual, per_record_errors, manual_conflicts)) => {
                self.metadata.set_status(family, |s| {
                    s.state = SyncState::Completed;
                    s.last_incremental_sync_at = Some(op_started_at);
                    s.last_error = None;
                });
                Ok(IncrementalSyncResult {
                    uploaded,
                    downloaded,
                    conflicts_total,
                    conflicts_manual,
                    duration_ms: started.elapsed().as_millis() as u64,
                    fell_back_to_full: false,
                    per_record_errors,
                    manual_conflicts,
                })
            }
            Err(err) => {
                self.metadata.set_status(family, |s| {
                    s.state = SyncState::Failed;
                    s.last_error = Some(err.user_message());
                });
                Err(err)
            }
        }
    }

    /// Upload-only path: skips download and metadata advance, used when the
    /// caller already knows exactly which records to push.
    #[instrument(skip(self, policy, snapshots))]
    pub async fn record_sync(&self, family: &str, policy: &SyncPolicy, snapshots: Vec<Snapshot>) -> SyncResult<usize> {
        let (uploaded, errors) = self.upload(family, &snapshots, policy).await?;
        self.refresh_pending_count(family).await?;
        if uploaded == 0 && !snapshots.is_empty() && !errors.is_empty() {
            return Err(SyncError::StoreFailure {
                kind: "all records failed to upload".to_string(),
            });
        }
        Ok(uploaded)
    }

    /// Bounds `pipeline` to `policy.max_sync_duration_secs`, per spec §4.8/§5:
    /// on expiry the caller sees `SyncError::Timeout` and any store writes
    /// the pipeline already committed before the deadline stay in place.
    async fn run_with_timeout<F, T>(&self, policy: &SyncPolicy, pipeline: F) -> SyncResult<T>
    where
        F: std::future::Future<Output = SyncResult<T>>,
    {
        match tokio::time::timeout(Duration::from_secs(policy.max_sync_duration_secs), pipeline).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }

    /// Recomputes `EntitySyncStatus.pending_count` from the local store, per
    /// spec §3's "updated by C6 at operation boundaries."
    async fn refresh_pending_count(&self, family: &str) -> SyncResult<()> {
        let count = self.tracker.pending(family, None).await?.len();
        self.metadata.set_status(family, |s| s.pending_count = count);
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    async fn run_pipeline(
        &self,
        op_id: &str,
        family: &str,
        policy: &SyncPolicy,
        since: DateTime<Utc>,
        op_started_at: DateTime<Utc>,
    ) -> SyncResult<(usize, usize, usize, usize, Vec<String>, Vec<SyncConflict>)> {
        if self.registry.is_cancelled(op_id) {
            return Err(SyncError::Cancelled);
        }
        let local = self.tracker.pending(family, None).await?;
        let remote = self.remote.fetch_modified_after(family, since, None).await?;

        if self.registry.is_cancelled(op_id) {
            return Err(SyncError::Cancelled);
        }
        let (conflicts, aligned) = self.detector.detect(family, &local, &remote)?;
        let mut aligned_ids: HashSet<&str> = HashSet::new();
        if !aligned.is_empty() && policy.allow_version_align_writeback {
            let local_by_id: HashMap<&str, &Snapshot> = local.iter().map(|s| (s.sync_id.as_str(), s)).collect();
            let mut bumped = Vec::with_capacity(aligned.len());
            for (sync_id, target_version) in &aligned {
                if let Some(existing) = local_by_id.get(sync_id.as_str()) {
                    let mut s = (*existing).clone();
                    s.version = *target_version;
                    s.last_synced = Some(op_started_at);
                    bumped.push(s);
                    aligned_ids.insert(sync_id.as_str());
                }
            }
            if !bumped.is_empty() {
                self.store.apply_remote(family, bumped).await?;
                info!(family, count = aligned_ids.len(), "version-align write-back applied");
            }
        }

        let (auto, manual) = self.resolver.partition(conflicts);
        let conflicts_total = auto.len() + manual.len();
        let conflicts_manual = manual.len();
        let resolved = self.resolver.auto_resolve_batch(family, &auto, policy.max_batch_size_conflicts);

        let manual_ids: HashSet<&str> = manual.iter().map(|c| c.sync_id().as_str()).collect();

        let mut to_upload: Vec<Snapshot> = local
            .iter()
            .filter(|s| !manual_ids.contains(s.sync_id.as_str()) && !aligned_ids.contains(s.sync_id.as_str()))
            .cloned()
            .collect();
        let mut to_apply: Vec<Snapshot> = remote
            .iter()
            .filter(|s| !manual_ids.contains(s.sync_id.as_str()))
            .cloned()
            .collect();

        for (conflict, outcome) in auto.iter().zip(resolved.iter().map(|(_, r)| r)) {
            if let Ok(resolution) = outcome {
                apply_resolution(conflict, resolution, &mut to_upload, &mut to_apply);
            }
        }

        if self.registry.is_cancelled(op_id) {
            return Err(SyncError::Cancelled);
        }
        let (uploaded, mut errors) = self.upload(family, &to_upload, policy).await?;

        if self.registry.is_cancelled(op_id) {
            let uploaded_ids: Vec<_> = to_upload.iter().take(uploaded).map(|s| s.sync_id.clone()).collect();
            self.store.mark_synced(family, &uploaded_ids, op_started_at).await?;
            return Err(SyncError::Cancelled);
        }

        let downloaded = self.download(family, &to_apply, op_started_at, &mut errors).await?;

        let uploaded_ids: Vec<_> = to_upload.iter().take(uploaded).map(|s| s.sync_id.clone()).collect();
        self.store.mark_synced(family, &uploaded_ids, op_started_at).await?;
        self.metadata.set_last_sync_at(family, op_started_at);

        info!(family, uploaded, downloaded, conflicts_total, "sync pipeline completed");
        Ok((uploaded, downloaded, conflicts_total, conflicts_manual, errors, manual))
    }

    async fn upload(&self, family: &str, snapshots: &[Snapshot], policy: &SyncPolicy) -> SyncResult<(usize, Vec<String>)> {
        let mut uploaded = 0;
        let mut errors = Vec::new();
        for batch in snapshots.chunks(policy.batch_size.max(1)) {
            let mut attempt = 0;
            loop {
                match self.remote.upsert_batch(family, batch).await {
                    Ok(outcomes) => {
                        for outcome in &outcomes {
                            if outcome.schema_incompatible {
                                return Err(SyncError::SchemaIncompatible {
                                    family: family.to_string(),
                                    differences: vec![outcome.error.clone().unwrap_or_default()],
                                });
                            }
                            if outcome.accepted {
                                uploaded += 1;
                            } else if let Some(err) = &outcome.error {
                                errors.push(format!("{}: {}", outcome.sync_id, err));
                            }
                        }
                        break;
                    }
                    Err(err) if attempt < policy.retry.max_retries => {
                        warn!(family, attempt, error = %err, "upload batch failed, retrying");
                        tokio::time::sleep(policy.retry.delay_for_attempt(attempt)).await;
                        attempt += 1;
                    }
                    Err(err) => {
                        errors.push(err.to_string());
                        break;
                    }
                }
            }
        }
        Ok((uploaded, errors))
    }

    async fn download(
        &self,
        family: &str,
        snapshots: &[Snapshot],
        op_started_at: DateTime<Utc>,
        errors: &mut Vec<String>,
    ) -> SyncResult<usize> {
        if snapshots.is_empty() {
            return Ok(0);
        }
        let outcomes = self.store.apply_remote(family, snapshots.to_vec()).await?;
        let mut applied_ids = Vec::new();
        for outcome in &outcomes {
            if outcome.applied {
                applied_ids.push(outcome.sync_id.clone());
            } else if let Some(err) = &outcome.error {
                errors.push(format!("{}: {}", outcome.sync_id, err));
            }
        }
        let count = applied_ids.len();
        self.store.mark_synced(family, &applied_ids, op_started_at).await?;
        Ok(count)
    }
}

fn apply_resolution(
    conflict: &reconcile_core::SyncConflict,
    resolution: &reconcile_core::ConflictResolution,
    to_upload: &mut Vec<Snapshot>,
    to_apply: &mut Vec<Snapshot>,
) {
    let Some(payload) = resolution.resolved_payload.clone() else {
        return;
    };
    match resolution.chosen_version {
        ChosenVersion::Local => {
            if !to_upload.iter().any(|s| s.sync_id == *conflict.sync_id()) {
                let mut s = conflict.local.clone();
                s.payload = payload;
                to_upload.push(s);
            }
        }
        ChosenVersion::Remote | ChosenVersion::Merged => {
            let mut s = conflict.remote.clone();
            s.payload = payload;
            to_apply.retain(|existing| existing.sync_id != s.sync_id);
            to_upload.retain(|existing| existing.sync_id != s.sync_id);
            to_apply.push(s.clone());
            if matches!(resolution.chosen_version, ChosenVersion::Merged) {
                let mut upload_copy = s;
                upload_copy.version += 1;
                to_upload.push(upload_copy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reconcile_core::{Payload, RemoteUpsertOutcome};
    use reconcile_store_mem::MemoryStore;
    use std::collections::BTreeSet;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeRemote {
        records: AsyncMutex<std::collections::HashMap<String, Snapshot>>,
    }

    impl FakeRemote {
        fn new() -> Self {
            FakeRemote {
                records: AsyncMutex::new(std::collections::HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteCollaborator for FakeRemote {
        async fn upsert_batch(&self, _family: &str, snapshots: &[Snapshot]) -> SyncResult<Vec<RemoteUpsertOutcome>> {
            let mut records = self.records.lock().await;
            let mut out = Vec::new();
            for s in snapshots {
                records.insert(s.sync_id.clone(), s.clone());
                out.push(RemoteUpsertOutcome {
                    sync_id: s.sync_id.clone(),
                    accepted: true,
                    error: None,
                    schema_incompatible: false,
                });
            }
            Ok(out)
        }
        async fn delete(&self, _family: &str, id: &reconcile_core::SyncId) -> SyncResult<()> {
            self.records.lock().await.remove(id);
            Ok(())
        }
        async fn fetch(&self, _family: &str, id: &reconcile_core::SyncId) -> SyncResult<Option<Snapshot>> {
            Ok(self.records.lock().await.get(id).cloned())
        }
        async fn fetch_modified_after(
            &self,
            _family: &str,
            since: DateTime<Utc>,
            _limit: Option<usize>,
        ) -> SyncResult<Vec<Snapshot>> {
            Ok(self
                .records
                .lock()
                .await
                .values()
                .filter(|s| s.last_modified > since)
                .cloned()
                .collect())
        }
        async fn fetch_deleted(
            &self,
            _family: &str,
            _since: Option<DateTime<Utc>>,
            _limit: Option<usize>,
        ) -> SyncResult<Vec<Snapshot>> {
            Ok(vec![])
        }
        async fn table_exists(&self, _family: &str) -> SyncResult<bool> {
            Ok(true)
        }
    }

    fn manager(store: Arc<MemoryStore>, remote: Arc<FakeRemote>) -> SyncManager {
        SyncManager::new(
            store,
            remote,
            Arc::new(ConflictResolver::new(BTreeSet::new(), BTreeSet::new(), false, 30)),
            Arc::new(MetadataStore::new()),
            Arc::new(OperationRegistry::new(3)),
        )
    }

    #[tokio::test]
    async fn fresh_upload_with_empty_remote() {
        let store = Arc::new(MemoryStore::new());
        store.put_local("todos", Snapshot::new("1", "todos", Payload::new()));
        let remote = Arc::new(FakeRemote::new());
        let manager = manager(store.clone(), remote);

        let result = manager.full_sync("todos", &SyncPolicy::default(), None).await.unwrap();
        assert_eq!(result.uploaded, 1);
        assert_eq!(result.downloaded, 0);
        assert_eq!(result.conflicts_total, 0);

        let pending_after = store.fetch_pending("todos", None).await.unwrap();
        assert!(pending_after.is_empty());
    }

    #[tokio::test]
    async fn empty_family_succeeds_with_zeroes() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(FakeRemote::new());
        let manager = manager(store, remote);
        let result = manager.full_sync("todos", &SyncPolicy::default(), None).await.unwrap();
        assert_eq!(result.uploaded, 0);
        assert_eq!(result.downloaded, 0);
    }

    #[tokio::test]
    async fn duplicate_full_sync_rejected() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(FakeRemote::new());
        let registry = Arc::new(OperationRegistry::new(3));
        let manager = SyncManager::new(
            store,
            remote,
            Arc::new(ConflictResolver::new(BTreeSet::new(), BTreeSet::new(), false, 30)),
            Arc::new(MetadataStore::new()),
            registry.clone(),
        );

        let ctx = OperationContext::new(OperationType::Full, "todos", None);
        let _id = registry.register(ctx).unwrap();

        let err = manager.full_sync("todos", &SyncPolicy::default(), None).await.unwrap_err();
        assert!(matches!(err, SyncError::DuplicateOperation { .. }));
    }

    struct SlowRemote;

    #[async_trait]
    impl RemoteCollaborator for SlowRemote {
        async fn upsert_batch(&self, _family: &str, _snapshots: &[Snapshot]) -> SyncResult<Vec<RemoteUpsertOutcome>> {
            Ok(vec![])
        }
        async fn delete(&self, _family: &str, _id: &reconcile_core::SyncId) -> SyncResult<()> {
            Ok(())
        }
        async fn fetch(&self, _family: &str, _id: &reconcile_core::SyncId) -> SyncResult<Option<Snapshot>> {
            Ok(None)
        }
        async fn fetch_modified_after(
            &self,
            _family: &str,
            _since: DateTime<Utc>,
            _limit: Option<usize>,
        ) -> SyncResult<Vec<Snapshot>> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(vec![])
        }
        async fn fetch_deleted(
            &self,
            _family: &str,
            _since: Option<DateTime<Utc>>,
            _limit: Option<usize>,
        ) -> SyncResult<Vec<Snapshot>> {
            Ok(vec![])
        }
        async fn table_exists(&self, _family: &str) -> SyncResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn full_sync_times_out_when_pipeline_exceeds_policy_duration() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(SlowRemote);
        let manager = manager_with(store, remote);
        let mut policy = SyncPolicy::default();
        policy.max_sync_duration_secs = 0;

        let err = manager.full_sync("todos", &policy, None).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout));
    }

    fn manager_with(store: Arc<MemoryStore>, remote: Arc<dyn RemoteCollaborator>) -> SyncManager {
        SyncManager::new(
            store,
            remote,
            Arc::new(ConflictResolver::new(BTreeSet::new(), BTreeSet::new(), false, 30)),
            Arc::new(MetadataStore::new()),
            Arc::new(OperationRegistry::new(3)),
        )
    }

    #[tokio::test]
    async fn pending_count_reflects_actual_after_sync() {
        let store = Arc::new(MemoryStore::new());
        store.put_local("todos", Snapshot::new("1", "todos", Payload::new()));
        let remote = Arc::new(FakeRemote::new());
        let metadata = Arc::new(MetadataStore::new());
        let manager = SyncManager::new(
            store,
            remote,
            Arc::new(ConflictResolver::new(BTreeSet::new(), BTreeSet::new(), false, 30)),
            metadata.clone(),
            Arc::new(OperationRegistry::new(3)),
        );

        manager.full_sync("todos", &SyncPolicy::default(), None).await.unwrap();
        assert_eq!(metadata.get_status("todos").unwrap().pending_count, 0);
    }

    #[tokio::test]
    async fn incremental_sync_runs_incrementally_after_initial_full_sync() {
        let store = Arc::new(MemoryStore::new());
        store.put_local("todos", Snapshot::new("1", "todos", Payload::new()));
        let remote = Arc::new(FakeRemote::new());
        let manager = manager(store.clone(), remote);

        let full = manager.full_sync("todos", &SyncPolicy::default(), None).await.unwrap();
        assert_eq!(full.uploaded, 1);

        store.put_local("todos", Snapshot::new("2", "todos", Payload::new()));
        let incremental = manager
            .incremental_sync("todos", &SyncPolicy::default(), None)
            .await
            .unwrap();
        assert!(!incremental.fell_back_to_full);
        assert_eq!(incremental.uploaded, 1);
    }

    #[tokio::test]
    async fn version_align_write_back_persists_bumped_version() {
        let store = Arc::new(MemoryStore::new());
        let payload: Payload = [("title".to_string(), serde_json::json!("A"))].into_iter().collect();
        let local_snap = Snapshot::new("1", "todos", payload);
        store.put_local("todos", local_snap.clone());

        let remote = Arc::new(FakeRemote::new());
        let mut remote_snap = local_snap.clone();
        remote_snap.version = 9;
        remote.records.lock().await.insert(remote_snap.sync_id.clone(), remote_snap);

        let manager = manager(store.clone(), remote);
        let mut policy = SyncPolicy::default();
        policy.allow_version_align_writeback = true;

        manager.full_sync("todos", &policy, None).await.unwrap();

        let stored = store.fetch_by_sync_id("todos", &"1".to_string()).await.unwrap().unwrap();
        assert_eq!(stored.version, 9);
        assert!(!stored.needs_sync());
    }
}
