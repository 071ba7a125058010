//! The public facade (spec §6 inbound operations). One `Engine` value owns
//! the wired graph of components — no global singletons, no manager-holds-
//! manager cycles; cross-component signals route through the `EventBus` the
//! engine owns rather than through direct references between components.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use reconcile_core::{
    AuthCollaborator, ConflictResolution, EntitySyncStatus, FullSyncResult, IncrementalSyncResult, LocalStore,
    Payload, RealtimeCollaborator, RemoteCollaborator, ResolutionStrategy, RuntimeConditions, SubscriptionCollaborator,
    SyncConflict, SyncError, SyncEventKind, SyncPolicy, SyncResult,
};
use tokio::sync::broadcast;

use crate::conflict_resolver::ConflictResolver;
use crate::events::EventBus;
use crate::integrity::{IntegrityValidator, SyncIntegrityResult};
use crate::metadata_store::MetadataStore;
use crate::policy_gate::EligibilityGate;
use crate::realtime::RealtimeFanIn;
use crate::registry::OperationRegistry;
use crate::schema::{FamilyDescriptor, SchemaDifference, SchemaIntrospector};
use crate::sync_manager::SyncManager;

pub struct Engine {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteCollaborator>,
    auth: Option<Arc<dyn AuthCollaborator>>,
    metadata: Arc<MetadataStore>,
    registry: Arc<OperationRegistry>,
    gate: EligibilityGate,
    resolver: Arc<ConflictResolver>,
    sync_manager: SyncManager,
    integrity: IntegrityValidator,
    schema: SchemaIntrospector,
    families: RwLock<HashMap<String, FamilyDescriptor>>,
    pending_conflicts: RwLock<HashMap<String, SyncConflict>>,
    events: EventBus,
    policy: RwLock<SyncPolicy>,
    realtime: Option<Arc<RealtimeFanIn>>,
}

pub struct EngineBuilder {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteCollaborator>,
    auth: Option<Arc<dyn AuthCollaborator>>,
    subscription: Option<Arc<dyn SubscriptionCollaborator>>,
    realtime: Option<Arc<dyn RealtimeCollaborator>>,
    policy: SyncPolicy,
    manual_only_fields: BTreeSet<String>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn LocalStore>, remote: Arc<dyn RemoteCollaborator>) -> Self {
        EngineBuilder {
            store,
            remote,
            auth: None,
            subscription: None,
            realtime: None,
            policy: SyncPolicy::default(),
            manual_only_fields: BTreeSet::new(),
        }
    }

    pub fn auth(mut self, auth: Arc<dyn AuthCollaborator>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn subscription(mut self, subscription: Arc<dyn SubscriptionCollaborator>) -> Self {
        self.subscription = Some(subscription);
        self
    }

    pub fn realtime(mut self, realtime: Arc<dyn RealtimeCollaborator>) -> Self {
        self.realtime = Some(realtime);
        self
    }

    pub fn policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn manual_only_fields(mut self, fields: BTreeSet<String>) -> Self {
        self.manual_only_fields = fields;
        self
    }

    pub fn build(self) -> Engine {
        let metadata = Arc::new(MetadataStore::new());
        let registry = Arc::new(OperationRegistry::new(self.policy.max_concurrent_syncs));
        let resolver = Arc::new(ConflictResolver::new(
            BTreeSet::new(),
            self.manual_only_fields,
            self.policy.allow_partial_manual_resolution,
            self.policy.history_retention_days,
        ));
        let sync_manager = SyncManager::new(
            self.store.clone(),
            self.remote.clone(),
            resolver.clone(),
            metadata.clone(),
            registry.clone(),
        );
        let realtime = self.realtime.map(|collaborator| {
            Arc::new(RealtimeFanIn::new(
                collaborator,
                self.policy.reconnect_max_attempts,
                self.policy.reconnect_delay_secs,
                self.policy.realtime_debounce_secs,
            ))
        });

        Engine {
            store: self.store.clone(),
            remote: self.remote,
            auth: self.auth,
            metadata,
            registry,
            gate: EligibilityGate::new(self.subscription),
            resolver: resolver.clone(),
            sync_manager,
            integrity: IntegrityValidator::new(self.store, resolver),
            schema: SchemaIntrospector::new(),
            families: RwLock::new(HashMap::new()),
            pending_conflicts: RwLock::new(HashMap::new()),
            events: EventBus::new(),
            policy: RwLock::new(self.policy),
            realtime,
        }
    }
}

impl Engine {
    pub fn builder(store: Arc<dyn LocalStore>, remote: Arc<dyn RemoteCollaborator>) -> EngineBuilder {
        EngineBuilder::new(store, remote)
    }

    pub fn register_model(&self, descriptor: FamilyDescriptor) {
        let family = descriptor.family.clone();
        self.families.write().insert(family.clone(), descriptor);
        self.metadata.register(&family);
    }

    pub fn unregister_model(&self, family: &str) {
        self.families.write().remove(family);
        self.metadata.unregister(family);
    }

    async fn current_user(&self) -> SyncResult<Option<String>> {
        match &self.auth {
            None => Ok(None),
            Some(auth) => match auth.current_session().await? {
                Some(session) if auth.validate_session().await? => Ok(Some(session.user)),
                Some(_) => Err(SyncError::NotAuthenticated),
                None => Ok(None),
            },
        }
    }

    pub async fn start_full_sync(&self, family: &str, conditions: RuntimeConditions) -> SyncResult<FullSyncResult> {
        let policy = self.policy.read().clone();
        let user = self.current_user().await?;
        self.gate
            .check_eligibility(user.as_deref(), family, &policy, conditions, true)
            .await?;
        let result = self.sync_manager.full_sync(family, &policy, user).await;
        if let Ok(r) = &result {
            self.register_manual_conflicts(family, &r.manual_conflicts);
        }
        self.emit_after_sync(family, &result);
        result
    }

    pub async fn start_incremental_sync(
        &self,
        family: &str,
        conditions: RuntimeConditions,
    ) -> SyncResult<IncrementalSyncResult> {
        let policy = self.policy.read().clone();
        let user = self.current_user().await?;
        self.gate
            .check_eligibility(user.as_deref(), family, &policy, conditions, true)
            .await?;
        let result = self.sync_manager.incremental_sync(family, &policy, user).await;
        if let Ok(r) = &result {
            self.register_manual_conflicts(family, &r.manual_conflicts);
        }
        match &result {
            Ok(r) => self.events.publish(SyncEventKind::Completion {
                family: family.to_string(),
                result: FullSyncResult {
                    uploaded: r.uploaded,
                    downloaded: r.downloaded,
                    conflicts_total: r.conflicts_total,
                    conflicts_manual: r.conflicts_manual,
                    duration_ms: r.duration_ms,
                    per_record_errors: r.per_record_errors.clone(),
                    manual_conflicts: r.manual_conflicts.clone(),
                },
            }),
            Err(e) => self.events.publish(SyncEventKind::Failure {
                family: family.to_string(),
                error: e.user_message(),
            }),
        }
        result
    }

    fn emit_after_sync(&self, family: &str, result: &SyncResult<FullSyncResult>) {
        match result {
            Ok(r) => self.events.publish(SyncEventKind::Completion {
                family: family.to_string(),
                result: r.clone(),
            }),
            Err(e) => self.events.publish(SyncEventKind::Failure {
                family: family.to_string(),
                error: e.user_message(),
            }),
        }
    }

    /// Surfaces manual-resolution conflicts detected during a sync pass: the
    /// caller reaches them through `resolve_conflict`/`manual_conflicts`
    /// rather than only through the event stream.
    fn register_manual_conflicts(&self, family: &str, conflicts: &[SyncConflict]) {
        if conflicts.is_empty() {
            return;
        }
        {
            let mut pending = self.pending_conflicts.write();
            for conflict in conflicts {
                pending.insert(conflict.id.clone(), conflict.clone());
            }
        }
        self.events.publish(SyncEventKind::Conflicts {
            family: family.to_string(),
            conflicts: conflicts.to_vec(),
        });
    }

    pub fn pause(&self) {
        for status in self.metadata.all_statuses() {
            self.metadata.set_status(&status.family, |s| s.state = reconcile_core::SyncState::Paused);
        }
    }

    pub fn resume(&self) {
        for status in self.metadata.all_statuses() {
            if matches!(status.state, reconcile_core::SyncState::Paused) {
                self.metadata.set_status(&status.family, |s| s.state = reconcile_core::SyncState::Idle);
            }
        }
    }

    pub fn stop(&self) {
        for status in self.metadata.all_statuses() {
            self.registry.cancel_family(&status.family);
        }
    }

    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        payload: Option<Payload>,
    ) -> SyncResult<ConflictResolution> {
        let conflict = self
            .pending_conflicts
            .write()
            .remove(conflict_id)
            .ok_or(SyncError::UnresolvableConflict {
                reason: "unknown conflict id".to_string(),
            })?;
        self.resolver.resolve_one(&conflict.family, &conflict, strategy, payload)
    }

    pub fn auto_resolve(&self, family: &str, conflicts: Vec<SyncConflict>) -> Vec<(String, SyncResult<ConflictResolution>)> {
        let (auto, manual) = self.resolver.partition(conflicts);
        for c in manual {
            self.pending_conflicts.write().insert(c.id.clone(), c);
        }
        let policy = self.policy.read();
        self.resolver.auto_resolve_batch(family, &auto, policy.max_batch_size_conflicts)
    }

    pub fn manual_conflicts(&self, family: Option<&str>) -> Vec<SyncConflict> {
        self.pending_conflicts
            .read()
            .values()
            .filter(|c| family.map(|f| c.family == f).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub async fn validate_schema(&self, family: &str) -> SyncResult<Vec<SchemaDifference>> {
        let descriptor = self
            .families
            .read()
            .get(family)
            .cloned()
            .ok_or(SyncError::StoreFailure {
                kind: format!("unknown family {family}"),
            })?;
        if !self.remote.table_exists(family).await? {
            return Ok(descriptor
                .expected_shape()
                .into_iter()
                .map(|c| SchemaDifference::FieldAdded { name: c.name, kind: c.kind })
                .collect());
        }
        Ok(self.schema.check_compatibility(&descriptor, &[]))
    }

    pub async fn migrate_schema(&self, family: &str) -> SyncResult<String> {
        let diffs = self.validate_schema(family).await?;
        Ok(self.schema.generate_migration_sql(family, &diffs))
    }

    pub async fn generate_migration_sql(&self, family: &str) -> SyncResult<String> {
        self.migrate_schema(family).await
    }

    pub fn get_status(&self, family: Option<&str>) -> Vec<EntitySyncStatus> {
        match family {
            Some(f) => self.metadata.get_status(f).into_iter().collect(),
            None => self.metadata.all_statuses(),
        }
    }

    pub async fn check_integrity(&self, family: &str) -> SyncResult<SyncIntegrityResult> {
        self.integrity.check(family, &self.metadata).await
    }

    /// Per spec §6 `observe(event_kind, handler)`; returns a receiver plus
    /// any currently-known last event of any kind (replay-on-subscribe).
    pub fn observe(&self) -> (Option<Vec<SyncEventKind>>, broadcast::Receiver<SyncEventKind>) {
        self.events.subscribe()
    }

    /// Subscribes `family` to the realtime change stream (C10) and drives
    /// every debounced trigger into an incremental sync. No-op if the
    /// engine was built without a realtime collaborator.
    pub fn start_realtime(self: &Arc<Self>, family: String) {
        let Some(fan_in) = self.realtime.clone() else {
            return;
        };
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let fan_in_family = family.clone();
        tokio::spawn(async move {
            fan_in.run_family(fan_in_family, tx).await;
        });
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(family) = rx.recv().await {
                let _ = engine.start_incremental_sync(&family, RuntimeConditions::default()).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnKind, ColumnSpec};
    use async_trait::async_trait;
    use reconcile_core::{RemoteUpsertOutcome, Snapshot, SyncId};
    use reconcile_store_mem::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct EmptyRemote {
        table_exists: AtomicBool,
    }

    #[async_trait]
    impl RemoteCollaborator for EmptyRemote {
        async fn upsert_batch(&self, _family: &str, snapshots: &[Snapshot]) -> SyncResult<Vec<RemoteUpsertOutcome>> {
            Ok(snapshots
                .iter()
                .map(|s| RemoteUpsertOutcome {
                    sync_id: s.sync_id.clone(),
                    accepted: true,
                    error: None,
                    schema_incompatible: false,
                })
                .collect())
        }
        async fn delete(&self, _family: &str, _id: &SyncId) -> SyncResult<()> {
            Ok(())
        }
        async fn fetch(&self, _family: &str, _id: &SyncId) -> SyncResult<Option<Snapshot>> {
            Ok(None)
        }
        async fn fetch_modified_after(
            &self,
            _family: &str,
            _since: chrono::DateTime<Utc>,
            _limit: Option<usize>,
        ) -> SyncResult<Vec<Snapshot>> {
            Ok(vec![])
        }
        async fn fetch_deleted(
            &self,
            _family: &str,
            _since: Option<chrono::DateTime<Utc>>,
            _limit: Option<usize>,
        ) -> SyncResult<Vec<Snapshot>> {
            Ok(vec![])
        }
        async fn table_exists(&self, _family: &str) -> SyncResult<bool> {
            Ok(self.table_exists.load(Ordering::SeqCst))
        }
    }

    fn engine() -> Engine {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let remote: Arc<dyn RemoteCollaborator> = Arc::new(EmptyRemote {
            table_exists: AtomicBool::new(false),
        });
        Engine::builder(store, remote).build()
    }

    #[tokio::test]
    async fn full_sync_on_empty_family_succeeds_with_zeroes() {
        let engine = engine();
        engine.register_model(FamilyDescriptor {
            family: "todos".to_string(),
            properties: vec![ColumnSpec {
                name: "title".to_string(),
                kind: ColumnKind::Text,
                nullable: true,
            }],
        });
        let result = engine.start_full_sync("todos", RuntimeConditions::default()).await.unwrap();
        assert_eq!(result.uploaded, 0);
        assert_eq!(result.downloaded, 0);
    }

    #[tokio::test]
    async fn validate_schema_reports_all_fields_added_for_new_table() {
        let engine = engine();
        engine.register_model(FamilyDescriptor {
            family: "todos".to_string(),
            properties: vec![ColumnSpec {
                name: "priority".to_string(),
                kind: ColumnKind::Int,
                nullable: true,
            }],
        });
        let diffs = engine.validate_schema("todos").await.unwrap();
        assert!(diffs.iter().any(|d| matches!(d, SchemaDifference::FieldAdded { name, .. } if name == "priority")));
    }

    #[tokio::test]
    async fn second_full_sync_on_busy_family_is_rejected() {
        let engine = engine();
        engine.register_model(FamilyDescriptor {
            family: "todos".to_string(),
            properties: vec![],
        });
        let blocking_ctx = reconcile_core::OperationContext::new(reconcile_core::OperationType::Full, "todos", None);
        engine.registry.register(blocking_ctx).unwrap();

        let err = engine
            .start_full_sync("todos", RuntimeConditions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DuplicateOperation { .. }));
    }
}
