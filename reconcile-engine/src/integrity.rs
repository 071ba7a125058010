//! C7: post-sync invariant checks across the local store and metadata.
//! Reports violations; never auto-fixes (spec §4.7).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reconcile_core::{content_hash, LocalStore, SyncResult};
use serde::{Deserialize, Serialize};

use crate::change_tracker::ChangeTracker;
use crate::conflict_resolver::ConflictResolver;
use crate::metadata_store::MetadataStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncIntegrityResult {
    pub violations: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

pub struct IntegrityValidator {
    store: Arc<dyn LocalStore>,
    resolver: Arc<ConflictResolver>,
}

impl IntegrityValidator {
    pub fn new(store: Arc<dyn LocalStore>, resolver: Arc<ConflictResolver>) -> Self {
        IntegrityValidator { store, resolver }
    }

    pub async fn check(&self, family: &str, metadata: &MetadataStore) -> SyncResult<SyncIntegrityResult> {
        let now = Utc::now();
        let mut violations = Vec::new();
        let all = self.store.fetch_all(family).await?;

        let mut seen = HashSet::new();
        for snapshot in &all {
            if !seen.insert(&snapshot.sync_id) {
                violations.push(format!("duplicate sync_id {}", snapshot.sync_id));
            }
            if let Some(last_synced) = snapshot.last_synced {
                if last_synced > now || last_synced > snapshot.last_modified {
                    violations.push(format!(
                        "sync_id {} has last_synced after now or last_modified",
                        snapshot.sync_id
                    ));
                }
            }
        }

        let tracker = ChangeTracker::new(self.store.clone());
        let pending_count = tracker.pending(family, None).await?.len();
        if let Some(status) = metadata.get_status(family) {
            if status.pending_count != pending_count {
                violations.push(format!(
                    "metadata pending_count {} does not match actual {}",
                    status.pending_count, pending_count
                ));
            }
        }

        for record in self.resolver.history(family, None) {
            let Some(resolution) = &record.resolution else { continue };
            let Some(resolved_payload) = &resolution.resolved_payload else { continue };
            let Some(current) = self.store.fetch_by_sync_id(family, &record.sync_id).await? else {
                continue;
            };
            let resolved_hash = content_hash(resolved_payload, current.is_deleted)?;
            let current_hash = content_hash(&current.payload, current.is_deleted)?;
            if resolved_hash != current_hash {
                violations.push(format!(
                    "sync_id {} still diverges from its recorded resolution ({:?})",
                    record.sync_id, resolution.chosen_version
                ));
            }
        }

        Ok(SyncIntegrityResult {
            violations,
            checked_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_core::{Payload, Snapshot};
    use reconcile_store_mem::MemoryStore;
    use std::collections::BTreeSet;

    fn test_resolver() -> Arc<ConflictResolver> {
        Arc::new(ConflictResolver::new(BTreeSet::new(), BTreeSet::new(), false, 30))
    }

    #[tokio::test]
    async fn clean_store_has_no_violations() {
        let store = Arc::new(MemoryStore::new());
        store.put_local("todos", Snapshot::new("a", "todos", Payload::new()));
        let metadata = MetadataStore::new();
        metadata.register("todos");
        metadata.set_status("todos", |s| s.pending_count = 1);

        let validator = IntegrityValidator::new(store, test_resolver());
        let result = validator.check("todos", &metadata).await.unwrap();
        assert!(result.violations.is_empty());
    }

    #[tokio::test]
    async fn stale_pending_count_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.put_local("todos", Snapshot::new("a", "todos", Payload::new()));
        let metadata = MetadataStore::new();
        metadata.register("todos");
        metadata.set_status("todos", |s| s.pending_count = 99);

        let validator = IntegrityValidator::new(store, test_resolver());
        let result = validator.check("todos", &metadata).await.unwrap();
        assert_eq!(result.violations.len(), 1);
    }

    #[tokio::test]
    async fn resolved_conflict_still_diverging_is_reported() {
        use reconcile_core::{ConflictPriority, ConflictType, ResolutionStrategy, SyncConflict};

        let store = Arc::new(MemoryStore::new());
        store.put_local("todos", Snapshot::new("a", "todos", Payload::new()));
        let metadata = MetadataStore::new();
        metadata.register("todos");
        metadata.set_status("todos", |s| s.pending_count = 1);

        let resolver = test_resolver();
        let local = Snapshot::new("a", "todos", Payload::new());
        let mut remote = local.clone();
        remote.payload.insert("title".to_string(), serde_json::json!("resolved value"));
        let conflict = SyncConflict::new("todos", local, remote, ConflictType::Data, BTreeSet::new(), ConflictPriority::Normal);
        resolver
            .resolve_one("todos", &conflict, ResolutionStrategy::RemoteWins, None)
            .unwrap();

        let validator = IntegrityValidator::new(store, resolver);
        let result = validator.check("todos", &metadata).await.unwrap();
        assert_eq!(result.violations.len(), 1);
    }
}
