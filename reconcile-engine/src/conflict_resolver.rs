//! C5: strategy dispatch, auto/manual partitioning, batching, and a bounded
//! resolution history. Manual-only fields and the "manual payload must be
//! complete" rule are conservative per spec §9's open question: partial
//! payloads are rejected unless `allow_partial_manual_resolution` is set.

use std::collections::{BTreeSet, VecDeque};

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use reconcile_core::{
    ChosenVersion, ConflictPriority, ConflictResolution, ConflictResolutionRecord, ConflictType, Payload,
    ResolutionStrategy, SyncConflict, SyncError, SyncResult,
};

pub struct ConflictResolver {
    manual_only_fields: BTreeSet<String>,
    known_fields: BTreeSet<String>,
    allow_partial_manual_resolution: bool,
    history_retention_days: i64,
    history: Mutex<VecDeque<ConflictResolutionRecord>>,
}

impl ConflictResolver {
    pub fn new(
        known_fields: BTreeSet<String>,
        manual_only_fields: BTreeSet<String>,
        allow_partial_manual_resolution: bool,
        history_retention_days: i64,
    ) -> Self {
        ConflictResolver {
            manual_only_fields,
            known_fields,
            allow_partial_manual_resolution,
            history_retention_days,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Splits conflicts into (auto-resolvable, manual-required) per spec
    /// §4.5's partition rule.
    pub fn partition(&self, conflicts: Vec<SyncConflict>) -> (Vec<SyncConflict>, Vec<SyncConflict>) {
        let mut auto = Vec::new();
        let mut manual = Vec::new();
        for conflict in conflicts {
            let kind_eligible = matches!(conflict.conflict_type, ConflictType::Data | ConflictType::Version);
            let no_manual_only_field = conflict
                .conflicted_fields
                .is_disjoint(&self.manual_only_fields);
            let priority_ok = conflict.priority < ConflictPriority::Critical;
            if kind_eligible && no_manual_only_field && priority_ok {
                auto.push(conflict);
            } else {
                manual.push(conflict);
            }
        }
        (auto, manual)
    }

    /// Resolves a batch of auto-eligible conflicts with `last_write_wins`,
    /// in chunks of `max_batch_size`. A failure in one conflict never aborts
    /// the rest of the batch.
    pub fn auto_resolve_batch(
        &self,
        family: &str,
        conflicts: &[SyncConflict],
        max_batch_size: usize,
    ) -> Vec<(String, SyncResult<ConflictResolution>)> {
        let mut results = Vec::with_capacity(conflicts.len());
        for chunk in conflicts.chunks(max_batch_size.max(1)) {
            for conflict in chunk {
                let outcome = self.resolve(conflict, ResolutionStrategy::LastWriteWins, None);
                self.record(family, conflict, &outcome);
                results.push((conflict.id.clone(), outcome));
            }
        }
        results
    }

    pub fn resolve_one(
        &self,
        family: &str,
        conflict: &SyncConflict,
        strategy: ResolutionStrategy,
        payload: Option<Payload>,
    ) -> SyncResult<ConflictResolution> {
        let outcome = self.resolve(conflict, strategy, payload);
        self.record(family, conflict, &outcome);
        outcome
    }

    fn resolve(
        &self,
        conflict: &SyncConflict,
        strategy: ResolutionStrategy,
        payload: Option<Payload>,
    ) -> SyncResult<ConflictResolution> {
        match strategy {
            ResolutionStrategy::LocalWins => Ok(ConflictResolution {
                conflict_id: conflict.id.clone(),
                strategy,
                resolved_payload: Some(conflict.local.payload.clone()),
                chosen_version: ChosenVersion::Local,
                confidence: 1.0,
                was_automatic: true,
                explanation: "local copy kept as-is".to_string(),
            }),
            ResolutionStrategy::RemoteWins => Ok(ConflictResolution {
                conflict_id: conflict.id.clone(),
                strategy,
                resolved_payload: Some(conflict.remote.payload.clone()),
                chosen_version: ChosenVersion::Remote,
                confidence: 1.0,
                was_automatic: true,
                explanation: "remote copy kept as-is".to_string(),
            }),
            ResolutionStrategy::LastWriteWins => {
                let local_newer = match conflict.local.last_modified.cmp(&conflict.remote.last_modified) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => conflict.local.sync_id < conflict.remote.sync_id,
                };
                if local_newer {
                    Ok(ConflictResolution {
                        conflict_id: conflict.id.clone(),
                        strategy,
                        resolved_payload: Some(conflict.local.payload.clone()),
                        chosen_version: ChosenVersion::Local,
                        confidence: 0.9,
                        was_automatic: true,
                        explanation: "local last_modified is later".to_string(),
                    })
                } else {
                    Ok(ConflictResolution {
                        conflict_id: conflict.id.clone(),
                        strategy,
                        resolved_payload: Some(conflict.remote.payload.clone()),
                        chosen_version: ChosenVersion::Remote,
                        confidence: 0.9,
                        was_automatic: true,
                        explanation: "remote last_modified is later".to_string(),
                    })
                }
            }
            ResolutionStrategy::Merge => {
                let mut merged = Payload::new();
                let local_newer = conflict.local.last_modified >= conflict.remote.last_modified;
                for key in conflict.local.payload.keys().chain(conflict.remote.payload.keys()) {
                    if merged.contains_key(key) {
                        continue;
                    }
                    let l = conflict.local.payload.get(key);
                    let r = conflict.remote.payload.get(key);
                    let chosen = match (l, r) {
                        (Some(serde_json::Value::Array(la)), Some(serde_json::Value::Array(ra))) => {
                            serde_json::Value::Array(union_array_elements(la, ra))
                        }
                        (Some(lv), Some(rv)) if lv.is_null() && !rv.is_null() => rv.clone(),
                        (Some(lv), Some(rv)) if !lv.is_null() && rv.is_null() => lv.clone(),
                        (Some(lv), Some(_)) if local_newer => lv.clone(),
                        (Some(_), Some(rv)) => rv.clone(),
                        (Some(lv), None) => lv.clone(),
                        (None, Some(rv)) => rv.clone(),
                        (None, None) => continue,
                    };
                    merged.insert(key.clone(), chosen);
                }
                Ok(ConflictResolution {
                    conflict_id: conflict.id.clone(),
                    strategy,
                    resolved_payload: Some(merged),
                    chosen_version: ChosenVersion::Merged,
                    confidence: 0.75,
                    was_automatic: true,
                    explanation: "field-wise merge by recency".to_string(),
                })
            }
            ResolutionStrategy::Manual => {
                let payload = payload.ok_or_else(|| SyncError::ResolutionValidationFailed {
                    reason: "manual strategy requires a resolved_payload".to_string(),
                })?;
                if !self.allow_partial_manual_resolution {
                    let missing: Vec<_> = self
                        .known_fields
                        .iter()
                        .filter(|f| !payload.contains_key(*f))
                        .collect();
                    if !missing.is_empty() {
                        return Err(SyncError::ResolutionValidationFailed {
                            reason: format!("payload missing properties: {:?}", missing),
                        });
                    }
                }
                for key in payload.keys() {
                    if !self.known_fields.is_empty() && !self.known_fields.contains(key) {
                        return Err(SyncError::ResolutionValidationFailed {
                            reason: format!("unknown property {key}"),
                        });
                    }
                }
                Ok(ConflictResolution {
                    conflict_id: conflict.id.clone(),
                    strategy,
                    resolved_payload: Some(payload),
                    chosen_version: ChosenVersion::Merged,
                    confidence: 1.0,
                    was_automatic: false,
                    explanation: "caller-supplied manual resolution".to_string(),
                })
            }
        }
    }

    fn record(&self, family: &str, conflict: &SyncConflict, outcome: &SyncResult<ConflictResolution>) {
        let record = ConflictResolutionRecord {
            conflict_id: conflict.id.clone(),
            family: family.to_string(),
            sync_id: conflict.sync_id().clone(),
            resolution: outcome.as_ref().ok().cloned(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
            recorded_at: Utc::now(),
        };
        let mut history = self.history.lock();
        history.push_back(record);
        let cutoff = Utc::now() - Duration::days(self.history_retention_days);
        while history.front().map(|r| r.recorded_at < cutoff).unwrap_or(false) {
            history.pop_front();
        }
    }

    /// Resolution history for `family`, newest first, capped at `limit`.
    pub fn history(&self, family: &str, limit: Option<usize>) -> Vec<ConflictResolutionRecord> {
        let history = self.history.lock();
        let mut out: Vec<_> = history.iter().filter(|r| r.family == family).cloned().collect();
        out.reverse();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }
}

/// Unions two array-valued properties by value, local elements first, per
/// spec §4.5 case 2 ("for sets, take union"). Order beyond that is
/// insertion order; duplicates (by structural equality) are dropped.
fn union_array_elements(local: &[serde_json::Value], remote: &[serde_json::Value]) -> Vec<serde_json::Value> {
    let mut out = Vec::with_capacity(local.len() + remote.len());
    for v in local.iter().chain(remote.iter()) {
        if !out.contains(v) {
            out.push(v.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_core::{Payload, Snapshot};
    use std::collections::BTreeSet;

    fn conflict(conflict_type: ConflictType, priority: ConflictPriority) -> SyncConflict {
        let local = Snapshot::new("a", "todos", Payload::new());
        let remote = Snapshot::new("a", "todos", Payload::new());
        SyncConflict::new("todos", local, remote, conflict_type, BTreeSet::new(), priority)
    }

    #[test]
    fn partitions_critical_priority_as_manual() {
        let resolver = ConflictResolver::new(BTreeSet::new(), BTreeSet::new(), false, 30);
        let c = conflict(ConflictType::Data, ConflictPriority::Critical);
        let (auto, manual) = resolver.partition(vec![c]);
        assert!(auto.is_empty());
        assert_eq!(manual.len(), 1);
    }

    #[test]
    fn partitions_manual_only_field_as_manual() {
        let mut manual_only = BTreeSet::new();
        manual_only.insert("title".to_string());
        let resolver = ConflictResolver::new(BTreeSet::new(), manual_only, false, 30);
        let mut c = conflict(ConflictType::Data, ConflictPriority::Normal);
        c.conflicted_fields.insert("title".to_string());
        let (auto, manual) = resolver.partition(vec![c]);
        assert!(auto.is_empty());
        assert_eq!(manual.len(), 1);
    }

    #[test]
    fn manual_rejects_incomplete_payload_by_default() {
        let mut known = BTreeSet::new();
        known.insert("title".to_string());
        known.insert("done".to_string());
        let resolver = ConflictResolver::new(known, BTreeSet::new(), false, 30);
        let c = conflict(ConflictType::Data, ConflictPriority::Normal);
        let partial: Payload = [("title".to_string(), serde_json::json!("x"))].into_iter().collect();
        let result = resolver.resolve_one("todos", &c, ResolutionStrategy::Manual, Some(partial));
        assert!(matches!(result, Err(SyncError::ResolutionValidationFailed { .. })));
    }

    #[test]
    fn merge_unions_array_valued_properties() {
        let resolver = ConflictResolver::new(BTreeSet::new(), BTreeSet::new(), false, 30);
        let local = Snapshot::new(
            "a",
            "todos",
            [("tags".to_string(), serde_json::json!(["a", "b"]))].into_iter().collect(),
        );
        let remote = Snapshot::new(
            "a",
            "todos",
            [("tags".to_string(), serde_json::json!(["b", "c"]))].into_iter().collect(),
        );
        let c = SyncConflict::new("todos", local, remote, ConflictType::Data, BTreeSet::new(), ConflictPriority::Normal);
        let resolution = resolver.resolve_one("todos", &c, ResolutionStrategy::Merge, None).unwrap();
        let tags = resolution.resolved_payload.unwrap().remove("tags").unwrap();
        assert_eq!(tags, serde_json::json!(["a", "b", "c"]));
    }

    #[test]
    fn history_orders_newest_first() {
        let resolver = ConflictResolver::new(BTreeSet::new(), BTreeSet::new(), false, 30);
        let c1 = conflict(ConflictType::Data, ConflictPriority::Low);
        let c2 = conflict(ConflictType::Version, ConflictPriority::Low);
        resolver.resolve_one("todos", &c1, ResolutionStrategy::LocalWins, None).unwrap();
        resolver.resolve_one("todos", &c2, ResolutionStrategy::RemoteWins, None).unwrap();
        let history = resolver.history("todos", None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].conflict_id, c2.id);
    }
}
