//! C4: pairwise local/remote comparison producing typed conflicts, per the
//! five-case algorithm: absent remote, equal content, delete xor, version
//! mismatch with divergent content, and version-equal-but-hash-differs.

use std::collections::{BTreeSet, HashMap};

use reconcile_core::{ConflictPriority, ConflictType, Snapshot, SyncConflict, SyncResult};

pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        ConflictDetector
    }

    /// Detects conflicts between `local` and `remote` snapshots of the same
    /// family. Returns `(conflicts, version_aligned)` — the latter are local
    /// snapshots whose version should be bumped to match remote with no
    /// remote write (spec case 2, "version-align").
    pub fn detect(
        &self,
        family: &str,
        local: &[Snapshot],
        remote: &[Snapshot],
    ) -> SyncResult<(Vec<SyncConflict>, Vec<(String, u64)>)> {
        let remote_by_id: HashMap<&str, &Snapshot> =
            remote.iter().map(|r| (r.sync_id.as_str(), r)).collect();

        let mut conflicts = Vec::new();
        let mut aligned = Vec::new();

        for l in local {
            let Some(r) = remote_by_id.get(l.sync_id.as_str()) else {
                continue;
            };
            let r = *r;

            let l_hash = reconcile_core::content_hash(&l.payload, l.is_deleted)?;
            let r_hash = reconcile_core::content_hash(&r.payload, r.is_deleted)?;

            if l_hash == r_hash && l.is_deleted == r.is_deleted {
                if r.version > l.version {
                    aligned.push((l.sync_id.clone(), r.version));
                }
                continue;
            }

            if l.is_deleted != r.is_deleted {
                conflicts.push(SyncConflict::new(
                    family,
                    l.clone(),
                    r.clone(),
                    ConflictType::Delete,
                    BTreeSet::new(),
                    ConflictPriority::High,
                ));
                continue;
            }

            if l.version != r.version && l.last_modified != r.last_modified {
                let fields = conflicted_fields(l, r);
                conflicts.push(SyncConflict::new(
                    family,
                    l.clone(),
                    r.clone(),
                    ConflictType::Data,
                    fields,
                    ConflictPriority::Normal,
                ));
                continue;
            }

            if l.version == r.version && l_hash != r_hash {
                conflicts.push(SyncConflict::new(
                    family,
                    l.clone(),
                    r.clone(),
                    ConflictType::Version,
                    BTreeSet::new(),
                    ConflictPriority::High,
                ));
            }
        }

        conflicts.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.detected_at.cmp(&b.detected_at)));
        Ok((conflicts, aligned))
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        ConflictDetector::new()
    }
}

fn conflicted_fields(local: &Snapshot, remote: &Snapshot) -> BTreeSet<String> {
    let mut fields = BTreeSet::new();
    for key in local.payload.keys().chain(remote.payload.keys()) {
        if local.payload.get(key) != remote.payload.get(key) {
            fields.insert(key.clone());
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use reconcile_core::Payload;

    fn payload(title: &str) -> Payload {
        [("title".to_string(), serde_json::json!(title))].into_iter().collect()
    }

    #[test]
    fn no_remote_means_no_conflict() {
        let local = vec![Snapshot::new("a", "todos", payload("A"))];
        let (conflicts, aligned) = ConflictDetector::new().detect("todos", &local, &[]).unwrap();
        assert!(conflicts.is_empty());
        assert!(aligned.is_empty());
    }

    #[test]
    fn equal_content_with_version_drift_aligns() {
        let mut local = Snapshot::new("a", "todos", payload("A"));
        let mut remote = local.clone();
        remote.version = local.version + 5;
        local.version = 1;

        let (conflicts, aligned) = ConflictDetector::new()
            .detect("todos", &[local], &[remote])
            .unwrap();
        assert!(conflicts.is_empty());
        assert_eq!(aligned.len(), 1);
        assert_eq!(aligned[0].1, 6);
    }

    #[test]
    fn delete_xor_is_delete_conflict() {
        let mut local = Snapshot::new("a", "todos", payload("A"));
        local.is_deleted = true;
        let remote = Snapshot::new("a", "todos", payload("B"));

        let (conflicts, _) = ConflictDetector::new().detect("todos", &[local], &[remote]).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert!(matches!(conflicts[0].conflict_type, ConflictType::Delete));
    }

    #[test]
    fn differing_versions_and_timestamps_is_data_conflict() {
        let mut local = Snapshot::new("a", "todos", payload("Local"));
        local.version = 2;
        local.last_modified = Utc::now();

        let mut remote = Snapshot::new("a", "todos", payload("Remote"));
        remote.version = 3;
        remote.last_modified = local.last_modified + Duration::seconds(5);

        let (conflicts, _) = ConflictDetector::new().detect("todos", &[local], &[remote]).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert!(matches!(conflicts[0].conflict_type, ConflictType::Data));
        assert!(conflicts[0].conflicted_fields.contains("title"));
    }

    #[test]
    fn equal_versions_differing_hash_is_version_conflict() {
        let mut local = Snapshot::new("a", "todos", payload("Local"));
        let mut remote = Snapshot::new("a", "todos", payload("Remote"));
        remote.version = local.version;
        remote.last_modified = local.last_modified;
        local.version = remote.version;

        let (conflicts, _) = ConflictDetector::new().detect("todos", &[local], &[remote]).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert!(matches!(conflicts[0].conflict_type, ConflictType::Version));
    }
}
