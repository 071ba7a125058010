use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// A globally unique, device-stable record identity.
pub type SyncId = String;

/// A property bag carrying the domain record. Deterministic iteration order
/// is not assumed anywhere outside of `content_hash` canonicalization.
pub type Payload = BTreeMap<String, Value>;

/// The canonical sync unit (spec §3). Two snapshots with equal
/// `content_hash` have equal semantic content; `version`, `last_modified`,
/// `last_synced`, and `sync_id` are metadata, excluded from the hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub sync_id: SyncId,
    pub table_name: String,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    pub last_synced: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub payload: Payload,
}

impl Snapshot {
    pub fn new(sync_id: impl Into<String>, table_name: impl Into<String>, payload: Payload) -> Self {
        let now = Utc::now();
        Snapshot {
            sync_id: sync_id.into(),
            table_name: table_name.into(),
            version: 1,
            last_modified: now,
            last_synced: None,
            is_deleted: false,
            payload,
        }
    }

    /// `needs_sync ⇔ last_synced is absent OR last_modified > last_synced`.
    pub fn needs_sync(&self) -> bool {
        match self.last_synced {
            None => true,
            Some(synced) => self.last_modified > synced,
        }
    }

    /// Apply a local content mutation: bumps `version` and `last_modified`
    /// only if the resulting content hash actually changes (idempotent
    /// writes must not bump `version`, spec §4.1).
    pub fn apply_mutation(&mut self, payload: Payload, is_deleted: bool) -> SyncResult<()> {
        let before = content_hash(&self.payload, self.is_deleted)?;
        self.payload = payload;
        self.is_deleted = is_deleted;
        let after = content_hash(&self.payload, self.is_deleted)?;
        if after != before {
            self.version += 1;
            self.last_modified = Utc::now();
        }
        Ok(())
    }

    /// Record a successful remote acknowledgement of the current version.
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced = Some(at);
    }

    pub fn content_hash(&self) -> SyncResult<String> {
        content_hash(&self.payload, self.is_deleted)
    }
}

/// Canonicalize a single JSON value for hashing: dates to UTC integer
/// milliseconds, floats rounded to 9 significant digits, nulls dropped.
fn canonicalize(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.is_f64() {
                    return Some(Value::String(round_significant(f, 9)));
                }
            }
            Some(value.clone())
        }
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                Some(Value::Number(dt.with_timezone(&Utc).timestamp_millis().into()))
            } else {
                Some(value.clone())
            }
        }
        Value::Array(items) => Some(Value::Array(items.iter().filter_map(canonicalize).collect())),
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                if let Some(cv) = canonicalize(v) {
                    out.insert(k.clone(), cv);
                }
            }
            Some(Value::Object(out.into_iter().collect()))
        }
        Value::Bool(_) => Some(value.clone()),
    }
}

fn round_significant(value: f64, digits: i32) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value}");
    }
    let magnitude = value.abs().log10().floor() as i32;
    let shift = digits - 1 - magnitude;
    let factor = 10f64.powi(shift);
    let rounded = (value * factor).round() / factor;
    format!("{rounded:.*}", (shift.max(0)) as usize)
}

/// Deterministic digest over the canonicalized content, excluding sync
/// metadata (spec §4.1). Stable under property map reordering and
/// null-vs-absent ambiguity; changes under any non-null content change or
/// a change to `is_deleted`.
pub fn content_hash(payload: &Payload, is_deleted: bool) -> SyncResult<String> {
    let mut canonical = BTreeMap::new();
    for (key, value) in payload {
        if let Some(cv) = canonicalize(value) {
            canonical.insert(key.clone(), cv);
        }
    }
    canonical.insert("__is_deleted".to_string(), Value::Bool(is_deleted));

    let serialized = serde_json::to_vec(&canonical)
        .map_err(|e| SyncError::InvalidPayload { property: e.to_string() })?;

    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    Ok(format!("{:016x}", hasher.finish()))
}

/// `equal_content(a, b)` — semantic content equality independent of version
/// drift, used by the conflict detector's version-align case.
pub fn equal_content(a: &Snapshot, b: &Snapshot) -> SyncResult<bool> {
    Ok(content_hash(&a.payload, a.is_deleted)? == content_hash(&b.payload, b.is_deleted)?
        && a.is_deleted == b.is_deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, Value)]) -> Payload {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn hash_stable_under_reordering() {
        let a = payload(&[("title", json!("A")), ("done", json!(false))]);
        let b = payload(&[("done", json!(false)), ("title", json!("A"))]);
        assert_eq!(content_hash(&a, false).unwrap(), content_hash(&b, false).unwrap());
    }

    #[test]
    fn hash_ignores_null_vs_absent() {
        let a = payload(&[("title", json!("A")), ("notes", Value::Null)]);
        let b = payload(&[("title", json!("A"))]);
        assert_eq!(content_hash(&a, false).unwrap(), content_hash(&b, false).unwrap());
    }

    #[test]
    fn hash_changes_on_content_or_tombstone() {
        let a = payload(&[("title", json!("A"))]);
        let b = payload(&[("title", json!("B"))]);
        assert_ne!(content_hash(&a, false).unwrap(), content_hash(&b, false).unwrap());
        assert_ne!(content_hash(&a, false).unwrap(), content_hash(&a, true).unwrap());
    }

    #[test]
    fn hash_excludes_metadata() {
        let mut s1 = Snapshot::new("id-1", "todos", payload(&[("title", json!("A"))]));
        let mut s2 = s1.clone();
        s2.version = 99;
        s2.last_modified = Utc::now() + chrono::Duration::days(1);
        assert_eq!(s1.content_hash().unwrap(), s2.content_hash().unwrap());
        s1.apply_mutation(payload(&[("title", json!("A"))]), false).unwrap();
        assert_eq!(s1.version, 1, "idempotent write must not bump version");
    }

    #[test]
    fn mutation_bumps_version_only_on_real_change() {
        let mut s = Snapshot::new("id-2", "todos", payload(&[("title", json!("A"))]));
        let before_hash = s.content_hash().unwrap();
        s.apply_mutation(payload(&[("title", json!("B"))]), false).unwrap();
        assert_eq!(s.version, 2);
        assert_ne!(s.content_hash().unwrap(), before_hash);
    }

    #[test]
    fn needs_sync_semantics() {
        let mut s = Snapshot::new("id-3", "todos", payload(&[("title", json!("A"))]));
        assert!(s.needs_sync());
        let t = s.last_modified;
        s.mark_synced(t);
        assert!(!s.needs_sync());
        s.apply_mutation(payload(&[("title", json!("C"))]), false).unwrap();
        assert!(s.needs_sync());
    }
}
