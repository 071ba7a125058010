use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::{Payload, Snapshot, SyncId};

/// Sync operation kind (spec §3 `OperationContext.type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Full,
    Incremental,
    Upload,
    Download,
}

/// Lifecycle state of an `EntitySyncStatus` (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Idle,
    Preparing,
    Syncing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// Per-entity sync status (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySyncStatus {
    pub family: String,
    pub pending_count: usize,
    pub last_error: Option<String>,
    pub state: SyncState,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub last_incremental_sync_at: Option<DateTime<Utc>>,
}

impl EntitySyncStatus {
    pub fn new(family: impl Into<String>) -> Self {
        EntitySyncStatus {
            family: family.into(),
            pending_count: 0,
            last_error: None,
            state: SyncState::Idle,
            last_full_sync_at: None,
            last_incremental_sync_at: None,
        }
    }
}

/// Conflict kind (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictType {
    Data,
    Delete,
    Version,
    Schema,
    Permission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConflictPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// A detected conflict between a local and remote snapshot for the same
/// `sync_id` (spec §3/§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: String,
    pub family: String,
    pub local: Snapshot,
    pub remote: Snapshot,
    pub conflict_type: ConflictType,
    pub conflicted_fields: BTreeSet<String>,
    pub priority: ConflictPriority,
    pub detected_at: DateTime<Utc>,
}

impl SyncConflict {
    pub fn new(
        family: impl Into<String>,
        local: Snapshot,
        remote: Snapshot,
        conflict_type: ConflictType,
        conflicted_fields: BTreeSet<String>,
        priority: ConflictPriority,
    ) -> Self {
        SyncConflict {
            id: Uuid::new_v4().to_string(),
            family: family.into(),
            local,
            remote,
            conflict_type,
            conflicted_fields,
            priority,
            detected_at: Utc::now(),
        }
    }

    pub fn sync_id(&self) -> &SyncId {
        &self.local.sync_id
    }
}

/// Conflict resolution strategy (spec §3/§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    LocalWins,
    RemoteWins,
    LastWriteWins,
    Merge,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChosenVersion {
    Local,
    Remote,
    Merged,
}

/// The outcome of resolving a single conflict (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub conflict_id: String,
    pub strategy: ResolutionStrategy,
    pub resolved_payload: Option<Payload>,
    pub chosen_version: ChosenVersion,
    pub confidence: f64,
    pub was_automatic: bool,
    pub explanation: String,
}

/// An append-only history record of a resolution attempt (success or
/// failure), kept in a bounded FIFO log (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolutionRecord {
    pub conflict_id: String,
    pub family: String,
    pub sync_id: SyncId,
    pub resolution: Option<ConflictResolution>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A running or completed sync operation (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    pub id: String,
    pub operation_type: OperationType,
    pub family: String,
    pub requesting_user: Option<String>,
    pub started_at: DateTime<Utc>,
    pub status: SyncState,
}

impl OperationContext {
    pub fn new(operation_type: OperationType, family: impl Into<String>, requesting_user: Option<String>) -> Self {
        OperationContext {
            id: Uuid::new_v4().to_string(),
            operation_type,
            family: family.into(),
            requesting_user,
            started_at: Utc::now(),
            status: SyncState::Preparing,
        }
    }

    /// The registry admission uniqueness key (spec glossary: "fingerprint").
    pub fn fingerprint(&self) -> (String, OperationType) {
        (self.family.clone(), self.operation_type)
    }
}

/// Network link kind reported by the host runtime, consulted by the
/// eligibility gate's `wifi_only` check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkLink {
    None,
    Wifi,
    Cellular,
    Other,
}

/// Sync frequency mode (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncFrequency {
    Manual,
    OnChange,
    Interval { seconds: u64 },
    Automatic,
}

impl Default for SyncFrequency {
    fn default() -> Self {
        SyncFrequency::Automatic
    }
}

fn default_true() -> bool {
    true
}

/// Host-supplied runtime conditions consulted by the eligibility gate.
/// External collaborators report these; the gate never inspects hardware
/// itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConditions {
    pub link: Option<NetworkLink>,
    pub is_background: bool,
    pub battery_level: Option<f32>,
}

/// Retry/backoff policy for individual record upserts (spec §4.6/§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 200,
            multiplier: 2.0,
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return Duration::from_millis(self.base_delay_ms);
        }
        let factor = self.multiplier.powi(attempt as i32);
        Duration::from_millis((self.base_delay_ms as f64 * factor) as u64)
    }
}

/// The full sync policy / eligibility configuration (spec §3/§6/§8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPolicy {
    pub enabled: bool,
    pub wifi_only: bool,
    pub allow_background_sync: bool,
    pub pause_on_low_battery: bool,
    pub minimum_battery_level: f32,
    pub frequency: SyncFrequency,
    pub included_entities: BTreeSet<String>,
    pub excluded_entities: BTreeSet<String>,
    pub batch_size: usize,
    pub max_sync_duration_secs: u64,
    pub retry: RetryPolicy,
    pub required_features: BTreeSet<String>,
    pub max_concurrent_syncs: usize,
    pub max_batch_size_conflicts: usize,
    pub history_retention_days: i64,
    pub reconnect_max_attempts: u32,
    pub reconnect_delay_secs: u64,
    pub realtime_debounce_secs: u64,
    #[serde(default)]
    pub allow_partial_manual_resolution: bool,
    #[serde(default = "default_true")]
    pub allow_version_align_writeback: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy {
            enabled: true,
            wifi_only: false,
            allow_background_sync: true,
            pause_on_low_battery: true,
            minimum_battery_level: 0.15,
            frequency: SyncFrequency::Automatic,
            included_entities: BTreeSet::new(),
            excluded_entities: BTreeSet::new(),
            batch_size: 100,
            max_sync_duration_secs: 120,
            retry: RetryPolicy::default(),
            required_features: BTreeSet::new(),
            max_concurrent_syncs: 3,
            max_batch_size_conflicts: 50,
            history_retention_days: 30,
            reconnect_max_attempts: 10,
            reconnect_delay_secs: 5,
            realtime_debounce_secs: 1,
            allow_partial_manual_resolution: false,
            allow_version_align_writeback: true,
        }
    }
}

impl SyncPolicy {
    /// Whether `family` is admitted by the include/exclude filters: empty
    /// `included_entities` means all families are included (spec §4.8).
    pub fn admits_family(&self, family: &str) -> bool {
        if self.excluded_entities.contains(family) {
            return false;
        }
        self.included_entities.is_empty() || self.included_entities.contains(family)
    }
}

/// Result of a full sync operation (spec §4.6 / §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullSyncResult {
    pub uploaded: usize,
    pub downloaded: usize,
    pub conflicts_total: usize,
    pub conflicts_manual: usize,
    pub duration_ms: u64,
    pub per_record_errors: Vec<String>,
    /// Conflicts requiring manual resolution, surfaced so the caller can
    /// drive `Engine::resolve_conflict` (spec §4.5).
    pub manual_conflicts: Vec<SyncConflict>,
}

/// Result of an incremental sync operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalSyncResult {
    pub uploaded: usize,
    pub downloaded: usize,
    pub conflicts_total: usize,
    pub conflicts_manual: usize,
    pub duration_ms: u64,
    pub fell_back_to_full: bool,
    pub per_record_errors: Vec<String>,
    pub manual_conflicts: Vec<SyncConflict>,
}

/// Observer event kinds (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEventKind {
    Status(EntitySyncStatus),
    Progress { family: String, uploaded: usize, downloaded: usize },
    Completion { family: String, result: FullSyncResult },
    Failure { family: String, error: String },
    Conflicts { family: String, conflicts: Vec<SyncConflict> },
}
