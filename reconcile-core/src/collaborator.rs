use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::snapshot::{Snapshot, SyncId};

/// Outcome of applying one remote snapshot to the local store (spec §6
/// `apply_remote(snapshots) -> per-record result`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub sync_id: SyncId,
    pub applied: bool,
    pub error: Option<String>,
}

/// The local record store contract (out of core scope; any ordered keyed
/// record store with schema reflection suffices, spec §1/§6).
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn fetch_pending(&self, family: &str, limit: Option<usize>) -> SyncResult<Vec<Snapshot>>;
    async fn fetch_by_sync_id(&self, family: &str, id: &SyncId) -> SyncResult<Option<Snapshot>>;
    async fn fetch_modified_after(
        &self,
        family: &str,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> SyncResult<Vec<Snapshot>>;
    async fn fetch_deleted(&self, family: &str, since: Option<DateTime<Utc>>) -> SyncResult<Vec<Snapshot>>;
    async fn apply_remote(&self, family: &str, snapshots: Vec<Snapshot>) -> SyncResult<Vec<ApplyOutcome>>;
    async fn mark_synced(&self, family: &str, ids: &[SyncId], at: DateTime<Utc>) -> SyncResult<()>;
    async fn mark_all_synced_for_family(&self, family: &str, at: DateTime<Utc>) -> SyncResult<()>;

    /// All live (non-deleted or deleted) snapshots for a family; used by
    /// the integrity validator and schema introspection. Not part of the
    /// minimal sync pipeline surface, but every reference store implements
    /// it so C7/C11 can reason about the whole table.
    async fn fetch_all(&self, family: &str) -> SyncResult<Vec<Snapshot>>;
}

/// Mutation batch accepted by the remote collaborator's upsert path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteUpsertOutcome {
    pub sync_id: SyncId,
    pub accepted: bool,
    pub error: Option<String>,
    pub schema_incompatible: bool,
}

/// The remote REST collaborator contract (spec §6). Wire format is JSON
/// records keyed the same as the local schema columns; timestamps ISO-8601
/// UTC, booleans native JSON — enforced by the transport implementation,
/// not by this trait.
#[async_trait]
pub trait RemoteCollaborator: Send + Sync {
    async fn upsert_batch(&self, family: &str, snapshots: &[Snapshot]) -> SyncResult<Vec<RemoteUpsertOutcome>>;
    async fn delete(&self, family: &str, id: &SyncId) -> SyncResult<()>;
    async fn fetch(&self, family: &str, id: &SyncId) -> SyncResult<Option<Snapshot>>;
    async fn fetch_modified_after(
        &self,
        family: &str,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> SyncResult<Vec<Snapshot>>;
    async fn fetch_deleted(
        &self,
        family: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> SyncResult<Vec<Snapshot>>;
    async fn table_exists(&self, family: &str) -> SyncResult<bool>;
}

/// Realtime change event payload (spec §6: `{type, table, new, old, timestamp}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub event_type: RealtimeEventType,
    pub table: String,
    pub new: Option<Snapshot>,
    pub old: Option<Snapshot>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealtimeEventType {
    Insert,
    Update,
    Delete,
}

/// The realtime change-stream contract (spec §6).
#[async_trait]
pub trait RealtimeCollaborator: Send + Sync {
    async fn subscribe(&self, family: &str) -> SyncResult<String>;
    async fn unsubscribe(&self, subscription_id: &str) -> SyncResult<()>;
    /// Receive the next event for any active subscription, or `None` if
    /// the underlying stream has closed (transport reconnect is handled
    /// by the realtime fan-in, not by this trait).
    async fn next_event(&self) -> SyncResult<Option<RealtimeEvent>>;
}

/// Session info returned by the auth collaborator (spec §6). The sync
/// engine never sees the token itself beyond this opaque struct, and never
/// persists it.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuthCollaborator: Send + Sync {
    async fn current_session(&self) -> SyncResult<Option<Session>>;
    async fn validate_session(&self) -> SyncResult<bool>;
}

#[async_trait]
pub trait SubscriptionCollaborator: Send + Sync {
    async fn validate_feature(&self, feature_name: &str, user: &str) -> SyncResult<bool>;
}
