//! Snapshot model, shared data model, error taxonomy, and the outbound
//! collaborator traits for the reconcile sync engine. `reconcile-engine`
//! builds the sync pipeline on top of these; every other crate in the
//! workspace programs against the traits here rather than each other.

pub mod collaborator;
pub mod error;
pub mod model;
pub mod snapshot;

pub use collaborator::{
    ApplyOutcome, AuthCollaborator, LocalStore, RealtimeCollaborator, RealtimeEvent, RealtimeEventType,
    RemoteCollaborator, RemoteUpsertOutcome, Session, SubscriptionCollaborator,
};
pub use error::{ExitCode, SyncError, SyncResult};
pub use model::{
    ChosenVersion, ConflictPriority, ConflictResolution, ConflictResolutionRecord, ConflictType,
    EntitySyncStatus, FullSyncResult, IncrementalSyncResult, NetworkLink, OperationContext, OperationType,
    ResolutionStrategy, RetryPolicy, RuntimeConditions, SyncConflict, SyncEventKind, SyncFrequency, SyncPolicy,
    SyncState,
};
pub use snapshot::{content_hash, equal_content, Payload, Snapshot, SyncId};
