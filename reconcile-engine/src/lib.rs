//! Sync pipeline orchestration built on `reconcile_core`'s snapshot model,
//! error taxonomy, and collaborator traits. `Engine` is the single
//! construction point; every other type here is a component it wires
//! together, never a free-standing singleton.

pub mod change_tracker;
pub mod conflict_detector;
pub mod conflict_resolver;
pub mod engine;
pub mod events;
pub mod integrity;
pub mod metadata_store;
pub mod policy_gate;
pub mod realtime;
pub mod registry;
pub mod schema;
pub mod sync_manager;

pub use change_tracker::ChangeTracker;
pub use conflict_detector::ConflictDetector;
pub use conflict_resolver::ConflictResolver;
pub use engine::{Engine, EngineBuilder};
pub use events::EventBus;
pub use integrity::{IntegrityValidator, SyncIntegrityResult};
pub use metadata_store::MetadataStore;
pub use policy_gate::EligibilityGate;
pub use realtime::{ConnectionState, RealtimeFanIn};
pub use registry::OperationRegistry;
pub use schema::{ColumnKind, ColumnSpec, FamilyDescriptor, SchemaDifference, SchemaIntrospector};
pub use sync_manager::SyncManager;
