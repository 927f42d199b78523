//! # packsync-core
//!
//! The reconciliation and versioning engine for packsync.
//!
//! A pack is a declarative description of a deployable platform: its
//! components, their relations and per-environment overrides. This crate
//! turns a set of pack definitions into a versioned graph of CIs and
//! relations inside a [`ResourceStore`].
//!
//! ## Components
//!
//! - `version` → decides which version an upload corresponds to
//! - `sweep` → marks entities a mutable version no longer declares
//! - `reconcile` → upserts the graph of one environment
//! - `orchestrator` → runs the above for every pack, with rollback
//!
//! ## Architectural Constraints
//!
//! - Deterministic: `BTreeMap` everywhere, sequential ids, canonical
//!   signatures
//! - Nothing is ever physically removed by a sync; removal is a state
//! - NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod docs;
pub mod orchestrator;
pub mod pack;
pub mod primitives;
pub mod reconcile;
pub mod report;
pub mod schema;
pub mod storage;
pub mod store;
pub mod sweep;
pub mod types;
pub mod version;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AttrMap, Attributes, Ci, CiId, CiKey, EntityState, PackSyncError, Relation, RelationId,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use docs::{DocPublisher, NoopDocPublisher, RecordingDocPublisher};
pub use orchestrator::{PackSync, RunMode, SyncConfig};
pub use pack::{EnvironmentSpec, PackDefinition, ResourceOverride, ResourceSpec};
pub use reconcile::{Scope, reconcile};
pub use report::{EnvironmentReport, ItemFailure, ItemKind, PackOutcome, PackReport, RunReport, SweepReport};
pub use schema::{AttributeSchema, SchemaRegistry};
pub use store::{CiQuery, Direction, MemoryStore, RelationFilter, ResourceStore};
pub use sweep::sweep;
pub use version::{
    PublishPlan, Resolution, SkipReason, VersionFlags, VersionMode, VersionResolver, VersionSpec,
    compare_versions,
};

// =============================================================================
// RE-EXPORTS: Storage (from storage module)
// =============================================================================

pub use storage::RedbStore;
