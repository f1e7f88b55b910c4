//! fitdesk-uidx library - Username index reconciliation
//!
//! Detects drift between account usernames and the username uniqueness
//! index, and repairs it: direct index fixes, operator-driven duplicate
//! resolution, and bulk re-normalization of malformed usernames.
//!
//! Flow: `analyzer` reads a snapshot and classifies issues, `resolver`
//! plans collision-free target state, `executor` turns each decision into
//! guarded store batches, `batch` runs them sequentially with pacing and
//! partial-failure accounting. `admin` wires it together behind an
//! authorization check.

pub mod admin;
pub mod analyzer;
pub mod batch;
pub mod error;
pub mod executor;
pub mod model;
pub mod normalize;
pub mod report;
pub mod resolver;
pub mod store;

pub use admin::UsernameAdmin;
pub use analyzer::{analyze, DiagnosticReport, DiagnosticSummary, Snapshot};
pub use batch::{BatchOutcome, BatchProgress, BatchRunner, FailurePolicy, ItemOutcome, Pacing};
pub use error::{EngineError, EngineResult, StoreError, StoreResult};
pub use executor::{ApplyOutcome, RepairExecutor};
pub use model::{AdminContext, Entity, EntityId, IndexRecord, Issue, Role};
pub use normalize::{is_canonical, normalize};
pub use report::{DeletionReport, MigrationReport, RepairReport, ResolutionReport};
pub use store::{
    BatchWriter, EntityStore, Expect, IndexStore, MemoryStore, SqliteStore, UsernameStore,
    WriteBatch, WriteOp,
};
