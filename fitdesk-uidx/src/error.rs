//! Error types for fitdesk-uidx
//!
//! Two layers:
//! - `StoreError`: one store call or batch failed
//! - `EngineError`: an engine entry point could not run at all
//!
//! Per-item write failures inside a batch run are not `EngineError`s; they
//! are counted in the run's outcome.

use crate::model::EntityId;
use crate::store::Expect;
use thiserror::Error;

/// Store-level failure
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite backend error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Index record changed since it was read
    #[error("Version conflict on index key '{key}': expected {expected}, found {found:?}")]
    VersionConflict {
        key: String,
        expected: Expect,
        found: Option<u64>,
    },

    /// Account targeted by a write does not exist
    #[error("Account not found: {0}")]
    EntityNotFound(EntityId),

    /// Batch larger than the store's atomic write limit
    #[error("Batch of {ops} operations exceeds limit of {limit}")]
    BatchTooLarge { ops: usize, limit: usize },

    /// Store refused the write
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// Store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Engine entry point failure
#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller lacks the role for the requested action; nothing was written
    #[error("Operator '{operator}' is not authorized to {action}")]
    Unauthorized { operator: String, action: String },

    /// Snapshot load or a non-itemized write failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Operator decision does not match the current data
    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    /// Engine configuration rejected
    #[error("Configuration error: {0}")]
    Config(#[from] fitdesk_common::Error),
}

/// Result type for engine entry points
pub type EngineResult<T> = std::result::Result<T, EngineError>;
