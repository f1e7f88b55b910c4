//! Store seam for accounts and the username index
//!
//! The two collections are independent: nothing here spans both in a
//! transaction. The only atomic primitive is `BatchWriter::commit`, which
//! applies a bounded list of document writes all-or-nothing.
//!
//! Backends:
//! - `SqliteStore`: the admin database
//! - `MemoryStore`: in-process store with failure injection

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreResult;
use crate::model::{Entity, EntityId, IndexRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Precondition on an index key, checked when the write is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expect {
    /// Unconditional write
    Any,
    /// Key must not exist
    Absent,
    /// Key must exist at exactly this version
    Version(u64),
}

impl Expect {
    /// Expectation matching a record as it was last read
    pub fn from_current(current: Option<&IndexRecord>) -> Self {
        match current {
            Some(record) => Expect::Version(record.version),
            None => Expect::Absent,
        }
    }

    /// Whether the stored version satisfies this expectation
    pub fn matches(&self, found: Option<u64>) -> bool {
        match (self, found) {
            (Expect::Any, _) => true,
            (Expect::Absent, None) => true,
            (Expect::Version(v), Some(f)) => *v == f,
            _ => false,
        }
    }
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expect::Any => write!(f, "any"),
            Expect::Absent => write!(f, "absent"),
            Expect::Version(v) => write!(f, "version {}", v),
        }
    }
}

/// One document write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Set an account's username; fails if the account is gone
    SetUsername { entity_id: EntityId, username: String },
    /// Point an index key at an owner, creating it if needed
    UpsertIndex {
        username: String,
        owner_id: EntityId,
        expect: Expect,
    },
    /// Remove an index key; removing an absent key is a no-op when allowed by `expect`
    DeleteIndex { username: String, expect: Expect },
    /// Remove an account; removing an absent account is a no-op
    DeleteEntity { entity_id: EntityId },
}

impl WriteOp {
    /// Document key touched by this write, used for logging and failure injection
    pub fn key(&self) -> &str {
        match self {
            WriteOp::SetUsername { entity_id, .. } | WriteOp::DeleteEntity { entity_id } => {
                entity_id.as_str()
            }
            WriteOp::UpsertIndex { username, .. } | WriteOp::DeleteIndex { username, .. } => {
                username
            }
        }
    }
}

/// Ordered group of writes committed atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    operator: String,
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            ops: Vec::new(),
        }
    }

    pub fn single(operator: impl Into<String>, op: WriteOp) -> Self {
        let mut batch = Self::new(operator);
        batch.push(op);
        batch
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Account collection
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Every account
    async fn list_entities(&self) -> StoreResult<Vec<Entity>>;

    async fn get_entity(&self, id: &EntityId) -> StoreResult<Option<Entity>>;

    async fn update_username(&self, id: &EntityId, username: &str, operator: &str) -> StoreResult<()>;
}

/// Username index collection
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Every index record
    async fn list_index(&self) -> StoreResult<Vec<IndexRecord>>;

    async fn get_index(&self, username: &str) -> StoreResult<Option<IndexRecord>>;

    async fn upsert_index(
        &self,
        username: &str,
        owner_id: &EntityId,
        expect: Expect,
        operator: &str,
    ) -> StoreResult<()>;

    async fn delete_index(&self, username: &str, expect: Expect, operator: &str) -> StoreResult<()>;
}

/// Bounded atomic multi-document write
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Largest batch `commit` accepts
    fn max_batch_ops(&self) -> usize;

    /// Apply every write in `batch` or none of them
    async fn commit(&self, batch: &WriteBatch) -> StoreResult<()>;
}

/// Everything the engine needs from a backend
pub trait UsernameStore: EntityStore + IndexStore + BatchWriter {}

impl<T: EntityStore + IndexStore + BatchWriter> UsernameStore for T {}
