//! In-process store
//!
//! Holds both collections in ordered maps behind one mutex. Used by tests
//! and local experiments. Writes touching a key registered with
//! `fail_writes_for` are rejected, and `set_unavailable` makes reads fail,
//! so partial-failure paths can be exercised deterministically.

use super::{BatchWriter, EntityStore, Expect, IndexStore, WriteBatch, WriteOp};
use crate::error::{StoreError, StoreResult};
use crate::model::{Entity, EntityId, IndexRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
struct State {
    entities: BTreeMap<EntityId, Entity>,
    index: BTreeMap<String, IndexRecord>,
}

/// Store backed by in-memory maps
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    failing_keys: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
    commits: AtomicUsize,
    max_batch_ops: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(20)
    }
}

impl MemoryStore {
    pub fn new(max_batch_ops: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            failing_keys: Mutex::new(HashSet::new()),
            unavailable: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
            max_batch_ops,
        }
    }

    /// Seed an account directly, bypassing the index
    pub fn insert_entity(&self, entity: Entity) {
        self.lock().entities.insert(entity.id.clone(), entity);
    }

    /// Seed an index record directly, bypassing version checks
    pub fn insert_index(&self, record: IndexRecord) {
        self.lock().index.insert(record.username.clone(), record);
    }

    /// Reject every later batch that touches `key` (account id or index key)
    pub fn fail_writes_for(&self, key: &str) {
        self.failing_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Make list and get calls fail as if the backend were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of batches successfully committed
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Current username of an account (test convenience)
    pub fn username_of(&self, id: &str) -> Option<String> {
        self.lock()
            .entities
            .get(&EntityId::new(id))
            .and_then(|e| e.username.clone())
    }

    /// Current owner of an index key (test convenience)
    pub fn owner_of(&self, username: &str) -> Option<EntityId> {
        self.lock().index.get(username).map(|r| r.owner_id.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn apply(state: &mut State, batch: &WriteBatch) -> StoreResult<()> {
        let now = Utc::now();
        for op in batch.ops() {
            match op {
                WriteOp::SetUsername {
                    entity_id,
                    username,
                } => {
                    let entity = state
                        .entities
                        .get_mut(entity_id)
                        .ok_or_else(|| StoreError::EntityNotFound(entity_id.clone()))?;
                    entity.username = Some(username.clone());
                }
                WriteOp::UpsertIndex {
                    username,
                    owner_id,
                    expect,
                } => {
                    let found = state.index.get(username).map(|r| r.version);
                    if !expect.matches(found) {
                        return Err(StoreError::VersionConflict {
                            key: username.clone(),
                            expected: *expect,
                            found,
                        });
                    }
                    match state.index.get_mut(username) {
                        Some(record) => {
                            record.owner_id = owner_id.clone();
                            record.version += 1;
                            record.updated_at = now;
                            record.updated_by = Some(batch.operator().to_string());
                        }
                        None => {
                            let mut record = IndexRecord::new(username.clone(), owner_id.clone());
                            record.created_at = now;
                            record.updated_at = now;
                            record.updated_by = Some(batch.operator().to_string());
                            state.index.insert(username.clone(), record);
                        }
                    }
                }
                WriteOp::DeleteIndex { username, expect } => {
                    let found = state.index.get(username).map(|r| r.version);
                    if !expect.matches(found) {
                        return Err(StoreError::VersionConflict {
                            key: username.clone(),
                            expected: *expect,
                            found,
                        });
                    }
                    state.index.remove(username);
                }
                WriteOp::DeleteEntity { entity_id } => {
                    state.entities.remove(entity_id);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn list_entities(&self) -> StoreResult<Vec<Entity>> {
        self.check_available()?;
        Ok(self.lock().entities.values().cloned().collect())
    }

    async fn get_entity(&self, id: &EntityId) -> StoreResult<Option<Entity>> {
        self.check_available()?;
        Ok(self.lock().entities.get(id).cloned())
    }

    async fn update_username(&self, id: &EntityId, username: &str, operator: &str) -> StoreResult<()> {
        let op = WriteOp::SetUsername {
            entity_id: id.clone(),
            username: username.to_string(),
        };
        self.commit(&WriteBatch::single(operator, op)).await
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn list_index(&self) -> StoreResult<Vec<IndexRecord>> {
        self.check_available()?;
        Ok(self.lock().index.values().cloned().collect())
    }

    async fn get_index(&self, username: &str) -> StoreResult<Option<IndexRecord>> {
        self.check_available()?;
        Ok(self.lock().index.get(username).cloned())
    }

    async fn upsert_index(
        &self,
        username: &str,
        owner_id: &EntityId,
        expect: Expect,
        operator: &str,
    ) -> StoreResult<()> {
        let op = WriteOp::UpsertIndex {
            username: username.to_string(),
            owner_id: owner_id.clone(),
            expect,
        };
        self.commit(&WriteBatch::single(operator, op)).await
    }

    async fn delete_index(&self, username: &str, expect: Expect, operator: &str) -> StoreResult<()> {
        let op = WriteOp::DeleteIndex {
            username: username.to_string(),
            expect,
        };
        self.commit(&WriteBatch::single(operator, op)).await
    }
}

#[async_trait]
impl BatchWriter for MemoryStore {
    fn max_batch_ops(&self) -> usize {
        self.max_batch_ops
    }

    async fn commit(&self, batch: &WriteBatch) -> StoreResult<()> {
        if batch.len() > self.max_batch_ops {
            return Err(StoreError::BatchTooLarge {
                ops: batch.len(),
                limit: self.max_batch_ops,
            });
        }

        {
            let failing = self.failing_keys.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(op) = batch.ops().iter().find(|op| failing.contains(op.key())) {
                return Err(StoreError::Rejected(format!("injected failure for '{}'", op.key())));
            }
        }

        let mut state = self.lock();
        // Apply to a copy so a failing op leaves nothing behind
        let mut staged = state.clone();
        Self::apply(&mut staged, batch)?;
        *state = staged;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
