//! Applies resolved decisions to the store
//!
//! Every apply method re-reads the documents it is about to change, returns
//! `AlreadyConsistent` when they already hold the target state, and guards
//! each index write with the version it just read. Re-running a repair is
//! therefore a no-op, and a repair raced by another writer fails with a
//! version conflict instead of overwriting it.

use crate::error::{StoreError, StoreResult};
use crate::model::EntityId;
use crate::resolver::{DuplicateResolution, MigrationAssignment, Reassignment, RepairDecision};
use crate::store::{
    BatchWriter, EntityStore, Expect, IndexStore, UsernameStore, WriteBatch, WriteOp,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Result of applying one decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyOutcome {
    /// Writes committed
    Applied,
    /// Target state already in place; nothing written
    AlreadyConsistent,
    /// Data changed since the snapshot in a way that makes the decision moot
    Superseded,
}

/// Translates decisions into store batches on behalf of one operator
pub struct RepairExecutor<'a> {
    store: &'a dyn UsernameStore,
    operator: String,
}

impl<'a> RepairExecutor<'a> {
    pub fn new(store: &'a dyn UsernameStore, operator: impl Into<String>) -> Self {
        Self {
            store,
            operator: operator.into(),
        }
    }

    /// Apply a direct index repair
    pub async fn apply_repair(&self, decision: &RepairDecision) -> StoreResult<ApplyOutcome> {
        match decision {
            RepairDecision::PointIndex { username, owner_id } => {
                self.point_index(username, owner_id).await
            }
            RepairDecision::DropOrphan {
                username,
                dangling_owner_id,
            } => self.drop_orphan(username, dangling_owner_id).await,
        }
    }

    async fn point_index(&self, username: &str, owner_id: &EntityId) -> StoreResult<ApplyOutcome> {
        let owner = self.store.get_entity(owner_id).await?;
        if owner.as_ref().and_then(|e| e.username()) != Some(username) {
            debug!(%username, %owner_id, "Owner renamed or removed since analysis");
            return Ok(ApplyOutcome::Superseded);
        }

        let current = self.store.get_index(username).await?;
        if current.as_ref().is_some_and(|r| &r.owner_id == owner_id) {
            return Ok(ApplyOutcome::AlreadyConsistent);
        }

        let op = WriteOp::UpsertIndex {
            username: username.to_string(),
            owner_id: owner_id.clone(),
            expect: Expect::from_current(current.as_ref()),
        };
        self.store
            .commit(&WriteBatch::single(self.operator.clone(), op))
            .await?;

        info!(%username, %owner_id, "Pointed index key at owner");
        Ok(ApplyOutcome::Applied)
    }

    async fn drop_orphan(
        &self,
        username: &str,
        dangling_owner_id: &EntityId,
    ) -> StoreResult<ApplyOutcome> {
        let Some(current) = self.store.get_index(username).await? else {
            return Ok(ApplyOutcome::AlreadyConsistent);
        };
        if &current.owner_id != dangling_owner_id {
            return Ok(ApplyOutcome::Superseded);
        }
        if self.store.get_entity(dangling_owner_id).await?.is_some() {
            // Owner reappeared (restored account); not an orphan any more
            return Ok(ApplyOutcome::Superseded);
        }

        let op = WriteOp::DeleteIndex {
            username: username.to_string(),
            expect: Expect::Version(current.version),
        };
        self.store
            .commit(&WriteBatch::single(self.operator.clone(), op))
            .await?;

        info!(%username, %dangling_owner_id, "Dropped orphaned index key");
        Ok(ApplyOutcome::Applied)
    }

    /// Claim the contested username for the keeper
    ///
    /// One batch: point the key at the keeper, rewrite the keeper's username
    /// if it was not already canonical, drop the keeper's stale key.
    pub async fn claim_for_keeper(&self, resolution: &DuplicateResolution) -> StoreResult<ApplyOutcome> {
        let keeper = self
            .store
            .get_entity(&resolution.keeper)
            .await?
            .ok_or_else(|| StoreError::EntityNotFound(resolution.keeper.clone()))?;
        let current = self.store.get_index(&resolution.username).await?;

        let mut batch = WriteBatch::new(self.operator.clone());

        if !current
            .as_ref()
            .is_some_and(|r| r.owner_id == resolution.keeper)
        {
            batch.push(WriteOp::UpsertIndex {
                username: resolution.username.clone(),
                owner_id: resolution.keeper.clone(),
                expect: Expect::from_current(current.as_ref()),
            });
        }

        if keeper.username() != Some(resolution.username.as_str()) {
            batch.push(WriteOp::SetUsername {
                entity_id: resolution.keeper.clone(),
                username: resolution.username.clone(),
            });
        }

        if let Some(stale) = &resolution.keeper_stale_key {
            if let Some(op) = self.stale_key_delete(stale, &resolution.keeper).await? {
                batch.push(op);
            }
        }

        if batch.is_empty() {
            return Ok(ApplyOutcome::AlreadyConsistent);
        }

        self.store.commit(&batch).await?;
        info!(
            username = %resolution.username,
            keeper = %resolution.keeper,
            ops = batch.len(),
            "Claimed contested username for keeper"
        );
        Ok(ApplyOutcome::Applied)
    }

    /// Move one displaced claimant to its new username
    pub async fn apply_reassignment(&self, reassignment: &Reassignment) -> StoreResult<ApplyOutcome> {
        let stale: Vec<&str> = reassignment.stale_key.as_deref().into_iter().collect();
        self.rename(
            &reassignment.entity_id,
            &reassignment.old_username,
            &reassignment.new_username,
            &stale,
        )
        .await
    }

    /// Move one migrating account to its canonical username
    pub async fn apply_assignment(&self, assignment: &MigrationAssignment) -> StoreResult<ApplyOutcome> {
        let stale: Vec<&str> = assignment
            .drop_old_key
            .then_some(assignment.old_username.as_str())
            .into_iter()
            .chain(assignment.released_key.as_deref())
            .collect();
        self.rename(
            &assignment.entity_id,
            &assignment.old_username,
            &assignment.new_username,
            &stale,
        )
        .await
    }

    /// Delete an account and every index key it owns
    ///
    /// The account goes in the last write, so a failure part way leaves the
    /// account in place and a retry picks up the remaining keys.
    pub async fn delete_account(&self, id: &EntityId, owned_keys: &[String]) -> StoreResult<ApplyOutcome> {
        let mut ops = Vec::new();
        for key in owned_keys {
            if let Some(op) = self.stale_key_delete(key, id).await? {
                ops.push(op);
            }
        }
        if self.store.get_entity(id).await?.is_some() {
            ops.push(WriteOp::DeleteEntity {
                entity_id: id.clone(),
            });
        }

        if ops.is_empty() {
            return Ok(ApplyOutcome::AlreadyConsistent);
        }

        let total = ops.len();
        for chunk in ops.chunks(self.store.max_batch_ops().max(1)) {
            let mut batch = WriteBatch::new(self.operator.clone());
            for op in chunk {
                batch.push(op.clone());
            }
            self.store.commit(&batch).await?;
        }

        info!(entity_id = %id, ops = total, "Deleted account");
        Ok(ApplyOutcome::Applied)
    }

    /// Rename `id` from `old` to `new`, claiming the new key and dropping the `stale` keys
    ///
    /// Delete-old, write-new and update-account go out as one batch so a
    /// store with atomic batches never shows the half-renamed state.
    async fn rename(
        &self,
        id: &EntityId,
        old: &str,
        new: &str,
        stale: &[&str],
    ) -> StoreResult<ApplyOutcome> {
        let entity = self
            .store
            .get_entity(id)
            .await?
            .ok_or_else(|| StoreError::EntityNotFound(id.clone()))?;
        let current_name = entity.username().unwrap_or_default();
        if current_name != old && current_name != new {
            debug!(entity_id = %id, %old, %new, current = %current_name, "Renamed elsewhere since analysis");
            return Ok(ApplyOutcome::Superseded);
        }

        let new_key = self.store.get_index(new).await?;
        let owns_new_key = new_key.as_ref().is_some_and(|r| &r.owner_id == id);
        if current_name == new && owns_new_key {
            return Ok(ApplyOutcome::AlreadyConsistent);
        }

        let mut batch = WriteBatch::new(self.operator.clone());

        for key in stale.iter().filter(|k| **k != new) {
            if let Some(op) = self.stale_key_delete(key, id).await? {
                batch.push(op);
            }
        }

        if !owns_new_key {
            if let Some(record) = &new_key {
                // Claimed by another account since the plan was made
                return Err(StoreError::VersionConflict {
                    key: new.to_string(),
                    expected: Expect::Absent,
                    found: Some(record.version),
                });
            }
            batch.push(WriteOp::UpsertIndex {
                username: new.to_string(),
                owner_id: id.clone(),
                expect: Expect::Absent,
            });
        }

        if current_name != new {
            batch.push(WriteOp::SetUsername {
                entity_id: id.clone(),
                username: new.to_string(),
            });
        }

        self.store.commit(&batch).await?;
        debug!(entity_id = %id, %old, %new, ops = batch.len(), "Renamed account");
        Ok(ApplyOutcome::Applied)
    }

    /// Delete op for `key` if it is still owned by `owner`
    async fn stale_key_delete(&self, key: &str, owner: &EntityId) -> StoreResult<Option<WriteOp>> {
        let record = self.store.get_index(key).await?;
        Ok(record
            .filter(|r| &r.owner_id == owner)
            .map(|r| WriteOp::DeleteIndex {
                username: key.to_string(),
                expect: Expect::Version(r.version),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, IndexRecord};
    use crate::store::MemoryStore;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::default();
        store.insert_entity(Entity::new("1", Some("alice")));
        store.insert_entity(Entity::new("2", Some("bruno")));
        store.insert_index(IndexRecord::new("bruno", "1"));
        store
    }

    #[tokio::test]
    async fn test_point_index_creates_missing_key() {
        let store = seeded();
        let executor = RepairExecutor::new(&store, "ops");
        let decision = RepairDecision::PointIndex {
            username: "alice".to_string(),
            owner_id: EntityId::new("1"),
        };

        let outcome = executor.apply_repair(&decision).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(store.owner_of("alice"), Some(EntityId::new("1")));
    }

    #[tokio::test]
    async fn test_point_index_twice_is_noop() {
        let store = seeded();
        let executor = RepairExecutor::new(&store, "ops");
        let decision = RepairDecision::PointIndex {
            username: "bruno".to_string(),
            owner_id: EntityId::new("2"),
        };

        assert_eq!(executor.apply_repair(&decision).await.unwrap(), ApplyOutcome::Applied);
        let after_first = store.get_index("bruno").await.unwrap();

        assert_eq!(
            executor.apply_repair(&decision).await.unwrap(),
            ApplyOutcome::AlreadyConsistent
        );
        assert_eq!(store.get_index("bruno").await.unwrap(), after_first);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_point_index_superseded_when_owner_renamed() {
        let store = seeded();
        let executor = RepairExecutor::new(&store, "ops");
        let decision = RepairDecision::PointIndex {
            username: "old-name".to_string(),
            owner_id: EntityId::new("1"),
        };

        assert_eq!(
            executor.apply_repair(&decision).await.unwrap(),
            ApplyOutcome::Superseded
        );
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_orphan_only_when_still_dangling() {
        let store = seeded();
        store.insert_index(IndexRecord::new("ghost", "9"));
        let executor = RepairExecutor::new(&store, "ops");
        let decision = RepairDecision::DropOrphan {
            username: "ghost".to_string(),
            dangling_owner_id: EntityId::new("9"),
        };

        assert_eq!(executor.apply_repair(&decision).await.unwrap(), ApplyOutcome::Applied);
        assert!(store.owner_of("ghost").is_none());
        assert_eq!(
            executor.apply_repair(&decision).await.unwrap(),
            ApplyOutcome::AlreadyConsistent
        );
    }

    #[tokio::test]
    async fn test_rename_fails_on_foreign_owner_of_new_key() {
        let store = seeded();
        let executor = RepairExecutor::new(&store, "ops");
        let assignment = MigrationAssignment {
            entity_id: EntityId::new("2"),
            old_username: "bruno".to_string(),
            new_username: "alice".to_string(),
            suffixed: false,
            drop_old_key: false,
            released_key: None,
        };
        store.insert_index(IndexRecord::new("alice", "1"));

        let result = executor.apply_assignment(&assignment).await;

        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
        assert_eq!(store.username_of("2").as_deref(), Some("bruno"));
    }

    #[tokio::test]
    async fn test_delete_account_chunks_large_batches() {
        let store = MemoryStore::new(2);
        store.insert_entity(Entity::new("1", Some("ann")));
        let keys: Vec<String> = ["ann", "ann1", "ann2", "ann3"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        for key in &keys {
            store.insert_index(IndexRecord::new(key.as_str(), "1"));
        }
        let executor = RepairExecutor::new(&store, "ops");

        let outcome = executor.delete_account(&EntityId::new("1"), &keys).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(store.commit_count(), 3);
        assert!(store.username_of("1").is_none());
        assert!(keys.iter().all(|k| store.owner_of(k).is_none()));
    }

    #[tokio::test]
    async fn test_delete_account_removes_owned_keys() {
        let store = seeded();
        store.insert_index(IndexRecord::new("alice", "1"));
        let executor = RepairExecutor::new(&store, "ops");

        let outcome = executor
            .delete_account(&EntityId::new("1"), &["alice".to_string(), "bruno".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert!(store.username_of("1").is_none());
        assert!(store.owner_of("alice").is_none());
        assert!(store.owner_of("bruno").is_none());
        assert_eq!(
            executor.delete_account(&EntityId::new("1"), &[]).await.unwrap(),
            ApplyOutcome::AlreadyConsistent
        );
    }
}
