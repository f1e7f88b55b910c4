//! SQLite-backed store
//!
//! Reads `accounts` and `username_index` (schema in `fitdesk_common::db`).
//! Each `WriteBatch` runs inside one SQLite transaction; a version conflict
//! or a missing account rolls the whole batch back.

use super::{BatchWriter, EntityStore, Expect, IndexStore, WriteBatch, WriteOp};
use crate::error::{StoreError, StoreResult};
use crate::model::{Entity, EntityId, IndexRecord};
use async_trait::async_trait;
use fitdesk_common::db::{AccountRow, UsernameIndexRow};
use fitdesk_common::time;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

/// Store over the admin SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    max_batch_ops: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, max_batch_ops: usize) -> Self {
        Self {
            pool,
            max_batch_ops,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn current_version(
        tx: &mut Transaction<'_, Sqlite>,
        username: &str,
    ) -> StoreResult<Option<u64>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM username_index WHERE username = ?")
                .bind(username)
                .fetch_optional(&mut **tx)
                .await?;
        Ok(version.map(|v| v as u64))
    }

    async fn apply_op(
        tx: &mut Transaction<'_, Sqlite>,
        op: &WriteOp,
        operator: &str,
        now: &str,
    ) -> StoreResult<()> {
        match op {
            WriteOp::SetUsername {
                entity_id,
                username,
            } => {
                let result = sqlx::query(
                    "UPDATE accounts SET username = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                )
                .bind(username)
                .bind(entity_id.as_str())
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::EntityNotFound(entity_id.clone()));
                }
            }
            WriteOp::UpsertIndex {
                username,
                owner_id,
                expect,
            } => {
                let found = Self::current_version(tx, username).await?;
                if !expect.matches(found) {
                    return Err(StoreError::VersionConflict {
                        key: username.clone(),
                        expected: *expect,
                        found,
                    });
                }

                if found.is_some() {
                    sqlx::query(
                        r#"
                        UPDATE username_index
                        SET owner_id = ?, version = version + 1, updated_at = ?, updated_by = ?
                        WHERE username = ?
                        "#,
                    )
                    .bind(owner_id.as_str())
                    .bind(now)
                    .bind(operator)
                    .bind(username)
                    .execute(&mut **tx)
                    .await?;
                } else {
                    sqlx::query(
                        r#"
                        INSERT INTO username_index
                            (username, owner_id, version, created_at, updated_at, updated_by)
                        VALUES (?, ?, 1, ?, ?, ?)
                        "#,
                    )
                    .bind(username)
                    .bind(owner_id.as_str())
                    .bind(now)
                    .bind(now)
                    .bind(operator)
                    .execute(&mut **tx)
                    .await?;
                }
            }
            WriteOp::DeleteIndex { username, expect } => {
                let found = Self::current_version(tx, username).await?;
                if !expect.matches(found) {
                    return Err(StoreError::VersionConflict {
                        key: username.clone(),
                        expected: *expect,
                        found,
                    });
                }

                sqlx::query("DELETE FROM username_index WHERE username = ?")
                    .bind(username)
                    .execute(&mut **tx)
                    .await?;
            }
            WriteOp::DeleteEntity { entity_id } => {
                sqlx::query("DELETE FROM accounts WHERE id = ?")
                    .bind(entity_id.as_str())
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }
}

fn entity_from_row(row: AccountRow) -> Entity {
    Entity {
        id: EntityId::new(row.id),
        username: row.username,
    }
}

fn record_from_row(row: UsernameIndexRow) -> StoreResult<IndexRecord> {
    let created_at = time::from_db_string(&row.created_at).ok_or_else(|| {
        StoreError::Rejected(format!(
            "Unparseable created_at '{}' on index key '{}'",
            row.created_at, row.username
        ))
    })?;
    let updated_at = time::from_db_string(&row.updated_at).unwrap_or(created_at);

    Ok(IndexRecord {
        username: row.username,
        owner_id: EntityId::new(row.owner_id),
        version: row.version.max(0) as u64,
        created_at,
        updated_at,
        updated_by: row.updated_by,
    })
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn list_entities(&self) -> StoreResult<Vec<Entity>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT id, username, display_name FROM accounts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(entity_from_row).collect())
    }

    async fn get_entity(&self, id: &EntityId) -> StoreResult<Option<Entity>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, username, display_name FROM accounts WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(entity_from_row))
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
impl IndexStore for SqliteStore {
    async fn list_index(&self) -> StoreResult<Vec<IndexRecord>> {
        let rows = sqlx::query_as::<_, UsernameIndexRow>(
            r#"
            SELECT username, owner_id, version, created_at, updated_at, updated_by
            FROM username_index
            ORDER BY username
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn get_index(&self, username: &str) -> StoreResult<Option<IndexRecord>> {
        let row = sqlx::query_as::<_, UsernameIndexRow>(
            r#"
            SELECT username, owner_id, version, created_at, updated_at, updated_by
            FROM username_index
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
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
impl BatchWriter for SqliteStore {
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
        if batch.is_empty() {
            return Ok(());
        }

        let now = time::to_db_string(time::now());
        let mut tx = self.pool.begin().await?;

        for op in batch.ops() {
            // Dropping `tx` on error rolls the batch back
            Self::apply_op(&mut tx, op, batch.operator(), &now).await?;
        }

        tx.commit().await?;
        debug!(ops = batch.len(), operator = %batch.operator(), "Committed write batch");
        Ok(())
    }
}
