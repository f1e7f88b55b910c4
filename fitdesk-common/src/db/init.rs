//! Database initialization
//!
//! Opens (or creates) the SQLite database and makes sure the two tables the
//! admin tooling reads exist:
//! - `accounts`: one row per account; `username` is free-form and not unique
//! - `username_index`: secondary uniqueness index, keyed by username

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Open an in-memory database with the schema applied
///
/// A single connection is used so every query sees the same database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_accounts_table(pool).await?;
    create_username_index_table(pool).await?;
    Ok(())
}

async fn create_accounts_table(pool: &SqlitePool) -> Result<()> {
    // No UNIQUE on username: duplicates are a real state that must be observable
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            username TEXT,
            display_name TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_accounts_username ON accounts(username)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_username_index_table(pool: &SqlitePool) -> Result<()> {
    // owner_id has no foreign key: a dangling owner is one of the states we detect
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS username_index (
            username TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            updated_by TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
