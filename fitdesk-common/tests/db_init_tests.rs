//! Integration tests for on-disk database initialization

use fitdesk_common::db::init::init_database;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("fitdesk.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing_and_keeps_rows() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("fitdesk.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query("INSERT INTO accounts (id, username) VALUES ('acct-1', 'alice')")
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    // Re-opening runs CREATE TABLE IF NOT EXISTS again and must not drop data
    let pool2 = init_database(&db_path).await.unwrap();
    let username: Option<String> =
        sqlx::query_scalar("SELECT username FROM accounts WHERE id = 'acct-1'")
            .fetch_one(&pool2)
            .await
            .unwrap();

    assert_eq!(username.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_username_index_key_is_unique() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("fitdesk.db")).await.unwrap();

    let insert = "INSERT INTO username_index (username, owner_id, version, created_at, updated_at) \
                  VALUES ('coach', ?, 1, '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')";

    sqlx::query(insert).bind("a").execute(&pool).await.unwrap();
    let second = sqlx::query(insert).bind("b").execute(&pool).await;

    assert!(second.is_err(), "Index key must be a primary key");
}
