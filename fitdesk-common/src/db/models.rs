//! Database row models

use serde::{Deserialize, Serialize};

/// Row of the `accounts` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AccountRow {
    pub id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

/// Row of the `username_index` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct UsernameIndexRow {
    pub username: String,
    pub owner_id: String,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
    pub updated_by: Option<String>,
}
