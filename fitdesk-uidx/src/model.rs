//! Core value types: accounts, index records, issues, operator context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable opaque account key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Account record as seen by the engine
///
/// Only `id` and `username` matter here; profile fields belong to the
/// account subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    pub username: Option<String>,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, username: Option<&str>) -> Self {
        Self {
            id: id.into(),
            username: username.map(str::to_string),
        }
    }

    /// Stored username, or `None` when absent or empty
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }
}

/// Uniqueness-index document: `username` → owning account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    pub username: String,
    pub owner_id: EntityId,
    /// Optimistic concurrency version, starts at 1 and grows on every write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

impl IndexRecord {
    /// Fresh record as written by the signup flow
    pub fn new(username: impl Into<String>, owner_id: impl Into<EntityId>) -> Self {
        let now = Utc::now();
        Self {
            username: username.into(),
            owner_id: owner_id.into(),
            version: 1,
            created_at: now,
            updated_at: now,
            updated_by: None,
        }
    }
}

/// Two or more accounts whose usernames share a canonical form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateUsername {
    /// Canonical form shared by all claimants (the raw username when that form is empty)
    pub username: String,
    /// Claimants ordered by id
    pub claimants: Vec<Entity>,
}

/// Index record whose owner no longer exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedIndex {
    pub username: String,
    pub dangling_owner_id: EntityId,
}

/// Account with a username but no index record keyed by it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingIndex {
    pub entity_id: EntityId,
    pub username: String,
}

/// Index record keyed by an account's username but owned by someone else
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchedOwner {
    pub username: String,
    pub index_owner_id: EntityId,
    pub actual_owner_id: EntityId,
}

/// Account whose stored username is not in canonical form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonCanonicalUsername {
    pub entity_id: EntityId,
    pub username: String,
    pub canonical: String,
}

/// One consistency violation between accounts and the username index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Issue {
    DuplicateUsername(DuplicateUsername),
    OrphanedIndex(OrphanedIndex),
    MissingIndex(MissingIndex),
    MismatchedOwner(MismatchedOwner),
    NonCanonical(NonCanonicalUsername),
}

/// Operator role, checked before any engine call touches the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May run diagnostics and dry runs
    Viewer,
    /// May also mutate accounts and the index
    Admin,
}

/// Who is driving the current run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminContext {
    pub operator: String,
    pub role: Role,
}

impl AdminContext {
    pub fn new(operator: impl Into<String>, role: Role) -> Self {
        Self {
            operator: operator.into(),
            role,
        }
    }

    pub fn can_mutate(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_username_is_none() {
        assert_eq!(Entity::new("1", Some("")).username(), None);
        assert_eq!(Entity::new("1", None).username(), None);
        assert_eq!(Entity::new("1", Some("bob")).username(), Some("bob"));
    }

    #[test]
    fn test_issue_serializes_with_kind_tag() {
        let issue = Issue::MissingIndex(MissingIndex {
            entity_id: EntityId::new("42"),
            username: "alice".to_string(),
        });
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "missingIndex");
        assert_eq!(json["entityId"], "42");
    }

    #[test]
    fn test_only_admin_can_mutate() {
        assert!(AdminContext::new("ops", Role::Admin).can_mutate());
        assert!(!AdminContext::new("ops", Role::Viewer).can_mutate());
    }
}
