//! Consistency analysis over one snapshot of accounts and the username index
//!
//! Pure and read-only: `analyze` never touches a store, and
//! `Snapshot::load` either returns both collections or fails.
//!
//! Classification (an account may land in several lists at once):
//! - duplicates: accounts grouped by `group_key`, groups larger than one
//! - orphans: index records whose owner is not a live account
//! - missing: accounts whose exact username is not an index key
//! - mismatched: accounts whose exact username is an index key owned by someone else
//! - non-canonical: accounts whose username is not in canonical form

use crate::error::StoreResult;
use crate::model::{
    DuplicateUsername, Entity, EntityId, IndexRecord, Issue, MismatchedOwner, MissingIndex,
    NonCanonicalUsername, OrphanedIndex,
};
use crate::normalize::{is_canonical, normalize};
use crate::store::{EntityStore, IndexStore, UsernameStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Both collections as read at one point in time
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub entities: Vec<Entity>,
    pub index: Vec<IndexRecord>,
}

impl Snapshot {
    pub fn new(entities: Vec<Entity>, index: Vec<IndexRecord>) -> Self {
        Self { entities, index }
    }

    /// Read both collections in full
    pub async fn load(store: &dyn UsernameStore) -> StoreResult<Self> {
        let entities = store.list_entities().await?;
        let index = store.list_index().await?;
        Ok(Self { entities, index })
    }

    /// Index records by key
    pub fn index_by_key(&self) -> HashMap<&str, &IndexRecord> {
        self.index.iter().map(|r| (r.username.as_str(), r)).collect()
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| &e.id == id)
    }
}

/// Operator-facing diagnostic report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub duplicate_usernames: Vec<DuplicateUsername>,
    pub orphaned_index_docs: Vec<OrphanedIndex>,
    pub users_without_index_doc: Vec<MissingIndex>,
    pub mismatched_owners: Vec<MismatchedOwner>,
    pub non_canonical_usernames: Vec<NonCanonicalUsername>,
    pub entity_count: usize,
    pub index_count: usize,
}

/// Issue counts per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSummary {
    pub duplicates: usize,
    pub orphans: usize,
    pub missing: usize,
    pub mismatched: usize,
    pub non_canonical: usize,
}

impl DiagnosticSummary {
    pub fn total(&self) -> usize {
        self.duplicates + self.orphans + self.missing + self.mismatched + self.non_canonical
    }
}

impl DiagnosticReport {
    pub fn summary(&self) -> DiagnosticSummary {
        DiagnosticSummary {
            duplicates: self.duplicate_usernames.len(),
            orphans: self.orphaned_index_docs.len(),
            missing: self.users_without_index_doc.len(),
            mismatched: self.mismatched_owners.len(),
            non_canonical: self.non_canonical_usernames.len(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.summary().total() == 0
    }

    /// Every finding as a tagged issue, in report order
    pub fn issues(&self) -> Vec<Issue> {
        let mut issues = Vec::with_capacity(self.summary().total());
        issues.extend(self.duplicate_usernames.iter().cloned().map(Issue::DuplicateUsername));
        issues.extend(self.orphaned_index_docs.iter().cloned().map(Issue::OrphanedIndex));
        issues.extend(self.users_without_index_doc.iter().cloned().map(Issue::MissingIndex));
        issues.extend(self.mismatched_owners.iter().cloned().map(Issue::MismatchedOwner));
        issues.extend(self.non_canonical_usernames.iter().cloned().map(Issue::NonCanonical));
        issues
    }

    /// Duplicate group for a username, matched on its group key
    pub fn duplicate_group(&self, username: &str) -> Option<&DuplicateUsername> {
        let key = group_key(username);
        self.duplicate_usernames.iter().find(|d| d.username == key)
    }

    /// Group keys of every duplicate group
    pub fn duplicate_keys(&self) -> HashSet<&str> {
        self.duplicate_usernames
            .iter()
            .map(|d| d.username.as_str())
            .collect()
    }
}

/// Key accounts are grouped under when looking for duplicates
///
/// The canonical form, or the raw username when that form is empty, so
/// accounts sharing an exact username always land in the same group.
pub fn group_key(username: &str) -> String {
    let canonical = normalize(username);
    if canonical.is_empty() {
        username.to_string()
    } else {
        canonical
    }
}

/// Classify every consistency violation in `snapshot`
///
/// Grouping is hash-based and linear in accounts plus index records; the
/// lists are then sorted so reports are stable between runs.
pub fn analyze(snapshot: &Snapshot) -> DiagnosticReport {
    let live_ids: HashSet<&EntityId> = snapshot.entities.iter().map(|e| &e.id).collect();
    let index = snapshot.index_by_key();

    let mut groups: HashMap<String, Vec<&Entity>> = HashMap::new();
    let mut missing = Vec::new();
    let mut mismatched = Vec::new();
    let mut non_canonical = Vec::new();

    for entity in &snapshot.entities {
        let Some(username) = entity.username() else {
            continue;
        };

        groups.entry(group_key(username)).or_default().push(entity);
        let canonical = normalize(username);

        if !is_canonical(username) {
            non_canonical.push(NonCanonicalUsername {
                entity_id: entity.id.clone(),
                username: username.to_string(),
                canonical,
            });
        }

        match index.get(username) {
            None => missing.push(MissingIndex {
                entity_id: entity.id.clone(),
                username: username.to_string(),
            }),
            Some(record) if record.owner_id != entity.id => mismatched.push(MismatchedOwner {
                username: username.to_string(),
                index_owner_id: record.owner_id.clone(),
                actual_owner_id: entity.id.clone(),
            }),
            Some(_) => {}
        }
    }

    let mut duplicates: Vec<DuplicateUsername> = groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(username, members)| {
            let mut claimants: Vec<Entity> = members.into_iter().cloned().collect();
            claimants.sort_by(|a, b| a.id.cmp(&b.id));
            DuplicateUsername {
                username,
                claimants,
            }
        })
        .collect();
    duplicates.sort_by(|a, b| a.username.cmp(&b.username));

    let mut orphans: Vec<OrphanedIndex> = snapshot
        .index
        .iter()
        .filter(|record| !live_ids.contains(&record.owner_id))
        .map(|record| OrphanedIndex {
            username: record.username.clone(),
            dangling_owner_id: record.owner_id.clone(),
        })
        .collect();
    orphans.sort_by(|a, b| a.username.cmp(&b.username));

    missing.sort_by(|a, b| (&a.username, &a.entity_id).cmp(&(&b.username, &b.entity_id)));
    mismatched.sort_by(|a, b| {
        (&a.username, &a.actual_owner_id).cmp(&(&b.username, &b.actual_owner_id))
    });
    non_canonical.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

    let report = DiagnosticReport {
        duplicate_usernames: duplicates,
        orphaned_index_docs: orphans,
        users_without_index_doc: missing,
        mismatched_owners: mismatched,
        non_canonical_usernames: non_canonical,
        entity_count: snapshot.entities.len(),
        index_count: snapshot.index.len(),
    };

    let summary = report.summary();
    info!(
        entities = report.entity_count,
        index_records = report.index_count,
        duplicates = summary.duplicates,
        orphans = summary.orphans,
        missing = summary.missing,
        mismatched = summary.mismatched,
        non_canonical = summary.non_canonical,
        "Username index analysis complete"
    );

    report
}
