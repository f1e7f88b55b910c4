//! Collision-free username assignment
//!
//! Three planners, all pure functions over a `Snapshot`:
//! - `plan_repairs`: direct index fixes for missing, mismatched and orphaned keys
//! - `resolve_duplicate`: keep one claimant of a contested username, rename the rest
//! - `plan_migration`: re-normalize many usernames at once
//!
//! Nothing here writes; `executor` turns the plans into store batches.

use crate::analyzer::{group_key, DiagnosticReport, Snapshot};
use crate::error::{EngineError, EngineResult};
use crate::model::{DuplicateUsername, Entity, EntityId, IndexRecord};
use crate::normalize::{is_canonical, normalize};
use fitdesk_common::config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// Base used when a claimant's canonical username is too short to build on
const FALLBACK_BASE: &str = "user";

/// Limits the planners work within
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    pub min_username_len: usize,
    pub suffix_search_limit: u32,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ResolverSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            min_username_len: config.min_username_len,
            suffix_search_limit: config.suffix_search_limit,
        }
    }
}

// ============================================================================
// Direct repair
// ============================================================================

/// Single-key index fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RepairDecision {
    /// Point `username` at `owner_id` (fixes missing and mismatched keys)
    #[serde(rename_all = "camelCase")]
    PointIndex { username: String, owner_id: EntityId },
    /// Remove a key whose owner no longer exists
    #[serde(rename_all = "camelCase")]
    DropOrphan {
        username: String,
        dangling_owner_id: EntityId,
    },
}

impl RepairDecision {
    pub fn username(&self) -> &str {
        match self {
            RepairDecision::PointIndex { username, .. }
            | RepairDecision::DropOrphan { username, .. } => username,
        }
    }
}

/// Direct repairs for a report
///
/// Usernames belonging to a duplicate group are left out: re-pointing their
/// key would just flip ownership between claimants until an operator picks a
/// keeper. One decision per index key, in key order.
pub fn plan_repairs(report: &DiagnosticReport) -> Vec<RepairDecision> {
    let contested = report.duplicate_keys();
    let is_contested = |username: &str| contested.contains(group_key(username).as_str());

    let mut decisions: BTreeMap<String, RepairDecision> = BTreeMap::new();

    for orphan in &report.orphaned_index_docs {
        decisions.insert(
            orphan.username.clone(),
            RepairDecision::DropOrphan {
                username: orphan.username.clone(),
                dangling_owner_id: orphan.dangling_owner_id.clone(),
            },
        );
    }

    for missing in &report.users_without_index_doc {
        if is_contested(&missing.username) {
            continue;
        }
        decisions.insert(
            missing.username.clone(),
            RepairDecision::PointIndex {
                username: missing.username.clone(),
                owner_id: missing.entity_id.clone(),
            },
        );
    }

    for mismatch in &report.mismatched_owners {
        if is_contested(&mismatch.username) {
            continue;
        }
        // A live account claiming the key beats an orphan drop on the same key
        decisions.insert(
            mismatch.username.clone(),
            RepairDecision::PointIndex {
                username: mismatch.username.clone(),
                owner_id: mismatch.actual_owner_id.clone(),
            },
        );
    }

    let skipped = report.users_without_index_doc.len() + report.mismatched_owners.len()
        + report.orphaned_index_docs.len()
        - decisions.len();
    if skipped > 0 {
        info!(skipped, "Left contested or overlapping keys for duplicate resolution");
    }

    decisions.into_values().collect()
}

// ============================================================================
// Duplicate resolution
// ============================================================================

/// New username for one displaced claimant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reassignment {
    pub entity_id: EntityId,
    pub old_username: String,
    pub new_username: String,
    /// Index key still owned by this claimant under its old username
    pub stale_key: Option<String>,
    /// Numeric search exhausted; timestamp suffix used
    pub used_fallback: bool,
}

/// Complete outcome of resolving one duplicate group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateResolution {
    /// Canonical username being kept
    pub username: String,
    pub keeper: EntityId,
    /// Keeper's stored username when it differs from `username`
    pub keeper_old_username: Option<String>,
    /// Index key owned by the keeper under its old username, to drop
    pub keeper_stale_key: Option<String>,
    pub reassignments: Vec<Reassignment>,
}

/// Resolve a duplicate group in favour of `keeper`
///
/// Each displaced claimant gets `base`, `base1`, `base2`, ... up to the
/// configured limit, where `base` is its canonical username. A candidate is
/// taken if it is an index key, any account's username, or was handed out
/// earlier in this resolution. If the search runs out, `base_<now_millis>`
/// is used (bumped until free).
pub fn resolve_duplicate(
    snapshot: &Snapshot,
    group: &DuplicateUsername,
    keeper: &EntityId,
    settings: &ResolverSettings,
    now_millis: i64,
) -> EngineResult<DuplicateResolution> {
    let keeper_entity = group
        .claimants
        .iter()
        .find(|e| &e.id == keeper)
        .ok_or_else(|| {
            EngineError::InvalidDecision(format!(
                "Account {} is not a claimant of '{}'",
                keeper, group.username
            ))
        })?;

    let index = snapshot.index_by_key();
    let owned_key = |entity: &Entity| -> Option<String> {
        let username = entity.username()?;
        if username == group.username {
            return None;
        }
        index
            .get(username)
            .filter(|record| record.owner_id == entity.id)
            .map(|record| record.username.clone())
    };

    let mut taken = TakenNames::from_snapshot(snapshot);
    taken.claim(&group.username);

    let keeper_old_username = keeper_entity
        .username()
        .filter(|u| *u != group.username)
        .map(str::to_string);
    let keeper_stale_key = owned_key(keeper_entity);

    let mut reassignments = Vec::new();
    for claimant in group.claimants.iter().filter(|e| &e.id != keeper) {
        let old_username = claimant.username().unwrap_or_default().to_string();
        let mut base = normalize(&old_username);
        if base.len() < settings.min_username_len {
            base = FALLBACK_BASE.to_string();
        }

        let (new_username, used_fallback) =
            match taken.first_free_suffix(&base, 0, settings.suffix_search_limit) {
                Some(name) => (name, false),
                None => (taken.timestamp_name(&base, now_millis), true),
            };
        taken.claim(&new_username);

        debug!(
            entity_id = %claimant.id,
            old = %old_username,
            new = %new_username,
            used_fallback,
            "Reassigned displaced claimant"
        );

        reassignments.push(Reassignment {
            entity_id: claimant.id.clone(),
            stale_key: owned_key(claimant),
            old_username,
            new_username,
            used_fallback,
        });
    }

    Ok(DuplicateResolution {
        username: group.username.clone(),
        keeper: keeper.clone(),
        keeper_old_username,
        keeper_stale_key,
        reassignments,
    })
}

// ============================================================================
// Bulk migration
// ============================================================================

/// Why an account was left out of a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// Canonical form is empty
    Empty,
    /// Canonical form is shorter than the minimum length
    TooShort,
    /// Username already canonical
    Unchanged,
}

/// Planned rename for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationAssignment {
    pub entity_id: EntityId,
    pub old_username: String,
    pub new_username: String,
    /// Canonical value was already claimed; a numeric suffix was added
    pub suffixed: bool,
    /// The old username is an index key owned by this account and gets dropped
    pub drop_old_key: bool,
    /// Canonical index key this account holds but does not keep, to drop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSkip {
    pub entity_id: EntityId,
    pub username: String,
    pub reason: SkipReason,
}

/// Full migration plan, computed without touching the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub assignments: Vec<MigrationAssignment>,
    pub skipped: Vec<MigrationSkip>,
}

impl MigrationPlan {
    pub fn collisions(&self) -> usize {
        self.assignments.iter().filter(|a| a.suffixed).count()
    }
}

/// Accounts with a non-empty, non-canonical username
pub fn migration_candidates(snapshot: &Snapshot) -> Vec<Entity> {
    snapshot
        .entities
        .iter()
        .filter(|e| e.username().is_some_and(|u| !is_canonical(u)))
        .cloned()
        .collect()
}

/// Plan a bulk re-normalization of `candidates`
///
/// Candidates are processed in id order. An account with no username, or
/// whose canonical form is empty, too short, or equal to its current
/// username, is skipped. The remaining accounts are grouped by canonical
/// value. A member that already owns the canonical index key keeps it;
/// otherwise the lowest id keeps it when free. Every other member gets the
/// smallest positive suffix not already taken.
///
/// A value is taken when it is the username of an account outside the
/// migration, a value already handed out in this run, or an index key. The
/// one index key that does not count is a migrating account's own old
/// username, since its rename deletes that key.
pub fn plan_migration(
    snapshot: &Snapshot,
    candidates: &[Entity],
    settings: &ResolverSettings,
) -> MigrationPlan {
    let mut ordered: Vec<&Entity> = candidates.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));
    ordered.dedup_by(|a, b| a.id == b.id);

    let mut plan = MigrationPlan::default();
    let mut groups: BTreeMap<String, Vec<(&Entity, &str)>> = BTreeMap::new();

    for entity in ordered {
        let raw = entity.username().unwrap_or_default();
        let canonical = normalize(raw);
        let reason = if canonical.is_empty() {
            Some(SkipReason::Empty)
        } else if canonical.len() < settings.min_username_len {
            Some(SkipReason::TooShort)
        } else if canonical == raw {
            Some(SkipReason::Unchanged)
        } else {
            None
        };

        match reason {
            Some(reason) => plan.skipped.push(MigrationSkip {
                entity_id: entity.id.clone(),
                username: raw.to_string(),
                reason,
            }),
            None => groups.entry(canonical).or_default().push((entity, raw)),
        }
    }

    let migrating: HashMap<&EntityId, &str> = groups
        .values()
        .flatten()
        .map(|(entity, raw)| (&entity.id, *raw))
        .collect();

    let mut outside_names = TakenNames::default();
    for entity in &snapshot.entities {
        if migrating.contains_key(&entity.id) {
            continue;
        }
        if let Some(username) = entity.username() {
            outside_names.claim(username);
        }
    }

    let mut taken = outside_names.clone();
    for record in &snapshot.index {
        match migrating.get(&record.owner_id) {
            // Deleted by its owner's rename
            Some(raw) if *raw == record.username => {}
            _ => taken.claim(&record.username),
        }
    }

    // First pass: the canonical key's current holder keeps it, else the lowest id when free
    let index = snapshot.index_by_key();
    let mut winners: HashSet<&EntityId> = HashSet::new();
    for (canonical, members) in &groups {
        let holder = index.get(canonical.as_str()).and_then(|record| {
            members
                .iter()
                .find(|(entity, _)| entity.id == record.owner_id)
        });
        match holder {
            Some((entity, _)) if !outside_names.contains(canonical) => {
                winners.insert(&entity.id);
            }
            Some(_) => {}
            None if !taken.contains(canonical) => {
                if let Some((first, _)) = members.first() {
                    winners.insert(&first.id);
                    taken.claim(canonical);
                }
            }
            None => {}
        }
    }

    // Second pass: everyone else gets the smallest free suffix
    for (canonical, members) in &groups {
        for (entity, raw) in members {
            let suffixed = !winners.contains(&entity.id);
            let new_username = if suffixed {
                taken.next_suffix(canonical)
            } else {
                canonical.clone()
            };
            taken.claim(&new_username);

            let owns = |key: &str| {
                index
                    .get(key)
                    .is_some_and(|record: &&IndexRecord| record.owner_id == entity.id)
            };
            let drop_old_key = owns(*raw);
            let released_key = (suffixed && owns(canonical.as_str())).then(|| canonical.clone());

            plan.assignments.push(MigrationAssignment {
                entity_id: entity.id.clone(),
                old_username: raw.to_string(),
                new_username,
                suffixed,
                drop_old_key,
                released_key,
            });
        }
    }

    plan.assignments.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

    info!(
        planned = plan.assignments.len(),
        skipped = plan.skipped.len(),
        collisions = plan.collisions(),
        "Migration plan computed"
    );

    plan
}

// ============================================================================
// Name reservation
// ============================================================================

/// Usernames that may not be handed out
#[derive(Debug, Clone, Default)]
struct TakenNames {
    names: HashSet<String>,
}

impl TakenNames {
    /// Every index key and every account username in the snapshot
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut taken = Self::default();
        for record in &snapshot.index {
            taken.claim(&record.username);
        }
        for entity in &snapshot.entities {
            if let Some(username) = entity.username() {
                taken.claim(username);
            }
        }
        taken
    }

    fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn claim(&mut self, name: &str) {
        self.names.insert(name.to_string());
    }

    /// First free name among `base` (when `start == 0`) and `base{n}` for `n` up to `limit`
    fn first_free_suffix(&self, base: &str, start: u32, limit: u32) -> Option<String> {
        (start..=limit)
            .map(|n| {
                if n == 0 {
                    base.to_string()
                } else {
                    format!("{}{}", base, n)
                }
            })
            .find(|candidate| !self.contains(candidate))
    }

    /// Smallest positive suffix; unbounded because the taken set is finite
    fn next_suffix(&self, base: &str) -> String {
        let mut n: u64 = 1;
        loop {
            let candidate = format!("{}{}", base, n);
            if !self.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// `base_<millis>`, bumping the number until the name is free
    fn timestamp_name(&self, base: &str, now_millis: i64) -> String {
        let mut stamp = now_millis;
        loop {
            let candidate = format!("{}_{}", base, stamp);
            if !self.contains(&candidate) {
                return candidate;
            }
            stamp += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;

    fn entity(id: &str, username: &str) -> Entity {
        Entity::new(id, Some(username))
    }

    fn settings() -> ResolverSettings {
        ResolverSettings::default()
    }

    #[test]
    fn test_plan_repairs_covers_missing_mismatched_and_orphans() {
        let snapshot = Snapshot::new(
            vec![entity("1", "alice"), entity("2", "bruno")],
            vec![IndexRecord::new("bruno", "1"), IndexRecord::new("ghost", "9")],
        );

        let decisions = plan_repairs(&analyze(&snapshot));

        assert_eq!(
            decisions,
            vec![
                RepairDecision::PointIndex {
                    username: "alice".to_string(),
                    owner_id: EntityId::new("1"),
                },
                RepairDecision::PointIndex {
                    username: "bruno".to_string(),
                    owner_id: EntityId::new("2"),
                },
                RepairDecision::DropOrphan {
                    username: "ghost".to_string(),
                    dangling_owner_id: EntityId::new("9"),
                },
            ]
        );
    }

    #[test]
    fn test_plan_repairs_skips_contested_usernames() {
        let snapshot = Snapshot::new(
            vec![entity("1", "coach"), entity("2", "coach"), entity("3", "Coach")],
            vec![IndexRecord::new("coach", "1")],
        );

        let decisions = plan_repairs(&analyze(&snapshot));

        assert!(decisions.is_empty(), "got {:?}", decisions);
    }

    #[test]
    fn test_orphan_key_claimed_by_live_account_is_repointed() {
        // Index "kai" points at a deleted account while account 5 is named "kai"
        let snapshot = Snapshot::new(
            vec![entity("5", "kai")],
            vec![IndexRecord::new("kai", "gone")],
        );

        let decisions = plan_repairs(&analyze(&snapshot));

        assert_eq!(
            decisions,
            vec![RepairDecision::PointIndex {
                username: "kai".to_string(),
                owner_id: EntityId::new("5"),
            }]
        );
    }

    #[test]
    fn test_resolve_duplicate_keeps_keeper_and_suffixes_others() {
        let snapshot = Snapshot::new(
            vec![entity("c", "coach"), entity("d", "coach")],
            vec![IndexRecord::new("coach", "d")],
        );
        let report = analyze(&snapshot);
        let group = report.duplicate_group("coach").unwrap();

        let resolution =
            resolve_duplicate(&snapshot, group, &EntityId::new("c"), &settings(), 0).unwrap();

        assert_eq!(resolution.username, "coach");
        assert_eq!(resolution.keeper, EntityId::new("c"));
        assert_eq!(resolution.keeper_old_username, None);
        assert_eq!(resolution.reassignments.len(), 1);
        assert_eq!(resolution.reassignments[0].entity_id, EntityId::new("d"));
        assert_eq!(resolution.reassignments[0].new_username, "coach1");
        assert_eq!(resolution.reassignments[0].stale_key, None);
    }

    #[test]
    fn test_plan_repairs_skips_identical_symbol_only_usernames() {
        let snapshot = Snapshot::new(
            vec![entity("1", "!!!"), entity("2", "!!!")],
            vec![IndexRecord::new("!!!", "1")],
        );

        assert!(plan_repairs(&analyze(&snapshot)).is_empty());
    }

    #[test]
    fn test_resolve_duplicate_names_are_distinct_and_skip_taken() {
        let snapshot = Snapshot::new(
            vec![
                entity("k", "sam"),
                entity("o1", "sam"),
                entity("o2", "Sam"),
                entity("x", "sam1"),
            ],
            vec![IndexRecord::new("sam", "k"), IndexRecord::new("sam2", "zz")],
        );
        let report = analyze(&snapshot);
        let group = report.duplicate_group("sam").unwrap();

        let resolution =
            resolve_duplicate(&snapshot, group, &EntityId::new("k"), &settings(), 0).unwrap();

        let names: Vec<&str> = resolution
            .reassignments
            .iter()
            .map(|r| r.new_username.as_str())
            .collect();
        assert_eq!(names, vec!["sam3", "sam4"]);
    }

    #[test]
    fn test_resolve_duplicate_rejects_non_claimant_keeper() {
        let snapshot = Snapshot::new(vec![entity("1", "ann"), entity("2", "ann")], vec![]);
        let report = analyze(&snapshot);
        let group = report.duplicate_group("ann").unwrap();

        let result = resolve_duplicate(&snapshot, group, &EntityId::new("3"), &settings(), 0);

        assert!(matches!(result, Err(EngineError::InvalidDecision(_))));
    }

    #[test]
    fn test_resolve_duplicate_falls_back_to_timestamp() {
        let snapshot = Snapshot::new(
            vec![entity("1", "tom"), entity("2", "tom"), entity("3", "tom1")],
            vec![],
        );
        let report = analyze(&snapshot);
        let group = report.duplicate_group("tom").unwrap();
        let tight = ResolverSettings {
            min_username_len: 3,
            suffix_search_limit: 1,
        };

        let resolution =
            resolve_duplicate(&snapshot, group, &EntityId::new("1"), &tight, 1_700_000_000_000)
                .unwrap();

        assert_eq!(resolution.reassignments[0].new_username, "tom_1700000000000");
        assert!(resolution.reassignments[0].used_fallback);
    }

    #[test]
    fn test_resolve_duplicate_renames_noncanonical_keeper_and_drops_stale_keys() {
        let snapshot = Snapshot::new(
            vec![entity("a", "Bob"), entity("b", "bob ")],
            vec![IndexRecord::new("Bob", "a"), IndexRecord::new("bob ", "b")],
        );
        let report = analyze(&snapshot);
        let group = report.duplicate_group("bob").unwrap();

        let resolution =
            resolve_duplicate(&snapshot, group, &EntityId::new("a"), &settings(), 0).unwrap();

        assert_eq!(resolution.keeper_old_username.as_deref(), Some("Bob"));
        assert_eq!(resolution.keeper_stale_key.as_deref(), Some("Bob"));
        let other = &resolution.reassignments[0];
        assert_eq!(other.new_username, "bob1");
        assert_eq!(other.stale_key.as_deref(), Some("bob "));
    }

    #[test]
    fn test_short_base_uses_fallback_base() {
        let snapshot = Snapshot::new(vec![entity("1", "Al"), entity("2", "al")], vec![]);
        let report = analyze(&snapshot);
        let group = report.duplicate_group("al").unwrap();

        let resolution =
            resolve_duplicate(&snapshot, group, &EntityId::new("2"), &settings(), 0).unwrap();

        assert_eq!(resolution.reassignments[0].new_username, "user");
    }

    #[test]
    fn test_migration_bob_smith_example() {
        let snapshot = Snapshot::new(
            vec![entity("1", "Bob Smith"), entity("2", "bob_smith")],
            vec![IndexRecord::new("Bob Smith", "1"), IndexRecord::new("bob_smith", "2")],
        );

        let plan = plan_migration(&snapshot, &snapshot.entities, &settings());

        assert_eq!(
            plan.assignments,
            vec![MigrationAssignment {
                entity_id: EntityId::new("1"),
                old_username: "Bob Smith".to_string(),
                new_username: "bobsmith".to_string(),
                suffixed: false,
                drop_old_key: true,
                released_key: None,
            }]
        );
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].reason, SkipReason::Unchanged);
    }

    #[test]
    fn test_migration_skip_reasons() {
        let snapshot = Snapshot::new(
            vec![entity("1", "!!"), entity("2", "A!b"), entity("3", "ok_name")],
            vec![],
        );

        let plan = plan_migration(&snapshot, &snapshot.entities, &settings());

        assert!(plan.assignments.is_empty());
        let reasons: Vec<SkipReason> = plan.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(
            reasons,
            vec![SkipReason::Empty, SkipReason::TooShort, SkipReason::Unchanged]
        );
    }

    #[test]
    fn test_migration_collisions_get_smallest_free_suffix() {
        let snapshot = Snapshot::new(
            vec![
                entity("1", "Mia"),
                entity("2", "MIA "),
                entity("3", "mia!"),
                entity("4", "mia2"),
            ],
            vec![IndexRecord::new("mia2", "4")],
        );

        let plan = plan_migration(&snapshot, &migration_candidates(&snapshot), &settings());

        let names: Vec<(&str, &str, bool)> = plan
            .assignments
            .iter()
            .map(|a| (a.entity_id.as_str(), a.new_username.as_str(), a.suffixed))
            .collect();
        assert_eq!(
            names,
            vec![("1", "mia", false), ("2", "mia1", true), ("3", "mia3", true)]
        );
        assert_eq!(plan.collisions(), 2);
    }

    #[test]
    fn test_migration_collides_with_existing_index_key() {
        // "lee" is held by an account outside the migration
        let snapshot = Snapshot::new(
            vec![entity("1", "Lee"), entity("2", "lee")],
            vec![IndexRecord::new("lee", "2"), IndexRecord::new("Lee", "1")],
        );

        let plan = plan_migration(&snapshot, &migration_candidates(&snapshot), &settings());

        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.assignments[0].new_username, "lee1");
        assert!(plan.assignments[0].suffixed);
        assert!(plan.assignments[0].drop_old_key);
    }

    #[test]
    fn test_migration_reuses_key_already_owned_by_member() {
        // Account 1 already owns the "ray" key although its username is "Ray"
        let snapshot = Snapshot::new(
            vec![entity("1", "Ray")],
            vec![IndexRecord::new("ray", "1")],
        );

        let plan = plan_migration(&snapshot, &snapshot.entities, &settings());

        assert_eq!(plan.assignments[0].new_username, "ray");
        assert!(!plan.assignments[0].suffixed);
        assert!(!plan.assignments[0].drop_old_key);
    }

    #[test]
    fn test_migration_key_held_by_other_member_goes_to_holder() {
        // Both migrate to "ray"; account 2 already holds that key
        let snapshot = Snapshot::new(
            vec![entity("1", "Ray"), entity("2", "RAY!")],
            vec![IndexRecord::new("ray", "2")],
        );

        let plan = plan_migration(&snapshot, &snapshot.entities, &settings());

        let names: Vec<(&str, &str, bool)> = plan
            .assignments
            .iter()
            .map(|a| (a.entity_id.as_str(), a.new_username.as_str(), a.suffixed))
            .collect();
        assert_eq!(names, vec![("1", "ray1", true), ("2", "ray", false)]);
        assert!(plan.assignments.iter().all(|a| a.released_key.is_none()));
    }

    #[test]
    fn test_migration_releases_held_key_lost_to_outside_account() {
        // Account 2 holds "kim" but account 1 outside the migration is named "kim"
        let snapshot = Snapshot::new(
            vec![entity("1", "kim"), entity("2", "Kim")],
            vec![IndexRecord::new("kim", "2")],
        );

        let plan = plan_migration(&snapshot, &migration_candidates(&snapshot), &settings());

        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.assignments[0].new_username, "kim1");
        assert_eq!(plan.assignments[0].released_key.as_deref(), Some("kim"));
    }

    #[test]
    fn test_migration_counts_missing_username_as_empty() {
        let snapshot = Snapshot::new(
            vec![Entity::new("1", None), Entity::new("2", Some(""))],
            vec![],
        );

        let plan = plan_migration(&snapshot, &snapshot.entities, &settings());

        assert!(plan.assignments.is_empty());
        assert_eq!(plan.skipped.len(), 2);
        assert!(plan.skipped.iter().all(|s| s.reason == SkipReason::Empty));
    }

    #[test]
    fn test_migration_result_is_collision_free() {
        let raws = [
            "Ann", "ann!", "ANN", "ann1", "Ann 1", "b.o.b", "B.O.B", "b.o.b1", "zoe", "Zoe",
            "zoe ", "Zoé",
        ];
        let entities: Vec<Entity> = raws
            .iter()
            .enumerate()
            .map(|(i, raw)| entity(&format!("{:02}", i), raw))
            .collect();
        let snapshot = Snapshot::new(entities, vec![IndexRecord::new("ann", "99")]);

        let plan = plan_migration(&snapshot, &snapshot.entities, &settings());

        let renamed: HashMap<&EntityId, &str> = plan
            .assignments
            .iter()
            .map(|a| (&a.entity_id, a.new_username.as_str()))
            .collect();
        let mut seen = HashSet::new();
        for e in &snapshot.entities {
            let final_name = renamed
                .get(&e.id)
                .copied()
                .unwrap_or_else(|| e.username().unwrap());
            assert!(seen.insert(final_name.to_string()), "duplicate {}", final_name);
        }
        assert!(!renamed.values().any(|n| *n == "ann"), "index key 'ann' is taken");
    }

    #[test]
    fn test_migration_candidates_only_noncanonical() {
        let snapshot = Snapshot::new(
            vec![
                entity("1", "ok"),
                entity("2", "Not Ok"),
                Entity::new("3", None),
                Entity::new("4", Some("")),
            ],
            vec![],
        );

        let ids: Vec<String> = migration_candidates(&snapshot)
            .into_iter()
            .map(|e| e.id.to_string())
            .collect();
        assert_eq!(ids, vec!["2"]);
    }
}
