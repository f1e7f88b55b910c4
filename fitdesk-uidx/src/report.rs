//! Operator-facing results of engine runs
//!
//! All reports serialize with camelCase keys; `Display` gives the one-line
//! summaries the CLI prints without `--json`.

use crate::analyzer::{DiagnosticReport, DiagnosticSummary};
use crate::batch::BatchOutcome;
use crate::resolver::{DuplicateResolution, MigrationPlan};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of applying every direct repair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub planned: usize,
    pub outcome: BatchOutcome,
    /// Issues left after re-analysis
    pub remaining: DiagnosticSummary,
}

/// Outcome of resolving one duplicate group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionReport {
    pub resolution: DuplicateResolution,
    /// Displaced claimants moved to their new usernames
    pub outcome: BatchOutcome,
    pub remaining: DiagnosticSummary,
}

/// Outcome of a bulk re-normalization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub success: usize,
    pub failed: usize,
    /// Accounts left out by the plan plus items not reached
    pub skipped: usize,
    pub collisions: usize,
    pub last_error: Option<String>,
    pub cancelled: bool,
    pub plan: MigrationPlan,
    pub remaining: DiagnosticSummary,
}

impl MigrationReport {
    pub fn new(plan: MigrationPlan, outcome: &BatchOutcome, remaining: DiagnosticSummary) -> Self {
        Self {
            success: outcome.succeeded,
            failed: outcome.failed,
            skipped: plan.skipped.len() + outcome.skipped,
            collisions: plan.collisions(),
            last_error: outcome.last_error.clone(),
            cancelled: outcome.cancelled,
            plan,
            remaining,
        }
    }
}

/// Outcome of a bulk account deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub requested: usize,
    pub outcome: BatchOutcome,
}

impl fmt::Display for DiagnosticSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} duplicate, {} orphaned, {} missing, {} mismatched, {} non-canonical",
            self.duplicates, self.orphans, self.missing, self.mismatched, self.non_canonical
        )
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.succeeded, self.failed, self.skipped
        )?;
        if self.aborted {
            write!(f, " (aborted)")?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        if let Some(err) = &self.last_error {
            write!(f, "; last error: {}", err)?;
        }
        Ok(())
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} accounts, {} index keys: {}",
            self.entity_count,
            self.index_count,
            self.summary()
        )?;
        for dup in &self.duplicate_usernames {
            let ids: Vec<&str> = dup.claimants.iter().map(|e| e.id.as_str()).collect();
            writeln!(f, "  duplicate  {:<24} claimants {}", dup.username, ids.join(", "))?;
        }
        for orphan in &self.orphaned_index_docs {
            writeln!(f, "  orphan     {:<24} owner {}", orphan.username, orphan.dangling_owner_id)?;
        }
        for missing in &self.users_without_index_doc {
            writeln!(f, "  missing    {:<24} account {}", missing.username, missing.entity_id)?;
        }
        for m in &self.mismatched_owners {
            writeln!(
                f,
                "  mismatch   {:<24} index {} actual {}",
                m.username, m.index_owner_id, m.actual_owner_id
            )?;
        }
        for nc in &self.non_canonical_usernames {
            writeln!(f, "  format     {:<24} -> {} ({})", nc.username, nc.canonical, nc.entity_id)?;
        }
        Ok(())
    }
}

impl fmt::Display for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} to rename ({} suffixed), {} skipped",
            self.assignments.len(),
            self.collisions(),
            self.skipped.len()
        )?;
        for a in &self.assignments {
            writeln!(f, "  {:<12} {:?} -> {}", a.entity_id.as_str(), a.old_username, a.new_username)?;
        }
        for s in &self.skipped {
            writeln!(f, "  {:<12} {:?} skipped ({:?})", s.entity_id.as_str(), s.username, s.reason)?;
        }
        Ok(())
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} migrated, {} failed, {} skipped, {} collisions",
            self.success, self.failed, self.skipped, self.collisions
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        if let Some(err) = &self.last_error {
            write!(f, "; last error: {}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityId;
    use crate::resolver::{MigrationAssignment, MigrationSkip, SkipReason};

    #[test]
    fn test_migration_report_counts() {
        let plan = MigrationPlan {
            assignments: vec![
                MigrationAssignment {
                    entity_id: EntityId::new("1"),
                    old_username: "Mia".to_string(),
                    new_username: "mia".to_string(),
                    suffixed: false,
                    drop_old_key: true,
                    released_key: None,
                },
                MigrationAssignment {
                    entity_id: EntityId::new("2"),
                    old_username: "MIA".to_string(),
                    new_username: "mia1".to_string(),
                    suffixed: true,
                    drop_old_key: false,
                    released_key: None,
                },
            ],
            skipped: vec![MigrationSkip {
                entity_id: EntityId::new("3"),
                username: "x".to_string(),
                reason: SkipReason::TooShort,
            }],
        };
        let outcome = BatchOutcome {
            total: 2,
            succeeded: 1,
            failed: 1,
            last_error: Some("conflict".to_string()),
            ..Default::default()
        };

        let report = MigrationReport::new(plan, &outcome, DiagnosticSummary::default());

        assert_eq!(report.success, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.collisions, 1);

        let json = serde_json::to_value(&report).unwrap();
        for key in ["success", "failed", "skipped", "collisions", "lastError"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_outcome_display_mentions_abort() {
        let outcome = BatchOutcome {
            total: 3,
            failed: 1,
            skipped: 2,
            aborted: true,
            last_error: Some("rejected".to_string()),
            ..Default::default()
        };
        let text = outcome.to_string();
        assert!(text.contains("(aborted)"));
        assert!(text.ends_with("last error: rejected"));
    }
}
