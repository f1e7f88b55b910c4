//! Admin entry points
//!
//! `UsernameAdmin` ties the pieces together for one operator session:
//! authorize, snapshot, analyze, plan, apply through the batch runner, then
//! re-analyze so the report shows what is actually left. Mutating calls
//! check the caller's role before the store is touched.

use crate::analyzer::{analyze, DiagnosticReport, DiagnosticSummary, Snapshot};
use crate::batch::{BatchProgress, BatchRunner, FailurePolicy, ItemOutcome, Pacing};
use crate::error::{EngineError, EngineResult};
use crate::executor::{ApplyOutcome, RepairExecutor};
use crate::model::{AdminContext, EntityId};
use crate::report::{DeletionReport, MigrationReport, RepairReport, ResolutionReport};
use crate::resolver::{self, MigrationPlan, ResolverSettings};
use crate::store::UsernameStore;
use fitdesk_common::config::EngineConfig;
use fitdesk_common::time;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Username index administration over one store
pub struct UsernameAdmin {
    store: Arc<dyn UsernameStore>,
    config: EngineConfig,
    cancel: Option<CancellationToken>,
}

impl UsernameAdmin {
    pub fn new(store: Arc<dyn UsernameStore>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            cancel: None,
        })
    }

    /// Stop batch runs between items once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn settings(&self) -> ResolverSettings {
        ResolverSettings::from(&self.config)
    }

    fn runner(&self, policy: FailurePolicy) -> BatchRunner {
        let runner = BatchRunner::new(policy, Pacing::from_config(&self.config));
        match &self.cancel {
            Some(token) => runner.with_cancellation(token.clone()),
            None => runner,
        }
    }

    fn require_admin(ctx: &AdminContext, action: &str) -> EngineResult<()> {
        if ctx.can_mutate() {
            return Ok(());
        }
        warn!(operator = %ctx.operator, role = ?ctx.role, %action, "Rejected unauthorized request");
        Err(EngineError::Unauthorized {
            operator: ctx.operator.clone(),
            action: action.to_string(),
        })
    }

    async fn snapshot(&self) -> EngineResult<Snapshot> {
        Ok(Snapshot::load(self.store.as_ref()).await?)
    }

    async fn remaining(&self) -> EngineResult<DiagnosticSummary> {
        Ok(analyze(&self.snapshot().await?).summary())
    }

    /// Full read-only diagnostic report
    pub async fn diagnose(&self, ctx: &AdminContext) -> EngineResult<DiagnosticReport> {
        info!(operator = %ctx.operator, "Running username index diagnostics");
        Ok(analyze(&self.snapshot().await?))
    }

    /// Apply every direct repair (missing, mismatched, orphaned) fail-open
    pub async fn repair_all(
        &self,
        ctx: &AdminContext,
        on_progress: impl FnMut(BatchProgress),
    ) -> EngineResult<RepairReport> {
        Self::require_admin(ctx, "repair the username index")?;

        let report = analyze(&self.snapshot().await?);
        let decisions = resolver::plan_repairs(&report);
        let executor = RepairExecutor::new(self.store.as_ref(), ctx.operator.clone());

        let outcome = self
            .runner(FailurePolicy::FailOpen)
            .run(
                "repair",
                &decisions,
                |decision| {
                    let executor = &executor;
                    async move { executor.apply_repair(decision).await.map(item_outcome) }
                },
                on_progress,
            )
            .await;

        Ok(RepairReport {
            planned: decisions.len(),
            outcome,
            remaining: self.remaining().await?,
        })
    }

    /// Keep `username` for `keeper` and rename every other claimant
    ///
    /// Fails without writing if `username` is not a current duplicate or
    /// `keeper` is not one of its claimants. The keeper's claim is applied
    /// first and must succeed; displaced claimants are then moved fail-open.
    pub async fn resolve_duplicate(
        &self,
        ctx: &AdminContext,
        username: &str,
        keeper: &EntityId,
        on_progress: impl FnMut(BatchProgress),
    ) -> EngineResult<ResolutionReport> {
        Self::require_admin(ctx, "resolve duplicate usernames")?;

        let snapshot = self.snapshot().await?;
        let report = analyze(&snapshot);
        let group = report.duplicate_group(username).ok_or_else(|| {
            EngineError::InvalidDecision(format!("'{}' is not a duplicated username", username))
        })?;

        let resolution = resolver::resolve_duplicate(
            &snapshot,
            group,
            keeper,
            &self.settings(),
            time::unix_millis(),
        )?;

        let executor = RepairExecutor::new(self.store.as_ref(), ctx.operator.clone());
        executor.claim_for_keeper(&resolution).await?;

        let outcome = self
            .runner(FailurePolicy::FailOpen)
            .run(
                "resolve-duplicate",
                &resolution.reassignments,
                |reassignment| {
                    let executor = &executor;
                    async move {
                        executor
                            .apply_reassignment(reassignment)
                            .await
                            .map(item_outcome)
                    }
                },
                on_progress,
            )
            .await;

        info!(
            username = %resolution.username,
            keeper = %resolution.keeper,
            reassigned = outcome.succeeded,
            failed = outcome.failed,
            "Duplicate username resolved"
        );

        Ok(ResolutionReport {
            resolution,
            outcome,
            remaining: self.remaining().await?,
        })
    }

    /// Bulk re-normalization plan, without writing anything
    pub async fn plan_migration(&self, ctx: &AdminContext) -> EngineResult<MigrationPlan> {
        info!(operator = %ctx.operator, "Planning username migration (dry run)");
        let snapshot = self.snapshot().await?;
        let candidates = resolver::migration_candidates(&snapshot);
        Ok(resolver::plan_migration(&snapshot, &candidates, &self.settings()))
    }

    /// Re-normalize every non-canonical username, fail-open
    pub async fn migrate(
        &self,
        ctx: &AdminContext,
        on_progress: impl FnMut(BatchProgress),
    ) -> EngineResult<MigrationReport> {
        Self::require_admin(ctx, "migrate usernames")?;

        let snapshot = self.snapshot().await?;
        let candidates = resolver::migration_candidates(&snapshot);
        let plan = resolver::plan_migration(&snapshot, &candidates, &self.settings());
        let executor = RepairExecutor::new(self.store.as_ref(), ctx.operator.clone());

        let outcome = self
            .runner(FailurePolicy::FailOpen)
            .run(
                "migrate",
                &plan.assignments,
                |assignment| {
                    let executor = &executor;
                    async move {
                        executor
                            .apply_assignment(assignment)
                            .await
                            .map(item_outcome)
                    }
                },
                on_progress,
            )
            .await;

        let report = MigrationReport::new(plan, &outcome, self.remaining().await?);
        info!(
            success = report.success,
            failed = report.failed,
            skipped = report.skipped,
            collisions = report.collisions,
            "Username migration finished"
        );
        Ok(report)
    }

    /// Delete accounts and their index keys, stopping at the first failure
    pub async fn delete_accounts(
        &self,
        ctx: &AdminContext,
        ids: &[EntityId],
        on_progress: impl FnMut(BatchProgress),
    ) -> EngineResult<DeletionReport> {
        Self::require_admin(ctx, "delete accounts")?;

        let snapshot = self.snapshot().await?;
        let executor = RepairExecutor::new(self.store.as_ref(), ctx.operator.clone());

        let outcome = self
            .runner(FailurePolicy::FailFast)
            .run(
                "delete-accounts",
                ids,
                |id| {
                    let executor = &executor;
                    let owned: Vec<String> = snapshot
                        .index
                        .iter()
                        .filter(|r| &r.owner_id == id)
                        .map(|r| r.username.clone())
                        .collect();
                    async move { executor.delete_account(id, &owned).await.map(item_outcome) }
                },
                on_progress,
            )
            .await;

        Ok(DeletionReport {
            requested: ids.len(),
            outcome,
        })
    }
}

/// Superseded decisions count as skipped; no-ops count as done
fn item_outcome(outcome: ApplyOutcome) -> ItemOutcome {
    match outcome {
        ApplyOutcome::Applied | ApplyOutcome::AlreadyConsistent => ItemOutcome::Succeeded,
        ApplyOutcome::Superseded => ItemOutcome::Skipped,
    }
}
