//! Sequential batch runner
//!
//! Runs an ordered list of independent store mutations one at a time,
//! paced by a token bucket. Reports progress after every item and returns
//! succeeded/failed/skipped counts that always add up to the item count.
//!
//! Two failure policies:
//! - `FailOpen`: record the failure and continue (repair, migration)
//! - `FailFast`: stop at the first failure and skip the rest (destructive
//!   bulk actions)

use fitdesk_common::config::EngineConfig;
use fitdesk_common::ids::new_run_id;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::num::NonZeroU32;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to do when an item fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailurePolicy {
    FailOpen,
    FailFast,
}

/// Progress after an item finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
    pub percent: u8,
}

impl BatchProgress {
    fn new(current: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (current * 100 / total) as u8
        };
        Self {
            current,
            total,
            percent,
        }
    }
}

/// Result of one successful item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    /// Nothing to do for this item
    Skipped,
}

/// Final counts of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub last_error: Option<String>,
    /// Stopped early by `FailFast`
    pub aborted: bool,
    /// Stopped early by the cancellation token
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0 && !self.aborted && !self.cancelled
    }
}

/// Write pacing for a run
pub struct Pacing {
    limiter: Option<DefaultDirectRateLimiter>,
}

impl Pacing {
    /// Token bucket refilling `per_second` times a second, holding up to `burst`
    pub fn per_second(per_second: NonZeroU32, burst: NonZeroU32) -> Self {
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            limiter: Some(RateLimiter::direct(quota)),
        }
    }

    /// No pacing
    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Pacing from engine settings; zero rates mean unlimited
    pub fn from_config(config: &EngineConfig) -> Self {
        match (
            NonZeroU32::new(config.writes_per_second),
            NonZeroU32::new(config.burst),
        ) {
            (Some(rate), Some(burst)) => Self::per_second(rate, burst),
            _ => Self::unlimited(),
        }
    }

    async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// Sequential runner with a failure policy, pacing and optional cancellation
pub struct BatchRunner {
    policy: FailurePolicy,
    pacing: Pacing,
    cancel: Option<CancellationToken>,
}

impl BatchRunner {
    pub fn new(policy: FailurePolicy, pacing: Pacing) -> Self {
        Self {
            policy,
            pacing,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Run `op` over every item in order
    ///
    /// `on_progress` is called once per processed item. Items left behind by
    /// an abort or a cancellation are counted as skipped and get no progress
    /// event, so `percent` only reaches 100 when the last item finishes.
    pub async fn run<'a, T, E, F, Fut, P>(
        &self,
        label: &str,
        items: &'a [T],
        mut op: F,
        mut on_progress: P,
    ) -> BatchOutcome
    where
        E: Display,
        F: FnMut(&'a T) -> Fut,
        Fut: Future<Output = Result<ItemOutcome, E>>,
        P: FnMut(BatchProgress),
    {
        let run_id = new_run_id();
        let total = items.len();
        let mut outcome = BatchOutcome {
            total,
            ..Default::default()
        };

        info!(%run_id, %label, total, policy = ?self.policy, "Starting batch run");

        for (i, item) in items.iter().enumerate() {
            if self.is_cancelled() {
                outcome.cancelled = true;
                outcome.skipped += total - i;
                warn!(%run_id, %label, remaining = total - i, "Batch run cancelled");
                break;
            }

            self.pacing.wait().await;

            match op(item).await {
                Ok(ItemOutcome::Succeeded) => {
                    outcome.succeeded += 1;
                    debug!(%run_id, %label, item = i + 1, "Item succeeded");
                }
                Ok(ItemOutcome::Skipped) => {
                    outcome.skipped += 1;
                    debug!(%run_id, %label, item = i + 1, "Item skipped");
                }
                Err(e) => {
                    outcome.failed += 1;
                    outcome.last_error = Some(e.to_string());
                    warn!(%run_id, %label, item = i + 1, error = %e, "Item failed");
                }
            }

            on_progress(BatchProgress::new(i + 1, total));

            if self.policy == FailurePolicy::FailFast && outcome.failed > 0 {
                let remaining = total - (i + 1);
                outcome.aborted = true;
                outcome.skipped += remaining;
                warn!(%run_id, %label, remaining, "Aborting batch run after failure");
                break;
            }
        }

        info!(
            %run_id,
            %label,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "Batch run finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runner(policy: FailurePolicy) -> BatchRunner {
        BatchRunner::new(policy, Pacing::unlimited())
    }

    async fn fail_on(item: &u32, bad: &[u32]) -> Result<ItemOutcome, String> {
        if bad.contains(item) {
            Err(format!("item {} rejected", item))
        } else if *item == 0 {
            Ok(ItemOutcome::Skipped)
        } else {
            Ok(ItemOutcome::Succeeded)
        }
    }

    #[tokio::test]
    async fn test_fail_open_counts_sum_to_total() {
        let items: Vec<u32> = (0..10).collect();
        let mut events = Vec::new();

        let outcome = runner(FailurePolicy::FailOpen)
            .run("test", &items, |i| fail_on(i, &[3, 7]), |p| events.push(p))
            .await;

        assert_eq!(outcome.succeeded, 7);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.succeeded + outcome.failed + outcome.skipped, items.len());
        assert_eq!(outcome.last_error.as_deref(), Some("item 7 rejected"));
        assert!(!outcome.aborted);

        assert_eq!(events.len(), 10);
        assert_eq!(events.iter().filter(|p| p.percent == 100).count(), 1);
        assert_eq!(events.last().map(|p| p.percent), Some(100));
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    }

    #[tokio::test]
    async fn test_fail_fast_skips_remaining() {
        let items: Vec<u32> = (1..=5).collect();
        let calls = AtomicUsize::new(0);
        let mut last = None;

        let outcome = runner(FailurePolicy::FailFast)
            .run(
                "delete",
                &items,
                |i| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    fail_on(i, &[2])
                },
                |p| last = Some(p),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.skipped, 3);
        assert!(outcome.aborted);
        assert_eq!(last.map(|p| p.percent), Some(40));
    }

    #[tokio::test]
    async fn test_cancelled_run_counts_rest_as_skipped() {
        let items: Vec<u32> = (1..=4).collect();
        let token = CancellationToken::new();
        let runner = runner(FailurePolicy::FailOpen).with_cancellation(token.clone());

        let outcome = runner
            .run(
                "migrate",
                &items,
                |i| {
                    if *i == 2 {
                        token.cancel();
                    }
                    fail_on(i, &[])
                },
                |_| {},
            )
            .await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.skipped, 2);
        assert!(!outcome.is_complete_success());
    }

    #[tokio::test]
    async fn test_empty_run_emits_nothing() {
        let items: Vec<u32> = Vec::new();
        let mut events = 0;

        let outcome = runner(FailurePolicy::FailOpen)
            .run("noop", &items, |i| fail_on(i, &[]), |_| events += 1)
            .await;

        assert_eq!(outcome, BatchOutcome::default());
        assert_eq!(events, 0);
    }

    #[tokio::test]
    async fn test_paced_run_completes() {
        let pacing = Pacing::per_second(
            NonZeroU32::new(1000).unwrap(),
            NonZeroU32::new(5).unwrap(),
        );
        let items: Vec<u32> = (1..=5).collect();

        let outcome = BatchRunner::new(FailurePolicy::FailOpen, pacing)
            .run("paced", &items, |i| fail_on(i, &[]), |_| {})
            .await;

        assert_eq!(outcome.succeeded, 5);
    }

    #[test]
    fn test_outcome_serializes_last_error_camel_case() {
        let outcome = BatchOutcome {
            last_error: Some("boom".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["lastError"], "boom");
    }
}
