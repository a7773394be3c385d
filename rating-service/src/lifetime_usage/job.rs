//! The recalculate-then-bill unit of work.

use chrono::Utc;
use service_core::retry::{retry_with_backoff, RetryConfig};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::progressive_billing::{ProgressiveBillingOrchestrator, ProgressiveBillingOutcome};
use super::tracker::LifetimeUsageTracker;
use crate::error::RatingError;
use crate::models::LifetimeUsage;
use crate::services::metrics::{record_error, record_job_duration};
use crate::services::LifetimeUsageStore;
use crate::workers::KeyedLocks;

/// Outcome of one successful run.
#[derive(Debug, Clone)]
pub struct LifetimeUsageJobReport {
    pub lifetime_usage: LifetimeUsage,
    pub billing: ProgressiveBillingOutcome,
}

/// Recalculates a lifetime usage and bills the thresholds its fresh total
/// crossed.
///
/// Runs for the same lifetime usage are serialized in-process, and each
/// attempt holds the store's recalculation lock so replicas never bill the
/// same usage at once. A held lock or a lost race surfaces as a
/// `ConcurrencyConflict` and the whole cycle is retried against the new
/// state.
#[derive(Clone)]
pub struct LifetimeUsageJob {
    store: Arc<dyn LifetimeUsageStore>,
    tracker: LifetimeUsageTracker,
    billing: ProgressiveBillingOrchestrator,
    locks: KeyedLocks,
    retry: RetryConfig,
}

impl LifetimeUsageJob {
    pub fn new(
        store: Arc<dyn LifetimeUsageStore>,
        tracker: LifetimeUsageTracker,
        billing: ProgressiveBillingOrchestrator,
        locks: KeyedLocks,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            billing,
            locks,
            retry,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, lifetime_usage_id: Uuid) -> Result<LifetimeUsageJobReport, RatingError> {
        let _guard = self.locks.lock(lifetime_usage_id).await;
        let start = Instant::now();

        let result = retry_with_backoff(&self.retry, "lifetime_usage_recalculation", move || {
            self.run_once(lifetime_usage_id)
        })
        .await;

        record_job_duration("lifetime_usage", start.elapsed().as_secs_f64());

        match &result {
            Ok(report) => info!(
                total_amount_cents = report.lifetime_usage.total_amount_cents(),
                billing = report.billing.as_str(),
                "Lifetime usage job completed"
            ),
            Err(e) => {
                error!(error = %e, "Lifetime usage job failed");
                record_error(e.kind(), "lifetime_usage_job");
            }
        }

        result
    }

    async fn run_once(&self, lifetime_usage_id: Uuid) -> Result<LifetimeUsageJobReport, RatingError> {
        let lock = self.store.lock_lifetime_usage(lifetime_usage_id).await?;

        let mut usage = self.store.get_lifetime_usage(lifetime_usage_id).await?;
        let subscription = self.store.get_subscription(usage.subscription_id).await?;

        self.tracker
            .recalculate(&mut usage, &subscription, Utc::now())
            .await?;
        let usage = self.store.save_lifetime_usage(&usage).await?;

        let billing = if subscription.is_active() {
            match self.billing.process(&usage, &subscription).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.reflag(usage).await;
                    return Err(e);
                }
            }
        } else {
            ProgressiveBillingOutcome::NothingCrossed
        };

        lock.release().await?;

        Ok(LifetimeUsageJobReport {
            lifetime_usage: usage,
            billing,
        })
    }

    /// Billing did not go through: put the usage back in the poller's queue.
    async fn reflag(&self, mut usage: LifetimeUsage) {
        usage.recalculation = usage.recalculation.on_usage_ingested();
        if let Err(e) = self.store.save_lifetime_usage(&usage).await {
            warn!(
                lifetime_usage_id = %usage.lifetime_usage_id,
                error = %e,
                "Failed to flag lifetime usage after billing error"
            );
        }
    }
}
