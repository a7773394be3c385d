//! Lifetime usage tracking.

use chrono::{DateTime, Utc};
use service_core::retry::{retry_with_backoff, RetryConfig};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::current_usage::CurrentUsageCalculator;
use crate::error::RatingError;
use crate::models::{LifetimeUsage, RecalculationState, Subscription};
use crate::services::metrics::record_recalculation;
use crate::services::LifetimeUsageStore;

/// Maintains the current and invoiced totals of lifetime usages.
#[derive(Clone)]
pub struct LifetimeUsageTracker {
    store: Arc<dyn LifetimeUsageStore>,
    current_usage: CurrentUsageCalculator,
    retry: RetryConfig,
}

impl LifetimeUsageTracker {
    pub fn new(
        store: Arc<dyn LifetimeUsageStore>,
        current_usage: CurrentUsageCalculator,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            current_usage,
            retry,
        }
    }

    pub async fn find_or_create(
        &self,
        subscription: &Subscription,
    ) -> Result<LifetimeUsage, RatingError> {
        self.store
            .find_or_create_lifetime_usage(subscription.subscription_id)
            .await
    }

    /// A usage event was ingested: the current total is stale.
    #[instrument(skip(self))]
    pub async fn usage_ingested(
        &self,
        subscription_id: Uuid,
    ) -> Result<LifetimeUsage, RatingError> {
        self.transition(subscription_id, RecalculationState::on_usage_ingested)
            .await
    }

    /// An invoice was finalized: the invoiced total is stale.
    #[instrument(skip(self))]
    pub async fn invoice_finalized(
        &self,
        subscription_id: Uuid,
    ) -> Result<LifetimeUsage, RatingError> {
        self.transition(subscription_id, RecalculationState::on_invoice_finalized)
            .await
    }

    /// The plan's thresholds changed: every active subscription of the plan
    /// has to re-derive its invoiced total.
    #[instrument(skip(self))]
    pub async fn plan_thresholds_changed(&self, plan_id: Uuid) -> Result<u64, RatingError> {
        let flagged = self
            .store
            .flag_plan_for_invoiced_recalculation(plan_id)
            .await?;
        info!(flagged, "Lifetime usages flagged after threshold change");
        Ok(flagged)
    }

    async fn transition(
        &self,
        subscription_id: Uuid,
        next: fn(RecalculationState) -> RecalculationState,
    ) -> Result<LifetimeUsage, RatingError> {
        retry_with_backoff(&self.retry, "lifetime_usage_transition", || async move {
            let mut usage = self
                .store
                .find_or_create_lifetime_usage(subscription_id)
                .await?;
            let state = next(usage.recalculation);
            if state == usage.recalculation {
                return Ok(usage);
            }

            usage.recalculation = state;
            let saved = self.store.save_lifetime_usage(&usage).await?;
            debug!(
                lifetime_usage_id = %saved.lifetime_usage_id,
                state = saved.recalculation.as_str(),
                "Lifetime usage flagged"
            );
            Ok(saved)
        })
        .await
    }

    /// Re-derive the stale totals of `usage` from source data and mark it clean.
    ///
    /// A subscription that is no longer active keeps its totals frozen. The
    /// result is not persisted here.
    #[instrument(
        skip(self, usage, subscription),
        fields(
            lifetime_usage_id = %usage.lifetime_usage_id,
            subscription_id = %subscription.subscription_id
        )
    )]
    pub async fn recalculate(
        &self,
        usage: &mut LifetimeUsage,
        subscription: &Subscription,
        as_of: DateTime<Utc>,
    ) -> Result<(), RatingError> {
        if !subscription.is_active() {
            usage.recalculation = RecalculationState::Clean;
            record_recalculation("frozen");
            debug!(
                status = subscription.parsed_status().as_str(),
                "Subscription not active, lifetime usage frozen"
            );
            return Ok(());
        }

        let refreshed_at = Utc::now();

        if usage.recalculation.needs_invoiced() {
            usage.invoiced_usage_amount_cents = self
                .store
                .lineage_invoiced_amount_cents(&subscription.lineage())
                .await?;
            usage.invoiced_usage_refreshed_at = Some(refreshed_at);
        }

        let tree = self.current_usage.compute(subscription, as_of).await?;
        usage.current_usage_amount_cents = tree.amount_cents;
        usage.current_usage_refreshed_at = Some(refreshed_at);
        usage.recalculation = RecalculationState::Clean;

        record_recalculation("recalculated");
        info!(
            current_usage_amount_cents = usage.current_usage_amount_cents,
            invoiced_usage_amount_cents = usage.invoiced_usage_amount_cents,
            total_amount_cents = usage.total_amount_cents(),
            "Lifetime usage recalculated"
        );

        Ok(())
    }
}
