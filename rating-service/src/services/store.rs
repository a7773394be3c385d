//! Persistence boundaries of the rating workflows.
//!
//! [`crate::services::Database`] implements these against Postgres; tests use
//! in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use uuid::Uuid;

use crate::error::RatingError;
use crate::models::{
    AppliedUsageThreshold, DailyUsageSnapshot, LifetimeUsage, Subscription, SubscriptionLineage,
    UsageThreshold, UsageTree,
};

/// Liveness of the backing store, for readiness probes.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Fails with `NotFound` when the subscription does not exist.
    async fn get_subscription(&self, subscription_id: Uuid) -> Result<Subscription, RatingError>;
}

/// Exclusive hold on one lifetime usage, shared by every replica.
///
/// Dropping the guard releases it as well.
#[async_trait]
pub trait RecalculationLock: Send {
    async fn release(self: Box<Self>) -> Result<(), RatingError>;
}

#[async_trait]
pub trait LifetimeUsageStore: SubscriptionStore {
    /// Take the recalculation lock of a lifetime usage without waiting.
    /// Fails with `ConcurrencyConflict` while another holder has it.
    async fn lock_lifetime_usage(
        &self,
        lifetime_usage_id: Uuid,
    ) -> Result<Box<dyn RecalculationLock>, RatingError>;

    /// Sum of fee amounts of draft and finalized invoices across the
    /// lineage, ignoring canceled subscriptions.
    async fn lineage_invoiced_amount_cents(
        &self,
        lineage: &SubscriptionLineage,
    ) -> Result<i64, RatingError>;

    async fn usage_thresholds(&self, plan_id: Uuid) -> Result<Vec<UsageThreshold>, RatingError>;

    async fn applied_usage_thresholds(
        &self,
        lineage: &SubscriptionLineage,
    ) -> Result<Vec<AppliedUsageThreshold>, RatingError>;

    /// Fails with `ConcurrencyConflict` when the record already exists.
    async fn record_applied_usage_threshold(
        &self,
        applied: &AppliedUsageThreshold,
    ) -> Result<(), RatingError>;

    async fn get_lifetime_usage(&self, lifetime_usage_id: Uuid)
        -> Result<LifetimeUsage, RatingError>;

    async fn find_or_create_lifetime_usage(
        &self,
        subscription_id: Uuid,
    ) -> Result<LifetimeUsage, RatingError>;

    /// Persist `usage` if its version is still current, returning the stored
    /// row with the bumped version. A stale version is a `ConcurrencyConflict`.
    async fn save_lifetime_usage(&self, usage: &LifetimeUsage)
        -> Result<LifetimeUsage, RatingError>;

    /// Flag invoiced usage of every active subscription of the plan.
    async fn flag_plan_for_invoiced_recalculation(&self, plan_id: Uuid)
        -> Result<u64, RatingError>;

    /// Ids of lifetime usages with a pending recalculation, oldest update first.
    async fn lifetime_usages_to_recalculate(&self, limit: i64) -> Result<Vec<Uuid>, RatingError>;
}

#[async_trait]
pub trait DailyUsageStore: SubscriptionStore {
    async fn find_daily_usage(
        &self,
        subscription_id: Uuid,
        usage_date: NaiveDate,
    ) -> Result<Option<DailyUsageSnapshot>, RatingError>;

    /// Latest snapshot of the same billing period strictly before `usage_date`.
    async fn previous_daily_usage(
        &self,
        subscription_id: Uuid,
        from_datetime: DateTime<Utc>,
        usage_date: NaiveDate,
    ) -> Result<Option<DailyUsageSnapshot>, RatingError>;

    /// Returns `false` when a snapshot already exists for the day.
    async fn insert_daily_usage(&self, snapshot: &DailyUsageSnapshot) -> Result<bool, RatingError>;

    async fn update_usage_diff(
        &self,
        daily_usage_id: Uuid,
        usage_diff: &UsageTree,
    ) -> Result<(), RatingError>;

    /// Active subscriptions without a snapshot for yesterday in their timezone.
    async fn subscriptions_due_for_daily_usage(&self, limit: i64)
        -> Result<Vec<Uuid>, RatingError>;
}
