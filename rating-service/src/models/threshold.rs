//! Usage threshold models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::SubscriptionLineage;

/// Spend level configured on a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UsageThreshold {
    pub usage_threshold_id: Uuid,
    pub plan_id: Uuid,
    pub threshold_display_name: Option<String>,
    pub amount_cents: i64,
    pub recurring: bool,
}

/// Proof that a threshold has been billed on a given invoice.
///
/// Its existence is the only "already billed" signal; there is no mutable
/// flag on the threshold itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AppliedUsageThreshold {
    pub applied_usage_threshold_id: Uuid,
    pub usage_threshold_id: Uuid,
    pub invoice_id: Uuid,
    pub subscription_id: Uuid,
    pub external_subscription_id: String,
    pub subscription_at: DateTime<Utc>,
    pub lifetime_usage_amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl AppliedUsageThreshold {
    pub fn new(
        usage_threshold_id: Uuid,
        invoice_id: Uuid,
        subscription_id: Uuid,
        lineage: &SubscriptionLineage,
        lifetime_usage_amount_cents: i64,
    ) -> Self {
        Self {
            applied_usage_threshold_id: Uuid::new_v4(),
            usage_threshold_id,
            invoice_id,
            subscription_id,
            external_subscription_id: lineage.external_id.clone(),
            subscription_at: lineage.subscription_at,
            lifetime_usage_amount_cents,
            created_at: Utc::now(),
        }
    }
}

/// A threshold occurrence that has been passed and not billed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdCrossing {
    pub usage_threshold: UsageThreshold,
    /// Lifetime amount at which this occurrence is reached. Equal to the
    /// threshold amount for non-recurring thresholds.
    pub target_amount_cents: i64,
}

/// Progress toward a threshold occurrence, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCompletion {
    pub usage_threshold_id: Uuid,
    pub recurring: bool,
    pub target_amount_cents: i64,
    pub completion_ratio: Decimal,
    pub reached_at: Option<DateTime<Utc>>,
}
