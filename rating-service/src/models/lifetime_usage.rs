//! Lifetime usage model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which totals of a lifetime usage are stale.
///
/// Persisted as two booleans (`recalculate_current_usage`,
/// `recalculate_invoiced_usage`); the enum makes the combined case explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalculationState {
    #[default]
    Clean,
    NeedsCurrentRecalc,
    NeedsInvoicedRecalc,
    NeedsBoth,
}

impl RecalculationState {
    pub fn from_flags(current: bool, invoiced: bool) -> Self {
        match (current, invoiced) {
            (false, false) => RecalculationState::Clean,
            (true, false) => RecalculationState::NeedsCurrentRecalc,
            (false, true) => RecalculationState::NeedsInvoicedRecalc,
            (true, true) => RecalculationState::NeedsBoth,
        }
    }

    pub fn needs_current(&self) -> bool {
        matches!(
            self,
            RecalculationState::NeedsCurrentRecalc | RecalculationState::NeedsBoth
        )
    }

    pub fn needs_invoiced(&self) -> bool {
        matches!(
            self,
            RecalculationState::NeedsInvoicedRecalc | RecalculationState::NeedsBoth
        )
    }

    /// A usage event was ingested for the subscription.
    pub fn on_usage_ingested(self) -> Self {
        Self::from_flags(true, self.needs_invoiced())
    }

    /// An invoice of the subscription was finalized, or the plan's
    /// thresholds changed.
    pub fn on_invoice_finalized(self) -> Self {
        Self::from_flags(self.needs_current(), true)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecalculationState::Clean => "clean",
            RecalculationState::NeedsCurrentRecalc => "needs_current_recalc",
            RecalculationState::NeedsInvoicedRecalc => "needs_invoiced_recalc",
            RecalculationState::NeedsBoth => "needs_both",
        }
    }
}

/// Running spend of a subscription lineage, in currency subunits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeUsage {
    pub lifetime_usage_id: Uuid,
    pub subscription_id: Uuid,
    pub current_usage_amount_cents: i64,
    pub invoiced_usage_amount_cents: i64,
    pub historical_usage_amount_cents: i64,
    pub recalculation: RecalculationState,
    pub current_usage_refreshed_at: Option<DateTime<Utc>>,
    pub invoiced_usage_refreshed_at: Option<DateTime<Utc>>,
    /// Optimistic lock counter, bumped on every successful save.
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl LifetimeUsage {
    /// A fresh lifetime usage has never been computed, so both totals are stale.
    pub fn new(subscription_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            lifetime_usage_id: Uuid::new_v4(),
            subscription_id,
            current_usage_amount_cents: 0,
            invoiced_usage_amount_cents: 0,
            historical_usage_amount_cents: 0,
            recalculation: RecalculationState::NeedsBoth,
            current_usage_refreshed_at: None,
            invoiced_usage_refreshed_at: None,
            version: 0,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn total_amount_cents(&self) -> i64 {
        self.historical_usage_amount_cents
            + self.invoiced_usage_amount_cents
            + self.current_usage_amount_cents
    }
}
