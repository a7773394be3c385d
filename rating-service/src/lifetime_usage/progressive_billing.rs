//! Progressive billing: turn newly crossed thresholds into an invoice.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::thresholds::ThresholdCrossingDetector;
use crate::error::RatingError;
use crate::models::{
    AppliedUsageThreshold, LifetimeUsage, Subscription, ThresholdCompletion, ThresholdCrossing,
};
use crate::services::metrics::{record_error, record_progressive_invoice, record_threshold_crossed};
use crate::services::{
    InvoiceCreationError, InvoiceCreator, LifetimeUsageStore, UsageThresholdNotifier,
};

/// Result of one progressive billing pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressiveBillingOutcome {
    NothingCrossed,
    Invoiced {
        invoice_id: Uuid,
        crossings: Vec<ThresholdCrossing>,
    },
    /// The invoice is left failed for tax reasons; nothing was recorded so the
    /// crossings come back on the next recalculation.
    TaxFailed {
        invoice_id: Option<Uuid>,
        crossings: Vec<ThresholdCrossing>,
    },
}

impl ProgressiveBillingOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressiveBillingOutcome::NothingCrossed => "nothing_crossed",
            ProgressiveBillingOutcome::Invoiced { .. } => "invoiced",
            ProgressiveBillingOutcome::TaxFailed { .. } => "tax_failed",
        }
    }
}

#[derive(Clone)]
pub struct ProgressiveBillingOrchestrator {
    store: Arc<dyn LifetimeUsageStore>,
    invoicer: Arc<dyn InvoiceCreator>,
    notifier: Arc<dyn UsageThresholdNotifier>,
}

impl ProgressiveBillingOrchestrator {
    pub fn new(
        store: Arc<dyn LifetimeUsageStore>,
        invoicer: Arc<dyn InvoiceCreator>,
        notifier: Arc<dyn UsageThresholdNotifier>,
    ) -> Self {
        Self {
            store,
            invoicer,
            notifier,
        }
    }

    /// Threshold occurrences crossed by the lifetime usage and not billed yet.
    pub async fn passed_thresholds(
        &self,
        usage: &LifetimeUsage,
        subscription: &Subscription,
    ) -> Result<Vec<ThresholdCrossing>, RatingError> {
        let thresholds = self.store.usage_thresholds(subscription.plan_id).await?;
        if thresholds.is_empty() {
            return Ok(Vec::new());
        }

        let applied = self
            .store
            .applied_usage_thresholds(&subscription.lineage())
            .await?;
        Ok(ThresholdCrossingDetector::new(&thresholds, &applied)
            .passed_thresholds(usage.total_amount_cents()))
    }

    /// Progress report toward the plan's thresholds.
    pub async fn completion_state(
        &self,
        usage: &LifetimeUsage,
        subscription: &Subscription,
    ) -> Result<Vec<ThresholdCompletion>, RatingError> {
        let thresholds = self.store.usage_thresholds(subscription.plan_id).await?;
        let applied = self
            .store
            .applied_usage_thresholds(&subscription.lineage())
            .await?;
        Ok(ThresholdCrossingDetector::new(&thresholds, &applied)
            .completion_state(usage.total_amount_cents()))
    }

    /// Bill every pending crossing on a single invoice.
    ///
    /// Applied records are written only after the invoice exists, and
    /// notifications only after the records.
    #[instrument(
        skip(self, usage, subscription),
        fields(
            lifetime_usage_id = %usage.lifetime_usage_id,
            subscription_id = %subscription.subscription_id,
            total_amount_cents = usage.total_amount_cents()
        )
    )]
    pub async fn process(
        &self,
        usage: &LifetimeUsage,
        subscription: &Subscription,
    ) -> Result<ProgressiveBillingOutcome, RatingError> {
        let crossings = self.passed_thresholds(usage, subscription).await?;
        if crossings.is_empty() {
            return Ok(ProgressiveBillingOutcome::NothingCrossed);
        }

        let invoice = match self
            .invoicer
            .create_progressive_invoice(subscription, &crossings)
            .await
        {
            Ok(invoice) => invoice,
            Err(InvoiceCreationError::Tax {
                invoice_id,
                message,
            }) => {
                warn!(
                    invoice_id = ?invoice_id,
                    crossings = crossings.len(),
                    reason = %message,
                    "Progressive invoice failed on taxes, will retry on next recalculation"
                );
                record_progressive_invoice("tax_failed");
                return Ok(ProgressiveBillingOutcome::TaxFailed {
                    invoice_id,
                    crossings,
                });
            }
            Err(err) => {
                error!(error = %err, "Progressive invoice creation failed");
                record_progressive_invoice("failed");
                return Err(err.into());
            }
        };

        let lineage = subscription.lineage();
        let total = usage.total_amount_cents();
        let mut billed = Vec::new();
        let mut seen = HashSet::new();

        for crossing in &crossings {
            let threshold = &crossing.usage_threshold;
            if !seen.insert(threshold.usage_threshold_id) {
                continue;
            }

            let applied = AppliedUsageThreshold::new(
                threshold.usage_threshold_id,
                invoice.invoice_id,
                subscription.subscription_id,
                &lineage,
                total,
            );
            self.store.record_applied_usage_threshold(&applied).await?;
            billed.push(threshold);
        }

        for crossing in &crossings {
            record_threshold_crossed(crossing.usage_threshold.recurring);
        }
        record_progressive_invoice("invoiced");
        info!(
            invoice_id = %invoice.invoice_id,
            crossings = crossings.len(),
            "Progressive invoice created"
        );

        for threshold in billed {
            if let Err(e) = self
                .notifier
                .usage_threshold_reached(subscription, threshold, invoice.invoice_id)
                .await
            {
                warn!(
                    usage_threshold_id = %threshold.usage_threshold_id,
                    error = %e,
                    "Failed to send usage threshold notification"
                );
                record_error(e.kind(), "usage_threshold_reached");
            }
        }

        Ok(ProgressiveBillingOutcome::Invoiced {
            invoice_id: invoice.invoice_id,
            crossings,
        })
    }
}
