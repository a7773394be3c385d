//! Boundaries to the services this one depends on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::error::RatingError;
use crate::models::{Invoice, PeriodUsage, Subscription, ThresholdCrossing, UsageThreshold};

/// Aggregates raw usage events of a subscription's current billing period.
#[async_trait]
pub trait UsageAggregator: Send + Sync {
    async fn compute_current_usage(
        &self,
        subscription: &Subscription,
        as_of: DateTime<Utc>,
    ) -> Result<PeriodUsage, RatingError>;
}

/// Failure modes of progressive invoice creation.
#[derive(Debug, Error)]
pub enum InvoiceCreationError {
    /// The invoice was left in a retriable failed state by tax computation.
    #[error("Tax computation failed: {message}")]
    Tax {
        invoice_id: Option<Uuid>,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Creates invoices. A single invoice covers every crossing passed in.
#[async_trait]
pub trait InvoiceCreator: Send + Sync {
    async fn create_progressive_invoice(
        &self,
        subscription: &Subscription,
        crossings: &[ThresholdCrossing],
    ) -> Result<Invoice, InvoiceCreationError>;
}

/// Emits `usage_threshold_reached` notifications.
#[async_trait]
pub trait UsageThresholdNotifier: Send + Sync {
    async fn usage_threshold_reached(
        &self,
        subscription: &Subscription,
        threshold: &UsageThreshold,
        invoice_id: Uuid,
    ) -> Result<(), RatingError>;
}
