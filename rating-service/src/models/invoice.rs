//! Invoice read model, as returned by the invoicing collaborator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Finalized,
    /// Creation could not complete (for example tax computation); retriable.
    Failed,
    Voided,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Finalized => "finalized",
            InvoiceStatus::Failed => "failed",
            InvoiceStatus::Voided => "voided",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "finalized" => InvoiceStatus::Finalized,
            "failed" => InvoiceStatus::Failed,
            "voided" => InvoiceStatus::Voided,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Statuses whose fees count as already invoiced usage.
    pub fn counts_as_invoiced(&self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Finalized)
    }
}

/// Invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub subscription_id: Uuid,
    pub status: InvoiceStatus,
    pub fees_amount_cents: i64,
}
