//! Error taxonomy for rating-service.

use rust_decimal::Decimal;
use service_core::error::AppError;
use service_core::retry::Retryable;
use thiserror::Error;

use crate::models::ChargeModelKind;
use crate::services::InvoiceCreationError;

#[derive(Debug, Error)]
pub enum RatingError {
    /// The charge model is malformed or does not support the requested operation.
    #[error("Invalid charge model: {0}")]
    InvalidChargeModel(String),

    #[error("Charge model '{0}' does not support unit adjustment")]
    InvalidChargeModelForUnitAdjustment(ChargeModelKind),

    #[error("Charge model '{0}' requires per-event aggregation")]
    MissingPerEventAggregation(ChargeModelKind),

    #[error("Amount {0} cannot be represented in currency subunits")]
    AmountOutOfRange(Decimal),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// Invoice left in a retriable failed state by the tax provider.
    #[error("Tax computation failed: {0}")]
    TaxComputationFailure(String),

    /// Stale optimistic-lock version, lock not available or uniqueness collision.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error("Collaborator error: {0}")]
    Collaborator(anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RatingError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        RatingError::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RatingError::InvalidChargeModel(_) => "invalid_charge_model",
            RatingError::InvalidChargeModelForUnitAdjustment(_) => {
                "invalid_charge_model_for_unit_adjustment"
            }
            RatingError::MissingPerEventAggregation(_) => "missing_per_event_aggregation",
            RatingError::AmountOutOfRange(_) => "amount_out_of_range",
            RatingError::NotFound { .. } => "not_found",
            RatingError::TaxComputationFailure(_) => "tax_computation_failure",
            RatingError::ConcurrencyConflict(_) => "concurrency_conflict",
            RatingError::Database(_) => "database",
            RatingError::Collaborator(_) => "collaborator",
            RatingError::Serialization(_) => "serialization",
        }
    }
}

impl Retryable for RatingError {
    fn is_retryable(&self) -> bool {
        matches!(self, RatingError::ConcurrencyConflict(_))
    }
}

impl From<sqlx::Error> for RatingError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                RatingError::ConcurrencyConflict(db_err.message().to_string())
            }
            // 55P03 lock_not_available, 40001 serialization_failure, 40P01 deadlock_detected
            sqlx::Error::Database(db_err)
                if matches!(db_err.code().as_deref(), Some("55P03" | "40001" | "40P01")) =>
            {
                RatingError::ConcurrencyConflict(db_err.message().to_string())
            }
            _ => RatingError::Database(anyhow::Error::new(err)),
        }
    }
}

impl From<InvoiceCreationError> for RatingError {
    fn from(err: InvoiceCreationError) -> Self {
        match err {
            InvoiceCreationError::Tax { message, .. } => RatingError::TaxComputationFailure(message),
            InvoiceCreationError::Other(e) => RatingError::Collaborator(e),
        }
    }
}

impl From<RatingError> for AppError {
    fn from(err: RatingError) -> Self {
        match err {
            RatingError::InvalidChargeModel(_)
            | RatingError::InvalidChargeModelForUnitAdjustment(_)
            | RatingError::MissingPerEventAggregation(_)
            | RatingError::AmountOutOfRange(_) => AppError::BadRequest(anyhow::Error::new(err)),
            RatingError::NotFound { .. } => AppError::NotFound(anyhow::Error::new(err)),
            RatingError::ConcurrencyConflict(_) => AppError::Conflict(anyhow::Error::new(err)),
            RatingError::Database(e) => AppError::DatabaseError(e),
            RatingError::TaxComputationFailure(_) | RatingError::Collaborator(_) => {
                AppError::BadGateway(err.to_string())
            }
            RatingError::Serialization(e) => AppError::InternalError(anyhow::Error::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_concurrency_conflicts_are_retryable() {
        assert!(RatingError::ConcurrencyConflict("stale".into()).is_retryable());
        assert!(!RatingError::TaxComputationFailure("tax".into()).is_retryable());
        assert!(!RatingError::not_found("subscription", "abc").is_retryable());
        assert!(!RatingError::InvalidChargeModel("bad".into()).is_retryable());
    }

    #[test]
    fn not_found_message_names_resource() {
        let err = RatingError::not_found("usage threshold", "42");
        assert_eq!(err.to_string(), "usage threshold not found: 42");
    }

    #[test]
    fn invoice_creation_errors_keep_their_kind() {
        let tax: RatingError = InvoiceCreationError::Tax {
            invoice_id: None,
            message: "provider down".into(),
        }
        .into();
        assert!(matches!(tax, RatingError::TaxComputationFailure(_)));

        let other: RatingError = InvoiceCreationError::Other(anyhow::anyhow!("boom")).into();
        assert!(matches!(other, RatingError::Collaborator(_)));
    }

    #[test]
    fn maps_to_app_error() {
        let err: AppError = RatingError::ConcurrencyConflict("stale".into()).into();
        assert!(matches!(err, AppError::Conflict(_)));

        let err: AppError =
            RatingError::InvalidChargeModelForUnitAdjustment(ChargeModelKind::Percentage).into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
