//! Charge model engine.
//!
//! Pure fee computation: every function here maps a model and an aggregate to
//! a [`FeeResult`] without I/O. The only side effect is the fee counter.

mod graduated;
mod graduated_percentage;
mod package;
mod percentage;
mod prorated_graduated;
pub mod ranges;
mod standard;
mod volume;

use rust_decimal::Decimal;

use crate::error::RatingError;
use crate::models::{ChargeModel, FeeAdjustment, FeeResult, UsageAggregate};
use crate::services::metrics::record_fee_computed;

pub use ranges::{RangeResolver, TierSpan};

/// Compute the fee of `aggregate` under `model`.
pub fn apply(model: &ChargeModel, aggregate: &UsageAggregate) -> Result<FeeResult, RatingError> {
    model.validate()?;

    let fee = match model {
        ChargeModel::Standard { unit_amount } => standard::apply(*unit_amount, aggregate)?,
        ChargeModel::Package {
            block_amount,
            block_size,
            free_units,
        } => package::apply(*block_amount, *block_size, *free_units, aggregate)?,
        ChargeModel::Percentage {
            rate_fraction,
            fixed_amount,
        } => percentage::apply(*rate_fraction, *fixed_amount, aggregate)?,
        ChargeModel::Graduated { tiers } => graduated::apply(tiers, aggregate)?,
        ChargeModel::GraduatedPercentage { tiers } => {
            graduated_percentage::apply(tiers, aggregate)?
        }
        ChargeModel::Volume { tiers } => volume::apply(tiers, aggregate)?,
        ChargeModel::ProratedGraduated { tiers } => prorated_graduated::apply(tiers, aggregate)?,
    };

    record_fee_computed(model.kind().as_str());
    Ok(fee)
}

/// Price a single pay-in-advance event: the fee added by moving the
/// aggregate from `previous` to `current`, never negative.
pub fn apply_incremental(
    model: &ChargeModel,
    previous: &UsageAggregate,
    current: &UsageAggregate,
) -> Result<FeeResult, RatingError> {
    let before = apply(model, previous)?;
    let after = apply(model, current)?;

    let amount = sub(after.amount, before.amount)?.max(Decimal::ZERO);
    Ok(FeeResult::new(amount, sub(current.value, previous.value)?))
}

/// Compute a fee with a manual adjustment applied.
///
/// A monetary adjustment (`unit_amount` set) is legal on every model. A pure
/// unit adjustment re-prices the model at the adjusted quantity, which has no
/// meaning for percentage models.
pub fn apply_adjustment(
    model: &ChargeModel,
    aggregate: &UsageAggregate,
    adjustment: &FeeAdjustment,
) -> Result<FeeResult, RatingError> {
    match (adjustment.units, adjustment.unit_amount) {
        (units, Some(unit_amount)) => {
            let units = units.unwrap_or(aggregate.value);
            let mut fee = FeeResult::new(mul(units, unit_amount)?, units);
            fee.unit_amount = unit_amount;
            Ok(fee)
        }
        (Some(units), None) => {
            let kind = model.kind();
            if kind.is_percentage() {
                return Err(RatingError::InvalidChargeModelForUnitAdjustment(kind));
            }

            let adjusted = UsageAggregate {
                value: units,
                per_event: None,
                ..aggregate.clone()
            };

            match model {
                // Adjusted units carry no event history, bill them as full units.
                ChargeModel::ProratedGraduated { tiers } => {
                    model.validate()?;
                    let fee = graduated::apply(tiers, &adjusted)?;
                    record_fee_computed(kind.as_str());
                    Ok(fee)
                }
                _ => apply(model, &adjusted),
            }
        }
        (None, None) => apply(model, aggregate),
    }
}

// Aggregates come from outside the engine: overflow is an error, never a panic.

fn add(a: Decimal, b: Decimal) -> Result<Decimal, RatingError> {
    a.checked_add(b)
        .ok_or(RatingError::AmountOutOfRange(a.abs().max(b.abs())))
}

fn sub(a: Decimal, b: Decimal) -> Result<Decimal, RatingError> {
    a.checked_sub(b)
        .ok_or(RatingError::AmountOutOfRange(a.abs().max(b.abs())))
}

fn mul(a: Decimal, b: Decimal) -> Result<Decimal, RatingError> {
    a.checked_mul(b)
        .ok_or(RatingError::AmountOutOfRange(a.abs().max(b.abs())))
}

fn div(a: Decimal, b: Decimal) -> Result<Decimal, RatingError> {
    a.checked_div(b).ok_or(RatingError::AmountOutOfRange(a))
}

fn with_tier(fee: FeeResult, index: usize, amount: Decimal, units: Decimal) -> FeeResult {
    let n = index + 1;
    fee.with_breakdown(format!("tier_{}", n), amount)
        .with_breakdown(format!("tier_{}_units", n), units)
}
