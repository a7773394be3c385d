use rust_decimal::Decimal;

use super::mul;
use crate::error::RatingError;
use crate::models::{FeeResult, UsageAggregate};

pub(super) fn apply(unit_amount: Decimal, aggregate: &UsageAggregate) -> Result<FeeResult, RatingError> {
    let mut fee = FeeResult::new(mul(unit_amount, aggregate.value)?, aggregate.value);
    fee.unit_amount = unit_amount;
    Ok(fee)
}
