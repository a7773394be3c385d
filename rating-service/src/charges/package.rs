//! Package pricing: usage is billed in whole blocks after the free allowance.

use rust_decimal::Decimal;

use super::{div, mul};
use crate::error::RatingError;
use crate::models::{FeeResult, UsageAggregate};

pub(super) fn apply(
    block_amount: Decimal,
    block_size: Decimal,
    free_units: Decimal,
    aggregate: &UsageAggregate,
) -> Result<FeeResult, RatingError> {
    let value = aggregate.value.max(Decimal::ZERO);
    let billable = (value - free_units).max(Decimal::ZERO);
    let blocks = div(billable, block_size)?.ceil();

    Ok(FeeResult::new(mul(blocks, block_amount)?, value)
        .with_breakdown("blocks", blocks)
        .with_breakdown("free_units", value.min(free_units)))
}
