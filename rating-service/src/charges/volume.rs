use rust_decimal::Decimal;

use super::{add, mul, with_tier, RangeResolver};
use crate::error::RatingError;
use crate::models::{FeeResult, Tier, UsageAggregate};

/// The whole value is priced at the rate of the tier it ends in.
pub(super) fn apply(tiers: &[Tier], aggregate: &UsageAggregate) -> Result<FeeResult, RatingError> {
    let value = aggregate.value;

    let fee = match RangeResolver::new(tiers).containing_tier(value) {
        Some((index, tier)) => {
            let amount = add(tier.flat_amount, mul(value, tier.per_unit_amount)?)?;
            with_tier(FeeResult::new(amount, value), index, amount, value)
        }
        None => FeeResult::new(Decimal::ZERO, value.max(Decimal::ZERO)),
    };
    Ok(fee)
}
