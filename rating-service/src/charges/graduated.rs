use rust_decimal::Decimal;

use super::{add, mul, with_tier, RangeResolver};
use crate::error::RatingError;
use crate::models::{FeeResult, Tier, UsageAggregate};

/// Each occupied tier bills its flat amount once plus its span at its own rate.
pub(super) fn apply(tiers: &[Tier], aggregate: &UsageAggregate) -> Result<FeeResult, RatingError> {
    let spans = RangeResolver::new(tiers).resolve(aggregate.value);

    let mut total = Decimal::ZERO;
    let mut breakdown = Vec::with_capacity(spans.len());
    for span in &spans {
        let amount = add(span.tier.flat_amount, mul(span.units, span.tier.per_unit_amount)?)?;
        total = add(total, amount)?;
        breakdown.push((span.index, amount, span.units));
    }

    Ok(breakdown.into_iter().fold(
        FeeResult::new(total, aggregate.value.max(Decimal::ZERO)),
        |fee, (index, amount, units)| with_tier(fee, index, amount, units),
    ))
}
