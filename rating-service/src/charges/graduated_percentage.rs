use rust_decimal::Decimal;

use super::{add, mul, with_tier, RangeResolver};
use crate::error::RatingError;
use crate::models::{FeeResult, Tier, UsageAggregate};

/// Tier walk of the graduated model where each occupied tier bills
/// `flat + span × rate% + event_count × per-event fee`.
///
/// The per-event fee is carried by the tier's `per_unit_amount`.
pub(super) fn apply(tiers: &[Tier], aggregate: &UsageAggregate) -> Result<FeeResult, RatingError> {
    let spans = RangeResolver::new(tiers).resolve(aggregate.value);
    let events = Decimal::from(aggregate.event_count.max(0));

    let mut total = Decimal::ZERO;
    let mut breakdown = Vec::with_capacity(spans.len());
    for span in &spans {
        let rate = span.tier.rate_fraction.unwrap_or_default() / Decimal::ONE_HUNDRED;
        let variable = add(mul(span.units, rate)?, mul(events, span.tier.per_unit_amount)?)?;
        let amount = add(span.tier.flat_amount, variable)?;
        total = add(total, amount)?;
        breakdown.push((span.index, amount, span.units));
    }

    Ok(breakdown.into_iter().fold(
        FeeResult::new(total, aggregate.value.max(Decimal::ZERO)),
        |fee, (index, amount, units)| with_tier(fee, index, amount, units),
    ))
}
