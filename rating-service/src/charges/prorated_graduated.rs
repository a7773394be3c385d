//! Graduated pricing for recurring metrics with time-weighted usage.
//!
//! Tier placement follows the raw running quantity while the billed units
//! are the prorated contributions. Each event's raw interval is mapped onto
//! the tiers and its prorated delta is split in proportion to the raw overlap,
//! so usage that crosses a boundary and later retreats is billed at the rate
//! of the tier it occupied while it existed.

use rust_decimal::Decimal;

use super::{add, div, mul, with_tier, RangeResolver};
use crate::error::RatingError;
use crate::models::{ChargeModelKind, FeeResult, ProratedEvent, Tier, UsageAggregate};

pub(super) fn apply(tiers: &[Tier], aggregate: &UsageAggregate) -> Result<FeeResult, RatingError> {
    let events = aggregate
        .per_event
        .as_deref()
        .ok_or(RatingError::MissingPerEventAggregation(
            ChargeModelKind::ProratedGraduated,
        ))?;

    let prorated_units = allocate(tiers, events)?;

    let mut total = Decimal::ZERO;
    let mut units = Decimal::ZERO;
    let mut breakdown = Vec::new();
    for (index, tier) in tiers.iter().enumerate() {
        let tier_units = prorated_units[index].max(Decimal::ZERO);
        let flat = if tier.is_occupied_by(aggregate.value) {
            tier.flat_amount
        } else {
            Decimal::ZERO
        };

        if tier_units.is_zero() && flat.is_zero() {
            continue;
        }

        let amount = add(flat, mul(tier_units, tier.per_unit_amount)?)?;
        total = add(total, amount)?;
        units = add(units, tier_units)?;
        breakdown.push((index, amount, tier_units));
    }

    let fee = breakdown.into_iter().fold(
        FeeResult::new(total, units),
        |fee, (index, amount, tier_units)| with_tier(fee, index, amount, tier_units),
    );
    Ok(fee.with_breakdown("full_units", aggregate.value))
}

/// Signed prorated units attributed to each tier, indexed like `tiers`.
pub(super) fn allocate(
    tiers: &[Tier],
    events: &[ProratedEvent],
) -> Result<Vec<Decimal>, RatingError> {
    let mut allocated = vec![Decimal::ZERO; tiers.len()];
    let mut cumulative = Decimal::ZERO;

    for event in events {
        let start = cumulative;
        let end = add(cumulative, event.raw_delta)?;
        cumulative = end;

        let width = event.raw_delta.abs();
        if width.is_zero() {
            continue;
        }

        for (index, tier) in tiers.iter().enumerate() {
            let overlap = RangeResolver::overlap(tier, start, end);
            if overlap.is_zero() {
                continue;
            }
            let share = div(mul(event.prorated_delta, overlap)?, width)?;
            allocated[index] = add(allocated[index], share)?;
        }
    }

    Ok(allocated)
}
