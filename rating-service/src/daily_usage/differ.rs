//! Day-over-day difference between two usage trees of the same billing period.

use rust_decimal::prelude::*;

use crate::error::RatingError;
use crate::models::{ChargeUsage, FilterUsage, GroupedUsage, UsageTree};

/// Usage accrued between `previous` and `current`.
///
/// The result has the same shape as `current`. Charges, filters and groups
/// missing from `previous` keep their current values. Previous taxes are
/// prorated by the share of the previous amount whose charges are still
/// present in `current`.
pub fn compute_diff(
    current: &UsageTree,
    previous: Option<&UsageTree>,
) -> Result<UsageTree, RatingError> {
    let Some(previous) = previous else {
        return Ok(current.clone());
    };

    let mut diff = current.clone();
    let mut previous_amount_present: i64 = 0;

    for charge in &mut diff.charges_usage {
        if let Some(before) = previous.charge(charge.charge_id) {
            previous_amount_present += before.amount_cents;
            subtract_charge(charge, before);
        }
    }

    diff.amount_cents = current.amount_cents - previous_amount_present;
    diff.taxes_amount_cents = current.taxes_amount_cents
        - prorate(
            previous.taxes_amount_cents,
            previous_amount_present,
            previous.amount_cents,
        )?;
    diff.total_amount_cents = diff.amount_cents + diff.taxes_amount_cents;

    Ok(diff)
}

/// `taxes × present / amount`, rounded half away from zero.
fn prorate(taxes: i64, present: i64, amount: i64) -> Result<i64, RatingError> {
    if amount == 0 || present == amount {
        return Ok(taxes);
    }

    let prorated = Decimal::from(taxes) * Decimal::from(present) / Decimal::from(amount);
    prorated
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(RatingError::AmountOutOfRange(prorated))
}

fn subtract_charge(charge: &mut ChargeUsage, before: &ChargeUsage) {
    charge.units -= before.units;
    charge.events_count -= before.events_count;
    charge.amount_cents -= before.amount_cents;
    charge.taxes_amount_cents -= before.taxes_amount_cents;
    charge.total_aggregated_units -= before.total_aggregated_units;

    subtract_filters(&mut charge.filters, &before.filters);

    for group in &mut charge.grouped_usage {
        if let Some(prev) = before
            .grouped_usage
            .iter()
            .find(|g| g.grouped_by == group.grouped_by)
        {
            subtract_group(group, prev);
        }
    }
}

fn subtract_group(group: &mut GroupedUsage, before: &GroupedUsage) {
    group.units -= before.units;
    group.events_count -= before.events_count;
    group.amount_cents -= before.amount_cents;
    group.total_aggregated_units -= before.total_aggregated_units;

    subtract_filters(&mut group.filters, &before.filters);
}

fn subtract_filters(filters: &mut [FilterUsage], before: &[FilterUsage]) {
    for filter in filters {
        if let Some(prev) = before.iter().find(|f| f.filter_id == filter.filter_id) {
            filter.units -= prev.units;
            filter.events_count -= prev.events_count;
            filter.amount_cents -= prev.amount_cents;
            filter.total_aggregated_units -= prev.total_aggregated_units;
        }
    }
}
