//! Pricing of a subscription's current billing period.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::charges;
use crate::error::RatingError;
use crate::models::{
    Charge, ChargeAggregates, ChargeUsage, FeeResult, FilterUsage, GroupedUsage, PeriodUsage,
    Subscription, UsageAggregate, UsageTree,
};
use crate::services::UsageAggregator;

/// Computes the usage tree of the current period through the aggregation
/// collaborator.
#[derive(Clone)]
pub struct CurrentUsageCalculator {
    aggregator: Arc<dyn UsageAggregator>,
}

impl CurrentUsageCalculator {
    pub fn new(aggregator: Arc<dyn UsageAggregator>) -> Self {
        Self { aggregator }
    }

    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    pub async fn compute(
        &self,
        subscription: &Subscription,
        as_of: DateTime<Utc>,
    ) -> Result<UsageTree, RatingError> {
        let period = self
            .aggregator
            .compute_current_usage(subscription, as_of)
            .await?;

        let tree = build_usage_tree(subscription, &period, as_of.date_naive())?;
        debug!(
            amount_cents = tree.amount_cents,
            charges = tree.charges_usage.len(),
            "Current usage computed"
        );
        Ok(tree)
    }
}

/// Price every aggregate of the period and fold the fees into a tree.
pub fn build_usage_tree(
    subscription: &Subscription,
    period: &PeriodUsage,
    issuing_date: NaiveDate,
) -> Result<UsageTree, RatingError> {
    let charges_usage = period
        .charges
        .iter()
        .map(|charge| charge_usage(subscription, charge))
        .collect::<Result<Vec<_>, _>>()?;

    let amount_cents = sum_cents(charges_usage.iter().map(|c| c.amount_cents))?;
    let taxes_amount_cents = sum_cents(charges_usage.iter().map(|c| c.taxes_amount_cents))?;
    let total_amount_cents = sum_cents([amount_cents, taxes_amount_cents])?;

    Ok(UsageTree {
        from_datetime: period.from_datetime,
        to_datetime: period.to_datetime,
        issuing_date,
        currency: subscription.currency.clone(),
        amount_cents,
        taxes_amount_cents,
        total_amount_cents,
        charges_usage,
    })
}

/// Priced contribution of one aggregate.
struct PricedAggregate {
    units: Decimal,
    events_count: i64,
    amount_cents: i64,
    total_aggregated_units: Decimal,
}

impl PricedAggregate {
    fn new(fee: &FeeResult, aggregate: &UsageAggregate, currency: &str) -> Result<Self, RatingError> {
        Ok(Self {
            units: fee.units,
            events_count: aggregate.event_count,
            amount_cents: fee.amount_cents(currency)?,
            total_aggregated_units: aggregate.value,
        })
    }

    /// Add this contribution to a charge, group or filter total.
    fn add_to(
        &self,
        units: &mut Decimal,
        events_count: &mut i64,
        amount_cents: &mut i64,
        total_aggregated_units: &mut Decimal,
    ) -> Result<(), RatingError> {
        let out_of_range = || RatingError::AmountOutOfRange(Decimal::from(self.amount_cents));

        *units = units.checked_add(self.units).ok_or_else(out_of_range)?;
        *events_count = events_count
            .checked_add(self.events_count)
            .ok_or_else(out_of_range)?;
        *amount_cents = amount_cents
            .checked_add(self.amount_cents)
            .ok_or_else(out_of_range)?;
        *total_aggregated_units = total_aggregated_units
            .checked_add(self.total_aggregated_units)
            .ok_or_else(out_of_range)?;
        Ok(())
    }
}

fn sum_cents(amounts: impl IntoIterator<Item = i64>) -> Result<i64, RatingError> {
    amounts.into_iter().try_fold(0_i64, |total, amount| {
        total
            .checked_add(amount)
            .ok_or(RatingError::AmountOutOfRange(Decimal::from(amount)))
    })
}

fn charge_usage(
    subscription: &Subscription,
    entry: &ChargeAggregates,
) -> Result<ChargeUsage, RatingError> {
    let charge = &entry.charge;
    let mut usage = ChargeUsage {
        charge_id: charge.charge_id,
        billable_metric_code: charge.billable_metric_code.clone(),
        charge_model: charge.model.kind(),
        units: Decimal::ZERO,
        events_count: 0,
        amount_cents: 0,
        taxes_amount_cents: 0,
        total_aggregated_units: Decimal::ZERO,
        filters: Vec::new(),
        grouped_usage: Vec::new(),
    };

    for scoped in &entry.aggregates {
        let aggregate = &scoped.aggregate;
        let fee = charges::apply(charge.model_for(scoped.filter_id), aggregate)?;
        let priced = PricedAggregate::new(&fee, aggregate, &subscription.currency)?;

        priced.add_to(
            &mut usage.units,
            &mut usage.events_count,
            &mut usage.amount_cents,
            &mut usage.total_aggregated_units,
        )?;

        match &aggregate.grouping_key {
            Some(key) => {
                let position = match usage.grouped_usage.iter().position(|g| &g.grouped_by == key)
                {
                    Some(position) => position,
                    None => {
                        usage.grouped_usage.push(GroupedUsage {
                            grouped_by: key.clone(),
                            units: Decimal::ZERO,
                            events_count: 0,
                            amount_cents: 0,
                            total_aggregated_units: Decimal::ZERO,
                            filters: Vec::new(),
                        });
                        usage.grouped_usage.len() - 1
                    }
                };
                let group = &mut usage.grouped_usage[position];
                priced.add_to(
                    &mut group.units,
                    &mut group.events_count,
                    &mut group.amount_cents,
                    &mut group.total_aggregated_units,
                )?;

                if let Some(filter_id) = scoped.filter_id {
                    add_filter_usage(&mut group.filters, charge, filter_id, &priced)?;
                }
            }
            None => {
                if let Some(filter_id) = scoped.filter_id {
                    add_filter_usage(&mut usage.filters, charge, filter_id, &priced)?;
                }
            }
        }
    }

    usage.taxes_amount_cents = tax_amount_cents(usage.amount_cents, subscription.tax_rate)?;
    Ok(usage)
}

fn add_filter_usage(
    filters: &mut Vec<FilterUsage>,
    charge: &Charge,
    filter_id: Uuid,
    priced: &PricedAggregate,
) -> Result<(), RatingError> {
    if let Some(existing) = filters.iter_mut().find(|f| f.filter_id == filter_id) {
        return priced.add_to(
            &mut existing.units,
            &mut existing.events_count,
            &mut existing.amount_cents,
            &mut existing.total_aggregated_units,
        );
    }

    filters.push(FilterUsage {
        filter_id,
        values: charge
            .filter(filter_id)
            .map(|f| f.values.clone())
            .unwrap_or_default(),
        units: priced.units,
        events_count: priced.events_count,
        amount_cents: priced.amount_cents,
        total_aggregated_units: priced.total_aggregated_units,
    });
    Ok(())
}

/// `round(amount_cents × tax_rate / 100)`, half away from zero.
pub fn tax_amount_cents(amount_cents: i64, tax_rate: Decimal) -> Result<i64, RatingError> {
    let taxes = Decimal::from(amount_cents)
        .checked_mul(tax_rate)
        .ok_or(RatingError::AmountOutOfRange(Decimal::from(amount_cents)))?
        / Decimal::ONE_HUNDRED;
    taxes
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(RatingError::AmountOutOfRange(taxes))
}
