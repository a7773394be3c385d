//! Daily usage snapshots and the usage tree they carry.
//!
//! The serialized [`UsageTree`] shape is consumed by reporting surfaces; the
//! same shape is used for the day-over-day diff.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{ChargeModelKind, GroupingKey};

/// Usage of a charge filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterUsage {
    pub filter_id: Uuid,
    #[serde(default)]
    pub values: BTreeMap<String, Vec<String>>,
    pub units: Decimal,
    pub events_count: i64,
    pub amount_cents: i64,
    pub total_aggregated_units: Decimal,
}

/// Usage of one group of a grouped charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedUsage {
    pub grouped_by: GroupingKey,
    pub units: Decimal,
    pub events_count: i64,
    pub amount_cents: i64,
    pub total_aggregated_units: Decimal,
    #[serde(default)]
    pub filters: Vec<FilterUsage>,
}

/// Usage and fees of one charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeUsage {
    pub charge_id: Uuid,
    pub billable_metric_code: String,
    pub charge_model: ChargeModelKind,
    pub units: Decimal,
    pub events_count: i64,
    pub amount_cents: i64,
    pub taxes_amount_cents: i64,
    pub total_aggregated_units: Decimal,
    #[serde(default)]
    pub filters: Vec<FilterUsage>,
    #[serde(default)]
    pub grouped_usage: Vec<GroupedUsage>,
}

/// Current usage of a subscription over its billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageTree {
    pub from_datetime: DateTime<Utc>,
    pub to_datetime: DateTime<Utc>,
    pub issuing_date: NaiveDate,
    pub currency: String,
    pub amount_cents: i64,
    pub taxes_amount_cents: i64,
    pub total_amount_cents: i64,
    pub charges_usage: Vec<ChargeUsage>,
}

impl UsageTree {
    pub fn charge(&self, charge_id: Uuid) -> Option<&ChargeUsage> {
        self.charges_usage.iter().find(|c| c.charge_id == charge_id)
    }
}

/// Usage of a subscription as of the end of one day in the customer's timezone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsageSnapshot {
    pub daily_usage_id: Uuid,
    pub subscription_id: Uuid,
    pub external_subscription_id: String,
    pub usage_date: NaiveDate,
    pub from_datetime: DateTime<Utc>,
    pub to_datetime: DateTime<Utc>,
    pub usage: UsageTree,
    pub usage_diff: Option<UsageTree>,
    pub refreshed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DailyUsageSnapshot {
    pub fn new(
        subscription_id: Uuid,
        external_subscription_id: impl Into<String>,
        usage_date: NaiveDate,
        usage: UsageTree,
        refreshed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            daily_usage_id: Uuid::new_v4(),
            subscription_id,
            external_subscription_id: external_subscription_id.into(),
            usage_date,
            from_datetime: usage.from_datetime,
            to_datetime: usage.to_datetime,
            usage,
            usage_diff: None,
            refreshed_at,
            created_at: Utc::now(),
        }
    }
}
