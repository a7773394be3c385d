//! Usage aggregates handed to the engine by the aggregation collaborator.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::ChargeModel;

/// Values of the grouping properties an aggregate was computed for.
pub type GroupingKey = BTreeMap<String, String>;

/// Time-weighted contribution of one usage event of a recurring metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProratedEvent {
    /// Signed raw quantity change.
    pub raw_delta: Decimal,
    /// `raw_delta × remaining_days / period_days`.
    pub prorated_delta: Decimal,
}

/// Aggregated usage for one charge (or one filter/group of a charge).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UsageAggregate {
    pub value: Decimal,
    pub event_count: i64,
    #[serde(default)]
    pub grouping_key: Option<GroupingKey>,
    /// Chronological per-event deltas, required by prorated models.
    #[serde(default)]
    pub per_event: Option<Vec<ProratedEvent>>,
}

impl UsageAggregate {
    pub fn new(value: Decimal, event_count: i64) -> Self {
        Self {
            value,
            event_count,
            grouping_key: None,
            per_event: None,
        }
    }

    pub fn with_grouping_key(mut self, key: GroupingKey) -> Self {
        self.grouping_key = Some(key);
        self
    }

    /// Build a prorated aggregate whose value is the final raw cumulative total.
    pub fn prorated(events: Vec<ProratedEvent>) -> Self {
        let value = events.iter().map(|e| e.raw_delta).sum();
        Self {
            value,
            event_count: events.len() as i64,
            grouping_key: None,
            per_event: Some(events),
        }
    }
}

/// A charge filter: a subset of events (by property values) that may override
/// the charge's pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeFilter {
    pub filter_id: Uuid,
    pub values: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub model: Option<ChargeModel>,
}

/// A metered charge of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub charge_id: Uuid,
    pub billable_metric_code: String,
    pub model: ChargeModel,
    #[serde(default)]
    pub filters: Vec<ChargeFilter>,
}

impl Charge {
    pub fn filter(&self, filter_id: Uuid) -> Option<&ChargeFilter> {
        self.filters.iter().find(|f| f.filter_id == filter_id)
    }

    /// Pricing to apply for an aggregate, honoring filter overrides.
    pub fn model_for(&self, filter_id: Option<Uuid>) -> &ChargeModel {
        filter_id
            .and_then(|id| self.filter(id))
            .and_then(|f| f.model.as_ref())
            .unwrap_or(&self.model)
    }
}

/// One aggregate of a charge, optionally scoped to a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedAggregate {
    #[serde(default)]
    pub filter_id: Option<Uuid>,
    pub aggregate: UsageAggregate,
}

/// Aggregated usage of one charge over the current period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeAggregates {
    pub charge: Charge,
    pub aggregates: Vec<ScopedAggregate>,
}

/// Output of the aggregation collaborator for one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodUsage {
    pub from_datetime: DateTime<Utc>,
    pub to_datetime: DateTime<Utc>,
    pub charges: Vec<ChargeAggregates>,
}
