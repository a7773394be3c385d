//! Domain models for rating-service.

mod charge_model;
mod daily_usage;
mod fee;
mod invoice;
mod lifetime_usage;
mod subscription;
mod threshold;
mod usage;

pub use charge_model::{validate_tiers, ChargeModel, ChargeModelKind, Tier};
pub use daily_usage::{ChargeUsage, DailyUsageSnapshot, FilterUsage, GroupedUsage, UsageTree};
pub use fee::{currency_exponent, to_subunits, FeeAdjustment, FeeResult};
pub use invoice::{Invoice, InvoiceStatus};
pub use lifetime_usage::{LifetimeUsage, RecalculationState};
pub use subscription::{Subscription, SubscriptionLineage, SubscriptionStatus};
pub use threshold::{AppliedUsageThreshold, ThresholdCompletion, ThresholdCrossing, UsageThreshold};
pub use usage::{
    Charge, ChargeAggregates, ChargeFilter, GroupingKey, PeriodUsage, ProratedEvent,
    ScopedAggregate, UsageAggregate,
};
