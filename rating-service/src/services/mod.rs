//! Services module for rating-service.

pub mod clients;
pub mod collaborators;
pub mod database;
pub mod metrics;
pub mod store;

pub use clients::{HttpInvoiceCreator, HttpThresholdNotifier, HttpUsageAggregator};
pub use collaborators::{
    InvoiceCreationError, InvoiceCreator, UsageAggregator, UsageThresholdNotifier,
};
pub use database::Database;
pub use metrics::{
    get_metrics, init_metrics, record_daily_usage, record_error, record_fee_computed,
    record_job_duration, record_progressive_invoice, record_recalculation,
    record_threshold_crossed,
};
pub use store::{
    DailyUsageStore, HealthCheck, LifetimeUsageStore, RecalculationLock, SubscriptionStore,
};
