//! Lifetime usage tracking and progressive billing.

pub mod job;
pub mod progressive_billing;
pub mod thresholds;
pub mod tracker;

pub use job::{LifetimeUsageJob, LifetimeUsageJobReport};
pub use progressive_billing::{ProgressiveBillingOrchestrator, ProgressiveBillingOutcome};
pub use thresholds::ThresholdCrossingDetector;
pub use tracker::LifetimeUsageTracker;
