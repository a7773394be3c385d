//! Daily usage snapshots and their day-over-day diffs.

pub mod differ;
pub mod job;
pub mod service;

pub use differ::compute_diff;
pub use job::DailyUsageJob;
pub use service::DailyUsageService;
