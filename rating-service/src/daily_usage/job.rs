use chrono::NaiveDate;
use std::time::Instant;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::service::DailyUsageService;
use crate::error::RatingError;
use crate::models::DailyUsageSnapshot;
use crate::services::metrics::{record_error, record_job_duration};

/// Computes the daily usage snapshot of one subscription.
#[derive(Clone)]
pub struct DailyUsageJob {
    service: DailyUsageService,
}

impl DailyUsageJob {
    pub fn new(service: DailyUsageService) -> Self {
        Self { service }
    }

    #[instrument(skip(self))]
    pub async fn run(
        &self,
        subscription_id: Uuid,
        usage_date: Option<NaiveDate>,
    ) -> Result<DailyUsageSnapshot, RatingError> {
        let start = Instant::now();
        let result = self.service.compute(subscription_id, usage_date).await;
        record_job_duration("daily_usage", start.elapsed().as_secs_f64());

        match &result {
            Ok(snapshot) => info!(
                usage_date = %snapshot.usage_date,
                daily_usage_id = %snapshot.daily_usage_id,
                "Daily usage job completed"
            ),
            Err(e) => {
                error!(error = %e, "Daily usage job failed");
                record_error(e.kind(), "daily_usage_job");
            }
        }

        result
    }
}
