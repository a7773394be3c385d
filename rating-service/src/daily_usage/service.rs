//! Daily usage snapshots.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::differ::compute_diff;
use crate::current_usage::CurrentUsageCalculator;
use crate::error::RatingError;
use crate::models::{DailyUsageSnapshot, Subscription, UsageTree};
use crate::services::metrics::record_daily_usage;
use crate::services::DailyUsageStore;

#[derive(Clone)]
pub struct DailyUsageService {
    store: Arc<dyn DailyUsageStore>,
    current_usage: CurrentUsageCalculator,
}

impl DailyUsageService {
    pub fn new(store: Arc<dyn DailyUsageStore>, current_usage: CurrentUsageCalculator) -> Self {
        Self {
            store,
            current_usage,
        }
    }

    /// Snapshot the subscription's usage at the end of `usage_date` (yesterday
    /// in the customer's timezone when omitted).
    ///
    /// A day is snapshotted at most once: an existing snapshot is returned
    /// as is, including when a concurrent run stored it first.
    #[instrument(skip(self))]
    pub async fn compute(
        &self,
        subscription_id: Uuid,
        usage_date: Option<NaiveDate>,
    ) -> Result<DailyUsageSnapshot, RatingError> {
        let subscription = self.store.get_subscription(subscription_id).await?;
        let tz = customer_timezone(&subscription);
        let usage_date = usage_date.unwrap_or_else(|| yesterday_in(tz, Utc::now()));

        if let Some(existing) = self
            .store
            .find_daily_usage(subscription_id, usage_date)
            .await?
        {
            debug!(%usage_date, "Daily usage already computed");
            record_daily_usage("existing");
            return Ok(existing);
        }

        let as_of = end_of_day(tz, usage_date);
        let usage = self.current_usage.compute(&subscription, as_of).await?;

        let previous = self
            .previous_usage(subscription_id, usage.from_datetime, usage_date)
            .await?;
        let usage_diff = compute_diff(&usage, previous.as_ref())?;

        let mut snapshot = DailyUsageSnapshot::new(
            subscription_id,
            subscription.external_id.clone(),
            usage_date,
            usage,
            Utc::now(),
        );
        snapshot.usage_diff = Some(usage_diff);

        if !self.store.insert_daily_usage(&snapshot).await? {
            record_daily_usage("duplicate");
            return self
                .store
                .find_daily_usage(subscription_id, usage_date)
                .await?
                .ok_or_else(|| {
                    RatingError::not_found("daily_usage", format!("{subscription_id}/{usage_date}"))
                });
        }

        record_daily_usage("created");
        info!(
            %usage_date,
            daily_usage_id = %snapshot.daily_usage_id,
            amount_cents = snapshot.usage.amount_cents,
            "Daily usage computed"
        );
        Ok(snapshot)
    }

    /// Usage tree of the day before `usage_date` in the same billing period,
    /// backfilling any missing diffs along the way.
    async fn previous_usage(
        &self,
        subscription_id: Uuid,
        from_datetime: DateTime<Utc>,
        usage_date: NaiveDate,
    ) -> Result<Option<UsageTree>, RatingError> {
        let Some(latest) = self
            .store
            .previous_daily_usage(subscription_id, from_datetime, usage_date)
            .await?
        else {
            return Ok(None);
        };

        if latest.usage_diff.is_some() {
            return Ok(Some(latest.usage));
        }

        // Newest first, down to the first snapshot that already has a diff.
        let mut cursor = latest.usage_date;
        let mut missing = vec![latest];
        let mut anchor = None;
        while let Some(before) = self
            .store
            .previous_daily_usage(subscription_id, from_datetime, cursor)
            .await?
        {
            if before.usage_diff.is_some() {
                anchor = Some(before.usage);
                break;
            }
            cursor = before.usage_date;
            missing.push(before);
        }

        warn!(count = missing.len(), "Backfilling daily usages without diff");

        let mut previous = anchor;
        for snapshot in missing.into_iter().rev() {
            let diff = compute_diff(&snapshot.usage, previous.as_ref())?;
            self.store
                .update_usage_diff(snapshot.daily_usage_id, &diff)
                .await?;
            record_daily_usage("backfilled");
            previous = Some(snapshot.usage);
        }

        Ok(previous)
    }
}

/// Falls back to UTC for unknown zone names.
fn customer_timezone(subscription: &Subscription) -> Tz {
    subscription.timezone.parse().unwrap_or_else(|_| {
        warn!(
            subscription_id = %subscription.subscription_id,
            timezone = %subscription.timezone,
            "Unknown timezone, using UTC"
        );
        Tz::UTC
    })
}

pub(crate) fn yesterday_in(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    let today = now.with_timezone(&tz).date_naive();
    today.pred_opt().unwrap_or(today)
}

/// The local midnight following `usage_date`, in UTC.
pub(crate) fn end_of_day(tz: Tz, usage_date: NaiveDate) -> DateTime<Utc> {
    let next_day = usage_date.succ_opt().unwrap_or(usage_date);
    let midnight = NaiveDateTime::new(next_day, NaiveTime::MIN);

    tz.from_local_datetime(&midnight)
        .earliest()
        // Midnight skipped by a DST jump.
        .or_else(|| tz.from_local_datetime(&(midnight + Duration::hours(1))).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}
