//! Database service for rating-service.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::types::Json;
use sqlx::{FromRow, Transaction};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::RatingError;
use crate::models::{
    AppliedUsageThreshold, DailyUsageSnapshot, LifetimeUsage, RecalculationState, Subscription,
    SubscriptionLineage, UsageThreshold, UsageTree,
};
use crate::services::metrics::db_timer;
use crate::services::store::{
    DailyUsageStore, HealthCheck, LifetimeUsageStore, RecalculationLock, SubscriptionStore,
};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Map a query failure, keeping lock and uniqueness collisions retryable.
fn query_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> RatingError {
    move |e| match RatingError::from(e) {
        RatingError::Database(inner) => {
            RatingError::Database(anyhow::anyhow!("{}: {}", context, inner))
        }
        other => other,
    }
}

/// Transaction-scoped advisory lock. Rolling back on drop gives it back.
struct AdvisoryLock {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RecalculationLock for AdvisoryLock {
    async fn release(self: Box<Self>) -> Result<(), RatingError> {
        self.tx
            .commit()
            .await
            .map_err(query_error("Failed to release recalculation lock"))
    }
}

/// Advisory lock keys are 64 bits wide.
fn advisory_key(id: Uuid) -> i64 {
    let (high, low) = id.as_u64_pair();
    (high ^ low) as i64
}

#[derive(Debug, FromRow)]
struct LifetimeUsageRow {
    lifetime_usage_id: Uuid,
    subscription_id: Uuid,
    current_usage_amount_cents: i64,
    invoiced_usage_amount_cents: i64,
    historical_usage_amount_cents: i64,
    recalculate_current_usage: bool,
    recalculate_invoiced_usage: bool,
    current_usage_refreshed_at: Option<DateTime<Utc>>,
    invoiced_usage_refreshed_at: Option<DateTime<Utc>>,
    version: i64,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<LifetimeUsageRow> for LifetimeUsage {
    fn from(row: LifetimeUsageRow) -> Self {
        Self {
            lifetime_usage_id: row.lifetime_usage_id,
            subscription_id: row.subscription_id,
            current_usage_amount_cents: row.current_usage_amount_cents,
            invoiced_usage_amount_cents: row.invoiced_usage_amount_cents,
            historical_usage_amount_cents: row.historical_usage_amount_cents,
            recalculation: RecalculationState::from_flags(
                row.recalculate_current_usage,
                row.recalculate_invoiced_usage,
            ),
            current_usage_refreshed_at: row.current_usage_refreshed_at,
            invoiced_usage_refreshed_at: row.invoiced_usage_refreshed_at,
            version: row.version,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

#[derive(Debug, FromRow)]
struct DailyUsageRow {
    daily_usage_id: Uuid,
    subscription_id: Uuid,
    external_subscription_id: String,
    usage_date: NaiveDate,
    from_datetime: DateTime<Utc>,
    to_datetime: DateTime<Utc>,
    usage: Json<UsageTree>,
    usage_diff: Option<Json<UsageTree>>,
    refreshed_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<DailyUsageRow> for DailyUsageSnapshot {
    fn from(row: DailyUsageRow) -> Self {
        Self {
            daily_usage_id: row.daily_usage_id,
            subscription_id: row.subscription_id,
            external_subscription_id: row.external_subscription_id,
            usage_date: row.usage_date,
            from_datetime: row.from_datetime,
            to_datetime: row.to_datetime,
            usage: row.usage.0,
            usage_diff: row.usage_diff.map(|diff| diff.0),
            refreshed_at: row.refreshed_at,
            created_at: row.created_at,
        }
    }
}

const LIFETIME_USAGE_COLUMNS: &str = "lifetime_usage_id, subscription_id, current_usage_amount_cents, invoiced_usage_amount_cents, historical_usage_amount_cents, recalculate_current_usage, recalculate_invoiced_usage, current_usage_refreshed_at, invoiced_usage_refreshed_at, version, created_utc, updated_utc";

const DAILY_USAGE_COLUMNS: &str = "daily_usage_id, subscription_id, external_subscription_id, usage_date, from_datetime, to_datetime, usage, usage_diff, refreshed_at, created_at";

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "rating-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let _timer = db_timer("health_check");

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl HealthCheck for Database {
    async fn health_check(&self) -> Result<(), AppError> {
        Database::health_check(self).await
    }
}

// =========================================================================
// Subscriptions
// =========================================================================

#[async_trait]
impl SubscriptionStore for Database {
    #[instrument(skip(self))]
    async fn get_subscription(&self, subscription_id: Uuid) -> Result<Subscription, RatingError> {
        let _timer = db_timer("get_subscription");

        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, external_id, customer_id, plan_id, status, subscription_at, currency, timezone, tax_rate
            FROM subscriptions
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("Failed to get subscription"))?
        .ok_or_else(|| RatingError::not_found("subscription", subscription_id))
    }
}

// =========================================================================
// Lifetime usage and thresholds
// =========================================================================

#[async_trait]
impl LifetimeUsageStore for Database {
    #[instrument(skip(self))]
    async fn lock_lifetime_usage(
        &self,
        lifetime_usage_id: Uuid,
    ) -> Result<Box<dyn RecalculationLock>, RatingError> {
        let _timer = db_timer("lock_lifetime_usage");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_error("Failed to begin recalculation lock"))?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(advisory_key(lifetime_usage_id))
            .fetch_one(&mut *tx)
            .await
            .map_err(query_error("Failed to take recalculation lock"))?;

        if !acquired {
            return Err(RatingError::ConcurrencyConflict(format!(
                "lifetime usage {} is being recalculated elsewhere",
                lifetime_usage_id
            )));
        }

        debug!("Recalculation lock acquired");
        Ok(Box::new(AdvisoryLock { tx }))
    }

    #[instrument(skip(self), fields(external_subscription_id = %lineage.external_id))]
    async fn lineage_invoiced_amount_cents(
        &self,
        lineage: &SubscriptionLineage,
    ) -> Result<i64, RatingError> {
        let _timer = db_timer("lineage_invoiced_amount_cents");

        let (amount,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(i.fees_amount_cents), 0)::BIGINT
            FROM invoices i
            JOIN subscriptions s ON s.subscription_id = i.subscription_id
            WHERE s.external_id = $1
              AND s.subscription_at = $2
              AND s.status <> 'canceled'
              AND i.status IN ('draft', 'finalized')
            "#,
        )
        .bind(&lineage.external_id)
        .bind(lineage.subscription_at)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error("Failed to sum invoiced usage"))?;

        Ok(amount)
    }

    #[instrument(skip(self))]
    async fn usage_thresholds(&self, plan_id: Uuid) -> Result<Vec<UsageThreshold>, RatingError> {
        let _timer = db_timer("usage_thresholds");

        sqlx::query_as::<_, UsageThreshold>(
            r#"
            SELECT usage_threshold_id, plan_id, threshold_display_name, amount_cents, recurring
            FROM usage_thresholds
            WHERE plan_id = $1 AND deleted_at IS NULL
            ORDER BY recurring, amount_cents
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("Failed to list usage thresholds"))
    }

    #[instrument(skip(self), fields(external_subscription_id = %lineage.external_id))]
    async fn applied_usage_thresholds(
        &self,
        lineage: &SubscriptionLineage,
    ) -> Result<Vec<AppliedUsageThreshold>, RatingError> {
        let _timer = db_timer("applied_usage_thresholds");

        sqlx::query_as::<_, AppliedUsageThreshold>(
            r#"
            SELECT applied_usage_threshold_id, usage_threshold_id, invoice_id, subscription_id, external_subscription_id, subscription_at, lifetime_usage_amount_cents, created_at
            FROM applied_usage_thresholds
            WHERE external_subscription_id = $1 AND subscription_at = $2
            ORDER BY created_at
            "#,
        )
        .bind(&lineage.external_id)
        .bind(lineage.subscription_at)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("Failed to list applied usage thresholds"))
    }

    #[instrument(
        skip(self, applied),
        fields(
            usage_threshold_id = %applied.usage_threshold_id,
            invoice_id = %applied.invoice_id
        )
    )]
    async fn record_applied_usage_threshold(
        &self,
        applied: &AppliedUsageThreshold,
    ) -> Result<(), RatingError> {
        let _timer = db_timer("record_applied_usage_threshold");

        sqlx::query(
            r#"
            INSERT INTO applied_usage_thresholds (applied_usage_threshold_id, usage_threshold_id, invoice_id, subscription_id, external_subscription_id, subscription_at, lifetime_usage_amount_cents, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(applied.applied_usage_threshold_id)
        .bind(applied.usage_threshold_id)
        .bind(applied.invoice_id)
        .bind(applied.subscription_id)
        .bind(&applied.external_subscription_id)
        .bind(applied.subscription_at)
        .bind(applied.lifetime_usage_amount_cents)
        .bind(applied.created_at)
        .execute(&self.pool)
        .await
        .map_err(query_error("Failed to record applied usage threshold"))?;

        info!("Applied usage threshold recorded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_lifetime_usage(
        &self,
        lifetime_usage_id: Uuid,
    ) -> Result<LifetimeUsage, RatingError> {
        let _timer = db_timer("get_lifetime_usage");

        let row = sqlx::query_as::<_, LifetimeUsageRow>(&format!(
            "SELECT {} FROM lifetime_usages WHERE lifetime_usage_id = $1",
            LIFETIME_USAGE_COLUMNS
        ))
        .bind(lifetime_usage_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("Failed to get lifetime usage"))?
        .ok_or_else(|| RatingError::not_found("lifetime usage", lifetime_usage_id))?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn find_or_create_lifetime_usage(
        &self,
        subscription_id: Uuid,
    ) -> Result<LifetimeUsage, RatingError> {
        let _timer = db_timer("find_or_create_lifetime_usage");

        let created = LifetimeUsage::new(subscription_id);
        sqlx::query(
            r#"
            INSERT INTO lifetime_usages (lifetime_usage_id, subscription_id)
            VALUES ($1, $2)
            ON CONFLICT (subscription_id) DO NOTHING
            "#,
        )
        .bind(created.lifetime_usage_id)
        .bind(subscription_id)
        .execute(&self.pool)
        .await
        .map_err(query_error("Failed to create lifetime usage"))?;

        let row = sqlx::query_as::<_, LifetimeUsageRow>(&format!(
            "SELECT {} FROM lifetime_usages WHERE subscription_id = $1",
            LIFETIME_USAGE_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error("Failed to load lifetime usage"))?;

        Ok(row.into())
    }

    #[instrument(
        skip(self, usage),
        fields(lifetime_usage_id = %usage.lifetime_usage_id, version = usage.version)
    )]
    async fn save_lifetime_usage(
        &self,
        usage: &LifetimeUsage,
    ) -> Result<LifetimeUsage, RatingError> {
        let _timer = db_timer("save_lifetime_usage");

        let row = sqlx::query_as::<_, LifetimeUsageRow>(&format!(
            r#"
            UPDATE lifetime_usages
            SET current_usage_amount_cents = $3,
                invoiced_usage_amount_cents = $4,
                historical_usage_amount_cents = $5,
                recalculate_current_usage = $6,
                recalculate_invoiced_usage = $7,
                current_usage_refreshed_at = $8,
                invoiced_usage_refreshed_at = $9,
                version = version + 1,
                updated_utc = NOW()
            WHERE lifetime_usage_id = $1 AND version = $2
            RETURNING {}
            "#,
            LIFETIME_USAGE_COLUMNS
        ))
        .bind(usage.lifetime_usage_id)
        .bind(usage.version)
        .bind(usage.current_usage_amount_cents)
        .bind(usage.invoiced_usage_amount_cents)
        .bind(usage.historical_usage_amount_cents)
        .bind(usage.recalculation.needs_current())
        .bind(usage.recalculation.needs_invoiced())
        .bind(usage.current_usage_refreshed_at)
        .bind(usage.invoiced_usage_refreshed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("Failed to save lifetime usage"))?
        .ok_or_else(|| {
            RatingError::ConcurrencyConflict(format!(
                "lifetime usage {} changed since version {}",
                usage.lifetime_usage_id, usage.version
            ))
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn flag_plan_for_invoiced_recalculation(
        &self,
        plan_id: Uuid,
    ) -> Result<u64, RatingError> {
        let _timer = db_timer("flag_plan_for_invoiced_recalculation");

        let result = sqlx::query(
            r#"
            UPDATE lifetime_usages lu
            SET recalculate_invoiced_usage = TRUE,
                version = lu.version + 1,
                updated_utc = NOW()
            FROM subscriptions s
            WHERE s.subscription_id = lu.subscription_id
              AND s.plan_id = $1
              AND s.status = 'active'
            "#,
        )
        .bind(plan_id)
        .execute(&self.pool)
        .await
        .map_err(query_error("Failed to flag lifetime usages"))?;

        info!(flagged = result.rows_affected(), "Plan lifetime usages flagged");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn lifetime_usages_to_recalculate(&self, limit: i64) -> Result<Vec<Uuid>, RatingError> {
        let _timer = db_timer("lifetime_usages_to_recalculate");

        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT lifetime_usage_id
            FROM lifetime_usages
            WHERE recalculate_current_usage OR recalculate_invoiced_usage
            ORDER BY updated_utc
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("Failed to list lifetime usages to recalculate"))?;

        debug!(count = ids.len(), "Lifetime usages pending recalculation");
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}

// =========================================================================
// Daily usage
// =========================================================================

#[async_trait]
impl DailyUsageStore for Database {
    #[instrument(skip(self))]
    async fn find_daily_usage(
        &self,
        subscription_id: Uuid,
        usage_date: NaiveDate,
    ) -> Result<Option<DailyUsageSnapshot>, RatingError> {
        let _timer = db_timer("find_daily_usage");

        let row = sqlx::query_as::<_, DailyUsageRow>(&format!(
            "SELECT {} FROM daily_usages WHERE subscription_id = $1 AND usage_date = $2",
            DAILY_USAGE_COLUMNS
        ))
        .bind(subscription_id)
        .bind(usage_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("Failed to get daily usage"))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn previous_daily_usage(
        &self,
        subscription_id: Uuid,
        from_datetime: DateTime<Utc>,
        usage_date: NaiveDate,
    ) -> Result<Option<DailyUsageSnapshot>, RatingError> {
        let _timer = db_timer("previous_daily_usage");

        let row = sqlx::query_as::<_, DailyUsageRow>(&format!(
            r#"
            SELECT {}
            FROM daily_usages
            WHERE subscription_id = $1 AND from_datetime = $2 AND usage_date < $3
            ORDER BY usage_date DESC
            LIMIT 1
            "#,
            DAILY_USAGE_COLUMNS
        ))
        .bind(subscription_id)
        .bind(from_datetime)
        .bind(usage_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("Failed to get previous daily usage"))?;

        Ok(row.map(Into::into))
    }

    #[instrument(
        skip(self, snapshot),
        fields(subscription_id = %snapshot.subscription_id, usage_date = %snapshot.usage_date)
    )]
    async fn insert_daily_usage(&self, snapshot: &DailyUsageSnapshot) -> Result<bool, RatingError> {
        let _timer = db_timer("insert_daily_usage");

        let result = sqlx::query(
            r#"
            INSERT INTO daily_usages (daily_usage_id, subscription_id, external_subscription_id, usage_date, from_datetime, to_datetime, usage, usage_diff, refreshed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (subscription_id, usage_date) DO NOTHING
            "#,
        )
        .bind(snapshot.daily_usage_id)
        .bind(snapshot.subscription_id)
        .bind(&snapshot.external_subscription_id)
        .bind(snapshot.usage_date)
        .bind(snapshot.from_datetime)
        .bind(snapshot.to_datetime)
        .bind(Json(&snapshot.usage))
        .bind(snapshot.usage_diff.as_ref().map(Json))
        .bind(snapshot.refreshed_at)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(query_error("Failed to insert daily usage"))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, usage_diff))]
    async fn update_usage_diff(
        &self,
        daily_usage_id: Uuid,
        usage_diff: &UsageTree,
    ) -> Result<(), RatingError> {
        let _timer = db_timer("update_usage_diff");

        sqlx::query("UPDATE daily_usages SET usage_diff = $2 WHERE daily_usage_id = $1")
            .bind(daily_usage_id)
            .bind(Json(usage_diff))
            .execute(&self.pool)
            .await
            .map_err(query_error("Failed to update usage diff"))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn subscriptions_due_for_daily_usage(
        &self,
        limit: i64,
    ) -> Result<Vec<Uuid>, RatingError> {
        let _timer = db_timer("subscriptions_due_for_daily_usage");

        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT s.subscription_id
            FROM subscriptions s
            WHERE s.status = 'active'
              AND NOT EXISTS (
                SELECT 1 FROM daily_usages du
                WHERE du.subscription_id = s.subscription_id
                  AND du.usage_date >= (NOW() AT TIME ZONE s.timezone)::DATE - 1
              )
            ORDER BY s.subscription_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("Failed to list subscriptions due for daily usage"))?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
