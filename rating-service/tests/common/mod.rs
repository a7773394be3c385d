//! Test helper module for rating-service integration tests.
//!
//! Provides in-memory stores, scripted collaborators and an application
//! spawned on a random port.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rating_service::config::{
    CollaboratorConfig, DatabaseConfig, RatingConfig, RetrySettings, WorkerConfig,
};
use rating_service::current_usage::CurrentUsageCalculator;
use rating_service::daily_usage::DailyUsageService;
use rating_service::error::RatingError;
use rating_service::lifetime_usage::{
    LifetimeUsageJob, LifetimeUsageTracker, ProgressiveBillingOrchestrator,
};
use rating_service::models::{
    AppliedUsageThreshold, Charge, ChargeAggregates, ChargeModel, DailyUsageSnapshot, Invoice,
    InvoiceStatus, LifetimeUsage, PeriodUsage, RecalculationState, ScopedAggregate, Subscription,
    SubscriptionLineage, ThresholdCrossing, UsageAggregate, UsageThreshold, UsageTree,
};
use rating_service::services::{
    init_metrics, DailyUsageStore, HealthCheck, InvoiceCreationError, InvoiceCreator,
    LifetimeUsageStore, RecalculationLock, SubscriptionStore, UsageAggregator,
    UsageThresholdNotifier,
};
use rating_service::startup::{Application, Components};
use rating_service::workers::KeyedLocks;
use rust_decimal::Decimal;
use service_core::config::Config as CoreConfig;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Decimal literal.
pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn period_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

pub fn period_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 59).unwrap()
}

pub fn date(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn subscription(plan_id: Uuid) -> Subscription {
    Subscription {
        subscription_id: Uuid::new_v4(),
        external_id: format!("sub_{}", Uuid::new_v4().simple()),
        customer_id: Uuid::new_v4(),
        plan_id,
        status: "active".to_string(),
        subscription_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        currency: "EUR".to_string(),
        timezone: "UTC".to_string(),
        tax_rate: Decimal::from(20),
    }
}

pub fn threshold(plan_id: Uuid, amount_cents: i64, recurring: bool) -> UsageThreshold {
    UsageThreshold {
        usage_threshold_id: Uuid::new_v4(),
        plan_id,
        threshold_display_name: None,
        amount_cents,
        recurring,
    }
}

/// A period with one standard charge: `units × unit_amount` euros.
pub fn standard_period(charge_id: Uuid, units: i64, unit_amount: &str) -> PeriodUsage {
    PeriodUsage {
        from_datetime: period_start(),
        to_datetime: period_end(),
        charges: vec![ChargeAggregates {
            charge: Charge {
                charge_id,
                billable_metric_code: "api_calls".to_string(),
                model: ChargeModel::Standard {
                    unit_amount: d(unit_amount),
                },
                filters: Vec::new(),
            },
            aggregates: vec![ScopedAggregate {
                filter_id: None,
                aggregate: UsageAggregate::new(Decimal::from(units), units),
            }],
        }],
    }
}

// =========================================================================
// In-memory store
// =========================================================================

#[derive(Default)]
struct StoreState {
    subscriptions: HashMap<Uuid, Subscription>,
    invoices: Vec<(Uuid, InvoiceStatus, i64)>,
    thresholds: Vec<UsageThreshold>,
    applied: Vec<AppliedUsageThreshold>,
    lifetime_usages: HashMap<Uuid, LifetimeUsage>,
    daily_usages: Vec<DailyUsageSnapshot>,
}

/// Implements every store with the same uniqueness and version rules as
/// the Postgres schema.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    /// Number of upcoming `save_lifetime_usage` calls that lose a race.
    injected_conflicts: AtomicU32,
    unhealthy: AtomicBool,
    recalculating: Arc<Mutex<HashSet<Uuid>>>,
}

/// Held entry in [`InMemoryStore`]'s lock set, removed on drop.
struct HeldRecalculation {
    held: Arc<Mutex<HashSet<Uuid>>>,
    lifetime_usage_id: Uuid,
}

impl Drop for HeldRecalculation {
    fn drop(&mut self) {
        self.held.lock().unwrap().remove(&self.lifetime_usage_id);
    }
}

#[async_trait]
impl RecalculationLock for HeldRecalculation {
    async fn release(self: Box<Self>) -> Result<(), RatingError> {
        Ok(())
    }
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_subscription(&self, subscription: Subscription) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(subscription.subscription_id, subscription);
    }

    pub fn set_status(&self, subscription_id: Uuid, status: &str) {
        if let Some(sub) = self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .get_mut(&subscription_id)
        {
            sub.status = status.to_string();
        }
    }

    pub fn add_invoice(&self, subscription_id: Uuid, status: InvoiceStatus, fees_amount_cents: i64) {
        self.state
            .lock()
            .unwrap()
            .invoices
            .push((subscription_id, status, fees_amount_cents));
    }

    pub fn add_threshold(&self, threshold: UsageThreshold) {
        self.state.lock().unwrap().thresholds.push(threshold);
    }

    pub fn applied(&self) -> Vec<AppliedUsageThreshold> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn lifetime_usage_of(&self, subscription_id: Uuid) -> Option<LifetimeUsage> {
        self.state
            .lock()
            .unwrap()
            .lifetime_usages
            .values()
            .find(|u| u.subscription_id == subscription_id)
            .cloned()
    }

    /// Overwrite a stored lifetime usage, bypassing the version check.
    pub fn put_lifetime_usage(&self, usage: LifetimeUsage) {
        self.state
            .lock()
            .unwrap()
            .lifetime_usages
            .insert(usage.lifetime_usage_id, usage);
    }

    pub fn daily_usages(&self) -> Vec<DailyUsageSnapshot> {
        let mut snapshots = self.state.lock().unwrap().daily_usages.clone();
        snapshots.sort_by_key(|s| s.usage_date);
        snapshots
    }

    /// Store a snapshot as is, e.g. one written before diffs were computed.
    pub fn put_daily_usage(&self, snapshot: DailyUsageSnapshot) {
        self.state.lock().unwrap().daily_usages.push(snapshot);
    }

    pub fn inject_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl HealthCheck for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!("store unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn get_subscription(&self, subscription_id: Uuid) -> Result<Subscription, RatingError> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .get(&subscription_id)
            .cloned()
            .ok_or_else(|| RatingError::not_found("subscription", subscription_id))
    }
}

#[async_trait]
impl LifetimeUsageStore for InMemoryStore {
    async fn lock_lifetime_usage(
        &self,
        lifetime_usage_id: Uuid,
    ) -> Result<Box<dyn RecalculationLock>, RatingError> {
        if !self.recalculating.lock().unwrap().insert(lifetime_usage_id) {
            return Err(RatingError::ConcurrencyConflict(format!(
                "lifetime usage {} is locked",
                lifetime_usage_id
            )));
        }
        Ok(Box::new(HeldRecalculation {
            held: self.recalculating.clone(),
            lifetime_usage_id,
        }))
    }

    async fn lineage_invoiced_amount_cents(
        &self,
        lineage: &SubscriptionLineage,
    ) -> Result<i64, RatingError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .invoices
            .iter()
            .filter(|(sub_id, status, _)| {
                status.counts_as_invoiced()
                    && state.subscriptions.get(sub_id).is_some_and(|s| {
                        &s.lineage() == lineage && s.status != "canceled"
                    })
            })
            .map(|(_, _, amount)| amount)
            .sum())
    }

    async fn usage_thresholds(&self, plan_id: Uuid) -> Result<Vec<UsageThreshold>, RatingError> {
        let mut thresholds: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .thresholds
            .iter()
            .filter(|t| t.plan_id == plan_id)
            .cloned()
            .collect();
        thresholds.sort_by_key(|t| (t.recurring, t.amount_cents));
        Ok(thresholds)
    }

    async fn applied_usage_thresholds(
        &self,
        lineage: &SubscriptionLineage,
    ) -> Result<Vec<AppliedUsageThreshold>, RatingError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .applied
            .iter()
            .filter(|a| {
                a.external_subscription_id == lineage.external_id
                    && a.subscription_at == lineage.subscription_at
            })
            .cloned()
            .collect())
    }

    async fn record_applied_usage_threshold(
        &self,
        applied: &AppliedUsageThreshold,
    ) -> Result<(), RatingError> {
        let mut state = self.state.lock().unwrap();
        if state.applied.iter().any(|a| {
            a.usage_threshold_id == applied.usage_threshold_id && a.invoice_id == applied.invoice_id
        }) {
            return Err(RatingError::ConcurrencyConflict(
                "applied usage threshold already recorded".to_string(),
            ));
        }
        state.applied.push(applied.clone());
        Ok(())
    }

    async fn get_lifetime_usage(
        &self,
        lifetime_usage_id: Uuid,
    ) -> Result<LifetimeUsage, RatingError> {
        self.state
            .lock()
            .unwrap()
            .lifetime_usages
            .get(&lifetime_usage_id)
            .cloned()
            .ok_or_else(|| RatingError::not_found("lifetime_usage", lifetime_usage_id))
    }

    async fn find_or_create_lifetime_usage(
        &self,
        subscription_id: Uuid,
    ) -> Result<LifetimeUsage, RatingError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .lifetime_usages
            .values()
            .find(|u| u.subscription_id == subscription_id)
        {
            return Ok(existing.clone());
        }
        let usage = LifetimeUsage::new(subscription_id);
        state
            .lifetime_usages
            .insert(usage.lifetime_usage_id, usage.clone());
        Ok(usage)
    }

    async fn save_lifetime_usage(
        &self,
        usage: &LifetimeUsage,
    ) -> Result<LifetimeUsage, RatingError> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .lifetime_usages
            .get_mut(&usage.lifetime_usage_id)
            .ok_or_else(|| RatingError::not_found("lifetime_usage", usage.lifetime_usage_id))?;

        if self.take_injected_conflict() {
            // Someone else saved in between.
            stored.version += 1;
        }
        if stored.version != usage.version {
            return Err(RatingError::ConcurrencyConflict(format!(
                "lifetime usage {} version {} is stale",
                usage.lifetime_usage_id, usage.version
            )));
        }

        let mut saved = usage.clone();
        saved.version += 1;
        saved.updated_utc = Utc::now();
        *stored = saved.clone();
        Ok(saved)
    }

    async fn flag_plan_for_invoiced_recalculation(
        &self,
        plan_id: Uuid,
    ) -> Result<u64, RatingError> {
        let mut state = self.state.lock().unwrap();
        let subscriptions: Vec<Uuid> = state
            .subscriptions
            .values()
            .filter(|s| s.plan_id == plan_id && s.is_active())
            .map(|s| s.subscription_id)
            .collect();

        let mut flagged = 0;
        for usage in state.lifetime_usages.values_mut() {
            if subscriptions.contains(&usage.subscription_id) {
                usage.recalculation = usage.recalculation.on_invoice_finalized();
                usage.version += 1;
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    async fn lifetime_usages_to_recalculate(&self, limit: i64) -> Result<Vec<Uuid>, RatingError> {
        let state = self.state.lock().unwrap();
        let mut pending: Vec<_> = state
            .lifetime_usages
            .values()
            .filter(|u| u.recalculation != RecalculationState::Clean)
            .collect();
        pending.sort_by_key(|u| u.updated_utc);
        Ok(pending
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|u| u.lifetime_usage_id)
            .collect())
    }
}

#[async_trait]
impl DailyUsageStore for InMemoryStore {
    async fn find_daily_usage(
        &self,
        subscription_id: Uuid,
        usage_date: NaiveDate,
    ) -> Result<Option<DailyUsageSnapshot>, RatingError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .daily_usages
            .iter()
            .find(|s| s.subscription_id == subscription_id && s.usage_date == usage_date)
            .cloned())
    }

    async fn previous_daily_usage(
        &self,
        subscription_id: Uuid,
        from_datetime: DateTime<Utc>,
        usage_date: NaiveDate,
    ) -> Result<Option<DailyUsageSnapshot>, RatingError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .daily_usages
            .iter()
            .filter(|s| {
                s.subscription_id == subscription_id
                    && s.from_datetime == from_datetime
                    && s.usage_date < usage_date
            })
            .max_by_key(|s| s.usage_date)
            .cloned())
    }

    async fn insert_daily_usage(&self, snapshot: &DailyUsageSnapshot) -> Result<bool, RatingError> {
        let mut state = self.state.lock().unwrap();
        if state.daily_usages.iter().any(|s| {
            s.subscription_id == snapshot.subscription_id && s.usage_date == snapshot.usage_date
        }) {
            return Ok(false);
        }
        state.daily_usages.push(snapshot.clone());
        Ok(true)
    }

    async fn update_usage_diff(
        &self,
        daily_usage_id: Uuid,
        usage_diff: &UsageTree,
    ) -> Result<(), RatingError> {
        let mut state = self.state.lock().unwrap();
        let snapshot = state
            .daily_usages
            .iter_mut()
            .find(|s| s.daily_usage_id == daily_usage_id)
            .ok_or_else(|| RatingError::not_found("daily_usage", daily_usage_id))?;
        snapshot.usage_diff = Some(usage_diff.clone());
        Ok(())
    }

    async fn subscriptions_due_for_daily_usage(
        &self,
        limit: i64,
    ) -> Result<Vec<Uuid>, RatingError> {
        let state = self.state.lock().unwrap();
        let yesterday = Utc::now().date_naive().pred_opt().unwrap();
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.is_active())
            .filter(|s| {
                !state.daily_usages.iter().any(|d| {
                    d.subscription_id == s.subscription_id && d.usage_date >= yesterday
                })
            })
            .take(limit.max(0) as usize)
            .map(|s| s.subscription_id)
            .collect())
    }
}

// =========================================================================
// Collaborators
// =========================================================================

/// Returns whatever period was last set for the subscription.
#[derive(Default)]
pub struct FakeAggregator {
    periods: Mutex<HashMap<Uuid, PeriodUsage>>,
    calls: AtomicU32,
}

impl FakeAggregator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_period(&self, subscription_id: Uuid, period: PeriodUsage) {
        self.periods.lock().unwrap().insert(subscription_id, period);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageAggregator for FakeAggregator {
    async fn compute_current_usage(
        &self,
        subscription: &Subscription,
        _as_of: DateTime<Utc>,
    ) -> Result<PeriodUsage, RatingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .periods
            .lock()
            .unwrap()
            .get(&subscription.subscription_id)
            .cloned()
            .unwrap_or_else(|| PeriodUsage {
                from_datetime: period_start(),
                to_datetime: period_end(),
                charges: Vec::new(),
            }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvoiceScript {
    Succeed,
    TaxError,
    Fail,
}

/// Plays scripted outcomes in order, then succeeds.
#[derive(Default)]
pub struct ScriptedInvoicer {
    script: Mutex<VecDeque<InvoiceScript>>,
    calls: Mutex<Vec<Vec<ThresholdCrossing>>>,
    invoices: Mutex<Vec<Invoice>>,
    delay: Mutex<Duration>,
}

impl ScriptedInvoicer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, outcome: InvoiceScript) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<Vec<ThresholdCrossing>> {
        self.calls.lock().unwrap().clone()
    }

    /// Make every invoice creation take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.invoices.lock().unwrap().clone()
    }
}

#[async_trait]
impl InvoiceCreator for ScriptedInvoicer {
    async fn create_progressive_invoice(
        &self,
        subscription: &Subscription,
        crossings: &[ThresholdCrossing],
    ) -> Result<Invoice, InvoiceCreationError> {
        self.calls.lock().unwrap().push(crossings.to_vec());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(InvoiceScript::Succeed);

        match outcome {
            InvoiceScript::Succeed => {
                let invoice = Invoice {
                    invoice_id: Uuid::new_v4(),
                    subscription_id: subscription.subscription_id,
                    status: InvoiceStatus::Finalized,
                    fees_amount_cents: 0,
                };
                self.invoices.lock().unwrap().push(invoice.clone());
                Ok(invoice)
            }
            InvoiceScript::TaxError => Err(InvoiceCreationError::Tax {
                invoice_id: Some(Uuid::new_v4()),
                message: "tax provider unavailable".to_string(),
            }),
            InvoiceScript::Fail => Err(InvoiceCreationError::Other(anyhow::anyhow!(
                "invoicing service returned 500"
            ))),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, Uuid, Uuid)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `(subscription_id, usage_threshold_id, invoice_id)` per notification.
    pub fn sent(&self) -> Vec<(Uuid, Uuid, Uuid)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_with(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UsageThresholdNotifier for RecordingNotifier {
    async fn usage_threshold_reached(
        &self,
        subscription: &Subscription,
        threshold: &UsageThreshold,
        invoice_id: Uuid,
    ) -> Result<(), RatingError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RatingError::Collaborator(anyhow::anyhow!(
                "notification service unavailable"
            )));
        }
        self.sent.lock().unwrap().push((
            subscription.subscription_id,
            threshold.usage_threshold_id,
            invoice_id,
        ));
        Ok(())
    }
}

// =========================================================================
// Wiring
// =========================================================================

/// In-memory store and fakes wired into the rating workflows.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub aggregator: Arc<FakeAggregator>,
    pub invoicer: Arc<ScriptedInvoicer>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: InMemoryStore::new(),
            aggregator: FakeAggregator::new(),
            invoicer: ScriptedInvoicer::new(),
            notifier: RecordingNotifier::new(),
        }
    }

    pub fn components(&self) -> Components {
        Components {
            health: self.store.clone(),
            lifetime_store: self.store.clone(),
            daily_store: self.store.clone(),
            aggregator: self.aggregator.clone(),
            invoicer: self.invoicer.clone(),
            notifier: self.notifier.clone(),
        }
    }

    pub fn current_usage(&self) -> CurrentUsageCalculator {
        CurrentUsageCalculator::new(self.aggregator.clone())
    }

    pub fn tracker(&self) -> LifetimeUsageTracker {
        LifetimeUsageTracker::new(
            self.store.clone(),
            self.current_usage(),
            RetryConfig::immediate(3),
        )
    }

    pub fn billing(&self) -> ProgressiveBillingOrchestrator {
        ProgressiveBillingOrchestrator::new(
            self.store.clone(),
            self.invoicer.clone(),
            self.notifier.clone(),
        )
    }

    pub fn lifetime_job(&self) -> LifetimeUsageJob {
        LifetimeUsageJob::new(
            self.store.clone(),
            self.tracker(),
            self.billing(),
            KeyedLocks::new(),
            RetryConfig::immediate(3),
        )
    }

    pub fn daily_usage(&self) -> DailyUsageService {
        DailyUsageService::new(self.store.clone(), self.current_usage())
    }

    /// Register a subscription and its lifetime usage.
    pub async fn subscribe(&self, plan_id: Uuid) -> (Subscription, LifetimeUsage) {
        let sub = subscription(plan_id);
        self.store.add_subscription(sub.clone());
        let usage = self
            .store
            .find_or_create_lifetime_usage(sub.subscription_id)
            .await
            .unwrap();
        (sub, usage)
    }
}

pub fn test_config() -> RatingConfig {
    RatingConfig {
        common: CoreConfig {
            port: 0,
            environment: "test".to_string(),
        },
        service_name: "rating-service-test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://localhost/unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        usage_aggregation: CollaboratorConfig {
            url: "http://localhost:1".to_string(),
        },
        invoicing_service: CollaboratorConfig {
            url: "http://localhost:1".to_string(),
        },
        notification_service: CollaboratorConfig {
            url: "http://localhost:1".to_string(),
        },
        worker: WorkerConfig {
            enabled: false,
            ..Default::default()
        },
        retry: RetrySettings {
            max_attempts: 3,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        },
    }
}

/// Test application wrapper for HTTP tests.
pub struct TestApp {
    pub http_address: String,
    pub port: u16,
    pub harness: Harness,
}

impl TestApp {
    /// Spawn a new test application on a random port.
    pub async fn spawn() -> Self {
        init_metrics();

        let harness = Harness::new();
        let app = Application::with_components(test_config(), harness.components())
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let http_address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            http_address,
            port,
            harness,
        }
    }
}
