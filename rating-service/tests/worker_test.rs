//! Background job orchestration tests.

mod common;

use common::{date, standard_period, Harness};
use rating_service::config::WorkerConfig;
use rating_service::daily_usage::DailyUsageJob;
use rating_service::models::RecalculationState;
use rating_service::services::{DailyUsageStore, LifetimeUsageStore};
use rating_service::workers::{JobOrchestrator, RatingJob};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn orchestrator(harness: &Harness, enabled: bool) -> JobOrchestrator {
    orchestrator_with_queue(harness, enabled, 16)
}

fn orchestrator_with_queue(harness: &Harness, enabled: bool, queue_size: usize) -> JobOrchestrator {
    let config = WorkerConfig {
        enabled,
        queue_size,
        poll_interval_secs: 3600,
        batch_size: 10,
    };
    let lifetime_store: Arc<dyn LifetimeUsageStore> = harness.store.clone();
    let daily_store: Arc<dyn DailyUsageStore> = harness.store.clone();

    JobOrchestrator::new(
        config,
        harness.lifetime_job(),
        DailyUsageJob::new(harness.daily_usage()),
        lifetime_store,
        daily_store,
    )
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn poller_picks_up_pending_work() {
    let harness = Harness::new();
    let (sub, _) = harness.subscribe(Uuid::new_v4()).await;
    harness
        .aggregator
        .set_period(sub.subscription_id, standard_period(Uuid::new_v4(), 7, "1"));

    let workers = orchestrator(&harness, true).start();

    let store = harness.store.clone();
    let subscription_id = sub.subscription_id;
    assert!(
        eventually(|| {
            store
                .lifetime_usage_of(subscription_id)
                .is_some_and(|u| u.recalculation == RecalculationState::Clean)
        })
        .await
    );
    assert!(eventually(|| store.daily_usages().len() == 1).await);

    let usage = harness.store.lifetime_usage_of(sub.subscription_id).unwrap();
    assert_eq!(usage.current_usage_amount_cents, 700);

    workers.shutdown().await;
}

#[tokio::test]
async fn enqueued_jobs_are_dispatched() {
    let harness = Harness::new();
    let (sub, _) = harness.subscribe(Uuid::new_v4()).await;

    let workers = orchestrator(&harness, true).start();
    workers
        .enqueue(RatingJob::ComputeDailyUsage {
            subscription_id: sub.subscription_id,
            usage_date: Some(date(2026, 3, 4)),
        })
        .unwrap();

    let store = harness.store.clone();
    assert!(
        eventually(|| {
            store
                .daily_usages()
                .iter()
                .any(|s| s.usage_date == date(2026, 3, 4))
        })
        .await
    );

    workers.shutdown().await;
}

#[tokio::test]
async fn disabled_workers_accept_but_do_not_run_jobs() {
    let harness = Harness::new();
    let (_, usage) = harness.subscribe(Uuid::new_v4()).await;

    let workers = orchestrator(&harness, false).start();
    workers
        .enqueue(RatingJob::RecalculateLifetimeUsage(usage.lifetime_usage_id))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.aggregator.calls(), 0);

    workers.shutdown().await;
}

#[tokio::test]
async fn disabled_queue_holds_jobs_until_full() {
    let harness = Harness::new();
    let workers = orchestrator_with_queue(&harness, false, 2).start();

    for _ in 0..2 {
        workers
            .enqueue(RatingJob::RecalculateLifetimeUsage(Uuid::new_v4()))
            .unwrap();
    }

    let err = workers
        .enqueue(RatingJob::RecalculateLifetimeUsage(Uuid::new_v4()))
        .unwrap_err();
    assert!(matches!(err, AppError::InternalError(_)));
    assert!(err.to_string().contains("full"), "unexpected error: {}", err);

    workers.shutdown().await;
}

#[test]
fn job_names_are_stable() {
    assert_eq!(
        RatingJob::RecalculateLifetimeUsage(Uuid::nil()).name(),
        "recalculate_lifetime_usage"
    );
    assert_eq!(
        RatingJob::ComputeDailyUsage {
            subscription_id: Uuid::nil(),
            usage_date: None,
        }
        .name(),
        "compute_daily_usage"
    );
}
