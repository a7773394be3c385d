use chrono::NaiveDate;
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::daily_usage::DailyUsageJob;
use crate::lifetime_usage::LifetimeUsageJob;
use crate::services::{DailyUsageStore, LifetimeUsageStore};

#[derive(Debug, Clone, PartialEq)]
pub enum RatingJob {
    RecalculateLifetimeUsage(Uuid),
    ComputeDailyUsage {
        subscription_id: Uuid,
        usage_date: Option<NaiveDate>,
    },
}

impl RatingJob {
    pub fn name(&self) -> &'static str {
        match self {
            RatingJob::RecalculateLifetimeUsage(_) => "recalculate_lifetime_usage",
            RatingJob::ComputeDailyUsage { .. } => "compute_daily_usage",
        }
    }
}

/// Sending side of the job queue.
#[derive(Clone)]
pub struct JobQueue {
    job_tx: mpsc::Sender<RatingJob>,
}

impl JobQueue {
    pub fn enqueue(&self, job: RatingJob) -> Result<(), AppError> {
        self.job_tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => {
                AppError::InternalError(anyhow::anyhow!("Job queue full, {} rejected", job.name()))
            }
            TrySendError::Closed(job) => AppError::InternalError(anyhow::anyhow!(
                "Job queue closed, {} rejected",
                job.name()
            )),
        })
    }
}

pub struct JobOrchestrator {
    config: WorkerConfig,
    lifetime_job: LifetimeUsageJob,
    daily_job: DailyUsageJob,
    lifetime_store: Arc<dyn LifetimeUsageStore>,
    daily_store: Arc<dyn DailyUsageStore>,
    job_tx: mpsc::Sender<RatingJob>,
    job_rx: mpsc::Receiver<RatingJob>,
    shutdown_token: CancellationToken,
}

impl JobOrchestrator {
    pub fn new(
        config: WorkerConfig,
        lifetime_job: LifetimeUsageJob,
        daily_job: DailyUsageJob,
        lifetime_store: Arc<dyn LifetimeUsageStore>,
        daily_store: Arc<dyn DailyUsageStore>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.queue_size.max(1));

        Self {
            config,
            lifetime_job,
            daily_job,
            lifetime_store,
            daily_store,
            job_tx,
            job_rx,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn queue(&self) -> JobQueue {
        JobQueue {
            job_tx: self.job_tx.clone(),
        }
    }

    /// Spawn the dispatcher and the poller. Jobs can be enqueued through the
    /// returned handle whether or not the workers are enabled.
    pub fn start(self) -> WorkerHandle {
        let queue = self.queue();
        let Self {
            config,
            lifetime_job,
            daily_job,
            lifetime_store,
            daily_store,
            job_tx: _,
            job_rx,
            shutdown_token,
        } = self;

        if !config.enabled {
            tracing::info!("Rating workers disabled by configuration");
            // Keep the receiver so enqueued jobs are held rather than refused.
            return WorkerHandle {
                queue,
                shutdown_token,
                tasks: Vec::new(),
                _idle_rx: Some(job_rx),
            };
        }

        tracing::info!(
            queue_size = config.queue_size,
            poll_interval_secs = config.poll_interval().as_secs(),
            batch_size = config.batch_size,
            "Starting rating workers"
        );

        let dispatcher = Dispatcher {
            lifetime_job,
            daily_job,
        };
        let poller = Poller {
            config,
            lifetime_store,
            daily_store,
            queue: queue.clone(),
        };

        let tasks = vec![
            tokio::spawn(dispatcher.run(job_rx, shutdown_token.clone())),
            tokio::spawn(poller.run(shutdown_token.clone())),
        ];

        WorkerHandle {
            queue,
            shutdown_token,
            tasks,
            _idle_rx: None,
        }
    }
}

pub struct WorkerHandle {
    queue: JobQueue,
    shutdown_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    /// Receiving side while the workers are disabled.
    _idle_rx: Option<mpsc::Receiver<RatingJob>>,
}

impl WorkerHandle {
    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub fn enqueue(&self, job: RatingJob) -> Result<(), AppError> {
        self.queue.enqueue(job)
    }

    /// Stop dispatching and polling. Jobs already running finish on their own.
    pub async fn shutdown(self) {
        tracing::info!("Initiating rating worker shutdown");
        self.shutdown_token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Rating worker task ended abnormally");
            }
        }
    }
}

#[derive(Clone)]
struct Dispatcher {
    lifetime_job: LifetimeUsageJob,
    daily_job: DailyUsageJob,
}

impl Dispatcher {
    async fn run(self, mut job_rx: mpsc::Receiver<RatingJob>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                job = job_rx.recv() => {
                    match job {
                        Some(job) => {
                            tracing::debug!(job = job.name(), "Dispatching job");
                            let dispatcher = self.clone();
                            tokio::spawn(async move {
                                dispatcher.process(job).await;
                            });
                        }
                        None => {
                            tracing::info!("Channel closed, job dispatcher exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    // Jobs log and count their own failures.
    async fn process(&self, job: RatingJob) {
        match job {
            RatingJob::RecalculateLifetimeUsage(lifetime_usage_id) => {
                let _ = self.lifetime_job.run(lifetime_usage_id).await;
            }
            RatingJob::ComputeDailyUsage {
                subscription_id,
                usage_date,
            } => {
                let _ = self.daily_job.run(subscription_id, usage_date).await;
            }
        }
    }
}

struct Poller {
    config: WorkerConfig,
    lifetime_store: Arc<dyn LifetimeUsageStore>,
    daily_store: Arc<dyn DailyUsageStore>,
    queue: JobQueue,
}

impl Poller {
    async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Job poller shutting down");
                    break;
                }
                _ = interval.tick() => self.poll().await,
            }
        }
    }

    async fn poll(&self) {
        match self
            .lifetime_store
            .lifetime_usages_to_recalculate(self.config.batch_size)
            .await
        {
            Ok(ids) => self.enqueue_all(ids.into_iter().map(RatingJob::RecalculateLifetimeUsage)),
            Err(e) => tracing::error!(error = %e, "Failed to poll lifetime usages"),
        }

        match self
            .daily_store
            .subscriptions_due_for_daily_usage(self.config.batch_size)
            .await
        {
            Ok(ids) => self.enqueue_all(ids.into_iter().map(|subscription_id| {
                RatingJob::ComputeDailyUsage {
                    subscription_id,
                    usage_date: None,
                }
            })),
            Err(e) => tracing::error!(error = %e, "Failed to poll daily usages"),
        }
    }

    fn enqueue_all(&self, jobs: impl Iterator<Item = RatingJob>) {
        let mut enqueued = 0;
        for job in jobs {
            if let Err(e) = self.queue.enqueue(job) {
                tracing::warn!(error = %e, enqueued, "Job queue full, rest of batch left for next poll");
                return;
            }
            enqueued += 1;
        }
        if enqueued > 0 {
            tracing::debug!(enqueued, "Jobs enqueued by poller");
        }
    }
}
