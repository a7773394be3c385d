//! Application startup and lifecycle management.

use crate::config::RatingConfig;
use crate::current_usage::CurrentUsageCalculator;
use crate::daily_usage::{DailyUsageJob, DailyUsageService};
use crate::lifetime_usage::{LifetimeUsageJob, LifetimeUsageTracker, ProgressiveBillingOrchestrator};
use crate::services::{
    get_metrics, init_metrics, DailyUsageStore, Database, HealthCheck, HttpInvoiceCreator,
    HttpThresholdNotifier, HttpUsageAggregator, InvoiceCreator, LifetimeUsageStore,
    UsageAggregator, UsageThresholdNotifier,
};
use crate::workers::{JobOrchestrator, JobQueue, KeyedLocks};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Storage and collaborators the rating workflows run against.
#[derive(Clone)]
pub struct Components {
    pub health: Arc<dyn HealthCheck>,
    pub lifetime_store: Arc<dyn LifetimeUsageStore>,
    pub daily_store: Arc<dyn DailyUsageStore>,
    pub aggregator: Arc<dyn UsageAggregator>,
    pub invoicer: Arc<dyn InvoiceCreator>,
    pub notifier: Arc<dyn UsageThresholdNotifier>,
}

impl Components {
    /// Postgres for storage, HTTP clients for collaborators.
    pub fn from_database(db: Arc<Database>, config: &RatingConfig) -> Self {
        Self {
            health: db.clone(),
            lifetime_store: db.clone(),
            daily_store: db,
            aggregator: Arc::new(HttpUsageAggregator::new(&config.usage_aggregation.url)),
            invoicer: Arc::new(HttpInvoiceCreator::new(&config.invoicing_service.url)),
            notifier: Arc::new(HttpThresholdNotifier::new(&config.notification_service.url)),
        }
    }
}

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    health: Arc<dyn HealthCheck>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.health.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "rating-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "rating-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.health.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    match get_metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            metrics,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                String::new(),
            )
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    health: Arc<dyn HealthCheck>,
    orchestrator: JobOrchestrator,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: RatingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: RatingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: RatingConfig, run_migrations: bool) -> Result<Self, AppError> {
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let components = Components::from_database(Arc::new(db), &config);
        Self::with_components(config, components).await
    }

    /// Wire the rating workflows on top of the given components and bind the
    /// HTTP listener.
    pub async fn with_components(
        config: RatingConfig,
        components: Components,
    ) -> Result<Self, AppError> {
        init_metrics();

        let retry = config.retry.retry_config();
        let current_usage = CurrentUsageCalculator::new(components.aggregator.clone());

        let tracker = LifetimeUsageTracker::new(
            components.lifetime_store.clone(),
            current_usage.clone(),
            retry.clone(),
        );
        let billing = ProgressiveBillingOrchestrator::new(
            components.lifetime_store.clone(),
            components.invoicer.clone(),
            components.notifier.clone(),
        );
        let lifetime_job = LifetimeUsageJob::new(
            components.lifetime_store.clone(),
            tracker,
            billing,
            KeyedLocks::new(),
            retry,
        );
        let daily_job = DailyUsageJob::new(DailyUsageService::new(
            components.daily_store.clone(),
            current_usage,
        ));

        let orchestrator = JobOrchestrator::new(
            config.worker.clone(),
            lifetime_job,
            daily_job,
            components.lifetime_store.clone(),
            components.daily_store.clone(),
        );

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, "Rating service listener bound");

        Ok(Self {
            port,
            listener,
            health: components.health,
            orchestrator,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Queue feeding the background workers.
    pub fn job_queue(&self) -> JobQueue {
        self.orchestrator.queue()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then stop the workers.
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let workers = self.orchestrator.start();

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(HealthState {
                health: self.health,
            });

        tracing::info!(
            service = "rating-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        workers.shutdown().await;

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
