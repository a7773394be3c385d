//! Metrics module for rating-service.
//! Provides Prometheus metrics for fee computation, lifetime usage and progressive billing.

use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder,
    HistogramTimer, HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

struct RatingMetrics {
    /// Fees computed by charge model
    fees_computed: IntCounterVec,
    /// Lifetime usage recalculations by outcome
    recalculations: IntCounterVec,
    /// Threshold occurrences billed
    thresholds_crossed: IntCounterVec,
    /// Progressive billing attempts by status
    progressive_invoices: IntCounterVec,
    /// Daily usage snapshots by status
    daily_usages: IntCounterVec,
    /// Error counter for alerting
    errors: IntCounterVec,
    job_duration: HistogramVec,
    db_query_duration: HistogramVec,
}

impl RatingMetrics {
    fn register() -> Result<Self, prometheus::Error> {
        Ok(Self {
            fees_computed: register_int_counter_vec!(
                opts!("rating_fees_computed_total", "Total fees computed by charge model"),
                &["charge_model"]
            )?,
            recalculations: register_int_counter_vec!(
                opts!(
                    "rating_lifetime_usage_recalculations_total",
                    "Total lifetime usage recalculations by outcome"
                ),
                &["outcome"]
            )?,
            thresholds_crossed: register_int_counter_vec!(
                opts!(
                    "rating_thresholds_crossed_total",
                    "Total usage threshold occurrences billed"
                ),
                &["recurring"]
            )?,
            progressive_invoices: register_int_counter_vec!(
                opts!(
                    "rating_progressive_invoices_total",
                    "Total progressive billing attempts by status"
                ),
                &["status"]
            )?,
            daily_usages: register_int_counter_vec!(
                opts!(
                    "rating_daily_usages_total",
                    "Total daily usage snapshots by status"
                ),
                &["status"]
            )?,
            errors: register_int_counter_vec!(
                opts!("rating_errors_total", "Total errors by type for alerting"),
                &["error_type", "operation"]
            )?,
            job_duration: register_histogram_vec!(
                histogram_opts!(
                    "rating_job_duration_seconds",
                    "Background job duration",
                    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
                ),
                &["job"]
            )?,
            db_query_duration: register_histogram_vec!(
                histogram_opts!(
                    "rating_db_query_duration_seconds",
                    "Database query duration"
                ),
                &["operation"]
            )?,
        })
    }
}

static METRICS: OnceLock<Option<RatingMetrics>> = OnceLock::new();

fn metrics() -> Option<&'static RatingMetrics> {
    METRICS
        .get_or_init(|| match RatingMetrics::register() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register rating metrics");
                None
            }
        })
        .as_ref()
}

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    let _ = metrics();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Record a fee computation.
pub fn record_fee_computed(charge_model: &str) {
    if let Some(m) = metrics() {
        m.fees_computed.with_label_values(&[charge_model]).inc();
    }
}

/// Record a lifetime usage recalculation.
pub fn record_recalculation(outcome: &str) {
    if let Some(m) = metrics() {
        m.recalculations.with_label_values(&[outcome]).inc();
    }
}

/// Record a billed threshold occurrence.
pub fn record_threshold_crossed(recurring: bool) {
    if let Some(m) = metrics() {
        let label = if recurring { "true" } else { "false" };
        m.thresholds_crossed.with_label_values(&[label]).inc();
    }
}

/// Record a progressive billing attempt.
pub fn record_progressive_invoice(status: &str) {
    if let Some(m) = metrics() {
        m.progressive_invoices.with_label_values(&[status]).inc();
    }
}

/// Record a daily usage snapshot.
pub fn record_daily_usage(status: &str) {
    if let Some(m) = metrics() {
        m.daily_usages.with_label_values(&[status]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(m) = metrics() {
        m.errors.with_label_values(&[error_type, operation]).inc();
    }
}

/// Record background job duration.
pub fn record_job_duration(job: &str, duration_secs: f64) {
    if let Some(m) = metrics() {
        m.job_duration.with_label_values(&[job]).observe(duration_secs);
    }
}

/// Start a timer for a database operation; observed when dropped.
pub fn db_timer(operation: &str) -> Option<HistogramTimer> {
    metrics().map(|m| {
        m.db_query_duration
            .with_label_values(&[operation])
            .start_timer()
    })
}
