use axum::{extract::MatchedPath, extract::Request, middleware::Next, response::Response};
use prometheus::{
    HistogramVec, IntCounterVec, histogram_opts, opts, register_histogram_vec,
    register_int_counter_vec,
};
use std::sync::OnceLock;
use std::time::Instant;

struct HttpMetrics {
    requests: IntCounterVec,
    duration: HistogramVec,
}

static HTTP_METRICS: OnceLock<Option<HttpMetrics>> = OnceLock::new();

fn http_metrics() -> Option<&'static HttpMetrics> {
    HTTP_METRICS
        .get_or_init(|| {
            let registered = (|| -> Result<HttpMetrics, prometheus::Error> {
                Ok(HttpMetrics {
                    requests: register_int_counter_vec!(
                        opts!("http_requests_total", "Total HTTP requests"),
                        &["method", "path", "status"]
                    )?,
                    duration: register_histogram_vec!(
                        histogram_opts!(
                            "http_request_duration_seconds",
                            "HTTP request duration"
                        ),
                        &["method", "path", "status"]
                    )?,
                })
            })();

            match registered {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to register HTTP metrics");
                    None
                }
            }
        })
        .as_ref()
}

/// Count and time every request, labelled by route template rather than raw
/// path so ids do not blow up cardinality.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    if let Some(metrics) = http_metrics() {
        let status = response.status().as_u16().to_string();
        let labels = [method.as_str(), path.as_str(), status.as_str()];
        metrics.requests.with_label_values(&labels).inc();
        metrics
            .duration
            .with_label_values(&labels)
            .observe(start.elapsed().as_secs_f64());
    }

    response
}
