//! Prometheus registry for the server.
//!
//! Holds the HTTP metrics, gauges refreshed at scrape time from application
//! state, and every collector exported by `photozip_core::metrics`.

use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::state::AppState;

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for collector in server_metrics()
        .into_iter()
        .chain(photozip_core::metrics::all_metrics())
    {
        if let Err(e) = registry.register(collector) {
            tracing::error!("Failed to register metric: {}", e);
        }
    }
    registry
});

/// Request latency. Archive downloads stream whole files, hence the long tail.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "photozip_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        &["method", "path", "status"],
    )
    .unwrap()
});

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("photozip_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "photozip_http_requests_in_flight",
        "HTTP requests currently being processed",
    )
    .unwrap()
});

pub static JOB_STATUS_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "photozip_job_status_entries",
        "Tag strings with a recorded job outcome",
    )
    .unwrap()
});

/// 1 while the dispatcher is pulling messages.
pub static DISPATCHER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "photozip_dispatcher_running",
        "Whether the message dispatcher is running",
    )
    .unwrap()
});

fn server_metrics() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()),
        Box::new(JOB_STATUS_ENTRIES.clone()),
        Box::new(DISPATCHER_RUNNING.clone()),
    ]
}

/// Prometheus text exposition of the registry.
pub fn encode_metrics() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Refresh gauges that mirror application state.
pub async fn collect_dynamic_metrics(state: &AppState) {
    JOB_STATUS_ENTRIES.set(state.status().len().await as i64);
    let running = state.dispatcher().is_some_and(|d| d.is_running());
    DISPATCHER_RUNNING.set(i64::from(running));
}

/// Route label for `path`. Unknown paths share one label so scanners
/// cannot grow the label set.
pub fn normalize_path(path: &str) -> &'static str {
    const ROUTES: &[&str] = &[
        "/api/v1/health",
        "/api/v1/config",
        "/api/v1/audit",
        "/api/v1/jobs",
        "/api/v1/jobs/status",
        "/api/v1/zip",
        "/metrics",
    ];

    if path.starts_with("/artifacts/") {
        return "/artifacts/{path}";
    }
    ROUTES
        .iter()
        .find(|route| **route == path)
        .copied()
        .unwrap_or("other")
}
