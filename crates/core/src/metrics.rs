//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Jobs (outcomes, duration, in-flight)
//! - Archive construction (entries, bytes)
//! - Queue consumption (acks, nacks, drops, subscription errors)
//! - Admission control decisions

use once_cell::sync::Lazy;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
};

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs finished, by result.
pub static JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("photozip_jobs_total", "Total jobs run to a terminal outcome"),
        &["result"], // "success", "no_matches", "failed"
    )
    .unwrap()
});

/// Job duration in seconds.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "photozip_job_duration_seconds",
            "Duration of a job from search to published archive",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["result"],
    )
    .unwrap()
});

/// Jobs currently running.
pub static JOBS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("photozip_jobs_in_flight", "Jobs currently running").unwrap()
});

// =============================================================================
// Archive Metrics
// =============================================================================

/// Archive entries by result.
pub static ARCHIVE_ENTRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("photozip_archive_entries_total", "Total archive entries attempted"),
        &["result"], // "embedded", "skipped", "truncated"
    )
    .unwrap()
});

/// Compressed bytes produced.
pub static ARCHIVE_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "photozip_archive_bytes_total",
        "Total compressed archive bytes produced",
    )
    .unwrap()
});

// =============================================================================
// Queue Metrics
// =============================================================================

/// Settled queue messages by outcome.
pub static QUEUE_MESSAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("photozip_queue_messages_total", "Total queue messages settled"),
        &["outcome"], // "acked", "nacked", "dropped"
    )
    .unwrap()
});

/// Failed pulls.
pub static SUBSCRIPTION_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "photozip_subscription_errors_total",
        "Total failed subscription pulls",
    )
    .unwrap()
});

// =============================================================================
// Admission Metrics
// =============================================================================

/// Admission decisions.
pub static ADMISSION_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "photozip_admission_decisions_total",
            "Total admission control decisions",
        ),
        &["decision"], // "allowed", "rejected", "failed_open"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Jobs
        Box::new(JOBS_TOTAL.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(JOBS_IN_FLIGHT.clone()),
        // Archive
        Box::new(ARCHIVE_ENTRIES.clone()),
        Box::new(ARCHIVE_BYTES.clone()),
        // Queue
        Box::new(QUEUE_MESSAGES.clone()),
        Box::new(SUBSCRIPTION_ERRORS.clone()),
        // Admission
        Box::new(ADMISSION_DECISIONS.clone()),
    ]
}
