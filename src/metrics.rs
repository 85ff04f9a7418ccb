/// Metrics and telemetry for the trust metadata resolver
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Resolution outcomes (cache hits, fetches, empty results)
/// - Origin fetch counts and latencies
/// - Fetched metadata processing outcomes
/// - Cache size and evictions
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== Resolution Metrics ==========

    /// Resolve calls by outcome
    pub static ref RESOLVE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "metadata_resolve_total",
        "Total number of metadata resolve calls",
        &["outcome"]
    )
    .unwrap();

    /// Fetched metadata by processing outcome
    pub static ref METADATA_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "metadata_processed_total",
        "Fetched metadata documents by processing outcome",
        &["outcome"]
    )
    .unwrap();

    // ========== Origin Metrics ==========

    /// Origin fetches by status
    pub static ref ORIGIN_FETCH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "metadata_origin_fetch_total",
        "Total number of origin metadata fetches",
        &["status"]
    )
    .unwrap();

    /// Origin fetch duration in seconds
    pub static ref ORIGIN_FETCH_DURATION_SECONDS: Histogram = register_histogram!(
        "metadata_origin_fetch_duration_seconds",
        "Origin metadata fetch latencies in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Cache Metrics ==========

    /// Entity IDs currently holding management data
    pub static ref CACHE_ENTRIES: IntGauge = register_int_gauge!(
        "metadata_cache_entries",
        "Number of entity IDs tracked by the metadata cache"
    )
    .unwrap();

    /// Evictions by reason
    pub static ref CACHE_EVICTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "metadata_cache_evictions_total",
        "Total number of metadata cache evictions",
        &["reason"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();

    /// Scheduled background jobs
    pub static ref BACKGROUND_JOBS_ACTIVE: IntGauge = register_int_gauge!(
        "background_jobs_active",
        "Number of scheduled background jobs"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a resolve call outcome
pub fn record_resolve(outcome: &str) {
    RESOLVE_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record how a fetched document was handled
pub fn record_metadata_processed(outcome: &str) {
    METADATA_PROCESSED_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a cache eviction
pub fn record_eviction(reason: &str) {
    CACHE_EVICTIONS_TOTAL.with_label_values(&[reason]).inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}
