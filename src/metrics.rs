/// Metrics for the STUN resolver
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Resolution cache hit/miss rates per backend
/// - External discovery calls, failures, and latency
/// - Middleware degradations

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    // ========== Cache Metrics ==========

    /// Cache hits by backend
    pub static ref STUN_CACHE_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "stun_cache_hits_total",
        "Total number of resolution cache hits",
        &["backend"]
    )
    .unwrap();

    /// Cache misses by backend
    pub static ref STUN_CACHE_MISSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "stun_cache_misses_total",
        "Total number of resolution cache misses",
        &["backend"]
    )
    .unwrap();

    // ========== Discovery Metrics ==========

    /// Discovery calls by server and outcome
    pub static ref STUN_DISCOVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "stun_discoveries_total",
        "Total number of external STUN discovery calls",
        &["server", "status"]
    )
    .unwrap();

    /// Discovery latency in seconds
    pub static ref STUN_DISCOVERY_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "stun_discovery_duration_seconds",
        "STUN discovery latencies in seconds",
        &["server"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Middleware Metrics ==========

    /// Requests that continued without STUN info
    pub static ref STUN_MIDDLEWARE_DEGRADED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "stun_middleware_degraded_total",
        "Requests served without STUN info after a resolution failure",
        &["reason"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a cache lookup
pub fn record_cache_access(backend: &str, hit: bool) {
    if hit {
        STUN_CACHE_HITS_TOTAL.with_label_values(&[backend]).inc();
    } else {
        STUN_CACHE_MISSES_TOTAL.with_label_values(&[backend]).inc();
    }
}

/// Record an external discovery call
pub fn record_discovery(server: &str, success: bool, duration: f64) {
    STUN_DISCOVERIES_TOTAL
        .with_label_values(&[server, if success { "success" } else { "failure" }])
        .inc();
    STUN_DISCOVERY_DURATION_SECONDS
        .with_label_values(&[server])
        .observe(duration);
}

/// Record a request that carried on without STUN info
pub fn record_middleware_degraded(reason: &str) {
    STUN_MIDDLEWARE_DEGRADED_TOTAL
        .with_label_values(&[reason])
        .inc();
}
