//! Prometheus metrics for monitoring portico.
//!
//! Covers cache lookup outcomes, background revalidations, upstream request
//! health, and the size of the cache.

use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use tracing::error;

/// All metrics for the portico service
pub struct Metrics {
    pub registry: Registry,

    /// Cache lookups by result (fresh, stale, miss)
    pub cache_lookups_total: CounterVec,
    /// Number of entries currently held, including expired-but-unswept ones
    pub cache_entries: Gauge,
    /// Background revalidations by outcome (success, failure)
    pub revalidations_total: CounterVec,
    /// Upstream requests by endpoint and outcome
    pub upstream_requests_total: CounterVec,
    pub upstream_request_duration_seconds: HistogramVec,
}

impl Metrics {
    /// Create a new metrics registry with all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cache_lookups_total = CounterVec::new(
            Opts::new("portico_cache_lookups_total", "Cache lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let cache_entries = Gauge::with_opts(Opts::new(
            "portico_cache_entries",
            "Number of entries in the cache store",
        ))?;
        registry.register(Box::new(cache_entries.clone()))?;

        let revalidations_total = CounterVec::new(
            Opts::new(
                "portico_revalidations_total",
                "Background revalidations by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(revalidations_total.clone()))?;

        let upstream_requests_total = CounterVec::new(
            Opts::new(
                "portico_upstream_requests_total",
                "Upstream requests by endpoint and outcome",
            ),
            &["endpoint", "outcome"],
        )?;
        registry.register(Box::new(upstream_requests_total.clone()))?;

        let upstream_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "portico_upstream_request_duration_seconds",
                "Upstream request latency",
            ),
            &["endpoint"],
        )?;
        registry.register(Box::new(upstream_request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            cache_lookups_total,
            cache_entries,
            revalidations_total,
            upstream_requests_total,
            upstream_request_duration_seconds,
        })
    }

    /// Record a cache lookup outcome
    pub fn record_lookup(&self, result: &str) {
        self.cache_lookups_total.with_label_values(&[result]).inc();
    }

    /// Record a background revalidation completion
    pub fn record_revalidation(&self, outcome: &str) {
        self.revalidations_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record an upstream request
    pub fn record_upstream(&self, endpoint: &str, outcome: &str, duration_secs: f64) {
        self.upstream_requests_total
            .with_label_values(&[endpoint, outcome])
            .inc();
        self.upstream_request_duration_seconds
            .with_label_values(&[endpoint])
            .observe(duration_secs);
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<Metrics>;

/// Create a shared metrics instance
pub fn create_metrics() -> SharedMetrics {
    Arc::new(Metrics::new().expect("Failed to create metrics"))
}
