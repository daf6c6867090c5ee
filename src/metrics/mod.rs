//! Prometheus metrics for the crawl cycle
//!
//! This module provides metrics tracking for:
//! - Cycles by outcome and their duration
//! - Discovery: candidate ids and failing sources
//! - Resolution failures and rows written
//! - The phase the orchestrator is currently in
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all crawler metrics
struct CrawlerMetrics {
    cycles: CounterVec,
    cycle_duration: Histogram,
    candidate_ids: Counter,
    source_failures: CounterVec,
    resolution_failures: Counter,
    rows: CounterVec,
    phase: Gauge,
}

/// Global storage for crawler metrics
static CRAWLER_METRICS: OnceLock<CrawlerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, the error is returned and subsequent
/// metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = sciabaca::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let crawler = CrawlerMetrics {
        cycles: register_counter_vec!(
            "sciabaca_crawl_cycles_total",
            "Crawl cycles by outcome (completed, failed, skipped)",
            &["outcome"]
        )?,
        cycle_duration: register_histogram!(
            "sciabaca_crawl_cycle_duration_seconds",
            "Wall time of a crawl cycle in seconds",
            vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
        )?,
        candidate_ids: register_counter!(
            "sciabaca_candidate_ids_total",
            "Distinct event ids discovered across all cycles"
        )?,
        source_failures: register_counter_vec!(
            "sciabaca_source_failures_total",
            "Sources whose discovery failed, by source kind",
            &["kind"]
        )?,
        resolution_failures: register_counter!(
            "sciabaca_resolution_failures_total",
            "Event ids whose detail lookup failed"
        )?,
        rows: register_counter_vec!(
            "sciabaca_store_rows_total",
            "Event rows written to the store, by operation",
            &["operation"]
        )?,
        phase: register_gauge!(
            "sciabaca_crawl_phase",
            "Current orchestrator phase (0 = idle, 1 = discovering, 2 = resolving, 3 = normalizing, 4 = reconciling)"
        )?,
    };

    CRAWLER_METRICS
        .set(crawler)
        .map_err(|_| "Crawler metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    CRAWLER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn gather() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the outcome of one cycle
pub fn record_cycle(outcome: &str) {
    if let Some(m) = CRAWLER_METRICS.get() {
        m.cycles.with_label_values(&[outcome]).inc();
    }
}

/// Record ids found by a discovery phase
pub fn record_candidates(count: usize) {
    if let Some(m) = CRAWLER_METRICS.get() {
        m.candidate_ids.inc_by(count as f64);
    }
}

/// Record a source whose discovery failed
pub fn record_source_failure(kind: &str) {
    if let Some(m) = CRAWLER_METRICS.get() {
        m.source_failures.with_label_values(&[kind]).inc();
    }
}

/// Record ids that failed to resolve
pub fn record_resolution_failures(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = CRAWLER_METRICS.get() {
        m.resolution_failures.inc_by(count as f64);
    }
}

/// Record rows deleted and inserted by a reconcile
pub fn record_rows(deleted: usize, inserted: usize) {
    let Some(m) = CRAWLER_METRICS.get() else {
        return;
    };

    if deleted > 0 {
        m.rows.with_label_values(&["deleted"]).inc_by(deleted as f64);
    }
    if inserted > 0 {
        m.rows.with_label_values(&["inserted"]).inc_by(inserted as f64);
    }
}

/// Publish the current orchestrator phase
pub fn set_phase(index: u8) {
    if let Some(m) = CRAWLER_METRICS.get() {
        m.phase.set(f64::from(index));
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a cycle timer (returns a timer handle)
pub fn start_cycle_timer() -> MetricsTimer {
    match CRAWLER_METRICS.get() {
        Some(m) => MetricsTimer::new(m.cycle_duration.start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
