//! Prometheus metrics for the scheduler and spiders
//!
//! This module provides metrics tracking for:
//! - Scheduler: leases granted, empty acquires, keepalives, releases, dropped datagrams
//! - Spider: scans by outcome, files indexed, scan duration
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

pub mod exporter;

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::sync::OnceLock;

use crate::scheduler::registry::RegistryStats;

pub use exporter::{create_router, serve_metrics};

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all scheduler metrics
struct SchedulerMetrics {
    leases_granted: Counter,
    empty_acquires: Counter,
    keepalives: CounterVec,
    releases: CounterVec,
    dropped_datagrams: CounterVec,
    registered_targets: Gauge,
    leased_targets: Gauge,
}

/// Container for all spider metrics
struct SpiderMetrics {
    scans: CounterVec,
    files_indexed: Counter,
    scan_duration: Histogram,
}

/// Global storage for scheduler metrics
static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

/// Global storage for spider metrics
static SPIDER_METRICS: OnceLock<SpiderMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = smbspider::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let scheduler = SchedulerMetrics {
        leases_granted: register_counter!(
            "smbspider_scheduler_leases_granted_total",
            "Total leases handed out"
        )?,
        empty_acquires: register_counter!(
            "smbspider_scheduler_empty_acquires_total",
            "Acquire requests that found no free target"
        )?,
        keepalives: register_counter_vec!(
            "smbspider_scheduler_keepalives_total",
            "Keepalives received, by whether the target was known",
            &["result"]
        )?,
        releases: register_counter_vec!(
            "smbspider_scheduler_releases_total",
            "Releases received, by whether the target was known",
            &["result"]
        )?,
        dropped_datagrams: register_counter_vec!(
            "smbspider_scheduler_dropped_datagrams_total",
            "Datagrams dropped without processing",
            &["reason"]
        )?,
        registered_targets: register_gauge!(
            "smbspider_scheduler_registered_targets",
            "Number of targets in the registry"
        )?,
        leased_targets: register_gauge!(
            "smbspider_scheduler_leased_targets",
            "Number of targets currently holding a live lease"
        )?,
    };

    let spider = SpiderMetrics {
        scans: register_counter_vec!(
            "smbspider_spider_scans_total",
            "Completed scan attempts by status",
            &["status"]
        )?,
        files_indexed: register_counter!(
            "smbspider_spider_files_indexed_total",
            "Total file records written to storage"
        )?,
        scan_duration: register_histogram!(
            "smbspider_spider_scan_duration_seconds",
            "Time spent scanning one server in seconds",
            vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]
        )?,
    };

    SCHEDULER_METRICS
        .set(scheduler)
        .map_err(|_| "Scheduler metrics already initialized")?;
    SPIDER_METRICS
        .set(spider)
        .map_err(|_| "Spider metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SCHEDULER_METRICS.get().is_some() && SPIDER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn hit_label(hit: bool) -> &'static str {
    if hit {
        "hit"
    } else {
        "miss"
    }
}

/// Record the outcome of an acquire request
pub fn record_acquire(granted: bool) {
    let Some(m) = SCHEDULER_METRICS.get() else {
        return;
    };

    if granted {
        m.leases_granted.inc();
    } else {
        m.empty_acquires.inc();
    }
}

/// Record a keepalive
pub fn record_keepalive(hit: bool) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.keepalives.with_label_values(&[hit_label(hit)]).inc();
    }
}

/// Record a release
pub fn record_release(hit: bool) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.releases.with_label_values(&[hit_label(hit)]).inc();
    }
}

/// Record a datagram dropped before dispatch
pub fn record_dropped_datagram(reason: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.dropped_datagrams.with_label_values(&[reason]).inc();
    }
}

/// Update registry gauges
pub fn update_registry_metrics(stats: &RegistryStats) {
    let Some(m) = SCHEDULER_METRICS.get() else {
        return;
    };

    m.registered_targets.set(stats.total as f64);
    m.leased_targets.set(stats.leased as f64);
}

/// Record a finished scan
pub fn record_scan(status: &str, files: u64) {
    let Some(m) = SPIDER_METRICS.get() else {
        return;
    };

    m.scans.with_label_values(&[status]).inc();

    if files > 0 {
        m.files_indexed.inc_by(files as f64);
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

/// Start a scan timer
pub fn start_scan_timer() -> MetricsTimer {
    match SPIDER_METRICS.get() {
        Some(m) => MetricsTimer::new(m.scan_duration.start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
