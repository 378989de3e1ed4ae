//! Lock-free metrics collection and periodic reporting
//!
//! Counters are shared by the tracker workers, the periodic job and the
//! dispatch gateway. `report()` resets the interval values; `snapshot()`
//! reads the same values and resets nothing.
//!
//! Relaxed ordering throughout. Nothing may branch on these values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Dispatch latency bucket boundaries (milliseconds)
/// Buckets: ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, ≤10000, >10000 ms
const BUCKET_BOUNDS: [u64; 10] = [10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10000];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Lock-free metrics collector
pub struct Metrics {
    fixes_received: AtomicU64,
    fixes_throttled: AtomicU64,
    zone_events: AtomicU64,
    dispatch_sent: AtomicU64,
    dispatch_failed: AtomicU64,
    dispatch_skipped: AtomicU64,
    /// Sent since last report (reset on report)
    dispatch_since_report: AtomicU64,
    dispatch_latency_sum_ms: AtomicU64,
    dispatch_latency_max_ms: AtomicU64,
    /// Never reset; feeds the histogram `_sum`
    dispatch_latency_total_ms: AtomicU64,
    /// Cumulative dispatch latency histogram (Prometheus buckets never reset)
    dispatch_latency_buckets: [AtomicU64; NUM_BUCKETS],
    periodic_runs: AtomicU64,
    periodic_retries: AtomicU64,
    periodic_failures: AtomicU64,
    last_report: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            fixes_received: AtomicU64::new(0),
            fixes_throttled: AtomicU64::new(0),
            zone_events: AtomicU64::new(0),
            dispatch_sent: AtomicU64::new(0),
            dispatch_failed: AtomicU64::new(0),
            dispatch_skipped: AtomicU64::new(0),
            dispatch_since_report: AtomicU64::new(0),
            dispatch_latency_sum_ms: AtomicU64::new(0),
            dispatch_latency_max_ms: AtomicU64::new(0),
            dispatch_latency_total_ms: AtomicU64::new(0),
            dispatch_latency_buckets: Default::default(),
            periodic_runs: AtomicU64::new(0),
            periodic_retries: AtomicU64::new(0),
            periodic_failures: AtomicU64::new(0),
            last_report: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_fix_received(&self) {
        self.fixes_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_throttled(&self) {
        self.fixes_throttled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_zone_event(&self) {
        self.zone_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful send with its channel latency
    pub fn record_dispatch_sent(&self, latency_ms: u64) {
        self.dispatch_sent.fetch_add(1, Ordering::Relaxed);
        self.dispatch_since_report.fetch_add(1, Ordering::Relaxed);
        self.dispatch_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.dispatch_latency_total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.dispatch_latency_max_ms, latency_ms);
        self.dispatch_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatch_failed(&self) {
        self.dispatch_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatch_skipped(&self) {
        self.dispatch_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_periodic_run(&self) {
        self.periodic_runs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_periodic_retry(&self) {
        self.periodic_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_periodic_failure(&self) {
        self.periodic_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatch_sent(&self) -> u64 {
        self.dispatch_sent.load(Ordering::Relaxed)
    }

    pub fn dispatch_failed(&self) -> u64 {
        self.dispatch_failed.load(Ordering::Relaxed)
    }

    pub fn fixes_throttled(&self) -> u64 {
        self.fixes_throttled.load(Ordering::Relaxed)
    }

    pub fn dispatch_skipped(&self) -> u64 {
        self.dispatch_skipped.load(Ordering::Relaxed)
    }

    /// Snapshot counters; interval values (rate, avg, max) are reset
    pub fn report(&self) -> MetricsSummary {
        let elapsed_secs = {
            let mut last = self.last_report.lock();
            let elapsed = last.elapsed().as_secs_f64();
            *last = Instant::now();
            elapsed
        };

        let interval_sent = self.dispatch_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.dispatch_latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max = self.dispatch_latency_max_ms.swap(0, Ordering::Relaxed);

        self.summarize(elapsed_secs, interval_sent, latency_sum, latency_max)
    }

    /// Same values as `report()` without starting a new interval
    pub fn snapshot(&self) -> MetricsSummary {
        let elapsed_secs = self.last_report.lock().elapsed().as_secs_f64();
        self.summarize(
            elapsed_secs,
            self.dispatch_since_report.load(Ordering::Relaxed),
            self.dispatch_latency_sum_ms.load(Ordering::Relaxed),
            self.dispatch_latency_max_ms.load(Ordering::Relaxed),
        )
    }

    fn summarize(
        &self,
        elapsed_secs: f64,
        interval_sent: u64,
        latency_sum: u64,
        latency_max: u64,
    ) -> MetricsSummary {
        MetricsSummary {
            fixes_received: self.fixes_received.load(Ordering::Relaxed),
            fixes_throttled: self.fixes_throttled.load(Ordering::Relaxed),
            zone_events: self.zone_events.load(Ordering::Relaxed),
            dispatch_sent: self.dispatch_sent.load(Ordering::Relaxed),
            dispatch_failed: self.dispatch_failed.load(Ordering::Relaxed),
            dispatch_skipped: self.dispatch_skipped.load(Ordering::Relaxed),
            dispatch_per_hour: if elapsed_secs > 0.0 {
                interval_sent as f64 * 3600.0 / elapsed_secs
            } else {
                0.0
            },
            dispatch_avg_latency_ms: if interval_sent > 0 {
                latency_sum / interval_sent
            } else {
                0
            },
            dispatch_max_latency_ms: latency_max,
            dispatch_latency_total_ms: self.dispatch_latency_total_ms.load(Ordering::Relaxed),
            dispatch_latency_buckets: load_buckets(&self.dispatch_latency_buckets),
            periodic_runs: self.periodic_runs.load(Ordering::Relaxed),
            periodic_retries: self.periodic_retries.load(Ordering::Relaxed),
            periodic_failures: self.periodic_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metrics values
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub fixes_received: u64,
    pub fixes_throttled: u64,
    pub zone_events: u64,
    pub dispatch_sent: u64,
    pub dispatch_failed: u64,
    pub dispatch_skipped: u64,
    pub dispatch_per_hour: f64,
    pub dispatch_avg_latency_ms: u64,
    pub dispatch_max_latency_ms: u64,
    pub dispatch_latency_total_ms: u64,
    pub dispatch_latency_buckets: [u64; NUM_BUCKETS],
    pub periodic_runs: u64,
    pub periodic_retries: u64,
    pub periodic_failures: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            fixes = %self.fixes_received,
            fixes_throttled = %self.fixes_throttled,
            zone_events = %self.zone_events,
            sent = %self.dispatch_sent,
            failed = %self.dispatch_failed,
            skipped = %self.dispatch_skipped,
            per_hour = %format!("{:.1}", self.dispatch_per_hour),
            avg_latency_ms = %self.dispatch_avg_latency_ms,
            max_latency_ms = %self.dispatch_max_latency_ms,
            periodic_runs = %self.periodic_runs,
            periodic_retries = %self.periodic_retries,
            periodic_failures = %self.periodic_failures,
            "metrics"
        );
    }
}
