//! Management-plane metrics
//!
//! Prometheus-compatible counters and a latency histogram for top-level
//! operations, the prepare barrier and worker rollout.

use once_cell::sync::Lazy;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for operation latency (in milliseconds)
const LATENCY_BUCKETS: [f64; 10] = [
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 30000.0,
];

pub static METRICS: Lazy<ManagementMetrics> = Lazy::new(ManagementMetrics::new);

/// Histogram for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        Self {
            buckets: (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect(),
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in milliseconds
    pub fn observe(&self, millis: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| millis <= b)
            .unwrap_or(self.boundaries.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((millis * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative `(upper bound, count)` pairs, ending with +Inf
    pub fn cumulative(&self) -> Vec<(f64, u64)> {
        let mut total = 0u64;
        let mut out = Vec::with_capacity(self.buckets.len());
        for (i, bucket) in self.buckets.iter().enumerate() {
            total += bucket.load(Ordering::Relaxed);
            let bound = self.boundaries.get(i).copied().unwrap_or(f64::INFINITY);
            out.push((bound, total));
        }
        out
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct ManagementMetrics {
    pub operations_total: Counter,
    pub operations_failed: Counter,
    pub two_phase_total: Counter,
    pub prepare_failures: Counter,
    pub worker_operations_total: Counter,
    pub worker_rollbacks: Counter,
    pub restart_fallbacks: Counter,
    pub result_timeouts: Counter,
    pub latency: Histogram,
    start_time: Instant,
}

impl Default for ManagementMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagementMetrics {
    pub fn new() -> Self {
        Self {
            operations_total: Counter::new(),
            operations_failed: Counter::new(),
            two_phase_total: Counter::new(),
            prepare_failures: Counter::new(),
            worker_operations_total: Counter::new(),
            worker_rollbacks: Counter::new(),
            restart_fallbacks: Counter::new(),
            result_timeouts: Counter::new(),
            latency: Histogram::new(),
            start_time: Instant::now(),
        }
    }

    /// Record one completed top-level operation
    pub fn record_operation(&self, elapsed: Duration, success: bool) {
        self.operations_total.inc();
        if !success {
            self.operations_failed.inc();
        }
        self.latency.observe(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        let counters: [(&str, &str, &Counter); 8] = [
            ("operations_total", "Top-level operations handled", &self.operations_total),
            ("operations_failed_total", "Top-level operations that failed", &self.operations_failed),
            ("two_phase_total", "Operations coordinated with the two-phase protocol", &self.two_phase_total),
            ("prepare_failures_total", "Controllers that failed to prepare", &self.prepare_failures),
            ("worker_operations_total", "Operations dispatched to workers", &self.worker_operations_total),
            ("worker_rollbacks_total", "Worker operations rolled back", &self.worker_rollbacks),
            ("restart_fallbacks_total", "Workers sent a restart-required fallback", &self.restart_fallbacks),
            ("result_timeouts_total", "Result retrievals abandoned after their wait budget", &self.result_timeouts),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP minidomain_{} {}", name, help);
            let _ = writeln!(out, "# TYPE minidomain_{} counter", name);
            let _ = writeln!(out, "minidomain_{} {}", name, counter.get());
        }

        let _ = writeln!(
            out,
            "# HELP minidomain_operation_duration_ms Top-level operation latency"
        );
        let _ = writeln!(out, "# TYPE minidomain_operation_duration_ms histogram");
        for (bound, count) in self.latency.cumulative() {
            let le = if bound.is_infinite() {
                "+Inf".to_string()
            } else {
                bound.to_string()
            };
            let _ = writeln!(
                out,
                "minidomain_operation_duration_ms_bucket{{le=\"{}\"}} {}",
                le, count
            );
        }
        let _ = writeln!(out, "minidomain_operation_duration_ms_sum {}", self.latency.sum());
        let _ = writeln!(
            out,
            "minidomain_operation_duration_ms_count {}",
            self.latency.count()
        );

        let _ = writeln!(out, "# HELP minidomain_uptime_seconds Controller uptime");
        let _ = writeln!(out, "# TYPE minidomain_uptime_seconds gauge");
        let _ = writeln!(out, "minidomain_uptime_seconds {}", self.uptime_seconds());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_buckets() {
        let h = Histogram::with_buckets(&[10.0, 100.0]);
        h.observe(5.0);
        h.observe(50.0);
        h.observe(500.0);
        let buckets = h.cumulative();
        assert_eq!(buckets, vec![(10.0, 1), (100.0, 2), (f64::INFINITY, 3)]);
        assert_eq!(h.count(), 3);
        assert!((h.sum() - 555.0).abs() < 0.01);
    }

    #[test]
    fn test_record_operation() {
        let m = ManagementMetrics::new();
        m.record_operation(Duration::from_millis(20), true);
        m.record_operation(Duration::from_millis(20), false);
        assert_eq!(m.operations_total.get(), 2);
        assert_eq!(m.operations_failed.get(), 1);
    }

    #[test]
    fn test_prometheus_output() {
        let m = ManagementMetrics::new();
        m.two_phase_total.add(3);
        let text = m.to_prometheus();
        assert!(text.contains("minidomain_two_phase_total 3"));
        assert!(text.contains("le=\"+Inf\""));
    }
}
