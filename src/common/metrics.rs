//! Process-wide cluster metrics
//!
//! Counters and a latency histogram for the coordination paths (heartbeats,
//! liveness sweeps, planning, repair), rendered in Prometheus text format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for worker RPC latency (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 15000.0, 60000.0,
];

#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    /// microseconds
    sum: AtomicU64,
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
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value_ms: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| value_ms <= b)
            .unwrap_or(self.boundaries.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value_ms * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_duration(&self, d: Duration) {
        self.observe(d.as_secs_f64() * 1000.0);
    }

    /// Cumulative `(le, count)` pairs, ending with `+Inf`
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.buckets.len());
        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }
        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));
        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
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

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    pub heartbeats: Counter,
    pub workers_declared_dead: Counter,
    pub workers_revived: Counter,
    pub files_registered: Counter,
    pub files_deleted: Counter,
    pub repair_requests: Counter,
    pub repair_failures: Counter,
    pub replicas_added: Counter,
    pub ws_messages_dropped: Counter,
    pub ws_frames_dropped: Counter,
    pub repair_latency: Histogram,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            heartbeats: Counter::new(),
            workers_declared_dead: Counter::new(),
            workers_revived: Counter::new(),
            files_registered: Counter::new(),
            files_deleted: Counter::new(),
            repair_requests: Counter::new(),
            repair_failures: Counter::new(),
            replicas_added: Counter::new(),
            ws_messages_dropped: Counter::new(),
            ws_frames_dropped: Counter::new(),
            repair_latency: Histogram::new(),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters = [
            ("shardfs_heartbeats_total", "Worker heartbeats received", &self.heartbeats),
            (
                "shardfs_workers_declared_dead_total",
                "Workers flipped alive to dead by a sweep",
                &self.workers_declared_dead,
            ),
            (
                "shardfs_workers_revived_total",
                "Dead workers that heartbeated again",
                &self.workers_revived,
            ),
            ("shardfs_files_registered_total", "File plans created", &self.files_registered),
            ("shardfs_files_deleted_total", "File plans removed", &self.files_deleted),
            (
                "shardfs_repair_requests_total",
                "Re-replication RPCs sent to source workers",
                &self.repair_requests,
            ),
            (
                "shardfs_repair_failures_total",
                "Re-replication RPCs that failed",
                &self.repair_failures,
            ),
            (
                "shardfs_replicas_added_total",
                "Replicas appended by re-replication",
                &self.replicas_added,
            ),
            (
                "shardfs_ws_messages_dropped_total",
                "Malformed or unknown WebSocket messages",
                &self.ws_messages_dropped,
            ),
            (
                "shardfs_ws_frames_dropped_total",
                "Outgoing frames dropped because the connection queue was full",
                &self.ws_frames_dropped,
            ),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        out.push_str("# HELP shardfs_uptime_seconds Master uptime in seconds\n");
        out.push_str("# TYPE shardfs_uptime_seconds gauge\n");
        let _ = writeln!(out, "shardfs_uptime_seconds {}", self.uptime_seconds());

        out.push_str("# HELP shardfs_repair_duration_ms Re-replication RPC duration\n");
        out.push_str("# TYPE shardfs_repair_duration_ms histogram\n");
        for (le, count) in self.repair_latency.get_buckets() {
            if le.is_infinite() {
                let _ = writeln!(out, "shardfs_repair_duration_ms_bucket{{le=\"+Inf\"}} {}", count);
            } else {
                let _ = writeln!(out, "shardfs_repair_duration_ms_bucket{{le=\"{}\"}} {}", le, count);
            }
        }
        let _ = writeln!(out, "shardfs_repair_duration_ms_sum {}", self.repair_latency.sum());
        let _ = writeln!(out, "shardfs_repair_duration_ms_count {}", self.repair_latency.count());

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
