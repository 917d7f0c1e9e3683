//! Per-context counters and kernel latency distribution.

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Largest kernel time tracked by the histogram: one hour in nanoseconds.
const MAX_TRACKED_NS: u64 = 3_600_000_000_000;

/// Metrics collector owned by a context.
///
/// Every queue of the context reports into it once a command finishes.
/// Buffers report their allocation size.
#[derive(Debug)]
pub struct Metrics {
    kernels_launched: AtomicU64,
    copies: AtomicU64,
    bytes_transferred: AtomicU64,
    commands_failed: AtomicU64,
    buffers_allocated: AtomicU64,
    bytes_allocated: AtomicU64,

    // None if the histogram could not be sized; latencies are then dropped.
    kernel_latency: Option<Mutex<Histogram<u64>>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        let kernel_latency = match Histogram::new_with_max(MAX_TRACKED_NS, 3) {
            Ok(histogram) => Some(Mutex::new(histogram)),
            Err(err) => {
                tracing::warn!(error = %err, "kernel latency histogram disabled");
                None
            }
        };

        Self {
            kernels_launched: AtomicU64::new(0),
            copies: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            buffers_allocated: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            kernel_latency,
            start_time: Instant::now(),
        }
    }

    pub fn record_allocation(&self, bytes: usize) {
        self.buffers_allocated.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a finished kernel with its execution time.
    pub fn record_kernel(&self, duration_ns: u64) {
        self.kernels_launched.fetch_add(1, Ordering::Relaxed);
        if let Some(histogram) = &self.kernel_latency {
            let _ = histogram.lock().record(duration_ns.clamp(1, MAX_TRACKED_NS));
        }
    }

    pub fn record_copy(&self, bytes: usize) {
        self.copies.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.commands_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            kernels_launched: self.kernels_launched.load(Ordering::Relaxed),
            copies: self.copies.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            buffers_allocated: self.buffers_allocated.load(Ordering::Relaxed),
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            ..MetricsSnapshot::default()
        };

        if let Some(histogram) = &self.kernel_latency {
            let histogram = histogram.lock();
            if !histogram.is_empty() {
                snapshot.mean_kernel_ns = histogram.mean() as u64;
                snapshot.p50_kernel_ns = histogram.value_at_quantile(0.50);
                snapshot.p95_kernel_ns = histogram.value_at_quantile(0.95);
                snapshot.p99_kernel_ns = histogram.value_at_quantile(0.99);
                snapshot.max_kernel_ns = histogram.max();
            }
        }
        snapshot
    }

    /// Zero every counter and the latency distribution.
    pub fn reset(&self) {
        for counter in [
            &self.kernels_launched,
            &self.copies,
            &self.bytes_transferred,
            &self.commands_failed,
            &self.buffers_allocated,
            &self.bytes_allocated,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Some(histogram) = &self.kernel_latency {
            histogram.lock().reset();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a context's metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub kernels_launched: u64,
    pub copies: u64,
    pub bytes_transferred: u64,
    pub commands_failed: u64,
    pub buffers_allocated: u64,
    pub bytes_allocated: u64,
    pub mean_kernel_ns: u64,
    pub p50_kernel_ns: u64,
    pub p95_kernel_ns: u64,
    pub p99_kernel_ns: u64,
    pub max_kernel_ns: u64,
}

impl MetricsSnapshot {
    pub fn kernels_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.kernels_launched as f64 / seconds
    }
}
