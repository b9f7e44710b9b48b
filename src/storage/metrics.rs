//! Storage Metrics Collection
//!
//! Counters and latency averages for monitoring both tiers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Storage metrics collector
#[derive(Debug, Default)]
pub struct StorageMetrics {
    // Local tier
    local_hits: AtomicU64,
    local_misses: AtomicU64,

    // Distributed tier
    distributed_hits: AtomicU64,
    distributed_misses: AtomicU64,
    backend_errors: AtomicU64,

    // Outcomes
    rejected_writes: AtomicU64,
    cancellations: AtomicU64,
    timeouts: AtomicU64,

    // Distributed latencies (microseconds, exponential moving average)
    read_latency_us: AtomicU64,
    write_latency_us: AtomicU64,
}

impl StorageMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local_miss(&self) {
        self.local_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_distributed_hit(&self) {
        self.distributed_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_distributed_miss(&self) {
        self.distributed_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_write(&self) {
        self.rejected_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.read_latency_us, duration);
    }

    pub fn record_write_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.write_latency_us, duration);
    }

    fn update_latency_ema(target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn local_hits(&self) -> u64 {
        self.local_hits.load(Ordering::Relaxed)
    }

    pub fn local_misses(&self) -> u64 {
        self.local_misses.load(Ordering::Relaxed)
    }

    pub fn distributed_hits(&self) -> u64 {
        self.distributed_hits.load(Ordering::Relaxed)
    }

    pub fn distributed_misses(&self) -> u64 {
        self.distributed_misses.load(Ordering::Relaxed)
    }

    /// Fraction of reads served without reaching the distributed tier
    pub fn local_hit_ratio(&self) -> f64 {
        let hits = self.local_hits() as f64;
        let total = hits + self.local_misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Fraction of reads that found a value in either tier
    pub fn overall_hit_ratio(&self) -> f64 {
        let hits = self.local_hits() + self.distributed_hits();
        let total = hits + self.distributed_misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            local_hits: self.local_hits(),
            local_misses: self.local_misses(),
            local_hit_ratio: self.local_hit_ratio(),
            distributed_hits: self.distributed_hits(),
            distributed_misses: self.distributed_misses(),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            rejected_writes: self.rejected_writes.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            read_latency: Duration::from_micros(self.read_latency_us.load(Ordering::Relaxed)),
            write_latency: Duration::from_micros(self.write_latency_us.load(Ordering::Relaxed)),
            overall_hit_ratio: self.overall_hit_ratio(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.local_hits,
            &self.local_misses,
            &self.distributed_hits,
            &self.distributed_misses,
            &self.backend_errors,
            &self.rejected_writes,
            &self.cancellations,
            &self.timeouts,
            &self.read_latency_us,
            &self.write_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of all storage metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub local_hits: u64,
    pub local_misses: u64,
    pub local_hit_ratio: f64,
    pub distributed_hits: u64,
    pub distributed_misses: u64,
    pub backend_errors: u64,
    pub rejected_writes: u64,
    pub cancellations: u64,
    pub timeouts: u64,
    pub read_latency: Duration,
    pub write_latency: Duration,
    pub overall_hit_ratio: f64,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
