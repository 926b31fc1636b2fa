//! In-memory metrics for the relay.
//!
//! All values are relaxed atomics. A snapshot is not a consistent cut across
//! fields, which is fine for periodic status lines.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Value that moves both ways. Decrements saturate at zero.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }
}

/// Latency histogram in milliseconds.
#[derive(Debug)]
pub struct Histogram {
    /// 10ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s, 60s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [10, 50, 100, 250, 500, 1000, 2500, 5000, 10000, 30000, 60000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            count => self.sum() as f64 / count as f64,
        }
    }

    /// `(upper bound, count)` pairs.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    // Listener
    pub connections_accepted: Counter,
    pub connections_rate_limited: Counter,
    pub connections_rejected: Counter,
    pub oversize_disconnects: Counter,
    pub bytes_received: Counter,
    pub records_appended: Counter,
    pub append_errors: Counter,
    pub active_connections: Gauge,

    // Rotation
    pub rotations: Counter,
    pub rotation_failures: Counter,
    pub fallback_uploads: Counter,
    pub records_uploaded: Counter,

    // Object store
    pub upload_attempts: Counter,
    pub upload_retries: Counter,
    pub upload_failures: Counter,
    pub upload_latency_ms: Histogram,

    pub tracked_sources: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            connections_accepted: self.connections_accepted.get(),
            connections_rate_limited: self.connections_rate_limited.get(),
            connections_rejected: self.connections_rejected.get(),
            oversize_disconnects: self.oversize_disconnects.get(),
            bytes_received: self.bytes_received.get(),
            records_appended: self.records_appended.get(),
            append_errors: self.append_errors.get(),
            active_connections: self.active_connections.get(),
            rotations: self.rotations.get(),
            rotation_failures: self.rotation_failures.get(),
            fallback_uploads: self.fallback_uploads.get(),
            records_uploaded: self.records_uploaded.get(),
            upload_attempts: self.upload_attempts.get(),
            upload_retries: self.upload_retries.get(),
            upload_failures: self.upload_failures.get(),
            upload_latency_mean_ms: self.upload_latency_ms.mean(),
            tracked_sources: self.tracked_sources.get(),
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub connections_accepted: u64,
    pub connections_rate_limited: u64,
    pub connections_rejected: u64,
    pub oversize_disconnects: u64,
    pub bytes_received: u64,
    pub records_appended: u64,
    pub append_errors: u64,
    pub active_connections: u64,
    pub rotations: u64,
    pub rotation_failures: u64,
    pub fallback_uploads: u64,
    pub records_uploaded: u64,
    pub upload_attempts: u64,
    pub upload_retries: u64,
    pub upload_failures: u64,
    pub upload_latency_mean_ms: f64,
    pub tracked_sources: u64,
}

pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Global metrics registry.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
