//! Worker scheduler for background tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use listener::RateLimiter;
use relay_core::Shutdown;
use spool::AppendLog;
use telemetry::{health, metrics};

use crate::rotation::Rotator;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between status lines (metrics snapshot and health report).
    pub status_interval: Duration,
    /// Interval between rate-window evictions.
    pub eviction_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(300),
            eviction_interval: Duration::from_secs(60),
        }
    }
}

/// Background worker scheduler.
pub struct WorkerScheduler {
    config: WorkerConfig,
    rotator: Arc<Rotator>,
    log: Arc<AppendLog>,
    rate_limiter: Arc<RateLimiter>,
}

impl WorkerScheduler {
    pub fn new(
        config: WorkerConfig,
        rotator: Arc<Rotator>,
        log: Arc<AppendLog>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            config,
            rotator,
            log,
            rate_limiter,
        }
    }

    /// Starts all background workers. Each stops when `shutdown` fires.
    pub fn start(self: Arc<Self>, shutdown: Shutdown) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let rotator = self.rotator.clone();
        let rotation_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            rotator.run(rotation_shutdown).await;
        }));

        let scheduler = self.clone();
        let eviction_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_eviction(eviction_shutdown).await;
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_status(shutdown).await;
        }));

        info!("Background workers started");
        handles
    }

    async fn run_eviction(&self, mut shutdown: Shutdown) {
        let mut ticker = interval(self.config.eviction_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick is immediate and there is nothing to evict yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            let removed = self.rate_limiter.evict_idle(Instant::now());
            let tracked = self.rate_limiter.tracked_sources();
            metrics().tracked_sources.set(tracked as u64);
            if removed > 0 {
                debug!(removed = removed, tracked = tracked, "Evicted idle rate windows");
            }
        }
    }

    async fn run_status(&self, mut shutdown: Shutdown) {
        let mut ticker = interval(self.config.status_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            self.log_status();
        }
    }

    /// Logs one status line with the current counters and health.
    pub fn log_status(&self) {
        let snapshot = metrics().snapshot();
        let report = health().report();

        info!(
            status = ?report.status,
            pending_events = self.log.event_count(),
            pending_bytes = self.log.size(),
            rotator = ?self.rotator.state(),
            active_connections = snapshot.active_connections,
            records_appended = snapshot.records_appended,
            rotations = snapshot.rotations,
            rotation_failures = snapshot.rotation_failures,
            upload_retries = snapshot.upload_retries,
            upload_failures = snapshot.upload_failures,
            upload_latency_mean_ms = snapshot.upload_latency_mean_ms,
            "Relay status"
        );

        for component in report.components.iter().filter(|c| !c.healthy) {
            info!(
                component = %component.name,
                message = component.message.as_deref().unwrap_or(""),
                "Component unhealthy"
            );
        }
    }
}
