//! Sliding-window admission limit per source address.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use relay_core::limits::{DEFAULT_RATE_LIMIT_MAX_EVENTS, DEFAULT_RATE_LIMIT_WINDOW_SECS};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window: Duration,
    /// Events a source may have inside one window before new connections
    /// from it are refused.
    pub max_events: usize,
    /// Loopback sources bypass the admission check.
    pub trust_loopback: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            max_events: DEFAULT_RATE_LIMIT_MAX_EVENTS,
            trust_loopback: true,
        }
    }
}

/// Per-source event timestamps inside the configured window.
///
/// Admission is decided per connection but the window is fed per record,
/// so a source that bursts many records on one connection is refused on
/// its next connection.
pub struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Loopback addresses, including IPv4-mapped IPv6 loopback.
    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        if !self.config.trust_loopback {
            return false;
        }
        match ip {
            IpAddr::V4(v4) => v4.is_loopback(),
            IpAddr::V6(v6) => {
                v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
            }
        }
    }

    /// Decides whether a new connection from `ip` may be admitted.
    pub fn allow(&self, ip: IpAddr, now: Instant) -> bool {
        if !self.config.enabled || self.is_trusted(ip) {
            return true;
        }

        let mut windows = self.windows.lock();
        let Some(window) = windows.get_mut(&ip) else {
            return true;
        };
        prune(window, now, self.config.window);
        window.len() < self.config.max_events
    }

    /// Notes one accepted record from `ip`.
    pub fn record(&self, ip: IpAddr, now: Instant) {
        if !self.config.enabled {
            return;
        }

        let mut windows = self.windows.lock();
        let window = windows.entry(ip).or_default();
        prune(window, now, self.config.window);
        window.push_back(now);
    }

    /// Drops sources whose window is empty once expired entries are pruned.
    /// Returns how many were removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, window| {
            prune(window, now, self.config.window);
            !window.is_empty()
        });
        before - windows.len()
    }

    pub fn tracked_sources(&self) -> usize {
        self.windows.lock().len()
    }

    /// Events currently counted against `ip`, without pruning.
    pub fn window_len(&self, ip: IpAddr) -> usize {
        self.windows.lock().get(&ip).map_or(0, VecDeque::len)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Removes entries at least `window` old. Timestamps are pushed in order, so
/// expired ones are always at the front.
fn prune(entries: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = entries.front() {
        if now.saturating_duration_since(oldest) >= window {
            entries.pop_front();
        } else {
            break;
        }
    }
}
