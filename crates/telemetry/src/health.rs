//! Component health for the relay.
//!
//! Two components matter: the listener (can we take events in) and the
//! object store (can batches go out). Losing the store only degrades the
//! relay because events keep accumulating in the append log until it
//! recovers; losing the listener makes it unhealthy.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        *self == Self::Healthy
    }
}

#[derive(Debug, Clone, Default)]
struct ComponentState {
    up: bool,
    last_error: Option<String>,
    /// Consecutive failures since the component was last up.
    failures: u64,
    changed_at: Option<DateTime<Utc>>,
}

/// Up/down flag of one component with its most recent failure.
///
/// Components start down until they report in.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    state: RwLock<ComponentState>,
}

impl ComponentHealth {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: RwLock::new(ComponentState::default()),
        }
    }

    pub fn set_healthy(&self) {
        let mut state = self.state.write();
        if !state.up {
            state.changed_at = Some(Utc::now());
        }
        state.up = true;
        state.last_error = None;
        state.failures = 0;
    }

    pub fn set_unhealthy(&self, msg: impl Into<String>) {
        let mut state = self.state.write();
        if state.up || state.changed_at.is_none() {
            state.changed_at = Some(Utc::now());
        }
        state.up = false;
        state.last_error = Some(msg.into());
        state.failures += 1;
    }

    pub fn is_healthy(&self) -> bool {
        self.state.read().up
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.read().last_error.clone()
    }

    fn snapshot(&self) -> ComponentReport {
        let state = self.state.read();
        ComponentReport {
            name: self.name,
            healthy: state.up,
            message: state.last_error.clone(),
            consecutive_failures: state.failures,
            since: state.changed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentReport {
    pub name: &'static str,
    pub healthy: bool,
    pub message: Option<String>,
    pub consecutive_failures: u64,
    /// When the component last changed between up and down.
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentReport>,
}

/// The relay's two health-tracked components.
#[derive(Debug)]
pub struct HealthRegistry {
    pub object_store: ComponentHealth,
    pub listener: ComponentHealth,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            object_store: ComponentHealth::new("object_store"),
            listener: ComponentHealth::new("listener"),
        }
    }

    pub fn status(&self) -> HealthStatus {
        match (self.listener.is_healthy(), self.object_store.is_healthy()) {
            (true, true) => HealthStatus::Healthy,
            (true, false) => HealthStatus::Degraded,
            (false, _) => HealthStatus::Unhealthy,
        }
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.status(),
            components: vec![self.listener.snapshot(), self.object_store.snapshot()],
        }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static HEALTH: std::sync::LazyLock<HealthRegistry> = std::sync::LazyLock::new(HealthRegistry::new);

/// Process-wide health registry.
pub fn health() -> &'static HealthRegistry {
    &HEALTH
}
