//! Process-local telemetry for the event relay.
//!
//! Counters and gauges live in a global registry and are reported through
//! the structured log by the status loop. There is no external exporter.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
