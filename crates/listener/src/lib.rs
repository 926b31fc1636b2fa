//! Connection intake for the relay.
//!
//! The accept loop applies the per-source rate limit and the connection
//! pool bound, then hands each admitted socket to its own handler task which
//! frames records and appends them to the shared log.

pub mod connection;
pub mod error;
pub mod rate_limit;
pub mod server;

pub use error::ListenerError;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use server::{Listener, ListenerConfig};
