//! Size limits and operational defaults for the event relay.
//!
//! MEMORY SAFETY: a connection buffers at most `DEFAULT_MAX_MESSAGE_SIZE` bytes
//! over its whole lifetime, and the slot pool caps how many such buffers exist.
//! Worst case resident input is `max_connections * max_message_size`.

// === Connection Limits ===

/// Maximum cumulative bytes accepted from one connection (1MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Maximum concurrently serviced connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;

/// Inactivity timeout before a connection is closed (seconds).
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Bytes requested per socket read.
pub const READ_CHUNK_SIZE: usize = 4096;

// === Rate Limiting ===

/// Sliding window length (seconds).
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Records allowed per source inside one window.
pub const DEFAULT_RATE_LIMIT_MAX_EVENTS: usize = 1000;

// === Rotation ===

/// Time trigger (seconds). One batch per hour under low traffic.
pub const DEFAULT_ROTATION_INTERVAL_SECS: u64 = 3600;

/// How often the rotator evaluates its triggers (seconds).
pub const DEFAULT_ROTATION_CHECK_SECS: u64 = 60;

/// Size trigger (10MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

// === Upload ===

/// Upload attempts per batch, including the first.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Backoff base (seconds). Attempt n waits `base * 2^(n-1)`.
///
/// With the defaults the worst case is 1+2+4+8 = 15s of sleeping per batch,
/// which bounds how long a rotation can stall ingestion.
pub const DEFAULT_RETRY_BASE_DELAY_SECS: f64 = 1.0;
