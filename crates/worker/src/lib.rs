//! Background work for the event relay:
//! - Rotation (drain the append log, package, upload, truncate)
//! - Rate-window eviction
//! - Periodic status reporting

pub mod rotation;
pub mod scheduler;

pub use rotation::{RotationConfig, RotationError, RotationOutcome, RotationTrigger, Rotator, RotatorState};
pub use scheduler::{WorkerConfig, WorkerScheduler};
