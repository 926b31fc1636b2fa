//! The active append log.
//!
//! Handlers append complete records; the rotator drains the whole log and
//! truncates it only after the batch has landed.

pub mod log;

pub use log::{AppendLog, Drain};
