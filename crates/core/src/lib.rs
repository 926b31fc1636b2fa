//! Core types for the event relay: record framing, batch envelopes,
//! structured conversion, object key layout and the shutdown signal.

pub mod convert;
pub mod envelope;
pub mod error;
pub mod framer;
pub mod key;
pub mod limits;
pub mod shutdown;

pub use convert::{Converter, OutputFormat};
pub use error::{Error, Result};
pub use framer::EventFramer;
pub use key::KeyLayout;
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
