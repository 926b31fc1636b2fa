//! Unified error types for the event relay.
//!
//! Error codes:
//! - FRAME_001-002: Framing errors (the offending connection is closed)
//! - BATCH_001-002: Rotation batch errors (a fallback path applies)
//! - CONF_001-002: Configuration errors (fatal at startup)

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Framing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameErrorCode {
    /// FRAME_001: Connection exceeded its cumulative message size
    MessageTooLarge,
    /// FRAME_002: Record declaration is never closed
    MalformedDeclaration,
}

impl FrameErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MessageTooLarge => "FRAME_001",
            Self::MalformedDeclaration => "FRAME_002",
        }
    }
}

/// Rotation batch error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchErrorCode {
    /// BATCH_001: Wrapped batch is not a well-formed document
    NotWellFormed,
    /// BATCH_002: Structured conversion failed
    ConversionFailed,
}

impl BatchErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotWellFormed => "BATCH_001",
            Self::ConversionFailed => "BATCH_002",
        }
    }
}

/// Configuration error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorCode {
    /// CONF_001: Required setting is missing
    MissingSetting,
    /// CONF_002: Setting has an unusable value
    InvalidSetting,
}

impl ConfigErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSetting => "CONF_001",
            Self::InvalidSetting => "CONF_002",
        }
    }
}

/// Unified error type for the event relay.
#[derive(Debug, Error)]
pub enum Error {
    /// Framing error with code.
    #[error("[{code}] {message}")]
    Frame { code: &'static str, message: String },

    /// Batch error with code.
    #[error("[{code}] {message}")]
    Batch { code: &'static str, message: String },

    /// Configuration error with code.
    #[error("[{code}] {message}")]
    Config { code: &'static str, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a framing error.
    pub fn frame(code: FrameErrorCode, msg: impl Into<String>) -> Self {
        Self::Frame {
            code: code.code(),
            message: msg.into(),
        }
    }

    /// Create a batch error.
    pub fn batch(code: BatchErrorCode, msg: impl Into<String>) -> Self {
        Self::Batch {
            code: code.code(),
            message: msg.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(code: ConfigErrorCode, msg: impl Into<String>) -> Self {
        Self::Config {
            code: code.code(),
            message: msg.into(),
        }
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Frame { code, .. } => Some(code),
            Self::Batch { code, .. } => Some(code),
            Self::Config { code, .. } => Some(code),
            _ => None,
        }
    }
}
