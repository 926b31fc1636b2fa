//! Store failures and their retry classification.
//!
//! Failures carry an S3-style error code. The code alone decides whether an
//! upload is abandoned or retried.

use std::path::PathBuf;
use thiserror::Error;

/// Credential and signature failures. Retrying cannot help.
pub const FATAL_CODES: &[&str] = &["AccessDenied", "InvalidAccessKeyId", "SignatureDoesNotMatch"];

/// Throttling, clock skew and timeouts.
pub const RETRYABLE_CODES: &[&str] = &["SlowDown", "RequestTimeTooSkewed", "RequestTimeout"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Fatal,
    Retryable,
    /// Not recognised; retried like a retryable failure.
    Unknown,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

pub fn classify(code: &str) -> ErrorClass {
    if FATAL_CODES.contains(&code) {
        ErrorClass::Fatal
    } else if RETRYABLE_CODES.contains(&code) {
        ErrorClass::Retryable
    } else {
        ErrorClass::Unknown
    }
}

/// One failed store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        classify(&self.code)
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("payload {} does not exist", path.display())]
    MissingFile { path: PathBuf },

    #[error("failed to read payload {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload abandoned: {0}")]
    Fatal(StoreError),

    #[error("upload failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: StoreError },

    #[error("object store configuration: {0}")]
    Config(String),
}

impl UploadError {
    /// Store error code of the last failed attempt, if any.
    pub fn store_code(&self) -> Option<&str> {
        match self {
            Self::Fatal(e) | Self::Exhausted { last: e, .. } => Some(e.code.as_str()),
            _ => None,
        }
    }
}
