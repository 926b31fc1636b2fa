//! Object key layout for uploaded batches.
//!
//! `{prefix}{YYYYMMDD_HHMMSS}.{ext}`, or with date folders
//! `{prefix}{YYYY}/{MM}/{DD}/{YYYYMMDD_HHMMSS}.{ext}`. Raw fallback uploads
//! carry a `_raw` suffix before the extension.

use chrono::{DateTime, Utc};

/// Suffix marking uploads of unvalidated raw content.
pub const FALLBACK_SUFFIX: &str = "_raw";

/// Capture timestamp as used in object names.
pub fn capture_stamp(captured_at: DateTime<Utc>) -> String {
    captured_at.format("%Y%m%d_%H%M%S").to_string()
}

/// Builds destination keys from a capture timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
    date_folders: bool,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>, date_folders: bool) -> Self {
        Self {
            prefix: prefix.into(),
            date_folders,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key for a validated batch with the given extension.
    pub fn batch_key(&self, captured_at: DateTime<Utc>, extension: &str) -> String {
        let name = format!("{}.{}", capture_stamp(captured_at), extension);
        self.place(captured_at, &name)
    }

    /// Key for a raw fallback upload.
    pub fn fallback_key(&self, captured_at: DateTime<Utc>) -> String {
        let name = format!("{}{}.xml", capture_stamp(captured_at), FALLBACK_SUFFIX);
        self.place(captured_at, &name)
    }

    fn place(&self, captured_at: DateTime<Utc>, name: &str) -> String {
        if self.date_folders {
            format!(
                "{}{}/{}",
                self.prefix,
                captured_at.format("%Y/%m/%d"),
                name
            )
        } else {
            format!("{}{}", self.prefix, name)
        }
    }
}
