//! Upload with classified retries.
//!
//! Attempt `n` that fails with a retryable or unknown code sleeps
//! `base_delay * 2^(n-1)` before attempt `n + 1`. A fatal code stops at once.
//! There is no sleep after the last attempt, so the worst-case time spent
//! waiting is `base_delay * (2^(max_retries-1) - 1)`.

use bytes::Bytes;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use relay_core::limits::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY_SECS};
use telemetry::metrics;

use crate::error::{ErrorClass, StoreError, UploadError};
use crate::store::{ObjectAttributes, ObjectSink};

/// Source tag written into every object's metadata.
pub const DEFAULT_SOURCE_TAG: &str = "xml-stream-aggregator";

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Total attempts per upload. Zero is treated as one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub source: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs_f64(DEFAULT_RETRY_BASE_DELAY_SECS),
            source: DEFAULT_SOURCE_TAG.to_string(),
        }
    }
}

/// A landed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub bytes: u64,
    pub attempts: u32,
}

pub struct Uploader {
    sink: Arc<dyn ObjectSink>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(sink: Arc<dyn ObjectSink>, config: UploadConfig) -> Self {
        Self { sink, config }
    }

    pub fn sink(&self) -> &Arc<dyn ObjectSink> {
        &self.sink
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.max(1)
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.config.base_delay.saturating_mul(factor)
    }

    /// Uploads a local file. The content type follows its extension.
    pub async fn upload_file(&self, path: &Path, key: &str) -> Result<UploadReceipt, UploadError> {
        let body = match tokio::fs::read(path).await {
            Ok(body) => Bytes::from(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(path = %path.display(), key = key, "Payload file missing, nothing uploaded");
                return Err(UploadError::MissingFile {
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(UploadError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        self.upload_bytes(key, body, content_type_for(path)).await
    }

    pub async fn upload_bytes(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<UploadReceipt, UploadError> {
        let max_attempts = self.max_attempts();
        let size = body.len() as u64;
        let mut last: Option<StoreError> = None;

        for attempt in 1..=max_attempts {
            let attributes = ObjectAttributes {
                content_type: content_type.to_string(),
                uploaded_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                source: self.config.source.clone(),
            };

            metrics().upload_attempts.inc();
            let started = tokio::time::Instant::now();
            let result = self.sink.put_object(key, body.clone(), &attributes).await;
            metrics()
                .upload_latency_ms
                .observe(started.elapsed().as_millis() as u64);

            let err = match result {
                Ok(()) => {
                    info!(
                        key = key,
                        bytes = size,
                        attempt = attempt,
                        destination = %self.sink.describe(),
                        "Upload complete"
                    );
                    return Ok(UploadReceipt {
                        key: key.to_string(),
                        bytes: size,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            if err.class() == ErrorClass::Fatal {
                metrics().upload_failures.inc();
                error!(
                    key = key,
                    attempt = attempt,
                    code = %err.code,
                    error = %err.message,
                    "Upload rejected, check credentials and bucket policy"
                );
                return Err(UploadError::Fatal(err));
            }

            if attempt < max_attempts {
                let delay = self.backoff_delay(attempt);
                metrics().upload_retries.inc();
                warn!(
                    key = key,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    code = %err.code,
                    class = ?err.class(),
                    delay_ms = delay.as_millis() as u64,
                    "Upload failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            last = Some(err);
        }

        metrics().upload_failures.inc();
        let last = last.unwrap_or_else(|| StoreError::new("Unknown", "no attempt made"));
        error!(
            key = key,
            attempts = max_attempts,
            code = %last.code,
            error = %last.message,
            "Upload failed after all retries"
        );
        Err(UploadError::Exhausted {
            attempts: max_attempts,
            last,
        })
    }
}

/// `application/json` for `.json` payloads, `application/xml` otherwise.
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => "application/json",
        _ => "application/xml",
    }
}
