//! Object store capability and its S3 implementation.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, RetryConfig};
use std::sync::Arc;

use crate::config::S3Config;
use crate::error::{StoreError, FATAL_CODES, RETRYABLE_CODES};

/// Fixed attributes sent with every object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub content_type: String,
    /// `%Y-%m-%dT%H:%M:%SZ`
    pub uploaded_at: String,
    pub source: String,
}

/// A destination for uploaded batches.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    /// Stores one object under `key`. Each call is a single attempt.
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        attributes: &ObjectAttributes,
    ) -> Result<(), StoreError>;

    /// Verifies that the destination exists and is writable by us.
    async fn check_access(&self) -> Result<(), StoreError>;

    /// Human-readable destination, for logs.
    fn describe(&self) -> String;
}

/// Codes recognised when mapping client errors. Order matters: the first
/// code found in the message wins.
const KNOWN_CODES: &[&str] = &["NoSuchBucket", "InvalidBucketName"];

/// S3 or S3-compatible bucket.
pub struct S3Store {
    inner: Arc<dyn ObjectStore>,
    bucket: String,
}

impl S3Store {
    pub fn new(config: &S3Config) -> Result<Self, StoreError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.credentials.access_key_id)
            .with_secret_access_key(&config.credentials.secret_access_key)
            // Retries are owned by the uploader so each attempt is classified.
            .with_retry(RetryConfig {
                max_retries: 0,
                ..Default::default()
            });

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| StoreError::new("InvalidConfiguration", e.to_string()))?;

        Ok(Self::with_store(Arc::new(store), config.bucket.clone()))
    }

    /// Wraps any object store, e.g. `InMemory` in tests.
    pub fn with_store(inner: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            inner,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectSink for S3Store {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        attributes: &ObjectAttributes,
    ) -> Result<(), StoreError> {
        let mut attrs = Attributes::new();
        attrs.insert(
            Attribute::ContentType,
            AttributeValue::from(attributes.content_type.clone()),
        );
        attrs.insert(
            Attribute::Metadata("uploaded_at".into()),
            AttributeValue::from(attributes.uploaded_at.clone()),
        );
        attrs.insert(
            Attribute::Metadata("source".into()),
            AttributeValue::from(attributes.source.clone()),
        );

        let opts = PutOptions {
            attributes: attrs,
            ..Default::default()
        };

        self.inner
            .put_opts(&ObjectPath::from(key), body.into(), opts)
            .await
            .map(|_| ())
            .map_err(store_error)
    }

    async fn check_access(&self) -> Result<(), StoreError> {
        self.inner
            .list_with_delimiter(None)
            .await
            .map(|_| ())
            .map_err(store_error)
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

/// Maps a client error onto an S3 error code.
pub fn store_error(err: object_store::Error) -> StoreError {
    let message = err.to_string();
    if let object_store::Error::NotFound { .. } = err {
        return StoreError::new("NoSuchBucket", message);
    }
    StoreError::new(code_from_message(&message), message)
}

fn code_from_message(message: &str) -> &'static str {
    if let Some(code) = FATAL_CODES
        .iter()
        .chain(RETRYABLE_CODES)
        .chain(KNOWN_CODES)
        .copied()
        .find(|code| message.contains(*code))
    {
        return code;
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("403") || lower.contains("forbidden") {
        "AccessDenied"
    } else if lower.contains("503") || lower.contains("slow down") {
        "SlowDown"
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "RequestTimeout"
    } else if lower.contains("404") {
        "NoSuchBucket"
    } else {
        "Unknown"
    }
}
