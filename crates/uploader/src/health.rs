//! Startup probe of the destination bucket.

use telemetry::health;
use tracing::{error, info};

use crate::error::StoreError;
use crate::store::ObjectSink;

/// Probes the destination and records the result in the health registry.
///
/// Failures are logged together with what the operator most likely has to
/// fix.
pub async fn check_bucket_access(sink: &dyn ObjectSink) -> Result<(), StoreError> {
    let destination = sink.describe();

    match sink.check_access().await {
        Ok(()) => {
            health().object_store.set_healthy();
            info!(destination = %destination, "Verified access to object store");
            Ok(())
        }
        Err(err) => {
            health().object_store.set_unhealthy(err.to_string());
            error!(
                destination = %destination,
                code = %err.code,
                error = %err.message,
                hint = guidance(&err.code),
                "Object store is not usable"
            );
            Err(err)
        }
    }
}

/// Operator hint for a failed access probe.
pub fn guidance(code: &str) -> &'static str {
    match code {
        "404" | "NoSuchBucket" => "bucket does not exist; check BUCKET_NAME",
        "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" => {
            "access denied; check credentials and grant s3:ListBucket and s3:PutObject"
        }
        "InvalidBucketName" => {
            "invalid bucket name; use 3-63 lowercase letters, numbers and hyphens"
        }
        "RequestTimeout" => "timed out reaching the store; check network and AWS_REGION",
        _ => "unexpected store error; check AWS_REGION, AWS_ENDPOINT_URL and network access",
    }
}
