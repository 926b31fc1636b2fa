//! Hand-off of rotated batches to the object store.

pub mod config;
pub mod error;
pub mod health;
pub mod retry;
pub mod store;

pub use config::{Credentials, S3Config};
pub use error::{classify, ErrorClass, StoreError, UploadError};
pub use health::check_bucket_access;
pub use retry::{content_type_for, UploadConfig, UploadReceipt, Uploader};
pub use store::{ObjectAttributes, ObjectSink, S3Store};
