//! Object store connection settings.

use std::path::{Path, PathBuf};

use crate::error::UploadError;

/// Directory where container secrets are mounted.
pub const DEFAULT_SECRETS_DIR: &str = "/run/secrets";

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    /// S3-compatible endpoint such as MinIO. Plain HTTP is allowed when set.
    pub endpoint: Option<String>,
    pub credentials: Credentials,
}

#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Secret files under `secrets_dir` win over environment variables.
    pub fn load(secrets_dir: impl AsRef<Path>) -> Result<Self, UploadError> {
        let dir = secrets_dir.as_ref();
        let access_key_id = load_credential(&dir.join("aws_access_key_id"), "AWS_ACCESS_KEY_ID")
            .ok_or_else(|| UploadError::Config("AWS_ACCESS_KEY_ID is not set".to_string()))?;
        let secret_access_key =
            load_credential(&dir.join("aws_secret_access_key"), "AWS_SECRET_ACCESS_KEY")
                .ok_or_else(|| UploadError::Config("AWS_SECRET_ACCESS_KEY is not set".to_string()))?;

        Ok(Self {
            access_key_id,
            secret_access_key,
        })
    }
}

/// Reads a credential from a secret file, falling back to `env_key`.
/// Empty values count as absent.
pub fn load_credential(secret_file: &Path, env_key: &str) -> Option<String> {
    if let Ok(contents) = std::fs::read_to_string(secret_file) {
        let value = contents.trim();
        if !value.is_empty() {
            tracing::debug!(file = %secret_file.display(), "Credential loaded from secret file");
            return Some(value.to_string());
        }
    }

    std::env::var(env_key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn default_secrets_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SECRETS_DIR)
}
