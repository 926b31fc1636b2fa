//! Log rotation.
//!
//! A rotation holds the append log for its whole duration: drain, wrap,
//! validate, stage, upload and, only once the upload has landed, truncate.
//! If anything before the truncate fails the log keeps its content and the
//! batch goes out with the next rotation.

use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use relay_core::envelope;
use relay_core::limits::{
    DEFAULT_MAX_FILE_SIZE, DEFAULT_ROTATION_CHECK_SECS, DEFAULT_ROTATION_INTERVAL_SECS,
};
use relay_core::{Converter, KeyLayout, OutputFormat, Shutdown};
use spool::AppendLog;
use telemetry::metrics;
use uploader::Uploader;

#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Time trigger.
    pub interval: Duration,
    /// How often the triggers are evaluated.
    pub check_interval: Duration,
    /// Size trigger, in bytes.
    pub max_file_size: u64,
    pub output_format: OutputFormat,
    pub pretty_json: bool,
    /// Where the packaged batch is written before upload. JSON output goes
    /// to the same path with a `.json` extension.
    pub staging_path: PathBuf,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_ROTATION_INTERVAL_SECS),
            check_interval: Duration::from_secs(DEFAULT_ROTATION_CHECK_SECS),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            output_format: OutputFormat::Xml,
            pretty_json: true,
            staging_path: PathBuf::from("./temp.xml"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotatorState {
    Idle,
    Triggered,
    Rotating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationTrigger {
    Time,
    /// Log size in bytes when the trigger fired.
    Size(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// The log was empty.
    Skipped,
    Uploaded {
        key: String,
        /// Session counter at drain time.
        events: u64,
        /// Records found by validation. `None` for raw fallback uploads.
        records: Option<usize>,
        bytes: u64,
        fallback: bool,
    },
    /// Upload failed; the batch is still in the log.
    Failed { key: String, error: String },
}

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("append log: {0}")]
    Log(#[from] relay_core::Error),

    #[error("failed to stage batch at {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct Rotator {
    config: RotationConfig,
    log: Arc<AppendLog>,
    uploader: Arc<Uploader>,
    keys: KeyLayout,
    converter: Option<Converter>,
    state: Mutex<RotatorState>,
}

impl Rotator {
    pub fn new(
        config: RotationConfig,
        log: Arc<AppendLog>,
        uploader: Arc<Uploader>,
        keys: KeyLayout,
    ) -> Self {
        let converter = match config.output_format {
            OutputFormat::Json => Some(Converter::new(config.pretty_json)),
            OutputFormat::Xml => None,
        };
        Self {
            config,
            log,
            uploader,
            keys,
            converter,
            state: Mutex::new(RotatorState::Idle),
        }
    }

    pub fn state(&self) -> RotatorState {
        *self.state.lock()
    }

    fn set_state(&self, state: RotatorState) {
        *self.state.lock() = state;
    }

    /// Evaluates both triggers. Time wins when both hold.
    pub fn check_trigger(&self, since_last: Duration) -> Option<RotationTrigger> {
        if since_last >= self.config.interval {
            return Some(RotationTrigger::Time);
        }
        let size = self.log.size();
        if size >= self.config.max_file_size {
            return Some(RotationTrigger::Size(size));
        }
        None
    }

    /// Runs the trigger loop until shutdown. The first check happens at once.
    pub async fn run(&self, mut shutdown: Shutdown) {
        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_rotation = Instant::now();

        info!(
            interval_secs = self.config.interval.as_secs(),
            check_secs = self.config.check_interval.as_secs(),
            max_file_size = self.config.max_file_size,
            format = self.config.output_format.extension(),
            "Rotation loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            let checked_at = Instant::now();
            let Some(trigger) = self.check_trigger(checked_at.duration_since(last_rotation)) else {
                continue;
            };

            self.set_state(RotatorState::Triggered);
            info!(trigger = ?trigger, size = self.log.size(), "Rotation triggered");

            if let Err(e) = self.rotate().await {
                metrics().rotation_failures.inc();
                error!(error = %e, "Rotation aborted, batch kept in log");
            }

            // The time trigger counts from the check that fired, not from
            // when the upload finished. A failed rotation waits for the next
            // trigger.
            last_rotation = checked_at;
        }

        info!("Rotation loop stopped");
    }

    /// Performs one rotation.
    pub async fn rotate(&self) -> Result<RotationOutcome, RotationError> {
        self.set_state(RotatorState::Rotating);
        let outcome = self.rotate_inner().await;
        self.set_state(RotatorState::Idle);
        outcome
    }

    async fn rotate_inner(&self) -> Result<RotationOutcome, RotationError> {
        let captured_at = Utc::now();

        let Some(drain) = self.log.drain().await? else {
            debug!("Append log empty, nothing to rotate");
            return Ok(RotationOutcome::Skipped);
        };

        let events = drain.events();
        let wrapped = envelope::wrap(drain.contents());

        let (payload, key, records) = match envelope::validate(&wrapped) {
            Ok(records) => {
                let (path, extension) = self.stage(&wrapped).await?;
                (path, self.keys.batch_key(captured_at, extension), Some(records))
            }
            Err(e) => {
                warn!(error = %e, events = events, "Batch is not well-formed, uploading raw content");
                metrics().fallback_uploads.inc();
                (
                    drain.path().to_path_buf(),
                    self.keys.fallback_key(captured_at),
                    None,
                )
            }
        };
        let fallback = records.is_none();

        match self.uploader.upload_file(&payload, &key).await {
            Ok(receipt) => {
                drain.reset().await?;
                self.clear_staging().await;

                metrics().rotations.inc();
                metrics().records_uploaded.inc_by(events);
                info!(
                    key = %key,
                    events = events,
                    records = ?records,
                    bytes = receipt.bytes,
                    attempts = receipt.attempts,
                    fallback = fallback,
                    "Rotation complete"
                );

                Ok(RotationOutcome::Uploaded {
                    key,
                    events,
                    records,
                    bytes: receipt.bytes,
                    fallback,
                })
            }
            Err(e) => {
                drop(drain);
                self.clear_staging().await;

                metrics().rotation_failures.inc();
                error!(key = %key, events = events, error = %e, "Rotation upload failed, batch kept in log");

                Ok(RotationOutcome::Failed {
                    key,
                    error: e.to_string(),
                })
            }
        }
    }

    /// Writes the validated batch to the staging path, converting it when
    /// JSON output is configured. Returns the path to upload and its
    /// extension.
    async fn stage(&self, wrapped: &[u8]) -> Result<(PathBuf, &'static str), RotationError> {
        let xml_path = self.config.staging_path.clone();
        write_staging(&xml_path, wrapped).await?;

        if let Some(converter) = &self.converter {
            match converter.convert(wrapped) {
                Ok(json) => {
                    let json_path = self.json_staging_path();
                    write_staging(&json_path, &json).await?;
                    return Ok((json_path, OutputFormat::Json.extension()));
                }
                Err(e) => {
                    warn!(error = %e, "Conversion failed, uploading XML instead");
                }
            }
        }

        Ok((xml_path, OutputFormat::Xml.extension()))
    }

    fn json_staging_path(&self) -> PathBuf {
        self.config
            .staging_path
            .with_extension(OutputFormat::Json.extension())
    }

    async fn clear_staging(&self) {
        for path in [self.config.staging_path.clone(), self.json_staging_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove staging file"),
            }
        }
    }
}

async fn write_staging(path: &Path, contents: &[u8]) -> Result<(), RotationError> {
    let staging = |source| RotationError::Staging {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(staging)?;
    }
    tokio::fs::write(path, contents).await.map_err(staging)
}
