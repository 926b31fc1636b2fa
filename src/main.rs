//! Event relay
//!
//! Accepts access-control panel events over TCP, accumulates them in a local
//! append log and periodically ships the accumulated batch to S3:
//! - Per-source rate limiting and a bounded connection pool
//! - Time- and size-triggered rotation with validate-then-upload-then-truncate
//! - Classified upload retries with exponential backoff

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use listener::{Listener, ListenerConfig, RateLimitConfig, RateLimiter};
use relay_core::error::ConfigErrorCode;
use relay_core::limits::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_RETRIES,
    DEFAULT_RATE_LIMIT_MAX_EVENTS, DEFAULT_RATE_LIMIT_WINDOW_SECS, DEFAULT_READ_TIMEOUT_SECS,
    DEFAULT_RETRY_BASE_DELAY_SECS, DEFAULT_ROTATION_CHECK_SECS, DEFAULT_ROTATION_INTERVAL_SECS,
};
use relay_core::{shutdown_channel, Error, KeyLayout, OutputFormat};
use spool::AppendLog;
use telemetry::init_tracing_from_env;
use uploader::config::default_secrets_dir;
use uploader::retry::DEFAULT_SOURCE_TAG;
use uploader::{check_bucket_access, Credentials, ObjectSink, S3Config, S3Store, UploadConfig, Uploader};
use worker::{RotationConfig, Rotator, WorkerConfig, WorkerScheduler};

/// How long background workers get to wind down after shutdown.
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Relay settings. Keys match the upper-case environment variable names.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
struct Settings {
    bind_host: String,
    port: u16,

    bucket_name: Option<String>,
    prefix: String,
    use_date_folders: bool,
    aws_region: Option<String>,
    aws_endpoint_url: Option<String>,

    rotation_interval: u64,
    rotation_check_interval: u64,
    max_file_size: u64,
    output_format: String,
    pretty_print_json: bool,
    current_file: PathBuf,
    temp_file: PathBuf,

    max_retries: u32,
    retry_base_delay: f64,

    max_connections: usize,
    max_message_size: usize,
    read_timeout: u64,
    rate_limit_enabled: bool,
    rate_limit_window: u64,
    rate_limit_max_events: usize,

    status_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            bucket_name: None,
            prefix: "xml-events/".to_string(),
            use_date_folders: false,
            aws_region: None,
            aws_endpoint_url: None,
            rotation_interval: DEFAULT_ROTATION_INTERVAL_SECS,
            rotation_check_interval: DEFAULT_ROTATION_CHECK_SECS,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            output_format: "xml".to_string(),
            pretty_print_json: true,
            current_file: PathBuf::from("./current.xml"),
            temp_file: PathBuf::from("./temp.xml"),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY_SECS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT_SECS,
            rate_limit_enabled: true,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            rate_limit_max_events: DEFAULT_RATE_LIMIT_MAX_EVENTS,
            status_interval: 300,
        }
    }
}

impl Settings {
    fn bucket(&self) -> Result<String, Error> {
        self.bucket_name
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::config(ConfigErrorCode::MissingSetting, "BUCKET_NAME is required"))
    }

    fn retry_base_delay(&self) -> Result<Duration, Error> {
        Duration::try_from_secs_f64(self.retry_base_delay).map_err(|e| {
            Error::config(
                ConfigErrorCode::InvalidSetting,
                format!("RETRY_BASE_DELAY={}: {e}", self.retry_base_delay),
            )
        })
    }

    fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            bind_host: self.bind_host.clone(),
            port: self.port,
            max_connections: self.max_connections,
            max_message_size: self.max_message_size,
            read_timeout: Duration::from_secs(self.read_timeout),
            rate_limit: RateLimitConfig {
                enabled: self.rate_limit_enabled,
                window: Duration::from_secs(self.rate_limit_window),
                max_events: self.rate_limit_max_events,
                trust_loopback: true,
            },
        }
    }

    fn rotation_config(&self) -> RotationConfig {
        RotationConfig {
            interval: Duration::from_secs(self.rotation_interval),
            check_interval: Duration::from_secs(self.rotation_check_interval.max(1)),
            max_file_size: self.max_file_size,
            output_format: OutputFormat::from_setting(&self.output_format),
            pretty_json: self.pretty_print_json,
            staging_path: self.temp_file.clone(),
        }
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            status_interval: Duration::from_secs(self.status_interval.max(1)),
            eviction_interval: Duration::from_secs(self.rate_limit_window.max(1)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing_from_env();

    info!("Starting event relay v{}", env!("CARGO_PKG_VERSION"));

    let settings = load_settings()?;
    let bucket = settings.bucket()?;
    let retry_base_delay = settings.retry_base_delay()?;

    info!(
        bucket = %bucket,
        prefix = %settings.prefix,
        date_folders = settings.use_date_folders,
        format = %settings.output_format,
        rotation_interval = settings.rotation_interval,
        max_file_size = settings.max_file_size,
        current_file = %settings.current_file.display(),
        "Loaded configuration"
    );

    // Object store, verified before any traffic is accepted
    let credentials =
        Credentials::load(default_secrets_dir()).context("Failed to load object store credentials")?;
    let store = S3Store::new(&S3Config {
        bucket: bucket.clone(),
        region: settings.aws_region.clone(),
        endpoint: settings.aws_endpoint_url.clone(),
        credentials,
    })
    .context("Failed to create object store client")?;
    let sink: Arc<dyn ObjectSink> = Arc::new(store);
    check_bucket_access(sink.as_ref())
        .await
        .with_context(|| format!("Cannot use bucket {bucket}"))?;

    let log = Arc::new(
        AppendLog::open(&settings.current_file)
            .await
            .context("Failed to open append log")?,
    );

    let uploader = Arc::new(Uploader::new(
        sink,
        UploadConfig {
            max_retries: settings.max_retries,
            base_delay: retry_base_delay,
            source: DEFAULT_SOURCE_TAG.to_string(),
        },
    ));
    let rotator = Arc::new(Rotator::new(
        settings.rotation_config(),
        log.clone(),
        uploader,
        KeyLayout::new(settings.prefix.clone(), settings.use_date_folders),
    ));

    let listener_config = settings.listener_config();
    let rate_limiter = Arc::new(RateLimiter::new(listener_config.rate_limit.clone()));
    let listener = Listener::with_rate_limiter(listener_config, log.clone(), rate_limiter.clone());
    let socket = listener.bind().await.context("Failed to bind listener")?;

    let (trigger, shutdown) = shutdown_channel();

    let scheduler = Arc::new(WorkerScheduler::new(
        settings.worker_config(),
        rotator,
        log.clone(),
        rate_limiter,
    ));
    let worker_handles = scheduler.start(shutdown.clone());

    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    listener
        .serve(socket, shutdown)
        .await
        .context("Listener error")?;

    info!("Shutting down...");

    for handle in worker_handles {
        match tokio::time::timeout(WORKER_SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Background worker ended abnormally"),
            Err(_) => warn!("Background worker did not stop in time"),
        }
    }

    info!(
        pending_events = log.event_count(),
        pending_bytes = log.size(),
        "Shutdown complete"
    );
    Ok(())
}

/// Load settings from defaults, an optional file and the environment.
fn load_settings() -> Result<Settings> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Settings::default())?)
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(config::Environment::default().try_parsing(true))
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
