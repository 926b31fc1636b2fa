//! Common test setup functions.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use listener::{Listener, ListenerConfig, RateLimiter};
use relay_core::{shutdown_channel, KeyLayout, OutputFormat, Shutdown, ShutdownTrigger};
use spool::AppendLog;
use uploader::{UploadConfig, Uploader};
use worker::{RotationConfig, Rotator};

use crate::mocks::MockStore;

/// Knobs for a test relay.
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub listener: ListenerConfig,
    pub max_file_size: u64,
    pub rotation_interval: Duration,
    pub check_interval: Duration,
    pub output_format: OutputFormat,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub prefix: String,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            listener: ListenerConfig {
                bind_host: "127.0.0.1".to_string(),
                port: 0,
                ..Default::default()
            },
            max_file_size: 10 * 1024 * 1024,
            rotation_interval: Duration::from_secs(3600),
            check_interval: Duration::from_secs(60),
            output_format: OutputFormat::Xml,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(10),
            prefix: "xml-events/".to_string(),
        }
    }
}

/// A relay wired the way `main` wires it, with the object store mocked.
///
/// - Real listener on an ephemeral loopback port
/// - Real append log and staging file in a temp dir
/// - Rotator over `MockStore`, not started until asked
pub struct TestContext {
    pub dir: TempDir,
    pub log: Arc<AppendLog>,
    pub store: MockStore,
    pub rotator: Arc<Rotator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub addr: SocketAddr,
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
    listener_task: JoinHandle<()>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_options(TestOptions::default()).await
    }

    pub async fn with_options(options: TestOptions) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let log = Arc::new(
            AppendLog::open(dir.path().join("current.xml"))
                .await
                .expect("Failed to open append log"),
        );

        let store = MockStore::new();
        let uploader = Arc::new(Uploader::new(
            Arc::new(store.clone()),
            UploadConfig {
                max_retries: options.max_retries,
                base_delay: options.retry_base_delay,
                ..Default::default()
            },
        ));
        let rotator = Arc::new(Rotator::new(
            RotationConfig {
                interval: options.rotation_interval,
                check_interval: options.check_interval,
                max_file_size: options.max_file_size,
                output_format: options.output_format,
                pretty_json: false,
                staging_path: dir.path().join("temp.xml"),
            },
            log.clone(),
            uploader,
            KeyLayout::new(options.prefix.clone(), false),
        ));

        let rate_limiter = Arc::new(RateLimiter::new(options.listener.rate_limit.clone()));
        let listener = Listener::with_rate_limiter(options.listener.clone(), log.clone(), rate_limiter.clone());
        let socket = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = socket.local_addr().expect("No local address");

        let (trigger, shutdown) = shutdown_channel();
        let listener_shutdown = shutdown.clone();
        let listener_task = tokio::spawn(async move {
            listener
                .serve(socket, listener_shutdown)
                .await
                .expect("Listener failed");
        });

        Self {
            dir,
            log,
            store,
            rotator,
            rate_limiter,
            addr,
            trigger,
            shutdown,
            listener_task,
        }
    }

    pub fn staging_path(&self) -> PathBuf {
        self.dir.path().join("temp.xml")
    }

    /// Starts the rotation loop.
    pub fn start_rotation(&self) -> JoinHandle<()> {
        let rotator = self.rotator.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { rotator.run(shutdown).await })
    }

    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr)
            .await
            .expect("Failed to connect to listener")
    }

    /// Opens a connection, sends `payload` and closes it.
    pub async fn send(&self, payload: &[u8]) {
        let mut stream = self.connect().await;
        stream.write_all(payload).await.expect("Failed to send");
        stream.shutdown().await.ok();
    }

    /// Current content of the append log.
    pub async fn log_contents(&self) -> String {
        tokio::fs::read_to_string(self.log.path())
            .await
            .unwrap_or_default()
    }

    /// Waits until the log holds at least `n` events.
    pub async fn wait_for_events(&self, n: u64) {
        let log = self.log.clone();
        eventually(|| {
            let log = log.clone();
            async move { log.event_count() >= n }
        })
        .await;
    }

    pub async fn shutdown(self) {
        self.trigger.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.listener_task).await;
    }
}

/// Polls `check` until it holds, failing the test after five seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}
