//! Accept loop and admission control.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use relay_core::limits::{DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_READ_TIMEOUT_SECS};
use relay_core::Shutdown;
use spool::AppendLog;
use telemetry::{health, metrics};

use crate::connection::{ConnectionHandler, ConnectionSlot};
use crate::error::ListenerError;
use crate::rate_limit::{RateLimitConfig, RateLimiter};

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Cumulative bytes one connection may send before it is closed.
    pub max_message_size: usize,
    pub read_timeout: Duration,
    pub rate_limit: RateLimitConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl ListenerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// Outcome of the admission checks for one accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    RateLimited,
    AtCapacity,
}

pub struct Listener {
    config: ListenerConfig,
    log: Arc<AppendLog>,
    rate_limiter: Arc<RateLimiter>,
    slots: Arc<Semaphore>,
    live: Arc<AtomicUsize>,
}

impl Listener {
    pub fn new(config: ListenerConfig, log: Arc<AppendLog>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self::with_rate_limiter(config, log, rate_limiter)
    }

    /// Uses an existing limiter, shared with the maintenance loop.
    pub fn with_rate_limiter(
        config: ListenerConfig,
        log: Arc<AppendLog>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            log,
            rate_limiter,
            slots,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.rate_limiter.clone()
    }

    /// Connections currently holding a slot.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub async fn bind(&self) -> Result<TcpListener, ListenerError> {
        let address = self.config.bind_address();
        TcpListener::bind(&address)
            .await
            .map_err(|source| ListenerError::Bind { address, source })
    }

    /// Binds and serves until shutdown.
    pub async fn run(&self, shutdown: Shutdown) -> Result<(), ListenerError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serves an already bound socket until shutdown.
    ///
    /// Handlers already running are left to finish on their own.
    pub async fn serve(&self, listener: TcpListener, mut shutdown: Shutdown) -> Result<(), ListenerError> {
        let local = listener.local_addr()?;
        health().listener.set_healthy();
        info!(
            address = %local,
            max_connections = self.config.max_connections,
            max_message_size = self.config.max_message_size,
            rate_limit = self.config.rate_limit.enabled,
            "Listening for event connections"
        );

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.admit(stream, peer);
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        health().listener.set_unhealthy("stopped");
        info!(live = self.live_connections(), "Listener stopped accepting");
        Ok(())
    }

    /// Applies admission control. Refused sockets are closed by drop.
    pub fn admit(&self, stream: TcpStream, peer: SocketAddr) -> Admission {
        if !self.rate_limiter.allow(peer.ip(), Instant::now()) {
            metrics().connections_rate_limited.inc();
            warn!(peer = %peer, "Rate limit exceeded, refusing connection");
            return Admission::RateLimited;
        }

        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                metrics().connections_rejected.inc();
                warn!(
                    peer = %peer,
                    max_connections = self.config.max_connections,
                    "Connection limit reached, refusing connection"
                );
                return Admission::AtCapacity;
            }
        };

        let slot = ConnectionSlot::new(permit, self.live.clone(), peer);
        metrics().connections_accepted.inc();
        info!(peer = %peer, live = self.live_connections(), "Connection accepted");

        let handler = ConnectionHandler {
            log: self.log.clone(),
            rate_limiter: self.rate_limiter.clone(),
            max_message_size: self.config.max_message_size,
            read_timeout: self.config.read_timeout,
        };
        tokio::spawn(handler.handle(stream, slot));

        Admission::Admitted
    }
}
