//! Coordinated daemon shutdown
//!
//! A stop can come from an OS signal, `POST /shutdown` (another daemon
//! taking over, or `--stop`), or stdin closing in stdio mode. Every
//! trigger goes through [`ShutdownController::request`], which records the
//! first reason and cancels the shared token the HTTP server and background
//! sweepers wait on. In-flight tool calls hold a [`RequestGuard`] so the
//! drain step can wait for them.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default drain timeout
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the daemon is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// `POST /shutdown`
    HttpRequest,
    /// stdin closed in stdio mode
    StdinClosed,
}

impl ShutdownReason {
    /// Lifecycle log label
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupt => "sigint",
            Self::Terminate => "sigterm",
            Self::HttpRequest => "http_shutdown",
            Self::StdinClosed => "stdin_closed",
        }
    }
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shutdown coordinator shared by the server, sweepers and stdio bridge
#[derive(Debug)]
pub struct ShutdownController {
    cancel_token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
    draining: AtomicBool,
    active_requests: AtomicU32,
    drain_timeout: Duration,
}

impl ShutdownController {
    /// Controller with the default drain timeout
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_drain_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Controller with a custom drain timeout
    #[must_use]
    pub fn with_drain_timeout(drain_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            reason: Mutex::new(None),
            draining: AtomicBool::new(false),
            active_requests: AtomicU32::new(0),
            drain_timeout,
        })
    }

    /// Child token for a component
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Resolves once a stop has been requested
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await;
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// The first recorded stop reason
    #[must_use]
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.lock()
    }

    /// Request a stop. Only the first reason is kept.
    pub fn request(&self, reason: ShutdownReason) {
        {
            let mut current = self.reason.lock();
            if current.is_some() {
                debug!(reason = %reason, "Shutdown already requested");
                return;
            }
            *current = Some(reason);
        }
        info!(reason = %reason, "Shutdown requested");
        self.cancel_token.cancel();
    }

    /// Track an in-flight request
    pub fn register_request(&self) -> RequestGuard<'_> {
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        RequestGuard { controller: self }
    }

    /// How long [`Self::drain`] waits for in-flight requests
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// In-flight request count
    #[must_use]
    pub fn active_requests(&self) -> u32 {
        self.active_requests.load(Ordering::SeqCst)
    }

    /// Wait for in-flight requests to finish, bounded by the drain timeout.
    /// Runs once; later calls return immediately.
    pub async fn drain(&self) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let started = std::time::Instant::now();
        loop {
            let active = self.active_requests();
            if active == 0 {
                break;
            }
            if started.elapsed() >= self.drain_timeout {
                warn!(
                    active_requests = active,
                    timeout_ms = self.drain_timeout.as_millis() as u64,
                    "Drain timeout exceeded"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!("Shutdown drain complete");
    }
}

/// Decrements the in-flight count on drop
#[derive(Debug)]
pub struct RequestGuard<'a> {
    controller: &'a ShutdownController,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.controller.active_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wait for Ctrl+C or SIGTERM and report which one arrived
pub async fn wait_for_shutdown_signal() -> ShutdownReason {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => ShutdownReason::Interrupt,
        _ = terminate => ShutdownReason::Terminate,
    }
}

/// Forward OS signals into the controller
pub async fn forward_signals(controller: Arc<ShutdownController>) {
    tokio::select! {
        reason = wait_for_shutdown_signal() => controller.request(reason),
        _ = controller.cancelled() => {}
    }
}

#[cfg(test)]
mod tests;
