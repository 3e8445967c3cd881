//! Daemon startup, run loop and teardown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use gasoline_core::state::append_lifecycle_event;
use gasoline_core::{
    enforce_startup_policy, AnnotationStore, Capture, DaemonFileLock, DaemonRegistration,
    LaunchOptions, LogStore, QueryBroker, ShutdownController, ShutdownReason, StartupDecision,
    StatePaths,
};
use gasoline_tools::{serve_stdio, McpHandler, ToolHandler};

use super::config::AppConfig;
use super::lifecycle::{ensure_port_free, SystemProbe};
use super::routes::{router, AppState};

/// How long to wait for a departing peer to release the OS lock
const FILE_LOCK_WAIT: Duration = Duration::from_secs(5);
/// Reason recorded on commands still pending at shutdown
const SHUTDOWN_EXPIRY_REASON: &str = "Server shutting down before the extension answered";
/// Reason recorded on commands dropped after the extension stopped polling
const DISCONNECT_EXPIRY_REASON: &str = "Extension disconnected before executing the command";

/// Startup flags that are not configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct ServeOptions {
    /// Refuse to displace a live peer
    pub parallel: bool,
    /// Also bridge JSON-RPC over stdin/stdout
    pub stdio: bool,
}

/// Build the tool stack from configuration
pub fn build_mcp_handler(config: &AppConfig, paths: &StatePaths, version: &str) -> McpHandler {
    let capture = Arc::new(Capture::new(config.buffers, version));
    let logs = Arc::new(LogStore::open(
        paths.log_file(),
        config.buffers.logs,
        config.log_ttl(),
    ));
    let broker = Arc::new(QueryBroker::new(config.broker_config()));
    let annotations = Arc::new(AnnotationStore::new());

    let tools = ToolHandler::new(capture, logs, broker, annotations).with_config(config.tool_config());
    McpHandler::with_rate_limit(Arc::new(tools), version, config.rate_limit())
}

/// Run the daemon until a shutdown is requested
pub async fn run(config: AppConfig, paths: StatePaths, options: ServeOptions) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    let port = config.server.port;
    let self_pid = std::process::id();
    info!(
        version = version,
        port = port,
        state_dir = %paths.root().display(),
        "Starting Gasoline"
    );

    paths
        .ensure_dirs()
        .context("Failed to create state directory")?;

    let probe = SystemProbe::new()?;
    let decision = enforce_startup_policy(
        &paths,
        port,
        LaunchOptions {
            parallel: options.parallel,
        },
        &probe,
        self_pid,
    )
    .await?;
    match &decision {
        StartupDecision::TookOver { pid, port } => {
            info!(previous_pid = pid, previous_port = port, "Took over previous daemon")
        }
        StartupDecision::StaleRemoved { pid } => info!(stale_pid = pid, "Removed stale lock"),
        other => debug!(decision = ?other, "Startup policy passed"),
    }

    let file_lock = DaemonFileLock::acquire(&paths, FILE_LOCK_WAIT)?;

    ensure_port_free(port).await?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let registration = DaemonRegistration::register(&paths, port, version, file_lock)?;
    append_lifecycle_event(
        &paths,
        "daemon_start",
        event_fields(json!({
            "pid": registration.pid(),
            "port": registration.port(),
            "version": version,
            "state_dir": paths.root().display().to_string(),
            "parallel": options.parallel,
            "stdio": options.stdio,
            "startup": format!("{:?}", decision),
        })),
    );

    let mcp = Arc::new(build_mcp_handler(&config, &paths, version));
    let shutdown = ShutdownController::with_drain_timeout(config.drain_timeout());

    tokio::spawn(gasoline_core::shutdown::forward_signals(shutdown.clone()));
    let cleanup = spawn_cleanup_task(&mcp, &shutdown, config.cleanup_interval());
    let bridge = options.stdio.then(|| spawn_stdio_bridge(&mcp, &shutdown));

    let app = router(AppState::new(mcp.clone(), shutdown.clone(), port));
    info!("HTTP server listening on http://{}", addr);

    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("HTTP server error");

    // A server error must still tear down cleanly
    if served.is_err() {
        shutdown.request(ShutdownReason::Terminate);
    }
    shutdown.drain().await;

    let tools = mcp.tools();
    tools.broker().expire_all_pending(SHUTDOWN_EXPIRY_REASON);
    if let Err(e) = cleanup.await {
        warn!(error = %e, "Cleanup task ended abnormally");
    }
    if let Some(bridge) = bridge {
        bridge.abort();
    }

    let reason = shutdown.reason().map_or("unknown", |r| r.as_str());
    append_lifecycle_event(
        &paths,
        "daemon_shutdown",
        event_fields(json!({
            "pid": self_pid,
            "port": port,
            "reason": reason,
        })),
    );
    drop(registration);

    info!(reason = reason, "Gasoline shutdown complete");
    served
}

/// Periodic GC of expired queries, command results and annotation sessions
fn spawn_cleanup_task(
    mcp: &Arc<McpHandler>,
    shutdown: &Arc<ShutdownController>,
    interval: Duration,
) -> JoinHandle<()> {
    let tools = Arc::clone(mcp.tools());
    let token = shutdown.token();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    expire_if_disconnected(&tools);
                    tools.broker().cleanup_expired();
                    tools.annotations().evict_expired();
                    debug!(
                        pending = tools.broker().queue_depth(),
                        results = tools.broker().stored_results(),
                        "Background cleanup"
                    );
                }
            }
        }
        debug!("Cleanup task stopped");
    })
}

/// Drop queued work once an extension that was polling has gone quiet
fn expire_if_disconnected(tools: &ToolHandler) {
    let capture = tools.capture();
    let broker = tools.broker();
    if capture.last_poll_at().is_none() || capture.is_extension_connected(Utc::now()) {
        return;
    }
    if broker.queue_depth() == 0 && broker.pending_commands().is_empty() {
        return;
    }
    warn!(
        pending = broker.queue_depth(),
        last_poll = ?capture.last_poll_at(),
        "Extension stopped polling, expiring pending commands"
    );
    broker.expire_all_pending(DISCONNECT_EXPIRY_REASON);
}

/// Serve JSON-RPC on stdio alongside HTTP; stdin closing stops the daemon
fn spawn_stdio_bridge(mcp: &Arc<McpHandler>, shutdown: &Arc<ShutdownController>) -> JoinHandle<()> {
    let mcp = Arc::clone(mcp);
    let shutdown = Arc::clone(shutdown);
    tokio::spawn(async move {
        if let Err(e) = serve_stdio(mcp).await {
            error!(error = %e, "stdio bridge failed");
        }
        shutdown.request(ShutdownReason::StdinClosed);
    })
}

fn event_fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
