//! Process-level daemon control: the real [`ProcessProbe`], `--stop`,
//! `--force` and the pre-bind port check

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use gasoline_core::lifecycle::{listening_pids, named_pids, process_alive, signal_process};
use gasoline_core::{force_cleanup, stop_daemon, ProcessProbe, StatePaths, StopOutcome};

/// Timeout of one HTTP call to a peer daemon
const PEER_HTTP_TIMEOUT: Duration = Duration::from_secs(2);
/// Port polling interval while waiting for release
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Probe backed by `kill`/`lsof`/`pgrep` and loopback HTTP
pub struct SystemProbe {
    client: reqwest::Client,
}

impl SystemProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PEER_HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        process_alive(pid)
    }

    fn terminate(&self, pid: u32, force: bool) {
        signal_process(pid, force);
    }

    fn pids_on_port(&self, port: u16) -> Vec<u32> {
        listening_pids(port)
    }

    fn daemon_pids(&self) -> Vec<u32> {
        match std::env::current_exe() {
            Ok(exe) => named_pids(&exe),
            Err(e) => {
                warn!(error = %e, "Cannot resolve own executable name");
                Vec::new()
            }
        }
    }

    async fn request_shutdown(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}/shutdown", port);
        match self.client.post(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(port = port, error = %e, "Shutdown request failed");
                false
            }
        }
    }

    async fn wait_for_port_release(&self, port: u16, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !port_accepting(port).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(PORT_POLL_INTERVAL).await;
        }
    }
}

async fn port_accepting(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    matches!(
        tokio::time::timeout(PORT_POLL_INTERVAL, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// What is listening on a port before we bind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortOccupant {
    /// Nothing accepts connections
    Free,
    /// A gasoline daemon answered `/health`
    Gasoline {
        /// Its pid, when reported
        pid: Option<u32>,
    },
    /// Something else holds the port
    Foreign,
}

/// Identify whatever holds `port`
pub async fn probe_port(client: &reqwest::Client, port: u16) -> PortOccupant {
    if !port_accepting(port).await {
        return PortOccupant::Free;
    }
    let url = format!("http://127.0.0.1:{}/health", port);
    let body: Option<Value> = match client.get(&url).send().await {
        Ok(resp) => resp.json().await.ok(),
        Err(_) => None,
    };
    classify_health(body.as_ref())
}

fn classify_health(body: Option<&Value>) -> PortOccupant {
    let Some(body) = body else {
        return PortOccupant::Foreign;
    };
    let is_gasoline = ["service-name", "name"]
        .iter()
        .any(|k| body.get(*k).and_then(Value::as_str) == Some("gasoline"));
    if !is_gasoline {
        return PortOccupant::Foreign;
    }
    let pid = body
        .get("pid")
        .and_then(Value::as_u64)
        .and_then(|p| u32::try_from(p).ok());
    PortOccupant::Gasoline { pid }
}

/// Fail unless `port` is free
pub async fn ensure_port_free(port: u16) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(PEER_HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    match probe_port(&client, port).await {
        PortOccupant::Free => Ok(()),
        PortOccupant::Gasoline { pid } => bail!(
            "port {} is already served by another gasoline daemon (pid {}) using a different state dir; \
             stop it with `gasoline --stop {}`",
            port,
            pid.map_or_else(|| "unknown".to_string(), |p| p.to_string()),
            port
        ),
        PortOccupant::Foreign => bail!(
            "port {} is in use by a non-gasoline service; choose another --port",
            port
        ),
    }
}

/// `--stop <port>`
pub async fn run_stop(paths: &StatePaths, port: u16) -> Result<()> {
    let probe = SystemProbe::new()?;
    let outcome = stop_daemon(paths, port, &probe).await;
    info!(port = port, outcome = ?outcome, "Stop finished");

    match outcome {
        StopOutcome::PidFile { killed: false } => {
            println!("Stopped gasoline on port {}", port);
        }
        StopOutcome::PidFile { killed: true } => {
            println!("Killed gasoline on port {} (did not exit on SIGTERM)", port);
        }
        StopOutcome::Http => println!("Gasoline on port {} is shutting down", port),
        StopOutcome::ProcessLookup {
            signalled,
            port_released: true,
        } => println!("Stopped {} process(es) on port {}", signalled, port),
        StopOutcome::ProcessLookup {
            signalled,
            port_released: false,
        } => bail!(
            "signalled {} process(es) but port {} is still in use",
            signalled,
            port
        ),
        StopOutcome::NotRunning => println!("No gasoline daemon running on port {}", port),
    }
    Ok(())
}

/// `--force`
pub async fn run_force(paths: &StatePaths) -> Result<()> {
    let probe = SystemProbe::new()?;
    let summary = force_cleanup(paths, &probe, std::process::id()).await;
    info!(
        killed = summary.killed,
        failed = summary.failed,
        pid_files_removed = summary.pid_files_removed,
        "Force cleanup finished"
    );
    println!(
        "Force cleanup: {} stopped, {} failed, {} PID file(s) removed",
        summary.killed, summary.failed, summary.pid_files_removed
    );
    if summary.failed > 0 {
        bail!("{} gasoline process(es) could not be killed", summary.failed);
    }
    Ok(())
}
