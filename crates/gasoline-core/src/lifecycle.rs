//! Single-daemon arbitration: startup takeover, stop and force cleanup
//!
//! At most one live daemon owns a state directory. A new daemon reads the
//! lock record and either proceeds (no record, its own pid, or a dead pid),
//! refuses (`--parallel` with a live peer, or a PID file naming a different
//! process), or takes over: ask the peer to shut down over HTTP, then
//! escalate to SIGTERM and SIGKILL, waiting for the peer's port each time.
//!
//! Everything that touches other processes goes through [`ProcessProbe`].

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::state::{
    append_lifecycle_event, read_lock_record, read_pid_file, remove_lock_record,
    remove_lock_record_if_owned, remove_pid_file, remove_pid_file_if_owned, write_lock_record,
    write_pid_file, DaemonFileLock, DaemonLockRecord, StatePaths,
};

/// How long each takeover step waits for the peer's port
pub const PORT_RELEASE_WAIT: Duration = Duration::from_secs(2);
/// Liveness polling interval while stopping a process
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Access to other processes and ports
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    /// Whether `pid` names a live process
    fn is_alive(&self, pid: u32) -> bool;

    /// Send SIGTERM (`force = false`) or SIGKILL (`force = true`)
    fn terminate(&self, pid: u32, force: bool);

    /// Pids listening on `port`
    fn pids_on_port(&self, port: u16) -> Vec<u32>;

    /// Pids of processes named like the daemon binary
    fn daemon_pids(&self) -> Vec<u32>;

    /// `POST /shutdown` to a daemon on `port`; true on 200
    async fn request_shutdown(&self, port: u16) -> bool;

    /// Wait until nothing accepts connections on `port`; false on timeout
    async fn wait_for_port_release(&self, port: u16, timeout: Duration) -> bool;
}

/// Startup options relevant to arbitration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Refuse to displace a live peer
    pub parallel: bool,
}

/// What startup arbitration did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupDecision {
    /// No lock record
    Fresh,
    /// The record already names this process
    AlreadyOwned,
    /// The record named a dead process and was removed
    StaleRemoved {
        /// Dead pid from the record
        pid: u32,
    },
    /// A live peer was shut down
    TookOver {
        /// Peer pid
        pid: u32,
        /// Peer port
        port: u16,
    },
}

/// Decide whether this process may start, taking over a live peer when allowed.
pub async fn enforce_startup_policy(
    paths: &StatePaths,
    requested_port: u16,
    options: LaunchOptions,
    probe: &dyn ProcessProbe,
    self_pid: u32,
) -> Result<StartupDecision> {
    let Some(record) = read_lock_record(paths)? else {
        return Ok(StartupDecision::Fresh);
    };

    if record.pid == self_pid {
        return Ok(StartupDecision::AlreadyOwned);
    }

    if !probe.is_alive(record.pid) {
        info!(pid = record.pid, port = record.port, "Removing stale daemon lock");
        remove_lock_record(paths)?;
        remove_pid_file_if_owned(paths, record.port, record.pid)?;
        return Ok(StartupDecision::StaleRemoved { pid: record.pid });
    }

    if options.parallel {
        return Err(Error::DaemonConflict(format!(
            "daemon pid {} is already running on port {} for state dir {}; \
             --parallel requires an isolated --state-dir",
            record.pid,
            record.port,
            paths.root().display()
        )));
    }

    if let Some(pid_file_pid) = read_pid_file(paths, record.port) {
        if pid_file_pid != record.pid {
            return Err(Error::OwnershipMismatch {
                port: record.port,
                lock_pid: record.pid,
                pid_file_pid,
            });
        }
    }

    take_over(paths, &record, requested_port, probe, self_pid).await?;
    Ok(StartupDecision::TookOver {
        pid: record.pid,
        port: record.port,
    })
}

async fn take_over(
    paths: &StatePaths,
    record: &DaemonLockRecord,
    requested_port: u16,
    probe: &dyn ProcessProbe,
    self_pid: u32,
) -> Result<()> {
    info!(
        existing_pid = record.pid,
        existing_port = record.port,
        requested_port = requested_port,
        "Taking over running daemon"
    );

    if !probe.request_shutdown(record.port).await {
        warn!(port = record.port, "Peer did not acknowledge /shutdown");
    }

    let mut released = probe
        .wait_for_port_release(record.port, PORT_RELEASE_WAIT)
        .await;
    for force in [false, true] {
        if released {
            break;
        }
        warn!(pid = record.pid, force = force, "Escalating takeover");
        probe.terminate(record.pid, force);
        released = probe
            .wait_for_port_release(record.port, PORT_RELEASE_WAIT)
            .await;
    }
    if !released {
        return Err(Error::TakeoverFailed(record.port));
    }

    remove_lock_record(paths)?;
    remove_pid_file(paths, record.port)?;

    append_lifecycle_event(
        paths,
        "daemon_takeover",
        fields(json!({
            "existing_pid": record.pid,
            "existing_port": record.port,
            "new_pid": self_pid,
            "takeover": true,
            "state_dir": paths.root().display().to_string(),
        })),
    );
    Ok(())
}

/// A running daemon's claim on its state directory.
///
/// Holds the OS lock and removes the lock record and PID file on drop if
/// they still name this process.
#[derive(Debug)]
pub struct DaemonRegistration {
    paths: StatePaths,
    port: u16,
    pid: u32,
    _file_lock: DaemonFileLock,
}

impl DaemonRegistration {
    /// Write the lock record and PID file for this process
    pub fn register(
        paths: &StatePaths,
        port: u16,
        version: &str,
        file_lock: DaemonFileLock,
    ) -> Result<Self> {
        let record = DaemonLockRecord::current(port, paths, version);
        write_lock_record(paths, &record)?;
        write_pid_file(paths, port, record.pid)?;
        Ok(Self {
            paths: paths.clone(),
            port,
            pid: record.pid,
            _file_lock: file_lock,
        })
    }

    /// Bound port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Owning pid
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for DaemonRegistration {
    fn drop(&mut self) {
        if let Err(e) = remove_lock_record_if_owned(&self.paths, self.pid) {
            warn!(error = %e, "Failed to remove daemon lock record");
        }
        if let Err(e) = remove_pid_file_if_owned(&self.paths, self.port, self.pid) {
            warn!(error = %e, "Failed to remove PID file");
        }
    }
}

/// How `--stop` found and stopped the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Signalled the pid from the PID file
    PidFile {
        /// Whether SIGKILL was needed
        killed: bool,
    },
    /// The daemon acknowledged `POST /shutdown`
    Http,
    /// Signalled processes found listening on the port
    ProcessLookup {
        /// Processes signalled
        signalled: usize,
        /// Whether the port is free afterwards
        port_released: bool,
    },
    /// Nothing to stop
    NotRunning,
}

/// Stop the daemon on `port`: PID file, then HTTP, then process lookup.
pub async fn stop_daemon(paths: &StatePaths, port: u16, probe: &dyn ProcessProbe) -> StopOutcome {
    append_lifecycle_event(
        paths,
        "stop_command_invoked",
        fields(json!({
            "port": port,
            "source": "gasoline --stop",
            "caller_pid": std::process::id(),
        })),
    );

    if let Some(pid) = read_pid_file(paths, port).filter(|pid| probe.is_alive(*pid)) {
        info!(pid = pid, port = port, "Stopping daemon via PID file");
        probe.terminate(pid, false);
        let exited = wait_for_exit(probe, pid, PORT_RELEASE_WAIT).await;
        if !exited {
            warn!(pid = pid, "Daemon ignored SIGTERM, sending SIGKILL");
            probe.terminate(pid, true);
        }
        discard(remove_pid_file(paths, port));
        return StopOutcome::PidFile { killed: !exited };
    }

    if probe.request_shutdown(port).await {
        discard(remove_pid_file(paths, port));
        return StopOutcome::Http;
    }

    let pids = probe.pids_on_port(port);
    if pids.is_empty() {
        discard(remove_pid_file(paths, port));
        return StopOutcome::NotRunning;
    }
    for pid in &pids {
        probe.terminate(*pid, false);
    }
    let port_released = probe
        .wait_for_port_release(port, Duration::from_millis(500))
        .await;
    if port_released {
        discard(remove_pid_file(paths, port));
    }
    StopOutcome::ProcessLookup {
        signalled: pids.len(),
        port_released,
    }
}

/// Result of `--force`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForceCleanupSummary {
    /// Processes that exited
    pub killed: usize,
    /// Processes still alive after SIGKILL
    pub failed: usize,
    /// PID files removed
    pub pid_files_removed: usize,
}

/// Kill every daemon process except this one and wipe run-state files.
pub async fn force_cleanup(
    paths: &StatePaths,
    probe: &dyn ProcessProbe,
    self_pid: u32,
) -> ForceCleanupSummary {
    append_lifecycle_event(
        paths,
        "force_cleanup_invoked",
        fields(json!({
            "source": "gasoline --force",
            "caller_pid": self_pid,
        })),
    );

    let ports = paths.pid_file_ports();
    let mut pids: Vec<u32> = ports
        .iter()
        .filter_map(|port| read_pid_file(paths, *port))
        .chain(probe.daemon_pids())
        .filter(|pid| *pid != self_pid)
        .collect();
    pids.sort_unstable();
    pids.dedup();

    let mut summary = ForceCleanupSummary::default();
    for pid in pids {
        if !probe.is_alive(pid) {
            continue;
        }
        probe.terminate(pid, false);
        if !wait_for_exit(probe, pid, STOP_POLL_INTERVAL).await {
            probe.terminate(pid, true);
        }
        if wait_for_exit(probe, pid, STOP_POLL_INTERVAL).await {
            summary.killed += 1;
        } else {
            summary.failed += 1;
        }
    }

    for port in ports {
        if remove_pid_file(paths, port).is_ok() {
            summary.pid_files_removed += 1;
        }
    }
    discard(remove_lock_record(paths));
    summary
}

async fn wait_for_exit(probe: &dyn ProcessProbe, pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !probe.is_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn discard(result: Result<()>) {
    if let Err(e) = result {
        warn!(error = %e, "Failed to remove run-state file");
    }
}

/// Whether `pid` is alive, via `kill -0` (Unix) or `tasklist` (Windows)
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    if cfg!(windows) {
        let filter = format!("PID eq {}", pid);
        return Command::new("tasklist")
            .args(["/FI", &filter, "/NH"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
            .unwrap_or(false);
    }
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Signal `pid` with SIGTERM or SIGKILL (`taskkill` on Windows)
pub fn signal_process(pid: u32, force: bool) {
    let pid_arg = pid.to_string();
    let status = if cfg!(windows) {
        let mut cmd = Command::new("taskkill");
        cmd.args(["/PID", &pid_arg]);
        if force {
            cmd.arg("/F");
        }
        cmd.output()
    } else {
        let signal = if force { "-KILL" } else { "-TERM" };
        Command::new("kill").args([signal, &pid_arg]).output()
    };
    if let Err(e) = status {
        warn!(pid = pid, force = force, error = %e, "Failed to signal process");
    }
}

/// Pids listening on a TCP port (`lsof`; empty where unavailable)
#[must_use]
pub fn listening_pids(port: u16) -> Vec<u32> {
    if cfg!(windows) {
        return Vec::new();
    }
    let target = format!("tcp:{}", port);
    Command::new("lsof")
        .args(["-t", "-i", &target, "-sTCP:LISTEN"])
        .output()
        .map(|out| parse_pids(&String::from_utf8_lossy(&out.stdout)))
        .unwrap_or_default()
}

/// Pids of processes whose executable is named like `binary`
#[must_use]
pub fn named_pids(binary: &Path) -> Vec<u32> {
    let Some(name) = binary.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Vec::new();
    };
    if cfg!(windows) {
        let filter = format!("IMAGENAME eq {}", name);
        return Command::new("tasklist")
            .args(["/FI", &filter, "/FO", "CSV", "/NH"])
            .output()
            .map(|out| {
                String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .filter_map(|line| line.split(',').nth(1))
                    .filter_map(|pid| pid.trim_matches('"').parse().ok())
                    .collect()
            })
            .unwrap_or_default();
    }
    Command::new("pgrep")
        .args(["-x", &name])
        .output()
        .map(|out| parse_pids(&String::from_utf8_lossy(&out.stdout)))
        .unwrap_or_default()
}

fn parse_pids(output: &str) -> Vec<u32> {
    output
        .split_whitespace()
        .filter_map(|s| s.parse().ok())
        .filter(|pid| *pid > 0)
        .collect()
}
