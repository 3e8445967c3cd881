//! State directory layout, daemon lock record and PID files
//!
//! ```text
//! <state>/
//!   run/daemon.lock.json     lock record {pid, port, state_dir, version, updated_at}
//!   run/daemon.lock          OS advisory lock held for the daemon's lifetime
//!   run/gasoline-<port>.pid  per-port PID file
//!   logs/gasoline.jsonl      console-log mirror
//!   logs/lifecycle.jsonl     lifecycle events
//! ```
//!
//! The JSON record is cooperative: a record whose pid is dead is stale.
//! The fs2 lock closes the read-check-write race between two daemons
//! starting at the same time.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Environment variable overriding the state root
pub const STATE_DIR_ENV: &str = "GASOLINE_STATE_DIR";
/// XDG state home
pub const XDG_STATE_HOME_ENV: &str = "XDG_STATE_HOME";
/// Directory name under `XDG_STATE_HOME`
const APP_NAME: &str = "gasoline";
/// Directory name under the home directory
const HOME_DIR_NAME: &str = ".gasoline";

/// Resolve the state root from the process environment.
///
/// Precedence: explicit override (CLI) → `GASOLINE_STATE_DIR` →
/// `XDG_STATE_HOME/gasoline` → `~/.gasoline`.
pub fn resolve_state_dir(cli_override: Option<&Path>) -> Result<PathBuf> {
    let home = dirs::home_dir().or_else(|| {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    });
    resolve_state_dir_with(
        cli_override.map(|p| p.to_string_lossy().into_owned()),
        std::env::var(STATE_DIR_ENV).ok(),
        std::env::var(XDG_STATE_HOME_ENV).ok(),
        home,
    )
}

/// Resolve the state root from explicit inputs. Blank values are ignored and
/// relative paths are made absolute against the current directory.
pub fn resolve_state_dir_with(
    cli_override: Option<String>,
    env_override: Option<String>,
    xdg_state_home: Option<String>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    if let Some(dir) = non_blank(cli_override).or_else(|| non_blank(env_override)) {
        return absolutize(PathBuf::from(dir.trim()));
    }
    if let Some(xdg) = non_blank(xdg_state_home) {
        return absolutize(PathBuf::from(xdg.trim()).join(APP_NAME));
    }
    home.map(|h| h.join(HOME_DIR_NAME)).ok_or_else(|| {
        Error::InvalidInput(format!(
            "cannot determine home directory; set {}",
            STATE_DIR_ENV
        ))
    })
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    let path = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()?.join(path)
    };
    // Drop trailing separators and `.` components.
    Ok(path.components().collect())
}

/// Paths inside a state root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    /// Layout rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// State root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `run/`
    #[must_use]
    pub fn run_dir(&self) -> PathBuf {
        self.root.join("run")
    }

    /// `logs/`
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// `run/daemon.lock.json`
    #[must_use]
    pub fn lock_record(&self) -> PathBuf {
        self.run_dir().join("daemon.lock.json")
    }

    /// `run/daemon.lock`
    #[must_use]
    pub fn os_lock(&self) -> PathBuf {
        self.run_dir().join("daemon.lock")
    }

    /// `run/gasoline-<port>.pid`
    #[must_use]
    pub fn pid_file(&self, port: u16) -> PathBuf {
        self.run_dir().join(format!("gasoline-{}.pid", port))
    }

    /// `logs/gasoline.jsonl`
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("gasoline.jsonl")
    }

    /// `logs/lifecycle.jsonl`
    #[must_use]
    pub fn lifecycle_log(&self) -> PathBuf {
        self.logs_dir().join("lifecycle.jsonl")
    }

    /// Create `run/` and `logs/`
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.run_dir())?;
        fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    /// Ports with a PID file in `run/`, sorted
    #[must_use]
    pub fn pid_file_ports(&self) -> Vec<u16> {
        let Ok(entries) = fs::read_dir(self.run_dir()) else {
            return Vec::new();
        };
        let mut ports: Vec<u16> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_prefix("gasoline-")?
                    .strip_suffix(".pid")?
                    .parse()
                    .ok()
            })
            .collect();
        ports.sort_unstable();
        ports
    }
}

/// Single-daemon lock record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonLockRecord {
    /// Owning process
    pub pid: u32,
    /// Bound port
    pub port: u16,
    /// State root the daemon was started with
    pub state_dir: String,
    /// Daemon version
    #[serde(default)]
    pub version: String,
    /// Last write time
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl DaemonLockRecord {
    /// Record for this process
    #[must_use]
    pub fn current(port: u16, paths: &StatePaths, version: &str) -> Self {
        Self {
            pid: std::process::id(),
            port,
            state_dir: paths.root().display().to_string(),
            version: version.to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// Read the lock record. A missing file is `Ok(None)`; an unparseable one is
/// treated as stale and also reads as `Ok(None)`.
pub fn read_lock_record(paths: &StatePaths) -> Result<Option<DaemonLockRecord>> {
    let path = paths.lock_record();
    let data = match fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&data) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring malformed daemon lock record");
            Ok(None)
        }
    }
}

/// Write the lock record atomically (tmp file, then rename)
pub fn write_lock_record(paths: &StatePaths, record: &DaemonLockRecord) -> Result<()> {
    fs::create_dir_all(paths.run_dir())?;
    let path = paths.lock_record();
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(record)?;
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    debug!(pid = record.pid, port = record.port, "Wrote daemon lock record");
    Ok(())
}

/// Remove the lock record; a missing file is not an error
pub fn remove_lock_record(paths: &StatePaths) -> Result<()> {
    remove_if_exists(&paths.lock_record())
}

/// Remove the lock record only if it still names `pid`
pub fn remove_lock_record_if_owned(paths: &StatePaths, pid: u32) -> Result<bool> {
    match read_lock_record(paths)? {
        Some(record) if record.pid == pid => {
            remove_lock_record(paths)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Write the per-port PID file
pub fn write_pid_file(paths: &StatePaths, port: u16, pid: u32) -> Result<()> {
    fs::create_dir_all(paths.run_dir())?;
    fs::write(paths.pid_file(port), pid.to_string())?;
    Ok(())
}

/// Read the per-port PID file; missing or garbage reads as `None`
#[must_use]
pub fn read_pid_file(paths: &StatePaths, port: u16) -> Option<u32> {
    fs::read_to_string(paths.pid_file(port))
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .filter(|pid| *pid > 0)
}

/// Remove the per-port PID file; a missing file is not an error
pub fn remove_pid_file(paths: &StatePaths, port: u16) -> Result<()> {
    remove_if_exists(&paths.pid_file(port))
}

/// Remove the PID file only if it still names `pid`
pub fn remove_pid_file_if_owned(paths: &StatePaths, port: u16, pid: u32) -> Result<bool> {
    if read_pid_file(paths, port) == Some(pid) {
        remove_pid_file(paths, port)?;
        return Ok(true);
    }
    Ok(false)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Exclusive OS lock on `run/daemon.lock`, released on drop
#[derive(Debug)]
pub struct DaemonFileLock {
    file: File,
    path: PathBuf,
}

impl DaemonFileLock {
    /// Try to take the lock, retrying until `wait` elapses. A previous daemon
    /// that is exiting releases its lock when the process ends.
    pub fn acquire(paths: &StatePaths, wait: Duration) -> Result<Self> {
        fs::create_dir_all(paths.run_dir())?;
        let path = paths.os_lock();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let deadline = Instant::now() + wait;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(lock_path = %path.display(), "Acquired daemon file lock");
                    return Ok(Self { file, path });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(Error::DaemonConflict(format!(
                            "{} is locked by another process",
                            path.display()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Lock file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DaemonFileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock_path = %self.path.display(), error = %e, "Failed to release daemon file lock");
        }
    }
}

/// Append `{type:"lifecycle", event, ...fields, timestamp}` to `logs/lifecycle.jsonl`.
/// Failures are logged, never returned.
pub fn append_lifecycle_event(paths: &StatePaths, event: &str, fields: Map<String, Value>) {
    let mut entry = Map::new();
    entry.insert("type".into(), Value::from("lifecycle"));
    entry.insert("event".into(), Value::from(event));
    entry.extend(fields);
    entry.insert("timestamp".into(), Value::from(crate::telemetry::now_rfc3339()));

    let result = (|| -> io::Result<()> {
        fs::create_dir_all(paths.logs_dir())?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(paths.lifecycle_log())?;
        let mut line = serde_json::to_vec(&Value::Object(entry))?;
        line.push(b'\n');
        file.write_all(&line)
    })();

    if let Err(e) = result {
        warn!(event = event, error = %e, "Failed to append lifecycle event");
    }
}
