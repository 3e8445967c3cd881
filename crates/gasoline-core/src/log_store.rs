//! Persistent console-log store
//!
//! An in-memory [`RingBuffer`] of [`LogEntry`] mirrored to a JSONL file.
//! Steady-state writes append the new batch; a rotation rewrites the whole
//! retained tail through a temporary file. File I/O never happens while the
//! store lock is held, and file errors are surfaced as one-shot warnings
//! rather than failing ingestion.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use crate::buffers::RingBuffer;
use crate::pagination::Sequenced;
use crate::telemetry::{LogEntry, LogLevel};

/// Maximum serialized size of one entry
pub const MAX_ENTRY_SIZE: usize = 1024 * 1024;

/// Longest JSONL line accepted when loading from disk
const MAX_LINE_SIZE: usize = 10 * 1024 * 1024;

/// Callback invoked with each inserted batch, outside the store lock
pub type EntriesCallback = Arc<dyn Fn(&[LogEntry]) + Send + Sync>;

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: LogEntry,
    /// `None` for entries loaded from disk
    added_at: Option<DateTime<Utc>>,
}

struct LogState {
    entries: RingBuffer<StoredEntry>,
    error_total_added: u64,
    telemetry_mode: String,
    on_entries: Option<EntriesCallback>,
}

#[derive(Default)]
struct Warnings {
    pending: Vec<String>,
    seen: HashSet<String>,
}

/// Console-log store with a JSONL mirror
pub struct LogStore {
    path: Option<PathBuf>,
    ttl: Option<Duration>,
    state: RwLock<LogState>,
    file: Mutex<()>,
    warnings: Mutex<Warnings>,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("path", &self.path)
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}

impl LogStore {
    /// In-memory store with no file mirror
    #[must_use]
    pub fn in_memory(capacity: usize) -> Self {
        Self::build(None, capacity, None)
    }

    /// Open the store at `path`, loading any existing entries.
    ///
    /// Malformed and oversized lines are skipped. Problems with the file
    /// are recorded as warnings; the store is always usable.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, capacity: usize, ttl: Option<Duration>) -> Self {
        let path = path.into();
        let store = Self::build(Some(path.clone()), capacity, ttl);

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "failed to create log directory");
                store.add_warning(format!("log_dir_create_failed: {}", e));
            }
        }

        match load_entries(&path) {
            Ok(loaded) => {
                debug!(path = %path.display(), count = loaded.len(), "loaded log entries");
                let mut state = store.state.write();
                state.entries.push_batch(loaded.into_iter().map(|entry| StoredEntry {
                    entry,
                    added_at: None,
                }));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load log file");
                store.add_warning(format!("log_load_failed: {}", e));
            }
        }
        store
    }

    fn build(path: Option<PathBuf>, capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            path,
            ttl: ttl.filter(|t| !t.is_zero()),
            state: RwLock::new(LogState {
                entries: RingBuffer::new(capacity),
                error_total_added: 0,
                telemetry_mode: "auto".to_string(),
                on_entries: None,
            }),
            file: Mutex::new(()),
            warnings: Mutex::new(Warnings::default()),
        }
    }

    /// Path of the JSONL mirror
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Install the on-entries callback
    pub fn on_entries(&self, callback: EntriesCallback) {
        self.state.write().on_entries = Some(callback);
    }

    /// Append a batch. Returns the number of entries added.
    pub fn add_entries(&self, batch: Vec<LogEntry>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let now = Utc::now();
        let count = batch.len();

        // The file lock is taken before the state lock is released so the
        // JSONL mirror receives batches in the same order as memory.
        let (to_write, rotated, callback, file_guard) = {
            let mut state = self.state.write();
            state.error_total_added += batch
                .iter()
                .filter(|e| e.level == LogLevel::Error)
                .count() as u64;
            let rotated = state.entries.push_batch(batch.iter().cloned().map(|entry| StoredEntry {
                entry,
                added_at: Some(now),
            }));
            let to_write: Vec<LogEntry> = if rotated {
                state.entries.as_slice().iter().map(|s| s.entry.clone()).collect()
            } else {
                batch.clone()
            };
            let file_guard = self.path.as_ref().map(|_| self.file.lock());
            (to_write, rotated, state.on_entries.clone(), file_guard)
        };

        if let Some(path) = &self.path {
            let result = if rotated {
                rewrite_file(path, &to_write).map_err(|e| format!("log_save_failed: {}", e))
            } else {
                append_file(path, &to_write).map_err(|e| format!("log_append_failed: {}", e))
            };
            if let Err(msg) = result {
                warn!(path = %path.display(), "{}", msg);
                self.add_warning(msg);
            }
        }
        drop(file_guard);

        if let Some(callback) = callback {
            callback(&batch);
        }
        count
    }

    /// Live entries within the TTL window, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.sequenced().into_iter().map(|s| s.item).collect()
    }

    /// Live entries within the TTL window paired with their sequence numbers
    #[must_use]
    pub fn sequenced(&self) -> Vec<Sequenced<LogEntry>> {
        let cutoff = self
            .ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() - ttl);

        let state = self.state.read();
        state
            .entries
            .sequenced(|s| s.entry.timestamp())
            .into_iter()
            .filter(|s| match (cutoff, s.item.added_at) {
                (Some(cutoff), Some(added)) => added >= cutoff,
                _ => true,
            })
            .map(|s| Sequenced {
                sequence: s.sequence,
                timestamp: s.timestamp,
                item: s.item.entry,
            })
            .collect()
    }

    /// Live entry count (ignores TTL)
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Whether the store holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries ever added (including those loaded at startup)
    #[must_use]
    pub fn total_added(&self) -> u64 {
        self.state.read().entries.total_added()
    }

    /// Error-level entries ever added since startup
    #[must_use]
    pub fn error_total_added(&self) -> u64 {
        self.state.read().error_total_added
    }

    /// Drop every entry and truncate the file
    pub fn clear_entries(&self) {
        let _guard = {
            let mut state = self.state.write();
            state.entries.clear();
            self.file.lock()
        };
        if let Some(path) = &self.path {
            if let Err(e) = fs::write(path, b"") {
                warn!(path = %path.display(), error = %e, "failed to truncate log file");
                self.add_warning(format!("log_clear_failed: {}", e));
            }
        }
    }

    /// Current telemetry mode (`auto`, `full`, `off`)
    #[must_use]
    pub fn telemetry_mode(&self) -> String {
        self.state.read().telemetry_mode.clone()
    }

    /// Set the telemetry mode
    pub fn set_telemetry_mode(&self, mode: impl Into<String>) {
        self.state.write().telemetry_mode = mode.into();
    }

    /// Queue a one-shot warning. Duplicate messages are dropped.
    pub fn add_warning(&self, message: impl Into<String>) {
        let message = message.into();
        if message.is_empty() {
            return;
        }
        let mut warnings = self.warnings.lock();
        if warnings.seen.insert(message.clone()) {
            warnings.pending.push(message);
        }
    }

    /// Drain queued warnings
    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut self.warnings.lock().pending)
    }
}

/// Validate raw entries. Returns the valid ones and the reject count.
///
/// An entry is rejected when its `level` is missing or unknown, when it does
/// not decode as a [`LogEntry`], or when it serializes to more than
/// [`MAX_ENTRY_SIZE`] bytes.
#[must_use]
pub fn validate_log_entries(raw: Vec<Value>) -> (Vec<LogEntry>, usize) {
    let mut valid = Vec::with_capacity(raw.len());
    let mut rejected = 0;
    for value in raw {
        match validate_log_entry(value) {
            Some(entry) => valid.push(entry),
            None => rejected += 1,
        }
    }
    (valid, rejected)
}

fn validate_log_entry(value: Value) -> Option<LogEntry> {
    if !value.is_object() {
        return None;
    }
    if serde_json::to_vec(&value).ok()?.len() > MAX_ENTRY_SIZE {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn load_entries(path: &Path) -> std::io::Result<Vec<LogEntry>> {
    read_entries(BufReader::new(File::open(path)?), MAX_LINE_SIZE)
}

/// Parse JSONL entries, buffering at most `max_line` bytes of any one line
fn read_entries<R: BufRead>(mut reader: R, max_line: usize) -> std::io::Result<Vec<LogEntry>> {
    let limit = u64::try_from(max_line).unwrap_or(u64::MAX).saturating_add(1);
    let mut entries = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = (&mut reader).take(limit).read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        } else if line.len() > max_line {
            skip_line(&mut reader)?;
            continue;
        }
        if line.is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_slice::<LogEntry>(&line) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Consume input up to and including the next newline
fn skip_line<R: BufRead>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let (used, found) = {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(());
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (buf.len(), false),
            }
        };
        reader.consume(used);
        if found {
            return Ok(());
        }
    }
}

fn write_lines<W: Write>(writer: &mut W, entries: &[LogEntry]) -> std::io::Result<()> {
    for entry in entries {
        let Ok(line) = serde_json::to_vec(entry) else {
            continue;
        };
        writer.write_all(&line)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

fn append_file(path: &Path, entries: &[LogEntry]) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    write_lines(&mut BufWriter::new(file), entries)
}

fn rewrite_file(path: &Path, entries: &[LogEntry]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = File::create(&tmp)
        .and_then(|file| write_lines(&mut BufWriter::new(file), entries))
        .and_then(|()| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests;
