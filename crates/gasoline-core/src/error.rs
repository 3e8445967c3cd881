//! Error types for gasoline-core
//!
//! This module provides error types and user-friendly error formatting
//! for the capture store, query broker and daemon lifecycle.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem error (state dir, lock file, log file)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Cursor token could not be parsed
    #[error("invalid cursor format: {0}")]
    InvalidCursor(String),

    /// Cursor points at entries that were evicted from the ring buffer
    #[error(
        "cursor expired (buffer overflow). Requested sequence {requested}, oldest available is {oldest}. Lost entries: {requested} to {}",
        .oldest - 1
    )]
    CursorExpired {
        /// Sequence carried by the cursor
        requested: i64,
        /// Oldest live sequence in the buffer
        oldest: i64,
    },

    /// No result arrived for a pending query before its deadline
    #[error("timeout waiting for result {0}")]
    QueryTimeout(String),

    /// Lookup target not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller supplied an invalid value
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Another live daemon owns the state directory
    #[error("daemon conflict: {0}")]
    DaemonConflict(String),

    /// Lock record and PID file disagree about which process owns the port
    #[error(
        "daemon ownership mismatch on port {port}: lock names pid {lock_pid}, pid file names pid {pid_file_pid}"
    )]
    OwnershipMismatch {
        /// Port recorded in the lock file
        port: u16,
        /// PID recorded in the lock file
        lock_pid: u32,
        /// PID recorded in the per-port PID file
        pid_file_pid: u32,
    },

    /// Previous daemon did not release its port
    #[error("takeover failed: port {0} still in use")]
    TakeoverFailed(u16),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for user-friendly error messages
///
/// Lifecycle failures are printed by the CLI with a short corrective hint.
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::Io(e) => format!("Filesystem error: {}", e),
            Error::Json(e) => format!("Malformed JSON: {}", e),
            Error::InvalidCursor(msg) => format!("Invalid pagination cursor: {}", msg),
            Error::CursorExpired { .. } => self.to_string(),
            Error::QueryTimeout(id) => format!("The browser extension did not answer query {}", id),
            Error::NotFound(what) => format!("Not found: {}", what),
            Error::InvalidInput(msg) => format!("Invalid input: {}", msg),
            Error::DaemonConflict(msg) => format!("Another gasoline daemon is running: {}", msg),
            Error::OwnershipMismatch { .. } => self.to_string(),
            Error::TakeoverFailed(port) => {
                format!("Could not take over port {} from the previous daemon", port)
            }
            Error::Internal(msg) => format!("Internal error: {}", msg),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::Io(_) => Some(
                "Check permissions on the state directory or set GASOLINE_STATE_DIR.".to_string(),
            ),
            Error::CursorExpired { .. } => Some(
                "Pass restart_on_eviction=true or drop the cursor to read the newest entries."
                    .to_string(),
            ),
            Error::QueryTimeout(_) => {
                Some("Make sure the extension is connected and the tab is responsive.".to_string())
            }
            Error::DaemonConflict(_) => Some(
                "Stop the running daemon with `gasoline --stop <port>` or use an isolated --state-dir."
                    .to_string(),
            ),
            Error::OwnershipMismatch { port, .. } => Some(format!(
                "Inspect the process on port {} and remove stale files under run/ if it is not gasoline.",
                port
            )),
            Error::TakeoverFailed(port) => Some(format!(
                "Run `gasoline --stop {}` or `gasoline --force`, then start again.",
                port
            )),
            _ => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = error.user_message();
    if let Some(suggestion) = error.suggestion() {
        output.push('\n');
        output.push_str(&suggestion);
    }
    output
}

#[cfg(test)]
mod tests;
