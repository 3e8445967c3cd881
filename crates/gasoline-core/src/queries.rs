//! Pending-query broker
//!
//! Commands bound for the browser are parked here until the extension
//! long-polls `/pending-queries`, executes them and posts a result back.
//! A synchronous caller blocks in [`QueryBroker::wait_for_result`] on a
//! condition variable with a deadline; an asynchronous caller gets a
//! correlation id and later reads the [`CommandResult`] table.
//!
//! Lock order: `queue` is never held while `commands` is acquired.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Pending list cap; the oldest query is dropped on overflow
pub const MAX_PENDING: usize = 5;
/// How long unread results and finished commands are kept
pub const QUERY_RESULT_TTL: Duration = Duration::from_secs(60);
/// Extra time a pending command gets past its query expiry before it is orphaned
pub const ORPHAN_GRACE: Duration = Duration::from_secs(10);
/// Failed-command ring size
pub const MAX_FAILED_COMMANDS: usize = 100;
/// Error recorded on commands whose query expired unclaimed
pub const EXPIRED_MESSAGE: &str = "Command expired before extension could execute it";
/// Error recorded on commands whose query was dropped by queue overflow
pub const QUEUE_OVERFLOW_REASON: &str =
    "Query queue overflow: command was dropped to make room for newer commands";

/// Command to be delivered to the extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQuery {
    /// Query type (`dom`, `a11y`, `execute`, `browser_action`, `dom_action`, ...)
    #[serde(rename = "type")]
    pub query_type: String,
    /// Opaque parameters forwarded to the extension
    #[serde(default)]
    pub params: Value,
    /// Target tab (absent = active tab)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    /// Correlation id for async commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl PendingQuery {
    /// Query of `query_type` with `params`
    pub fn new(query_type: impl Into<String>, params: Value) -> Self {
        Self {
            query_type: query_type.into(),
            params,
            tab_id: None,
            correlation_id: None,
        }
    }

    /// Set the target tab
    #[must_use]
    pub fn with_tab(mut self, tab_id: Option<i64>) -> Self {
        self.tab_id = tab_id.filter(|t| *t > 0);
        self
    }

    /// Set the correlation id
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Query as served to the extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQueryResponse {
    /// Broker id (`q-<n>`)
    pub id: String,
    /// Query type
    #[serde(rename = "type")]
    pub query_type: String,
    /// Parameters
    pub params: Value,
    /// Target tab
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    /// Correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Lifecycle status of an async command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Queued or running
    Pending,
    /// Finished with a result
    Complete,
    /// Extension reported an error
    Error,
    /// Extension gave up waiting
    Timeout,
    /// Never claimed before its deadline
    Expired,
    /// Cancelled by the user
    Cancelled,
}

impl CommandStatus {
    /// Map a status string posted by the extension onto the canonical set.
    /// Unknown values count as complete.
    #[must_use]
    pub fn normalize(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "running" | "still_processing" => Self::Pending,
            "error" => Self::Error,
            "timeout" => Self::Timeout,
            "expired" => Self::Expired,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Complete,
        }
    }

    /// Whether the status is a failure
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::Error | Self::Timeout | Self::Expired | Self::Cancelled
        )
    }

    /// Whether the command has finished
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        *self != Self::Pending
    }

    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Tracked state of an async command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    /// Correlation id
    pub correlation_id: String,
    /// Broker id of the query that carries the command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    /// Status
    pub status: CommandStatus,
    /// Extension payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Time the status became terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CommandResult {
    /// Milliseconds from registration to completion (or now)
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.created_at).num_milliseconds()
    }
}

/// Broker timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Pending list cap
    pub max_pending: usize,
    /// Default timeout for synchronous queries
    pub query_timeout: Duration,
    /// Timeout for async commands (may block on human action)
    pub async_command_timeout: Duration,
    /// Lifetime of unread results and finished commands
    pub result_ttl: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_pending: MAX_PENDING,
            query_timeout: Duration::from_secs(15),
            async_command_timeout: Duration::from_secs(300),
            result_ttl: QUERY_RESULT_TTL,
        }
    }
}

#[derive(Debug)]
struct PendingEntry {
    query: PendingQueryResponse,
    expires_at: Instant,
    client_id: String,
}

#[derive(Debug)]
struct ResultEntry {
    payload: Value,
    client_id: String,
    created_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PendingEntry>,
    results: HashMap<String, ResultEntry>,
    next_id: u64,
}

#[derive(Debug, Default)]
struct CommandState {
    active: HashMap<String, CommandResult>,
    failed: VecDeque<CommandResult>,
}

/// Pending-query broker and async command table
#[derive(Debug)]
pub struct QueryBroker {
    config: BrokerConfig,
    queue: Mutex<QueueState>,
    results_ready: Condvar,
    commands: Mutex<CommandState>,
    commands_changed: Condvar,
    element_index: Mutex<HashMap<String, Vec<String>>>,
}

impl Default for QueryBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl QueryBroker {
    /// Empty broker
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            queue: Mutex::new(QueueState::default()),
            results_ready: Condvar::new(),
            commands: Mutex::new(CommandState::default()),
            commands_changed: Condvar::new(),
            element_index: Mutex::new(HashMap::new()),
        }
    }

    /// Timing configuration
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    // ---- queue ----------------------------------------------------------

    /// Park a query for the extension. Returns its `q-<n>` id.
    ///
    /// A correlation id on the query registers a pending [`CommandResult`].
    /// When called inside a tokio runtime a one-shot sweeper is scheduled
    /// at the timeout so waiters and listings observe the expiry promptly.
    pub fn create_pending_query(
        self: &Arc<Self>,
        query: PendingQuery,
        timeout: Duration,
        client_id: &str,
    ) -> String {
        let (id, correlation_id, dropped_correlation) = {
            let mut queue = self.queue.lock();
            let mut dropped_correlation = None;
            if queue.pending.len() >= self.config.max_pending.max(1) {
                if let Some(dropped) = queue.pending.pop_front() {
                    warn!(
                        query_id = %dropped.query.id,
                        correlation_id = ?dropped.query.correlation_id,
                        "query queue overflow, dropping oldest query"
                    );
                    dropped_correlation = dropped.query.correlation_id;
                }
            }
            queue.next_id += 1;
            let id = format!("q-{}", queue.next_id);
            queue.pending.push_back(PendingEntry {
                query: PendingQueryResponse {
                    id: id.clone(),
                    query_type: query.query_type,
                    params: query.params,
                    tab_id: query.tab_id,
                    correlation_id: query.correlation_id.clone(),
                },
                expires_at: Instant::now() + timeout,
                client_id: client_id.to_string(),
            });
            (id, query.correlation_id, dropped_correlation)
        };

        if let Some(dropped) = dropped_correlation.filter(|c| !c.is_empty()) {
            self.expire_command_with_reason(&dropped, QUEUE_OVERFLOW_REASON);
        }

        if let Some(correlation_id) = correlation_id.filter(|c| !c.is_empty()) {
            self.register_command(&correlation_id, Some(&id));
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let broker = Arc::downgrade(self);
            handle.spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(broker) = broker.upgrade() {
                    broker.sweep_expired();
                }
            });
        }

        debug!(query_id = %id, client_id = %client_id, "pending query created");
        id
    }

    /// Drop expired queries, expire their commands and wake waiters
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut queue = self.queue.lock();
            let mut expired = Vec::new();
            queue.pending.retain(|entry| {
                let live = entry.expires_at > now;
                if !live {
                    if let Some(c) = &entry.query.correlation_id {
                        expired.push(c.clone());
                    }
                }
                live
            });
            expired
        };
        self.results_ready.notify_all();
        for correlation_id in expired {
            self.expire_command(&correlation_id);
        }
    }

    /// Still-pending queries, as served to the extension
    pub fn pending_queries(&self) -> Vec<PendingQueryResponse> {
        self.sweep_expired();
        self.queue
            .lock()
            .pending
            .iter()
            .map(|e| e.query.clone())
            .collect()
    }

    /// Still-pending queries created by `client_id`
    pub fn pending_queries_for_client(&self, client_id: &str) -> Vec<PendingQueryResponse> {
        self.sweep_expired();
        self.queue
            .lock()
            .pending
            .iter()
            .filter(|e| e.client_id == client_id)
            .map(|e| e.query.clone())
            .collect()
    }

    /// Number of pending queries
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// Number of stored, unread results
    #[must_use]
    pub fn stored_results(&self) -> usize {
        self.queue.lock().results.len()
    }

    /// Store the extension's result for query `id` and complete its command.
    /// Returns the correlation id of the query, if it had one.
    pub fn set_query_result(&self, id: &str, payload: Value) -> Option<String> {
        self.set_query_result_with_status(id, payload, None, None)
    }

    /// Store a result with an explicit extension status and error
    pub fn set_query_result_with_status(
        &self,
        id: &str,
        payload: Value,
        status: Option<&str>,
        error: Option<String>,
    ) -> Option<String> {
        let (correlation_id, client_id) = {
            let mut queue = self.queue.lock();
            let position = queue.pending.iter().position(|e| e.query.id == id);
            let entry = position.and_then(|p| queue.pending.remove(p));
            let (correlation_id, client_id) = entry
                .map(|e| (e.query.correlation_id, e.client_id))
                .unwrap_or_default();
            queue.results.insert(
                id.to_string(),
                ResultEntry {
                    payload: payload.clone(),
                    client_id: client_id.clone(),
                    created_at: Instant::now(),
                },
            );
            (correlation_id, client_id)
        };
        self.results_ready.notify_all();
        debug!(query_id = %id, client_id = %client_id, "query result stored");

        if let Some(correlation_id) = &correlation_id {
            self.apply_command_result(
                correlation_id,
                status.unwrap_or("complete"),
                Some(payload),
                error,
            );
        }
        correlation_id
    }

    /// Take a stored result without waiting
    pub fn take_query_result(&self, id: &str, client_id: &str) -> Option<Value> {
        let mut queue = self.queue.lock();
        let visible = queue
            .results
            .get(id)
            .is_some_and(|e| client_id.is_empty() || e.client_id == client_id);
        if !visible {
            return None;
        }
        queue.results.remove(id).map(|e| e.payload)
    }

    /// Block until the result for `id` arrives or `timeout` elapses.
    ///
    /// The result is removed on delivery, so concurrent waiters on one id
    /// see at most one success. A waiter with a non-empty `client_id` only
    /// receives results of queries created by that client.
    pub fn wait_for_result(&self, id: &str, timeout: Duration, client_id: &str) -> Result<Value> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        loop {
            let visible = queue
                .results
                .get(id)
                .is_some_and(|e| client_id.is_empty() || e.client_id == client_id);
            if visible {
                if let Some(entry) = queue.results.remove(id) {
                    return Ok(entry.payload);
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::QueryTimeout(id.to_string()));
            }
            let _ = self.results_ready.wait_until(&mut queue, deadline);
        }
    }

    // ---- commands -------------------------------------------------------

    /// Register a pending command
    pub fn register_command(&self, correlation_id: &str, query_id: Option<&str>) {
        if correlation_id.is_empty() {
            return;
        }
        self.commands.lock().active.insert(
            correlation_id.to_string(),
            CommandResult {
                correlation_id: correlation_id.to_string(),
                query_id: query_id.map(str::to_string),
                status: CommandStatus::Pending,
                result: None,
                error: None,
                created_at: Utc::now(),
                completed_at: None,
            },
        );
    }

    /// Apply an extension-reported status to a pending command.
    ///
    /// Terminal commands are never overwritten. Failures move to the
    /// failed-command ring.
    pub fn apply_command_result(
        &self,
        correlation_id: &str,
        status: &str,
        result: Option<Value>,
        error: Option<String>,
    ) {
        if correlation_id.is_empty() {
            return;
        }
        let status = CommandStatus::normalize(status);
        {
            let mut commands = self.commands.lock();
            let Some(cmd) = commands.active.get_mut(correlation_id) else {
                return;
            };
            if cmd.status.is_terminal() {
                return;
            }
            cmd.status = status;
            cmd.result = result;
            cmd.error = error;
            if status.is_terminal() {
                cmd.completed_at = Some(Utc::now());
            }
            if status.is_failed() {
                if let Some(cmd) = commands.active.remove(correlation_id) {
                    commands.failed.push_back(cmd);
                    while commands.failed.len() > MAX_FAILED_COMMANDS {
                        commands.failed.pop_front();
                    }
                }
            }
        }
        self.commands_changed.notify_all();
    }

    /// Mark a command complete
    pub fn complete_command(&self, correlation_id: &str, result: Option<Value>, error: Option<String>) {
        self.apply_command_result(correlation_id, "complete", result, error);
    }

    /// Expire a pending command
    pub fn expire_command(&self, correlation_id: &str) {
        self.expire_command_with_reason(correlation_id, EXPIRED_MESSAGE);
    }

    /// Expire a pending command with a custom reason
    pub fn expire_command_with_reason(&self, correlation_id: &str, reason: &str) {
        self.apply_command_result(correlation_id, "expired", None, Some(reason.to_string()));
    }

    /// Status of a command, from the active table or the failed ring
    pub fn command_result(&self, correlation_id: &str) -> Option<CommandResult> {
        self.sweep_expired();
        let commands = self.commands.lock();
        commands
            .active
            .get(correlation_id)
            .or_else(|| {
                commands
                    .failed
                    .iter()
                    .rev()
                    .find(|c| c.correlation_id == correlation_id)
            })
            .cloned()
    }

    /// Block until a command leaves `pending` or `timeout` elapses.
    /// Returns the latest state either way.
    pub fn wait_for_command(&self, correlation_id: &str, timeout: Duration) -> Option<CommandResult> {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.command_result(correlation_id)?;
            if current.status.is_terminal() || Instant::now() >= deadline {
                return Some(current);
            }
            let mut commands = self.commands.lock();
            let still_pending = commands
                .active
                .get(correlation_id)
                .is_some_and(|c| !c.status.is_terminal());
            if still_pending {
                let _ = self.commands_changed.wait_until(&mut commands, deadline);
            }
        }
    }

    /// Commands still pending, oldest first
    pub fn pending_commands(&self) -> Vec<CommandResult> {
        self.commands_with(|s| s == CommandStatus::Pending)
    }

    /// Completed commands, oldest first
    pub fn completed_commands(&self) -> Vec<CommandResult> {
        self.commands_with(|s| s == CommandStatus::Complete)
    }

    fn commands_with(&self, keep: impl Fn(CommandStatus) -> bool) -> Vec<CommandResult> {
        self.sweep_expired();
        let commands = self.commands.lock();
        let mut out: Vec<_> = commands
            .active
            .values()
            .filter(|c| keep(c.status))
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        out
    }

    /// Recent failed commands, oldest first
    pub fn failed_commands(&self) -> Vec<CommandResult> {
        self.sweep_expired();
        self.commands.lock().failed.iter().cloned().collect()
    }

    /// Expire every pending command and drop all pending queries
    pub fn expire_all_pending(&self, reason: &str) {
        let correlation_ids: Vec<String> = {
            let mut queue = self.queue.lock();
            queue
                .pending
                .drain(..)
                .filter_map(|e| e.query.correlation_id)
                .collect()
        };
        self.results_ready.notify_all();

        let still_pending: Vec<String> = self
            .commands
            .lock()
            .active
            .values()
            .filter(|c| c.status == CommandStatus::Pending)
            .map(|c| c.correlation_id.clone())
            .collect();

        for correlation_id in correlation_ids.iter().chain(still_pending.iter()) {
            self.expire_command_with_reason(correlation_id, reason);
        }
    }

    /// Periodic cleanup: unread results past the TTL, orphaned queries,
    /// and finished commands past the TTL.
    pub fn cleanup_expired(&self) {
        self.cleanup_expired_at(Instant::now(), Utc::now());
    }

    fn cleanup_expired_at(&self, now: Instant, wall_now: DateTime<Utc>) {
        let ttl = self.config.result_ttl;
        let grace = self.config.async_command_timeout + ORPHAN_GRACE;

        let orphaned: Vec<String> = {
            let mut queue = self.queue.lock();
            queue
                .results
                .retain(|_, r| now.duration_since(r.created_at) <= ttl);
            let mut orphaned = Vec::new();
            queue.pending.retain(|e| {
                let orphan = now.checked_duration_since(e.expires_at).is_some_and(|d| d > grace);
                if orphan {
                    if let Some(c) = &e.query.correlation_id {
                        orphaned.push(c.clone());
                    }
                }
                !orphan
            });
            orphaned
        };
        for correlation_id in &orphaned {
            self.expire_command(correlation_id);
        }

        let stale_after = to_chrono(grace);
        let finished_ttl = to_chrono(ttl);
        let stale_pending: Vec<String> = {
            let mut commands = self.commands.lock();
            commands.active.retain(|_, c| match c.completed_at {
                Some(done) => wall_now - done <= finished_ttl,
                None => true,
            });
            commands
                .active
                .values()
                .filter(|c| c.status == CommandStatus::Pending && wall_now - c.created_at > stale_after)
                .map(|c| c.correlation_id.clone())
                .collect()
        };
        for correlation_id in stale_pending {
            self.expire_command(&correlation_id);
        }
    }

    // ---- element index --------------------------------------------------

    /// Remember the selectors a client's `list_interactive` returned
    pub fn set_element_index(&self, client_id: &str, selectors: Vec<String>) {
        self.element_index
            .lock()
            .insert(client_id.to_string(), selectors);
    }

    /// Resolve an element index for a client
    #[must_use]
    pub fn resolve_element_index(&self, client_id: &str, index: usize) -> Option<String> {
        self.element_index
            .lock()
            .get(client_id)
            .and_then(|selectors| selectors.get(index))
            .cloned()
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}
