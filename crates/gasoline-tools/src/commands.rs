//! Async command plumbing
//!
//! Browser-targeting tools enqueue a pending query carrying a correlation
//! id, then either return immediately (`queued`) or block on the command
//! table until the extension reports back. Results are rendered the same
//! way whether they come from a sync wait or `observe command_result`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use gasoline_core::{CommandResult, CommandStatus, PendingQuery};

use crate::handler::ToolHandler;
use crate::protocol::ToolResult;
use crate::response::{json_error_response, json_response, prepend_warning, ErrorCode, ToolError};

/// `<prefix>_<unix_nanos>_<int63>`
#[must_use]
pub fn new_correlation_id(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let salt = rand::random::<u64>() >> 1;
    format!("{}_{}_{}", prefix, nanos, salt)
}

/// Whether the caller wants to block on the result.
///
/// `background:true` always means async; otherwise `sync` (or its alias
/// `wait`) wins over the per-tool default.
#[must_use]
pub fn wants_sync(args: &Value, default_sync: bool) -> bool {
    let flag = |key: &str| args.get(key).and_then(Value::as_bool);
    if flag("background") == Some(true) {
        return false;
    }
    flag("sync").or_else(|| flag("wait")).unwrap_or(default_sync)
}

/// Poll interval suggested to agents after a sync wait elapses
const SUGGESTED_RETRY_MS: u64 = 2000;

/// A command handed to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Dispatched {
    pub correlation_id: String,
    pub query_id: String,
}

fn poll_message(correlation_id: &str) -> String {
    format!(
        "Poll observe({{what:'command_result', correlation_id:'{}'}}) for the result",
        correlation_id
    )
}

fn rfc3339(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Error string embedded in an otherwise complete extension payload
fn embedded_error(result: Option<&Value>) -> Option<String> {
    let obj = result?.as_object()?;
    let explicit = obj
        .get("error")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
        .map(str::to_string);
    if obj.get("success").and_then(Value::as_bool) == Some(false) {
        return Some(explicit.unwrap_or_else(|| "Extension reported success: false".to_string()));
    }
    explicit
}

fn numeric_diff(before: &Map<String, Value>, after: &Map<String, Value>) -> Map<String, Value> {
    after
        .iter()
        .filter_map(|(key, a)| {
            let a = a.as_f64()?;
            let b = before.get(key)?.as_f64()?;
            Some((key.clone(), json!({"before": b, "after": a, "delta": a - b})))
        })
        .collect()
}

impl ToolHandler {
    /// Readiness gate for browser-targeting actions. `Ok` carries an
    /// optional staleness warning for the success summary.
    pub(crate) fn check_pilot_ready(&self) -> Result<Option<String>, ToolError> {
        let verdict = self.capture.pilot_verdict(Utc::now());
        if let Some(rejection) = verdict.rejection() {
            let (code, retry) = match rejection.code {
                "pilot_disabled" => (
                    ErrorCode::PilotDisabled,
                    "Enable AI Web Pilot in the extension popup",
                ),
                _ => (
                    ErrorCode::ExtTimeout,
                    "Connect the Gasoline extension, then retry",
                ),
            };
            return Err(ToolError::new(code, rejection.message, retry).with_hint(rejection.hint));
        }
        Ok(verdict.warning().map(str::to_string))
    }

    /// Enqueue a command under a fresh correlation id
    pub(crate) fn enqueue_command(
        &self,
        query: PendingQuery,
        prefix: &str,
        timeout: Option<Duration>,
        client_id: &str,
    ) -> Dispatched {
        let correlation_id = new_correlation_id(prefix);
        self.enqueue_with_correlation(query, &correlation_id, timeout, client_id)
    }

    /// Enqueue a command under a caller-chosen correlation id
    pub(crate) fn enqueue_with_correlation(
        &self,
        query: PendingQuery,
        correlation_id: &str,
        timeout: Option<Duration>,
        client_id: &str,
    ) -> Dispatched {
        let timeout = timeout.unwrap_or(self.broker.config().async_command_timeout);
        let query_type = query.query_type.clone();
        let query_id = self.broker.create_pending_query(
            query.with_correlation(correlation_id),
            timeout,
            client_id,
        );
        info!(
            query_type = %query_type,
            query_id = %query_id,
            correlation_id = %correlation_id,
            "command queued"
        );
        Dispatched {
            correlation_id: correlation_id.to_string(),
            query_id,
        }
    }

    /// Block until the command leaves `pending` or the sync wait elapses.
    /// A delivered result is consumed so nothing lingers in the broker.
    pub(crate) fn await_command(&self, dispatched: &Dispatched, client_id: &str) -> Option<CommandResult> {
        self.await_command_for(dispatched, self.config.sync_wait, client_id)
    }

    pub(crate) fn await_command_for(
        &self,
        dispatched: &Dispatched,
        timeout: Duration,
        client_id: &str,
    ) -> Option<CommandResult> {
        let cmd = self
            .broker
            .wait_for_command(&dispatched.correlation_id, timeout);
        if cmd.as_ref().is_some_and(|c| c.status.is_terminal()) {
            let _ = self.broker.take_query_result(&dispatched.query_id, client_id);
        }
        cmd
    }

    /// Return `queued` immediately, or wait and render the outcome
    pub(crate) fn maybe_wait_for_command(
        &self,
        dispatched: &Dispatched,
        args: &Value,
        default_sync: bool,
        summary: &str,
        client_id: &str,
    ) -> ToolResult {
        if !wants_sync(args, default_sync) {
            return self.queued_response(dispatched, summary);
        }
        if let Some(disconnected) = self.disconnected_response(dispatched) {
            return disconnected;
        }
        match self.await_command(dispatched, client_id) {
            Some(cmd) if cmd.status.is_terminal() => self.format_command_result(&cmd),
            cmd => self.still_pending_response(dispatched, cmd.as_ref(), summary),
        }
    }

    /// `no_data` instead of a sync wait when the extension has stopped
    /// polling. The command stays queued and can still be polled.
    pub(crate) fn disconnected_response(&self, dispatched: &Dispatched) -> Option<ToolResult> {
        if self.capture.is_extension_connected(Utc::now()) {
            return None;
        }
        debug!(correlation_id = %dispatched.correlation_id, "extension not connected, skipping sync wait");
        Some(
            ToolError::new(
                ErrorCode::NoData,
                "Extension is not connected",
                "Ensure the Gasoline extension shows 'Connected' and a tab is tracked",
            )
            .with_hint(poll_message(&dispatched.correlation_id))
            .to_result(),
        )
    }

    pub(crate) fn queued_response(&self, dispatched: &Dispatched, summary: &str) -> ToolResult {
        json_response(
            &format!("{} (queued)", summary),
            &json!({
                "status": "queued",
                "correlation_id": dispatched.correlation_id,
                "queued": true,
                "final": false,
                "message": poll_message(&dispatched.correlation_id),
            }),
        )
    }

    pub(crate) fn still_pending_response(
        &self,
        dispatched: &Dispatched,
        cmd: Option<&CommandResult>,
        summary: &str,
    ) -> ToolResult {
        debug!(correlation_id = %dispatched.correlation_id, "sync wait elapsed, command still pending");
        json_response(
            &format!("{} (still pending)", summary),
            &json!({
                "status": "pending",
                "correlation_id": dispatched.correlation_id,
                "queued": true,
                "final": false,
                "elapsed_ms": cmd.map_or(0, CommandResult::elapsed_ms),
                "queue_depth": self.broker.queue_depth(),
                "retry_context": {
                    "attempts": 1,
                    "total_wait_ms": u64::try_from(self.config.sync_wait.as_millis()).unwrap_or(u64::MAX),
                    "extension_connected": self.capture.is_extension_connected(Utc::now()),
                },
                "suggested_retry_ms": SUGGESTED_RETRY_MS,
                "message": format!(
                    "The browser has not answered yet; the command keeps running. {}",
                    poll_message(&dispatched.correlation_id)
                ),
            }),
        )
    }

    /// Render a command's current state
    pub(crate) fn format_command_result(&self, cmd: &CommandResult) -> ToolResult {
        let corr = &cmd.correlation_id;
        let mut data = Map::new();
        data.insert("correlation_id".into(), json!(corr));
        data.insert("status".into(), json!(cmd.status.as_str()));
        data.insert("queued".into(), json!(false));
        data.insert("created_at".into(), json!(rfc3339(cmd.created_at)));
        data.insert("elapsed_ms".into(), json!(cmd.elapsed_ms()));

        if let Some(done) = cmd.completed_at {
            data.insert("completed_at".into(), json!(rfc3339(done)));
        }

        match cmd.status {
            CommandStatus::Pending => {
                data.insert("final".into(), json!(false));
                data.insert("message".into(), json!(poll_message(corr)));
                json_response(&format!("Command {}: pending", corr), &data)
            }
            CommandStatus::Complete => {
                data.insert("final".into(), json!(true));
                data.insert("timing_ms".into(), json!(cmd.elapsed_ms()));
                if let Some(result) = &cmd.result {
                    data.insert("result".into(), result.clone());
                }
                if let Some(err) = embedded_error(cmd.result.as_ref()).or_else(|| cmd.error.clone()) {
                    data.insert("error".into(), json!(err));
                    return json_error_response(
                        &format!("FAILED — Command {} error: {}", corr, err),
                        &data,
                    );
                }
                if let Some(diff) = self.perf_diff(corr) {
                    data.insert("perf_diff".into(), diff);
                }
                json_response(&format!("Command {}: complete", corr), &data)
            }
            CommandStatus::Error => {
                let err = cmd
                    .error
                    .clone()
                    .or_else(|| embedded_error(cmd.result.as_ref()))
                    .unwrap_or_else(|| "Command failed in extension".to_string());
                data.insert("final".into(), json!(true));
                data.insert("error".into(), json!(err));
                if let Some(result) = &cmd.result {
                    data.insert("result".into(), result.clone());
                }
                json_error_response(&format!("FAILED — Command {} error: {}", corr, err), &data)
            }
            CommandStatus::Timeout | CommandStatus::Expired => {
                let reason = cmd
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("Command {}", cmd.status.as_str()));
                data.insert("final".into(), json!(true));
                data.insert("error".into(), json!(ErrorCode::ExtTimeout.as_str()));
                data.insert("message".into(), json!(reason));
                data.insert(
                    "retry".into(),
                    json!("Re-run the command; check observe({what:'pilot'}) if it keeps expiring"),
                );
                data.insert(
                    "hint".into(),
                    json!("The extension did not finish the command in time. It may be disconnected or the page may be blocked."),
                );
                json_error_response(
                    &format!("FAILED — Command {} {}: {}", corr, cmd.status.as_str(), reason),
                    &data,
                )
            }
            CommandStatus::Cancelled => {
                let reason = cmd.error.clone().unwrap_or_else(|| "Command cancelled".to_string());
                data.insert("final".into(), json!(true));
                data.insert("error".into(), json!(reason));
                json_error_response(&format!("Command {} cancelled: {}", corr, reason), &data)
            }
        }
    }

    /// Before/after performance comparison for navigation commands
    fn perf_diff(&self, correlation_id: &str) -> Option<Value> {
        let before = self.capture.take_perf_before(correlation_id)?;
        let after = self.capture.latest_performance()?;
        if after.timestamp == before.timestamp && after.url == before.url {
            return None;
        }
        Some(json!({
            "before_url": before.url,
            "after_url": after.url,
            "timing": numeric_diff(&before.timing, &after.timing),
            "vitals": numeric_diff(&before.vitals, &after.vitals),
        }))
    }

    /// Prepend a staleness warning to a successful result
    pub(crate) fn with_warning(result: ToolResult, warning: Option<&str>) -> ToolResult {
        let mut result = result;
        if let Some(w) = warning.filter(|_| !result.is_error) {
            prepend_warning(&mut result, w);
        }
        result
    }
}

#[cfg(test)]
mod tests;
