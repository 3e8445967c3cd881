//! `configure`: server health, buffer clearing and runtime modes

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use gasoline_core::Stream;

use crate::handler::{parse_args, require_mode, ToolHandler};
use crate::response::{json_response, sorted_list, ErrorCode, ToolError, ToolOutcome};
use crate::schema::CONFIGURE_ACTIONS;

const CLEARABLE_BUFFERS: &[&str] = &[
    "actions",
    "all",
    "extension_logs",
    "logs",
    "network",
    "performance",
    "websocket",
];
const STORE_ACTIONS: &[&str] = &["delete", "get", "list", "save", "stats"];
const NOISE_ACTIONS: &[&str] = &["add", "list", "remove", "reset"];
const STREAMING_ACTIONS: &[&str] = &["disable", "enable", "status"];
const TELEMETRY_MODES: &[&str] = &["auto", "full", "off"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigureArgs {
    buffer: Option<String>,
    store_action: Option<String>,
    namespace: Option<String>,
    key: Option<String>,
    noise_action: Option<String>,
    pattern: Option<String>,
    streaming_action: Option<String>,
    telemetry_mode: Option<String>,
}

/// Validate an enumerated sub-parameter
fn pick(value: Option<&str>, param: &str, valid: &[&str]) -> Result<String, ToolError> {
    let value = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ToolError::missing_param(param).with_hint(format!("Valid values: {}", sorted_list(valid))))?;
    if !valid.contains(&value) {
        return Err(ToolError::new(
            ErrorCode::InvalidParam,
            format!("Invalid {}: {}", param, value),
            format!("Use a valid value for '{}'", param),
        )
        .with_param(param)
        .with_hint(format!("Valid values: {}", sorted_list(valid))));
    }
    Ok(value.to_string())
}

impl ToolHandler {
    pub(crate) fn configure(&self, args: &Value) -> ToolOutcome {
        let action = require_mode(args, &["action"], CONFIGURE_ACTIONS)?;
        let params: ConfigureArgs = parse_args(args)?;

        match action.as_str() {
            "health" => Ok(self.configure_health()),
            "clear" => self.configure_clear(&params),
            "store" => {
                let store_action = pick(params.store_action.as_deref(), "store_action", STORE_ACTIONS)?;
                if matches!(store_action.as_str(), "get" | "save" | "delete")
                    && params.key.as_deref().map_or(true, str::is_empty)
                {
                    return Err(ToolError::missing_param("key"));
                }
                Ok(json_response(
                    &format!("Store {} acknowledged", store_action),
                    &json!({
                        "status": "ok",
                        "store_action": store_action,
                        "namespace": params.namespace.unwrap_or_else(|| "default".to_string()),
                        "key": params.key,
                    }),
                ))
            }
            "noise_rule" => {
                let noise_action = pick(params.noise_action.as_deref(), "noise_action", NOISE_ACTIONS)?;
                if noise_action == "add" && params.pattern.as_deref().map_or(true, str::is_empty) {
                    return Err(ToolError::missing_param("pattern"));
                }
                Ok(json_response(
                    &format!("Noise rule {} acknowledged", noise_action),
                    &json!({"status": "ok", "noise_action": noise_action, "pattern": params.pattern}),
                ))
            }
            "streaming" => {
                let streaming_action =
                    pick(params.streaming_action.as_deref(), "streaming_action", STREAMING_ACTIONS)?;
                Ok(json_response(
                    &format!("Streaming {} acknowledged", streaming_action),
                    &json!({"status": "ok", "streaming_action": streaming_action}),
                ))
            }
            "telemetry" => self.configure_telemetry(&params),
            other => Err(ToolError::unknown_mode("configure", other, "action", CONFIGURE_ACTIONS)),
        }
    }

    fn configure_health(&self) -> crate::protocol::ToolResult {
        let now = Utc::now();
        let counts = self.capture.counts();
        json_response(
            &format!("Gasoline v{} healthy", self.capture.server_version()),
            &json!({
                "status": "ok",
                "version": self.capture.server_version(),
                "extension_version": self.capture.extension_version(),
                "extension_connected": self.capture.is_extension_connected(now),
                "buffers": {
                    "logs": self.logs.len(),
                    "extension_logs": counts.extension_logs,
                    "network_waterfall": counts.network_waterfall,
                    "network_bodies": counts.network_bodies,
                    "websocket_events": counts.websocket_events,
                    "websocket_connections": counts.websocket_connections,
                    "actions": counts.actions,
                    "performance": counts.performance,
                },
                "logs_total_added": self.logs.total_added(),
                "errors_total_added": self.logs.error_total_added(),
                "pending_queries": self.broker.queue_depth(),
                "commands": {
                    "pending": self.broker.pending_commands().len(),
                    "completed": self.broker.completed_commands().len(),
                    "failed": self.broker.failed_commands().len(),
                },
                "pilot": self.capture.pilot_status(now),
                "telemetry_mode": self.logs.telemetry_mode(),
            }),
        )
    }

    fn configure_clear(&self, params: &ConfigureArgs) -> ToolOutcome {
        let buffer = params
            .buffer
            .clone()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "all".to_string());
        if !CLEARABLE_BUFFERS.contains(&buffer.as_str()) {
            return Err(ToolError::new(
                ErrorCode::InvalidParam,
                format!("Invalid buffer: {}", buffer),
                "Use a valid value for 'buffer'",
            )
            .with_param("buffer")
            .with_hint(format!("Valid values: {}", sorted_list(CLEARABLE_BUFFERS))));
        }

        if buffer == "logs" || buffer == "all" {
            self.logs.clear_entries();
        }
        if let Some(stream) = Stream::parse(&buffer) {
            self.capture.clear(stream);
        }
        info!(buffer = %buffer, "buffers cleared");

        Ok(json_response(
            &format!("Cleared {}", buffer),
            &json!({"status": "ok", "cleared": buffer, "buffers": self.capture.counts(), "logs": self.logs.len()}),
        ))
    }

    fn configure_telemetry(&self, params: &ConfigureArgs) -> ToolOutcome {
        let Some(raw) = params.telemetry_mode.as_deref().filter(|m| !m.is_empty()) else {
            return Ok(json_response(
                &format!("Telemetry mode: {}", self.logs.telemetry_mode()),
                &json!({"telemetry_mode": self.logs.telemetry_mode()}),
            ));
        };
        let mode = pick(Some(raw), "telemetry_mode", TELEMETRY_MODES)?;
        self.logs.set_telemetry_mode(mode.clone());
        info!(mode = %mode, "telemetry mode changed");
        Ok(json_response(
            &format!("Telemetry mode set to {}", mode),
            &json!({"status": "ok", "telemetry_mode": mode}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::*;
    use gasoline_core::{EnhancedAction, LogEntry, LogLevel};

    #[test]
    fn test_health_reports_buffers_and_pilot() {
        let h = handler();
        h.logs.add_entries(vec![LogEntry::new(LogLevel::Error, "x")]);
        let data = body(&h.call("configure", &json!({"action": "health"}), "c"));
        assert_eq!(data["status"], "ok");
        assert_eq!(data["buffers"]["logs"], 1);
        assert_eq!(data["errors_total_added"], 1);
        assert_eq!(data["pilot"]["source"], "never_connected");
        assert_eq!(data["pending_queries"], 0);
    }

    #[test]
    fn test_clear_single_buffer_and_all() {
        let h = handler();
        h.logs.add_entries(vec![LogEntry::new(LogLevel::Info, "x")]);
        h.capture.add_actions(vec![EnhancedAction::now("click")]);

        h.call("configure", &json!({"action": "clear", "buffer": "actions"}), "c");
        assert_eq!(h.capture.counts().actions, 0);
        assert_eq!(h.logs.len(), 1);

        let result = h.call("configure", &json!({"action": "clear"}), "c");
        assert_eq!(body(&result)["cleared"], "all");
        assert_eq!(h.logs.len(), 0);
    }

    #[test]
    fn test_clear_rejects_unknown_buffer() {
        let h = handler();
        let result = h.call("configure", &json!({"action": "clear", "buffer": "cookies"}), "c");
        assert_eq!(error_code(&result), "invalid_param");
        assert_eq!(
            body(&result)["hint"],
            "Valid values: actions, all, extension_logs, logs, network, performance, websocket"
        );
    }

    #[test]
    fn test_telemetry_mode_roundtrip() {
        let h = handler();
        let set = h.call(
            "configure",
            &json!({"action": "telemetry", "telemetry_mode": "off"}),
            "c",
        );
        assert!(!set.is_error);
        assert_eq!(h.logs.telemetry_mode(), "off");

        let bad = h.call(
            "configure",
            &json!({"action": "telemetry", "telemetry_mode": "loud"}),
            "c",
        );
        assert_eq!(error_code(&bad), "invalid_param");
    }

    #[test]
    fn test_acknowledged_actions_validate_inputs() {
        let h = handler();
        let missing = h.call("configure", &json!({"action": "noise_rule", "noise_action": "add"}), "c");
        assert_eq!(body(&missing)["param"], "pattern");

        let ok = h.call(
            "configure",
            &json!({"action": "noise_rule", "noise_action": "add", "pattern": "favicon"}),
            "c",
        );
        assert!(!ok.is_error);

        let store = h.call("configure", &json!({"action": "store"}), "c");
        assert_eq!(error_code(&store), "missing_param");

        let unknown = h.call("configure", &json!({"action": "reboot"}), "c");
        assert_eq!(error_code(&unknown), "unknown_mode");
    }
}
