//! Tool handler: routes `tools/call` to the five tools
//!
//! Holds the shared stores every tool reads from or dispatches through.
//! Handlers return [`ToolOutcome`]; a `ToolError` is rendered as a
//! structured error result at the boundary.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use gasoline_core::{
    AnnotationStore, Capture, EnhancedAction, LogStore, MemorySnapshotStore, QueryBroker,
    SnapshotStore,
};

use crate::protocol::ToolResult;
use crate::response::{sorted_list, ErrorCode, ToolError, ToolOutcome};
use crate::schema::TOOL_NAMES;

/// Tool-level timing and policy knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolConfig {
    /// How long a synchronous command waits before returning `pending`
    pub sync_wait: Duration,
    /// How long `save_state` waits for the extension's state capture
    pub state_capture_timeout: Duration,
    /// Timeout of `upload` queries
    pub upload_timeout: Duration,
    /// Whether the extension may fall back to OS-level file dialogs
    pub os_upload_automation: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            sync_wait: Duration::from_secs(15),
            state_capture_timeout: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(600),
            os_upload_automation: false,
        }
    }
}

/// Shared state behind the MCP tools
pub struct ToolHandler {
    pub(crate) capture: Arc<Capture>,
    pub(crate) logs: Arc<LogStore>,
    pub(crate) broker: Arc<QueryBroker>,
    pub(crate) annotations: Arc<AnnotationStore>,
    pub(crate) snapshots: Option<Arc<dyn SnapshotStore>>,
    pub(crate) config: ToolConfig,
}

impl std::fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandler")
            .field("config", &self.config)
            .field("snapshots", &self.snapshots.is_some())
            .finish()
    }
}

impl ToolHandler {
    /// Handler over the given stores with an in-memory snapshot store
    pub fn new(
        capture: Arc<Capture>,
        logs: Arc<LogStore>,
        broker: Arc<QueryBroker>,
        annotations: Arc<AnnotationStore>,
    ) -> Self {
        Self {
            capture,
            logs,
            broker,
            annotations,
            snapshots: Some(Arc::new(MemorySnapshotStore::new())),
            config: ToolConfig::default(),
        }
    }

    /// Replace (or remove) the snapshot store
    #[must_use]
    pub fn with_snapshot_store(mut self, store: Option<Arc<dyn SnapshotStore>>) -> Self {
        self.snapshots = store;
        self
    }

    /// Override the tool configuration
    #[must_use]
    pub fn with_config(mut self, config: ToolConfig) -> Self {
        self.config = config;
        self
    }

    /// Capture store
    #[must_use]
    pub fn capture(&self) -> &Arc<Capture> {
        &self.capture
    }

    /// Log store
    #[must_use]
    pub fn logs(&self) -> &Arc<LogStore> {
        &self.logs
    }

    /// Query broker
    #[must_use]
    pub fn broker(&self) -> &Arc<QueryBroker> {
        &self.broker
    }

    /// Annotation store
    #[must_use]
    pub fn annotations(&self) -> &Arc<AnnotationStore> {
        &self.annotations
    }

    /// Tool configuration
    #[must_use]
    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Run a tool. Blocks while synchronous commands wait for the browser.
    pub fn call(&self, name: &str, args: &Value, client_id: &str) -> ToolResult {
        debug!(tool = %name, client_id = %client_id, "tool call");
        let outcome: ToolOutcome = match name {
            "observe" => self.observe(args, client_id),
            "analyze" => self.analyze(args, client_id),
            "generate" => self.generate(args),
            "configure" => self.configure(args),
            "interact" => self.interact(args, client_id),
            _ => Err(ToolError::new(
                ErrorCode::UnknownTool,
                format!("Unknown tool: {}", name),
                "Call tools/list and use one of the listed tools",
            )
            .with_hint(format!("Valid tools: {}", sorted_list(TOOL_NAMES)))),
        };
        outcome.unwrap_or_else(|e| e.to_result())
    }

    /// Record an AI-driven action in the actions stream
    pub(crate) fn record_ai_action(&self, action_type: &str, url: Option<&str>, selectors: Option<Value>) {
        let mut action = EnhancedAction::now(action_type);
        action.url = url.map(str::to_string);
        action.selectors = selectors;
        action.source = Some("ai".to_string());
        self.capture.add_actions(vec![action]);
    }

    /// Record a fully populated AI-driven action
    pub(crate) fn record_ai_enhanced_action(&self, mut action: EnhancedAction) {
        action.timestamp = Utc::now().timestamp_millis();
        action.source = Some("ai".to_string());
        self.capture.add_actions(vec![action]);
    }
}

/// Decode tool arguments; `null` decodes to the default
pub(crate) fn parse_args<T: DeserializeOwned + Default>(args: &Value) -> Result<T, ToolError> {
    if args.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(args.clone()).map_err(ToolError::invalid_json)
}

/// First non-empty string among `keys`
pub(crate) fn discriminator(args: &Value, keys: &[&str]) -> Result<Option<String>, ToolError> {
    if !args.is_null() && !args.is_object() {
        return Err(ToolError::invalid_json("arguments must be a JSON object"));
    }
    Ok(keys
        .iter()
        .filter_map(|k| args.get(*k).and_then(Value::as_str))
        .find(|v| !v.is_empty())
        .map(str::to_string))
}

/// Require a discriminator, listing valid values when it is missing
pub(crate) fn require_mode(
    args: &Value,
    keys: &[&str],
    valid: &[&str],
) -> Result<String, ToolError> {
    discriminator(args, keys)?.ok_or_else(|| {
        ToolError::missing_param(keys[0]).with_hint(format!("Valid values: {}", sorted_list(valid)))
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use gasoline_core::{BrokerConfig, BufferCapacities};

    /// Handler over fresh in-memory stores
    pub fn handler() -> ToolHandler {
        handler_with(BrokerConfig::default(), ToolConfig::default())
    }

    /// Handler with custom broker and tool configs
    pub fn handler_with(broker: BrokerConfig, config: ToolConfig) -> ToolHandler {
        ToolHandler::new(
            Arc::new(Capture::new(BufferCapacities::default(), "0.7.8")),
            Arc::new(LogStore::in_memory(1000)),
            Arc::new(QueryBroker::new(broker)),
            Arc::new(AnnotationStore::new()),
        )
        .with_config(config)
    }

    /// Make the extension look connected with the pilot on
    pub fn connect(handler: &ToolHandler, pilot_enabled: bool) {
        handler.capture.set_pilot_enabled(pilot_enabled);
        handler.capture.record_poll(None);
    }

    /// JSON body of a result, panicking on non-JSON output
    pub fn body(result: &ToolResult) -> Value {
        result
            .json_body()
            .unwrap_or_else(|| panic!("no JSON body in {:?}", result.first_text()))
    }

    /// Structured error code of a failed result
    pub fn error_code(result: &ToolResult) -> String {
        assert!(result.is_error, "expected error, got {:?}", result.first_text());
        body(result)["error"].as_str().unwrap_or_default().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_tool_lists_tools() {
        let h = handler();
        let result = h.call("nope", &json!({}), "c");
        assert_eq!(error_code(&result), "unknown_tool");
        assert_eq!(
            body(&result)["hint"],
            "Valid tools: analyze, configure, generate, interact, observe"
        );
    }

    #[test]
    fn test_non_object_arguments_are_invalid_json() {
        let h = handler();
        for tool in TOOL_NAMES {
            let result = h.call(tool, &json!("{bad json}"), "c");
            assert_eq!(error_code(&result), "invalid_json", "{}", tool);
        }
    }

    #[test]
    fn test_ai_actions_are_tagged() {
        let h = handler();
        h.record_ai_action("navigate", Some("https://a.test"), None);
        let actions = h.capture.actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].source.as_deref(), Some("ai"));
        assert_eq!(actions[0].url.as_deref(), Some("https://a.test"));
    }
}
