//! MCP JSON-RPC dispatcher shared by the HTTP `/mcp` endpoint and stdio
//!
//! `handle_request` is synchronous: `tools/call` may block for the sync
//! wait of a browser command, so async callers run it on a blocking
//! thread.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use gasoline_core::{RateLimitConfig, ToolCallLimiter};

use crate::handler::ToolHandler;
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
    PARSE_ERROR, PROTOCOL_VERSION, RESOURCE_NOT_FOUND,
};
use crate::resources::{resource_list, resource_text};
use crate::response::{append_warnings, prepend_warning, result_value};
use crate::schema::{allowed_argument_keys, tool_definitions};

const INSTRUCTIONS: &str = "Gasoline provides real-time browser telemetry via 5 tools.

Workflow:
- observe: read passive buffers (errors, logs, network, websocket, actions, vitals, commands)
- analyze: browser-backed analysis (dom, accessibility) and summaries (performance, errors)
- generate: artifacts from captured data (reproduction, test, har, csp, sarif)
- configure: health, clearing buffers, noise rules, storage, streaming, telemetry
- interact: browser automation (click, type, navigate, execute_js, ...); requires AI Web Pilot

Key patterns:
- Pagination: pass metadata.cursor back as after_cursor; use restart_on_eviction=true if a cursor expired.
- Browser commands return a correlation_id; poll observe(what=\"command_result\") until final is true.
- For routing help read gasoline://capabilities; details in gasoline://guide; examples in gasoline://quickstart.";

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    uri: String,
}

/// JSON-RPC front door to the tools
pub struct McpHandler {
    tools: Arc<ToolHandler>,
    limiter: ToolCallLimiter,
    version: String,
}

impl std::fmt::Debug for McpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpHandler")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl McpHandler {
    /// Dispatcher with the default 500 calls/minute budget
    pub fn new(tools: Arc<ToolHandler>, version: impl Into<String>) -> Self {
        Self::with_rate_limit(tools, version, RateLimitConfig::default())
    }

    /// Dispatcher with a custom tool-call budget
    pub fn with_rate_limit(
        tools: Arc<ToolHandler>,
        version: impl Into<String>,
        limit: RateLimitConfig,
    ) -> Self {
        Self {
            tools,
            limiter: ToolCallLimiter::new(limit),
            version: version.into(),
        }
    }

    /// Tool handler behind the dispatcher
    #[must_use]
    pub fn tools(&self) -> &Arc<ToolHandler> {
        &self.tools
    }

    /// Parse and dispatch one raw message. `None` for notifications.
    pub fn handle_message(&self, raw: &str, client_id: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(raw) {
            Ok(request) => self.handle_request(request, client_id),
            Err(e) => {
                warn!(error = %e, "unparseable JSON-RPC message");
                Some(JsonRpcResponse::err(None, PARSE_ERROR, format!("Parse error: {}", e)))
            }
        }
    }

    /// Dispatch a parsed request. `None` for notifications.
    pub fn handle_request(&self, req: JsonRpcRequest, client_id: &str) -> Option<JsonRpcResponse> {
        if req.is_notification() {
            debug!(method = %req.method, "notification");
            return None;
        }
        debug!(method = %req.method, client_id = %client_id, "MCP request");

        let id = req.id;
        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(id, &req.params),
            "initialized" | "ping" => JsonRpcResponse::ok(id, json!({})),
            "tools/list" => JsonRpcResponse::ok(id, json!({"tools": tool_definitions()})),
            "tools/call" => self.handle_tools_call(id, req.params, client_id),
            "prompts/list" => JsonRpcResponse::ok(id, json!({"prompts": []})),
            "resources/list" => JsonRpcResponse::ok(id, json!({"resources": resource_list()})),
            "resources/templates/list" => JsonRpcResponse::ok(id, json!({"resourceTemplates": []})),
            "resources/read" => handle_resources_read(id, req.params),
            other => JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
        };
        Some(response)
    }

    fn handle_initialize(&self, id: Option<Value>, params: &Value) -> JsonRpcResponse {
        let requested = params.get("protocolVersion").and_then(Value::as_str);
        if let Some(v) = requested.filter(|v| *v != PROTOCOL_VERSION) {
            info!(requested = %v, offered = %PROTOCOL_VERSION, "client asked for another protocol version");
        }
        JsonRpcResponse::ok(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {"listChanged": false},
                    "resources": {},
                },
                "serverInfo": {
                    "name": "gasoline",
                    "version": self.version,
                },
                "instructions": INSTRUCTIONS,
            }),
        )
    }

    fn handle_tools_call(&self, id: Option<Value>, params: Value, client_id: &str) -> JsonRpcResponse {
        let params: CallParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return JsonRpcResponse::err(id, INVALID_PARAMS, format!("Invalid params: {}", e)),
        };

        self.warn_unknown_arguments(&params.name, &params.arguments);

        let limit = self.limiter.acquire();
        if !limit.allowed {
            warn!(tool = %params.name, "tool call rate limit exceeded");
            return JsonRpcResponse::err(
                id,
                INTERNAL_ERROR,
                format!(
                    "Tool call rate limit exceeded ({} calls/minute). Please wait before retrying.",
                    self.limiter.config().max_requests
                ),
            );
        }

        let mut result = self.tools.call(&params.name, &params.arguments, client_id);

        if let Some((extension, server)) = self.tools.capture().version_mismatch() {
            prepend_warning(
                &mut result,
                &format!(
                    "WARNING: Version mismatch detected (server v{}, extension v{}). Update your extension to avoid issues.",
                    server, extension
                ),
            );
        }
        append_warnings(&mut result, &self.tools.logs().take_warnings());

        JsonRpcResponse::ok(id, result_value(&result))
    }

    /// Queue a one-shot warning per argument the tool's schema does not declare
    fn warn_unknown_arguments(&self, tool: &str, args: &Value) {
        let (Some(allowed), Some(given)) = (allowed_argument_keys(tool), args.as_object()) else {
            return;
        };
        let mut unknown: Vec<&String> = given.keys().filter(|k| !allowed.contains(k)).collect();
        unknown.sort();
        for key in unknown {
            self.tools
                .logs()
                .add_warning(format!("unknown parameter '{}' for tool '{}' (ignored)", key, tool));
        }
    }
}

fn handle_resources_read(id: Option<Value>, params: Value) -> JsonRpcResponse {
    let params: ReadParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return JsonRpcResponse::err(id, INVALID_PARAMS, format!("Invalid params: {}", e)),
    };
    match resource_text(&params.uri) {
        Some(text) => JsonRpcResponse::ok(
            id,
            json!({
                "contents": [{
                    "uri": params.uri.trim_end_matches('/'),
                    "mimeType": "text/markdown",
                    "text": text,
                }],
            }),
        ),
        None => JsonRpcResponse::err(
            id,
            RESOURCE_NOT_FOUND,
            format!("Resource not found: {}", params.uri),
        ),
    }
}

#[cfg(test)]
mod tests;
