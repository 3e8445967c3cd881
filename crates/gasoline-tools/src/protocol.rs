//! MCP (Model Context Protocol) JSON-RPC 2.0 wire types.
//!
//! Shared by the HTTP `/mcp` endpoint and the stdio bridge.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version advertised by `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Invalid JSON was received
pub const PARSE_ERROR: i32 = -32700;
/// Method does not exist
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters
pub const INVALID_PARAMS: i32 = -32602;
/// Internal JSON-RPC error (also used for rate limiting)
pub const INTERNAL_ERROR: i32 = -32603;
/// `resources/read` of an unknown URI
pub const RESOURCE_NOT_FOUND: i32 = -32002;

/// MCP JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`
    #[serde(default)]
    pub jsonrpc: String,
    /// Request id; absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// Build a request
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Notifications carry no id (or use the `notifications/` namespace) and get no response
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.as_ref().map_or(true, Value::is_null) || self.method.starts_with("notifications/")
    }
}

/// MCP JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Id of the request being answered
    #[serde(default)]
    pub id: Option<Value>,
    /// Success payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// MCP JSON-RPC error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

impl JsonRpcResponse {
    /// Successful response
    pub fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response
    pub fn err(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// One content block of a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Block type; always `text` here
    #[serde(rename = "type")]
    pub block_type: String,
    /// Text payload
    pub text: String,
}

impl ContentBlock {
    /// Text block
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Result of `tools/call`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content blocks
    pub content: Vec<ContentBlock>,
    /// Whether the call failed logically
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Text of the first content block
    #[must_use]
    pub fn first_text(&self) -> &str {
        self.content.first().map_or("", |b| b.text.as_str())
    }

    /// JSON body following the summary line of the first block.
    ///
    /// Responses are rendered as `summary\n{json}`; a block that is pure
    /// JSON parses as a whole.
    #[must_use]
    pub fn json_body(&self) -> Option<Value> {
        let text = self.first_text();
        if let Ok(v) = serde_json::from_str(text) {
            return Some(v);
        }
        let (_, body) = text.split_once('\n')?;
        serde_json::from_str(body).ok()
    }
}

/// MCP tool definition (subset of JSON Schema).
#[derive(Debug, Clone, Serialize)]
pub struct McpToolDef {
    /// Tool name
    pub name: String,
    /// Description shown to the agent
    pub description: String,
    /// JSON Schema of the arguments
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_jsonrpc_request_parsing() {
        let json = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
        let req: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, "initialize");
        assert_eq!(req.id, Some(json!(1)));
        assert!(!req.is_notification());
    }

    #[test]
    fn test_notifications_detected() {
        let no_id: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"initialized"}"#).unwrap();
        assert!(no_id.is_notification());

        let namespaced = JsonRpcRequest::new(3, "notifications/initialized", Value::Null);
        assert!(namespaced.is_notification());
    }

    #[test]
    fn test_jsonrpc_response_ok() {
        let resp = JsonRpcResponse::ok(Some(json!(1)), json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_jsonrpc_response_err() {
        let resp = JsonRpcResponse::err(Some(json!(1)), METHOD_NOT_FOUND, "Not found");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"error\""));
        assert!(json.contains("-32601"));
    }

    #[test]
    fn test_tool_result_json_body() {
        let result = ToolResult {
            content: vec![ContentBlock::text("3 entries\n{\"count\":3}")],
            is_error: false,
        };
        assert_eq!(result.json_body().unwrap()["count"], 3);

        let serialized = serde_json::to_value(&result).unwrap();
        assert_eq!(serialized["isError"], false);
        assert_eq!(serialized["content"][0]["type"], "text");
    }
}
