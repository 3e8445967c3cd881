use super::*;
use crate::handler::test_support::*;
use std::time::Duration;

fn mcp() -> McpHandler {
    McpHandler::new(Arc::new(handler()), "0.7.8")
}

fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
    JsonRpcRequest::new(id, method, params)
}

fn call(mcp: &McpHandler, name: &str, arguments: Value) -> JsonRpcResponse {
    mcp.handle_request(
        request(1, "tools/call", json!({"name": name, "arguments": arguments})),
        "c",
    )
    .unwrap()
}

fn first_text(resp: &JsonRpcResponse) -> String {
    resp.result.as_ref().unwrap()["content"][0]["text"]
        .as_str()
        .unwrap()
        .to_string()
}

#[test]
fn test_initialize_advertises_server() {
    let resp = mcp()
        .handle_request(request(1, "initialize", json!({"protocolVersion": "2025-01-01"})), "c")
        .unwrap();
    let result = resp.result.unwrap();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "gasoline");
    assert_eq!(result["serverInfo"]["version"], "0.7.8");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
    assert!(result["instructions"].as_str().unwrap().contains("observe"));
}

#[test]
fn test_tools_list_has_five_tools() {
    let resp = mcp().handle_request(request(2, "tools/list", json!({})), "c").unwrap();
    let tools = resp.result.unwrap()["tools"].as_array().unwrap().clone();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["analyze", "configure", "generate", "interact", "observe"]);
    assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
}

#[test]
fn test_notifications_get_no_response() {
    let m = mcp();
    let no_id: JsonRpcRequest =
        serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
    assert!(m.handle_request(no_id, "c").is_none());
    assert!(m
        .handle_request(request(5, "notifications/initialized", Value::Null), "c")
        .is_none());
}

#[test]
fn test_trivial_methods() {
    let m = mcp();
    let ping = m.handle_request(request(1, "ping", Value::Null), "c").unwrap();
    assert_eq!(ping.result, Some(json!({})));
    let prompts = m.handle_request(request(2, "prompts/list", Value::Null), "c").unwrap();
    assert_eq!(prompts.result, Some(json!({"prompts": []})));
}

#[test]
fn test_protocol_errors() {
    let m = mcp();
    let parse = m.handle_message("{not json", "c").unwrap();
    assert_eq!(parse.error.unwrap().code, PARSE_ERROR);
    assert!(parse.id.is_none());

    let unknown = m.handle_request(request(1, "tools/frobnicate", Value::Null), "c").unwrap();
    assert_eq!(unknown.error.unwrap().code, METHOD_NOT_FOUND);

    let bad_params = m
        .handle_request(request(1, "tools/call", json!({"arguments": {}})), "c")
        .unwrap();
    assert_eq!(bad_params.error.unwrap().code, INVALID_PARAMS);
}

#[test]
fn test_unknown_tool_is_structured_result() {
    let resp = call(&mcp(), "teleport", json!({}));
    assert!(resp.error.is_none());
    let result = resp.result.unwrap();
    assert_eq!(result["isError"], true);
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("unknown_tool"));
    assert!(text.contains("analyze, configure, generate, interact, observe"));
}

#[test]
fn test_unknown_arguments_become_warnings() {
    let m = mcp();
    let resp = call(&m, "observe", json!({"what": "errors", "colour": "red"}));
    let content = resp.result.unwrap()["content"].as_array().unwrap().clone();
    let last = content.last().unwrap()["text"].as_str().unwrap();
    assert!(last.contains("unknown parameter 'colour' for tool 'observe' (ignored)"));

    let again = call(&m, "observe", json!({"what": "errors"}));
    assert_eq!(again.result.unwrap()["content"].as_array().unwrap().len(), 1);
}

#[test]
fn test_rate_limit_rejects_excess_calls() {
    let m = McpHandler::with_rate_limit(
        Arc::new(handler()),
        "0.7.8",
        RateLimitConfig::new(2, Duration::from_secs(60)),
    );
    assert!(call(&m, "configure", json!({"action": "health"})).error.is_none());
    assert!(call(&m, "configure", json!({"action": "health"})).error.is_none());
    let limited = call(&m, "configure", json!({"action": "health"}));
    let err = limited.error.unwrap();
    assert_eq!(err.code, INTERNAL_ERROR);
    assert_eq!(
        err.message,
        "Tool call rate limit exceeded (2 calls/minute). Please wait before retrying."
    );
}

#[test]
fn test_version_mismatch_warning_prepended() {
    let m = mcp();
    m.tools().capture().set_extension_version("0.6.1");
    let resp = call(&m, "configure", json!({"action": "health"}));
    assert!(first_text(&resp).starts_with("WARNING: Version mismatch detected (server v0.7.8, extension v0.6.1)"));

    m.tools().capture().set_extension_version("0.7.2");
    let resp = call(&m, "configure", json!({"action": "health"}));
    assert!(first_text(&resp).starts_with("Gasoline v0.7.8 healthy"));
}

#[test]
fn test_resources_list_and_read() {
    let m = mcp();
    let list = m.handle_request(request(1, "resources/list", Value::Null), "c").unwrap();
    let resources = list.result.unwrap()["resources"].as_array().unwrap().clone();
    assert_eq!(resources.len(), 3);
    assert_eq!(resources[0]["mimeType"], "text/markdown");

    let read = m
        .handle_request(request(2, "resources/read", json!({"uri": "gasoline://guide"})), "c")
        .unwrap();
    let contents = &read.result.unwrap()["contents"][0];
    assert_eq!(contents["uri"], "gasoline://guide");
    assert!(contents["text"].as_str().unwrap().contains("restart_on_eviction"));

    let missing = m
        .handle_request(request(3, "resources/read", json!({"uri": "gasoline://nope"})), "c")
        .unwrap();
    assert_eq!(missing.error.unwrap().code, RESOURCE_NOT_FOUND);

    let bad = m.handle_request(request(4, "resources/read", json!({})), "c").unwrap();
    assert_eq!(bad.error.unwrap().code, INVALID_PARAMS);
}
