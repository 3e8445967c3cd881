//! End-to-end tool scenarios
//!
//! Drives the MCP tool surface the way an agent and the extension would:
//! - Sync and async `interact` commands answered by a simulated extension
//! - Readiness gating (pilot toggle, freshness of the two liveness channels)
//! - Element index targeting scoped per client
//! - Named annotation sessions filtered by the last draw start

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use gasoline_core::{
    classify, AnnotationSession, AnnotationStore, BrokerConfig, BufferCapacities, Capture,
    LogStore, PilotVerdict, QueryBroker, ReadinessInput,
};
use gasoline_tools::{McpHandler, ToolConfig, ToolHandler, ToolResult};

fn tools() -> Arc<ToolHandler> {
    Arc::new(
        ToolHandler::new(
            Arc::new(Capture::new(BufferCapacities::default(), "0.7.8")),
            Arc::new(LogStore::in_memory(1000)),
            Arc::new(QueryBroker::new(BrokerConfig::default())),
            Arc::new(AnnotationStore::new()),
        )
        .with_config(ToolConfig {
            sync_wait: Duration::from_secs(2),
            ..ToolConfig::default()
        }),
    )
}

fn connect(tools: &ToolHandler, pilot_enabled: bool) {
    tools.capture().set_pilot_enabled(pilot_enabled);
    tools.capture().record_poll(Some("0.7.8"));
}

fn body(result: &ToolResult) -> Value {
    result
        .json_body()
        .unwrap_or_else(|| panic!("no JSON body in {:?}", result.first_text()))
}

fn error_code(result: &ToolResult) -> String {
    assert!(result.is_error, "expected error, got {:?}", result.first_text());
    body(result)["error"].as_str().unwrap_or_default().to_string()
}

/// Simulated extension: answers the first pending query it sees
fn answer_next_query(tools: &Arc<ToolHandler>, payload: Value) -> JoinHandle<bool> {
    let broker = Arc::clone(tools.broker());
    thread::spawn(move || {
        for _ in 0..200 {
            if let Some(q) = broker.pending_queries().into_iter().next() {
                broker.set_query_result_with_status(&q.id, payload, Some("complete"), None);
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    })
}

// ============================================================================
// Command Round-Trip Tests
// ============================================================================

#[test]
fn test_sync_execute_js_returns_extension_result() {
    let tools = tools();
    connect(&tools, true);

    let extension = answer_next_query(&tools, json!({"success": true, "result": 2}));
    let result = tools.call(
        "interact",
        &json!({"action": "execute_js", "script": "1+1"}),
        "agent",
    );
    assert!(extension.join().unwrap());

    assert!(!result.is_error, "{}", result.first_text());
    let data = body(&result);
    assert_eq!(data["status"], "complete");
    assert_eq!(data["final"], true);
    assert_eq!(data["result"]["result"], 2);

    assert_eq!(tools.broker().queue_depth(), 0);
    assert_eq!(tools.broker().stored_results(), 0);
}

#[test]
fn test_async_command_is_polled_to_completion() {
    let tools = tools();
    connect(&tools, true);

    let queued = tools.call(
        "interact",
        &json!({"action": "execute_js", "script": "document.title", "sync": false}),
        "agent",
    );
    let data = body(&queued);
    assert_eq!(data["status"], "queued");
    let correlation_id = data["correlation_id"].as_str().unwrap().to_string();

    let poll = || {
        body(&tools.call(
            "observe",
            &json!({"what": "command_result", "correlation_id": correlation_id}),
            "agent",
        ))
    };
    assert_eq!(poll()["status"], "pending");

    let q = tools.broker().pending_queries().remove(0);
    assert_eq!(q.correlation_id.as_deref(), Some(correlation_id.as_str()));
    tools
        .broker()
        .set_query_result_with_status(&q.id, json!({"result": "Home"}), Some("complete"), None);

    let done = poll();
    assert_eq!(done["status"], "complete");
    assert_eq!(done["final"], true);
    assert_eq!(done["result"]["result"], "Home");
}

#[test]
fn test_tools_call_over_json_rpc() {
    let tools = tools();
    connect(&tools, true);
    let mcp = McpHandler::new(Arc::clone(&tools), "0.7.8");

    let listed = mcp
        .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#, "agent")
        .unwrap();
    let names: Vec<&str> = listed.result.as_ref().unwrap()["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names.len(), 5);
    assert!(names.contains(&"interact"));

    let call = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {"name": "interact", "arguments": {"action": "navigate", "url": "https://example.test", "sync": false}},
    });
    let response = mcp.handle_message(&call.to_string(), "agent").unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["isError"], false);
    let text = result["content"][0]["text"].as_str().unwrap();
    let (_, data) = text.split_once('\n').unwrap();
    let data: Value = serde_json::from_str(data).unwrap();
    assert_eq!(data["status"], "queued");
    assert_eq!(tools.broker().queue_depth(), 1);
}

// ============================================================================
// Readiness Tests
// ============================================================================

#[test]
fn test_readiness_table() {
    let now = Utc::now();
    let fresh = Some(now - chrono::Duration::seconds(1));
    let stale = Some(now - chrono::Duration::seconds(30));

    let verdict = |pilot_enabled, last_poll_at, pilot_updated_at| {
        classify(
            &ReadinessInput {
                pilot_enabled,
                last_poll_at,
                pilot_updated_at,
            },
            now,
        )
    };

    assert_eq!(verdict(true, None, None), PilotVerdict::Off);
    assert_eq!(verdict(false, fresh, None), PilotVerdict::OnPilotDisabled);
    assert_eq!(verdict(false, stale, fresh), PilotVerdict::OnPilotDisabled);
    assert_eq!(
        verdict(true, fresh, stale),
        PilotVerdict::OnPilotEnabled { warning: None }
    );

    let settings_only = verdict(true, stale, fresh);
    assert!(settings_only.should_accept());
    assert!(settings_only
        .warning()
        .unwrap()
        .starts_with("WARNING: Extension polling is stale"));

    let both_stale = verdict(true, stale, stale);
    assert!(both_stale.should_accept());
    assert!(both_stale.warning().is_some());
}

#[test]
fn test_disabled_pilot_rejects_without_queueing() {
    let tools = tools();
    connect(&tools, false);

    let result = tools.call(
        "interact",
        &json!({"action": "execute_js", "script": "1"}),
        "agent",
    );
    assert_eq!(error_code(&result), "pilot_disabled");
    assert_eq!(tools.broker().queue_depth(), 0);
    assert!(tools.broker().pending_queries().is_empty());
}

#[test]
fn test_relative_upload_path_is_refused() {
    let tools = tools();
    connect(&tools, true);

    let result = tools.call(
        "interact",
        &json!({"action": "upload", "file_path": "./x"}),
        "agent",
    );
    assert_eq!(error_code(&result), "path_not_allowed");
    assert_eq!(tools.broker().queue_depth(), 0);
}

// ============================================================================
// Element Index Tests
// ============================================================================

#[test]
fn test_element_index_is_scoped_to_the_listing_client() {
    let tools = tools();
    connect(&tools, true);

    let extension = answer_next_query(
        &tools,
        json!({"elements": [{"selector": "#search"}, {"selector": "text=Checkout"}]}),
    );
    let listed = tools.call("interact", &json!({"action": "list_interactive"}), "agent-a");
    assert!(extension.join().unwrap());
    assert_eq!(body(&listed)["status"], "complete");

    let other = tools.call(
        "interact",
        &json!({"action": "click", "index": 1, "sync": false}),
        "agent-b",
    );
    assert_eq!(error_code(&other), "invalid_param");
    assert_eq!(tools.broker().queue_depth(), 0);

    let own = tools.call(
        "interact",
        &json!({"action": "click", "index": 1, "sync": false}),
        "agent-a",
    );
    assert!(!own.is_error, "{}", own.first_text());
    let q = tools.broker().pending_queries().remove(0);
    assert_eq!(q.params["selector"], "text=Checkout");
}

// ============================================================================
// Annotation Tests
// ============================================================================

fn page(url: &str, tab_id: i64) -> AnnotationSession {
    AnnotationSession {
        annotations: vec![json!({"text": "too small"})],
        screenshot_path: None,
        page_url: url.to_string(),
        tab_id,
        timestamp: Utc::now().timestamp_millis(),
    }
}

#[test]
fn test_named_session_only_counts_pages_after_draw_start() {
    let tools = tools();
    let store = tools.annotations();
    let now = Utc::now().timestamp_millis();

    store.append_to_named_session_at("checkout", page("https://shop.test/cart", 1), now - 2_000);
    store.mark_draw_started_at(now - 1_000);
    assert!(store.named_session("checkout").is_some());
    assert!(store.named_session_since_draw("checkout").is_none());

    let empty = body(&tools.call(
        "observe",
        &json!({"what": "annotations", "annotation_session": "checkout"}),
        "agent",
    ));
    assert_eq!(empty["pages"], json!([]));

    store.append_to_named_session_at("checkout", page("https://shop.test/pay", 1), now);
    let session = store.named_session_since_draw("checkout").unwrap();
    assert_eq!(session.pages.len(), 2);

    let observed = body(&tools.call(
        "observe",
        &json!({"what": "annotations", "annotation_session": "checkout"}),
        "agent",
    ));
    assert_eq!(observed["pages"].as_array().unwrap().len(), 2);
    assert_eq!(observed["pages"][1]["page_url"], "https://shop.test/pay");
}
