use super::*;
use axum::body::{to_bytes, Body};
use axum::http::Request;
use gasoline_core::{
    AnnotationStore, BrokerConfig, BufferCapacities, Capture, CommandStatus, LogStore,
    PendingQuery, QueryBroker,
};
use gasoline_tools::ToolHandler;
use std::time::Duration;
use tower::ServiceExt;

fn test_state() -> AppState {
    let tools = ToolHandler::new(
        Arc::new(Capture::new(BufferCapacities::default(), "0.7.8")),
        Arc::new(LogStore::in_memory(100)),
        Arc::new(QueryBroker::new(BrokerConfig::default())),
        Arc::new(AnnotationStore::new()),
    );
    AppState::new(
        Arc::new(McpHandler::new(Arc::new(tools), "0.7.8")),
        ShutdownController::new(),
        7890,
    )
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_reports_service_and_buffers() {
    let state = test_state();
    let (status, body) = send(&state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service-name"], "gasoline");
    assert_eq!(body["version"], "0.7.8");
    assert_eq!(body["port"], 7890);
    assert_eq!(body["buffers"]["logs"], 0);
    assert_eq!(body["buffers"]["actions"], 0);
    assert_eq!(body["pending_queries"], 0);
    assert_eq!(body["pilot"]["source"], "never_connected");
}

#[tokio::test]
async fn test_pending_queries_stamps_poll_and_version() {
    let state = test_state();
    let broker = state.mcp.tools().broker();
    let id = broker.create_pending_query(
        PendingQuery::new("dom_action", json!({"action": "click"})),
        Duration::from_secs(5),
        "c",
    );

    let request = Request::builder()
        .uri("/pending-queries")
        .header(EXTENSION_VERSION_HEADER, "0.7.8")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queries"][0]["id"], id);
    assert_eq!(body["queries"][0]["type"], "dom_action");

    let capture = state.mcp.tools().capture();
    assert!(capture.last_poll_at().is_some());
    assert_eq!(capture.extension_version().as_deref(), Some("0.7.8"));
}

#[tokio::test]
async fn test_result_post_completes_command() {
    let state = test_state();
    let broker = state.mcp.tools().broker();
    let id = broker.create_pending_query(
        PendingQuery::new("execute", json!({"script": "1+1"})).with_correlation("exec_1_1"),
        Duration::from_secs(5),
        "c",
    );

    let (status, _) = send(&state, post("/execute-result", json!({"id": id, "result": "2"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(broker.queue_depth(), 0);

    let command = broker.command_result("exec_1_1").unwrap();
    assert_eq!(command.status, CommandStatus::Complete);
    assert_eq!(command.result, Some(json!("2")));
    assert_eq!(broker.take_query_result(&id, "c"), Some(json!("2")));
}

#[tokio::test]
async fn test_correlation_only_result_updates_command() {
    let state = test_state();
    let broker = state.mcp.tools().broker();
    broker.register_command("upload_1_1", None);

    let body = json!({"correlation_id": "upload_1_1", "status": "error", "error": "denied"});
    let (status, _) = send(&state, post("/query-result", body)).await;
    assert_eq!(status, StatusCode::OK);
    let command = broker.command_result("upload_1_1").unwrap();
    assert_eq!(command.status, CommandStatus::Error);
    assert_eq!(command.error.as_deref(), Some("denied"));

    let (status, body) = send(&state, post("/dom-result", json!({"result": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "id or correlation_id is required");
}

#[tokio::test]
async fn test_mcp_request_and_notification() {
    let state = test_state();
    let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
    let (status, body) = send(&state, post("/mcp", init)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["serverInfo"]["name"], "gasoline");

    let note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
    let (status, body) = send(&state, post("/mcp", note)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .body(Body::from("{broken"))
        .unwrap();
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn test_settings_heartbeat_drives_pilot_status() {
    let state = test_state();
    let (_, body) = send(&state, post("/settings", json!({"pilot_enabled": true}))).await;
    assert_eq!(body["pilot_enabled"], true);

    let (status, body) = send(&state, get("/pilot-status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], true);
    assert_eq!(body["source"], "settings_heartbeat");

    // Heartbeat without the toggle keeps the current value
    let (_, body) = send(&state, post("/settings", json!({"tracked_tab_id": 4, "tracked_url": "https://a.test"}))).await;
    assert_eq!(body["pilot_enabled"], true);
    assert_eq!(state.mcp.tools().capture().tracking().tracked_tab_id, Some(4));
}

#[tokio::test]
async fn test_telemetry_ingestion() {
    let state = test_state();
    let actions = json!({"actions": [
        {"type": "click", "timestamp": 1},
        {"type": "input", "timestamp": 2, "value": "x"}
    ]});
    let (_, body) = send(&state, post("/enhanced-actions", actions)).await;
    assert_eq!(body["received"], 2);

    let events = json!({"events": [
        {"id": "ws1", "event": "open", "url": "wss://a.test"},
        {"id": "ws1", "event": "message", "data": "hi"}
    ]});
    send(&state, post("/websocket-events", events)).await;
    send(&state, post("/vitals", json!({"url": "https://a.test", "vitals": {"lcp": 1200}}))).await;
    send(&state, post("/extension-logs", json!({"logs": [{"message": "boot"}]}))).await;

    let counts = state.mcp.tools().capture().counts();
    assert_eq!(counts.actions, 2);
    assert_eq!(counts.websocket_events, 2);
    assert_eq!(counts.websocket_connections, 1);
    assert_eq!(counts.performance, 1);
    assert_eq!(counts.extension_logs, 1);
    let latest = state.mcp.tools().capture().latest_performance().unwrap();
    assert!(!latest.timestamp.is_empty());
}

#[tokio::test]
async fn test_malformed_telemetry_is_rejected() {
    let state = test_state();
    let (status, _) = send(&state, post("/enhanced-actions", json!({"actions": [{"nope": 1}]}))).await;
    assert!(status.is_client_error());
    assert_eq!(state.mcp.tools().capture().counts().actions, 0);
}

#[tokio::test]
async fn test_log_ingest_and_clear() {
    let state = test_state();
    let entries = json!({"entries": [
        {"level": "error", "message": "boom"},
        {"level": "shout", "message": "bad level"},
        {"message": "no level"}
    ]});
    let (_, body) = send(&state, post("/logs", entries)).await;
    assert_eq!(body["received"], 1);
    assert_eq!(body["rejected"], 2);
    assert_eq!(state.mcp.tools().logs().len(), 1);

    let request = Request::builder()
        .method("DELETE")
        .uri("/logs")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.mcp.tools().logs().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn test_log_ingest_writes_file_backed_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gasoline.jsonl");
    let tools = ToolHandler::new(
        Arc::new(Capture::new(BufferCapacities::default(), "0.7.8")),
        Arc::new(LogStore::open(&path, 100, None)),
        Arc::new(QueryBroker::new(BrokerConfig::default())),
        Arc::new(AnnotationStore::new()),
    );
    let state = AppState::new(
        Arc::new(McpHandler::new(Arc::new(tools), "0.7.8")),
        ShutdownController::new(),
        7890,
    );

    let entries = json!({"entries": [
        {"level": "warn", "message": "first"},
        {"level": "info", "message": "second"}
    ]});
    let (status, body) = send(&state, post("/logs", entries)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], 2);

    let lines: Vec<String> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("first"));
    assert!(lines[1].contains("second"));

    let request = Request::builder()
        .method("DELETE")
        .uri("/logs")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
}

#[tokio::test]
async fn test_named_annotations_are_stored() {
    let state = test_state();
    let body = json!({
        "name": "checkout",
        "tab_id": 3,
        "page_url": "https://a.test/cart",
        "annotations": [{"text": "wrong total"}]
    });
    let (_, resp) = send(&state, post("/annotations", body)).await;
    assert_eq!(resp["received"], 1);

    let store = state.mcp.tools().annotations();
    assert_eq!(store.session(3).unwrap().page_url, "https://a.test/cart");
    assert_eq!(store.named_session("checkout").unwrap().pages.len(), 1);
}

#[tokio::test]
async fn test_shutdown_requests_stop() {
    let state = test_state();
    let (status, body) = send(&state, post("/shutdown", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "shutting_down");
    assert!(state.shutdown.is_shutting_down());
    assert_eq!(state.shutdown.reason(), Some(ShutdownReason::HttpRequest));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let state = test_state();
    let padding = "x".repeat(MAX_BODY_BYTES + 1);
    let body = json!({"entries": [{"level": "info", "message": padding}]});
    let (status, _) = send(&state, post("/logs", body)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
