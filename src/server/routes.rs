//! HTTP endpoints
//!
//! - Extension side: `/pending-queries` long-poll, result posts and
//!   telemetry ingestion
//! - Agent side: `/mcp` JSON-RPC
//! - Daemon control: `/health`, `/shutdown`, `/pilot-status`
//!
//! Handlers never hold a store lock across I/O. Malformed telemetry is
//! rejected per request and never poisons the stores.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use gasoline_core::telemetry::now_rfc3339;
use gasoline_core::{
    validate_log_entries, AnnotationSession, EnhancedAction, ExtensionLog, NetworkBody,
    NetworkWaterfallEntry, PerformanceSnapshot, ShutdownController, ShutdownReason,
    WebSocketEvent,
};
use gasoline_tools::protocol::INTERNAL_ERROR;
use gasoline_tools::{JsonRpcResponse, McpHandler};

/// Request body cap
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
/// Per-agent client id for `/mcp`
pub const CLIENT_HEADER: &str = "x-gasoline-client";
/// Extension version reported on `/pending-queries`
pub const EXTENSION_VERSION_HEADER: &str = "x-gasoline-extension-version";

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub mcp: Arc<McpHandler>,
    pub shutdown: Arc<ShutdownController>,
    pub port: u16,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(mcp: Arc<McpHandler>, shutdown: Arc<ShutdownController>, port: u16) -> Self {
        Self {
            mcp,
            shutdown,
            port,
            started_at: Instant::now(),
        }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/shutdown", post(shutdown))
        .route("/mcp", post(mcp))
        .route("/pending-queries", get(pending_queries))
        .route("/pilot-status", get(pilot_status))
        .route("/dom-result", post(query_result))
        .route("/a11y-result", post(query_result))
        .route("/execute-result", post(query_result))
        .route("/highlight-result", post(query_result))
        .route("/state-result", post(query_result))
        .route("/query-result", post(query_result))
        .route("/enhanced-actions", post(enhanced_actions))
        .route("/network-bodies", post(network_bodies))
        .route("/network-waterfall", post(network_waterfall))
        .route("/websocket-events", post(websocket_events))
        .route("/extension-logs", post(extension_logs))
        .route("/performance", post(performance))
        .route("/vitals", post(vitals))
        .route("/settings", post(settings))
        .route("/annotations", post(annotations))
        .route("/logs", post(ingest_logs).delete(clear_logs))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn received(count: usize) -> Json<Value> {
    Json(json!({"status": "ok", "received": count}))
}

// ---- daemon control ---------------------------------------------------------

async fn health(State(state): State<AppState>) -> Json<Value> {
    let tools = state.mcp.tools();
    let capture = tools.capture();

    let mut buffers = serde_json::to_value(capture.counts()).unwrap_or_else(|_| json!({}));
    if let Some(map) = buffers.as_object_mut() {
        map.insert("logs".to_string(), json!(tools.logs().len()));
    }

    Json(json!({
        "status": "ok",
        "name": "gasoline",
        "service-name": "gasoline",
        "version": capture.server_version(),
        "pid": std::process::id(),
        "port": state.port,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "buffers": buffers,
        "pending_queries": tools.broker().queue_depth(),
        "pilot": capture.pilot_status(Utc::now()),
        "extension_version": capture.extension_version(),
    }))
}

async fn shutdown(State(state): State<AppState>) -> Json<Value> {
    info!(port = state.port, "Shutdown requested over HTTP");
    state.shutdown.request(ShutdownReason::HttpRequest);
    Json(json!({"status": "shutting_down"}))
}

async fn pilot_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.mcp.tools().capture().pilot_status(Utc::now());
    Json(serde_json::to_value(status).unwrap_or_else(|_| json!({})))
}

// ---- MCP ----------------------------------------------------------------------

async fn mcp(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let client_id = header_value(&headers, CLIENT_HEADER).unwrap_or_default();
    let _guard = state.shutdown.register_request();

    // tools/call may park on a browser result
    let handler = Arc::clone(&state.mcp);
    let outcome =
        tokio::task::spawn_blocking(move || handler.handle_message(&body, &client_id)).await;

    match outcome {
        Ok(Some(response)) => Json(response).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(error = %e, "MCP request handler panicked");
            let response = JsonRpcResponse::err(None, INTERNAL_ERROR, "Internal error");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
        }
    }
}

// ---- extension command channel ------------------------------------------------

async fn pending_queries(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let tools = state.mcp.tools();
    let version = header_value(&headers, EXTENSION_VERSION_HEADER);
    tools.capture().record_poll(version.as_deref());
    Json(json!({"queries": tools.broker().pending_queries()}))
}

#[derive(Debug, Deserialize)]
struct ResultBody {
    #[serde(default)]
    id: String,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

async fn query_result(State(state): State<AppState>, Json(body): Json<ResultBody>) -> Response {
    let broker = state.mcp.tools().broker();

    if !body.id.is_empty() {
        let correlation_id = broker.set_query_result_with_status(
            &body.id,
            body.result,
            body.status.as_deref(),
            body.error,
        );
        debug!(query_id = %body.id, correlation_id = ?correlation_id, "Query result received");
        return Json(json!({"status": "ok"})).into_response();
    }

    // Progress updates for async commands arrive without a query id
    match body.correlation_id.filter(|c| !c.is_empty()) {
        Some(correlation_id) => {
            let result = (!body.result.is_null()).then_some(body.result);
            broker.apply_command_result(
                &correlation_id,
                body.status.as_deref().unwrap_or("complete"),
                result,
                body.error,
            );
            debug!(correlation_id = %correlation_id, "Command status received");
            Json(json!({"status": "ok"})).into_response()
        }
        None => bad_request("id or correlation_id is required"),
    }
}

// ---- telemetry ingestion --------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ActionsBody {
    #[serde(default)]
    actions: Vec<EnhancedAction>,
}

async fn enhanced_actions(State(state): State<AppState>, Json(body): Json<ActionsBody>) -> Json<Value> {
    let count = body.actions.len();
    state.mcp.tools().capture().add_actions(body.actions);
    received(count)
}

#[derive(Debug, Deserialize)]
struct BodiesBody {
    #[serde(default)]
    bodies: Vec<NetworkBody>,
}

async fn network_bodies(State(state): State<AppState>, Json(body): Json<BodiesBody>) -> Json<Value> {
    let count = body.bodies.len();
    state.mcp.tools().capture().add_network_bodies(body.bodies);
    received(count)
}

#[derive(Debug, Deserialize)]
struct WaterfallBody {
    #[serde(default)]
    entries: Vec<NetworkWaterfallEntry>,
}

async fn network_waterfall(
    State(state): State<AppState>,
    Json(body): Json<WaterfallBody>,
) -> Json<Value> {
    let count = body.entries.len();
    state.mcp.tools().capture().add_network_waterfall(body.entries);
    received(count)
}

#[derive(Debug, Deserialize)]
struct WebSocketBody {
    #[serde(default)]
    events: Vec<WebSocketEvent>,
}

async fn websocket_events(
    State(state): State<AppState>,
    Json(body): Json<WebSocketBody>,
) -> Json<Value> {
    let count = body.events.len();
    state.mcp.tools().capture().add_websocket_events(body.events);
    received(count)
}

#[derive(Debug, Deserialize)]
struct ExtensionLogsBody {
    #[serde(default)]
    logs: Vec<ExtensionLog>,
}

async fn extension_logs(
    State(state): State<AppState>,
    Json(body): Json<ExtensionLogsBody>,
) -> Json<Value> {
    let count = body.logs.len();
    state.mcp.tools().capture().add_extension_logs(body.logs);
    received(count)
}

#[derive(Debug, Deserialize)]
struct PerformanceBody {
    #[serde(default)]
    snapshots: Vec<PerformanceSnapshot>,
}

async fn performance(
    State(state): State<AppState>,
    Json(body): Json<PerformanceBody>,
) -> Json<Value> {
    let count = body.snapshots.len();
    state.mcp.tools().capture().add_performance_snapshots(body.snapshots);
    received(count)
}

async fn vitals(
    State(state): State<AppState>,
    Json(mut snapshot): Json<PerformanceSnapshot>,
) -> Json<Value> {
    if snapshot.timestamp.is_empty() {
        snapshot.timestamp = now_rfc3339();
    }
    state.mcp.tools().capture().add_performance_snapshots(vec![snapshot]);
    received(1)
}

#[derive(Debug, Default, Deserialize)]
struct SettingsBody {
    #[serde(default)]
    pilot_enabled: Option<bool>,
    #[serde(default)]
    tracked_tab_id: Option<i64>,
    #[serde(default)]
    tracked_url: Option<String>,
    #[serde(default)]
    tracked_title: Option<String>,
}

/// Settings heartbeat. Stamps the pilot freshness even when the toggle is
/// omitted.
async fn settings(State(state): State<AppState>, Json(body): Json<SettingsBody>) -> Json<Value> {
    let capture = state.mcp.tools().capture();
    let enabled = body.pilot_enabled.unwrap_or_else(|| capture.is_pilot_enabled());
    capture.set_pilot_enabled(enabled);

    if body.tracked_tab_id.is_some() || body.tracked_url.is_some() {
        capture.set_tracking(body.tracked_tab_id, body.tracked_url, body.tracked_title);
    }
    debug!(pilot_enabled = enabled, "Settings heartbeat");
    Json(json!({"status": "ok", "pilot_enabled": enabled}))
}

#[derive(Debug, Deserialize)]
struct AnnotationsBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    session: AnnotationSession,
}

async fn annotations(
    State(state): State<AppState>,
    Json(body): Json<AnnotationsBody>,
) -> Json<Value> {
    let store = state.mcp.tools().annotations();
    let mut session = body.session;
    if session.timestamp == 0 {
        session.timestamp = Utc::now().timestamp_millis();
    }
    let count = session.annotations.len();

    if let Some(name) = body.name.filter(|n| !n.is_empty()) {
        store.append_to_named_session(&name, session.clone());
    }
    store.store_session(session);
    received(count)
}

// ---- console logs ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LogsBody {
    #[serde(default)]
    entries: Vec<Value>,
}

async fn ingest_logs(State(state): State<AppState>, Json(body): Json<LogsBody>) -> Response {
    // Validation serializes every entry and the store appends to its file
    let logs = Arc::clone(state.mcp.tools().logs());
    let outcome = tokio::task::spawn_blocking(move || {
        let (valid, rejected) = validate_log_entries(body.entries);
        (logs.add_entries(valid), rejected)
    })
    .await;

    match outcome {
        Ok((count, rejected)) => {
            if rejected > 0 {
                debug!(rejected = rejected, "Dropped invalid log entries");
            }
            Json(json!({"received": count, "rejected": rejected})).into_response()
        }
        Err(e) => {
            warn!(error = %e, "log ingestion task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "log ingestion failed"})),
            )
                .into_response()
        }
    }
}

async fn clear_logs(State(state): State<AppState>) -> Response {
    let logs = Arc::clone(state.mcp.tools().logs());
    match tokio::task::spawn_blocking(move || logs.clear_entries()).await {
        Ok(()) => {
            info!("Console logs cleared over HTTP");
            Json(json!({"status": "cleared"})).into_response()
        }
        Err(e) => {
            warn!(error = %e, "log clear task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "log clear failed"})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests;
