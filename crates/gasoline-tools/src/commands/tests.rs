use super::*;
use crate::handler::test_support::*;
use crate::handler::ToolConfig;
use gasoline_core::{BrokerConfig, PerformanceSnapshot};
use std::sync::Arc;
use std::thread;

fn fast_config() -> ToolConfig {
    ToolConfig {
        sync_wait: Duration::from_millis(50),
        ..ToolConfig::default()
    }
}

#[test]
fn test_correlation_id_format() {
    let id = new_correlation_id("exec");
    let parts: Vec<&str> = id.split('_').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "exec");
    assert!(parts[1].parse::<u128>().is_ok());
    assert!(parts[2].parse::<i64>().unwrap() >= 0);

    let dom = new_correlation_id("dom_click");
    assert!(dom.starts_with("dom_click_"));
    assert_ne!(new_correlation_id("exec"), new_correlation_id("exec"));
}

#[test]
fn test_wants_sync_flags() {
    assert!(wants_sync(&json!({}), true));
    assert!(!wants_sync(&json!({}), false));
    assert!(wants_sync(&json!({"sync": true}), false));
    assert!(!wants_sync(&json!({"sync": false}), true));
    assert!(!wants_sync(&json!({"wait": false}), true));
    assert!(!wants_sync(&json!({"sync": true, "background": true}), true));
    assert!(wants_sync(&json!({"background": false}), true));
}

#[test]
fn test_async_dispatch_returns_queued() {
    let h = handler();
    let dispatched = h.enqueue_command(PendingQuery::new("execute", json!({})), "exec", None, "c");
    let result = h.maybe_wait_for_command(&dispatched, &json!({"sync": false}), true, "Queued execute_js", "c");

    assert!(!result.is_error);
    let data = body(&result);
    assert_eq!(data["status"], "queued");
    assert_eq!(data["queued"], true);
    assert_eq!(data["final"], false);
    assert_eq!(data["correlation_id"], dispatched.correlation_id.as_str());
    assert_eq!(h.broker.queue_depth(), 1);
}

#[test]
fn test_sync_wait_returns_extension_payload() {
    let h = Arc::new(handler());
    connect(&h, true);
    let dispatched = h.enqueue_command(PendingQuery::new("execute", json!({})), "exec", None, "c");

    let broker = Arc::clone(&h.broker);
    let query_id = dispatched.query_id.clone();
    let extension = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        broker.set_query_result(&query_id, json!("2"));
    });

    let result = h.maybe_wait_for_command(&dispatched, &json!({}), true, "execute_js", "c");
    extension.join().unwrap();

    assert!(!result.is_error, "{}", result.first_text());
    let data = body(&result);
    assert_eq!(data["status"], "complete");
    assert_eq!(data["final"], true);
    assert_eq!(data["result"], "2");
    assert_eq!(h.broker.queue_depth(), 0);
    assert_eq!(h.broker.stored_results(), 0);
}

#[test]
fn test_sync_timeout_returns_pending_not_error() {
    let h = handler_with(BrokerConfig::default(), fast_config());
    connect(&h, true);
    let dispatched = h.enqueue_command(PendingQuery::new("dom_action", json!({})), "dom_click", None, "c");
    let result = h.maybe_wait_for_command(&dispatched, &json!({"sync": true}), true, "click", "c");

    assert!(!result.is_error);
    let data = body(&result);
    assert_eq!(data["status"], "pending");
    assert_eq!(data["final"], false);
    assert!(data["message"].as_str().unwrap().contains("command_result"));
    assert_eq!(data["queue_depth"], 1);
    assert_eq!(data["retry_context"]["attempts"], 1);
    assert_eq!(data["retry_context"]["total_wait_ms"], 50);
    assert_eq!(data["retry_context"]["extension_connected"], true);
    assert_eq!(data["suggested_retry_ms"], 2000);
    assert_eq!(h.broker.queue_depth(), 1);
}

#[test]
fn test_sync_wait_is_skipped_when_extension_is_not_polling() {
    let h = handler_with(
        BrokerConfig::default(),
        ToolConfig {
            sync_wait: Duration::from_secs(10),
            ..ToolConfig::default()
        },
    );
    // Settings heartbeat only: the pilot gate accepts, but nothing is polling.
    h.capture.set_pilot_enabled(true);
    assert!(h.check_pilot_ready().unwrap().is_some());

    let dispatched = h.enqueue_command(PendingQuery::new("dom_action", json!({})), "dom_click", None, "c");
    let started = std::time::Instant::now();
    let result = h.maybe_wait_for_command(&dispatched, &json!({}), true, "click", "c");

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(error_code(&result), "no_data");
    assert!(result.first_text().contains("Extension is not connected"));
    assert!(body(&result)["hint"]
        .as_str()
        .unwrap()
        .contains(dispatched.correlation_id.as_str()));
    assert_eq!(h.broker.queue_depth(), 1);
    assert_eq!(
        h.broker.command_result(&dispatched.correlation_id).unwrap().status,
        gasoline_core::CommandStatus::Pending
    );
}

#[test]
fn test_embedded_extension_error_is_surfaced() {
    let h = handler();
    let dispatched = h.enqueue_command(PendingQuery::new("dom_action", json!({})), "dom_click", None, "c");
    h.broker
        .set_query_result(&dispatched.query_id, json!({"success": false, "error": "element_not_found"}));

    let cmd = h.broker.command_result(&dispatched.correlation_id).unwrap();
    let result = h.format_command_result(&cmd);
    assert!(result.is_error);
    assert!(result.first_text().starts_with("FAILED — Command dom_click_"));
    assert_eq!(body(&result)["error"], "element_not_found");
}

#[test]
fn test_error_status_formats_as_failure() {
    let h = handler();
    h.broker.register_command("exec_1", None);
    h.broker
        .apply_command_result("exec_1", "error", None, Some("ReferenceError: x".into()));
    let result = h.format_command_result(&h.broker.command_result("exec_1").unwrap());
    assert!(result.is_error);
    assert_eq!(
        result.first_text().lines().next().unwrap(),
        "FAILED — Command exec_1 error: ReferenceError: x"
    );
    assert_eq!(body(&result)["final"], true);
}

#[test]
fn test_expired_command_reports_ext_timeout() {
    let h = handler();
    h.broker.register_command("nav_1", None);
    h.broker.expire_command("nav_1");
    let result = h.format_command_result(&h.broker.command_result("nav_1").unwrap());
    assert!(result.is_error);
    let data = body(&result);
    assert_eq!(data["error"], "ext_timeout");
    assert_eq!(data["status"], "expired");
    assert!(data["retry"].as_str().is_some());
    assert!(data["message"].as_str().unwrap().contains("expired"));
}

#[test]
fn test_pending_command_format() {
    let h = handler();
    h.broker.register_command("exec_2", None);
    let result = h.format_command_result(&h.broker.command_result("exec_2").unwrap());
    assert!(!result.is_error);
    let data = body(&result);
    assert_eq!(data["status"], "pending");
    assert_eq!(data["final"], false);
    assert!(data.get("completed_at").is_none());
}

#[test]
fn test_pilot_gate_codes() {
    let h = handler();
    assert_eq!(h.check_pilot_ready().unwrap_err().code, ErrorCode::ExtTimeout);

    connect(&h, false);
    let err = h.check_pilot_ready().unwrap_err();
    assert_eq!(err.code, ErrorCode::PilotDisabled);
    assert!(err.hint.unwrap().contains("AI Control"));

    connect(&h, true);
    assert_eq!(h.check_pilot_ready().unwrap(), None);
}

fn snapshot(url: &str, timestamp: &str, load: f64) -> PerformanceSnapshot {
    serde_json::from_value(json!({"url": url, "timestamp": timestamp, "timing": {"load": load}})).unwrap()
}

#[test]
fn test_perf_diff_attached_after_navigation() {
    let h = handler();
    h.capture
        .add_performance_snapshots(vec![snapshot("https://a.test/", "2026-01-01T00:00:00Z", 100.0)]);

    let dispatched = h.enqueue_command(PendingQuery::new("browser_action", json!({})), "nav", None, "c");
    assert!(h.capture.stash_perf_before(&dispatched.correlation_id));

    h.capture
        .add_performance_snapshots(vec![snapshot("https://b.test/", "2026-01-01T00:00:05Z", 250.0)]);

    h.broker.set_query_result(&dispatched.query_id, json!({"success": true}));
    let cmd = h.broker.command_result(&dispatched.correlation_id).unwrap();
    let data = body(&h.format_command_result(&cmd));
    assert_eq!(data["perf_diff"]["timing"]["load"]["delta"], 150.0);
    assert_eq!(data["perf_diff"]["after_url"], "https://b.test/");
}

#[test]
fn test_warning_is_prepended_on_success_only() {
    let ok = ToolHandler::with_warning(crate::response::text_response("done"), Some("WARNING: stale"));
    assert_eq!(ok.first_text(), "WARNING: stale\n\ndone");

    let failed = ToolHandler::with_warning(ToolError::internal("x").to_result(), Some("WARNING: stale"));
    assert!(failed.first_text().starts_with("Error: internal"));
}
