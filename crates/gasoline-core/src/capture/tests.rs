use super::*;
use serde_json::{json, Map};

fn capture() -> Capture {
    Capture::new(BufferCapacities::default(), "0.7.8")
}

fn waterfall(url: &str) -> NetworkWaterfallEntry {
    NetworkWaterfallEntry {
        url: url.to_string(),
        initiator_type: Some("fetch".into()),
        start_time: 0.0,
        duration: 12.5,
        transfer_size: 512,
        page_url: None,
        timestamp: "2026-03-01T12:00:00.000Z".into(),
        extra: Map::new(),
    }
}

fn ws(id: &str, event: &str) -> WebSocketEvent {
    serde_json::from_value(json!({
        "id": id,
        "event": event,
        "url": "wss://example.test/socket",
        "ts": "2026-03-01T12:00:00.000Z",
    }))
    .unwrap()
}

fn perf(url: &str) -> PerformanceSnapshot {
    serde_json::from_value(json!({"url": url, "timestamp": "2026-03-01T12:00:00Z"})).unwrap()
}

#[test]
fn test_stream_capacity_is_enforced() {
    let capture = Capture::new(
        BufferCapacities {
            network_waterfall: 10,
            ..Default::default()
        },
        "0.7.8",
    );
    for i in 0..25 {
        capture.add_network_waterfall(vec![waterfall(&format!("https://x.test/{}", i))]);
    }

    let entries = capture.network_waterfall();
    assert_eq!(entries.len(), 10);
    assert_eq!(entries[0].url, "https://x.test/15");
    assert_eq!(entries[9].url, "https://x.test/24");

    let seq = capture.sequenced_network_waterfall();
    assert_eq!(seq[0].sequence, 16);
    assert_eq!(seq[9].sequence, 25);
}

#[test]
fn test_reads_return_owned_copies() {
    let capture = capture();
    capture.add_network_waterfall(vec![waterfall("https://a.test")]);

    let mut copy = capture.network_waterfall();
    copy[0].url = "mutated".into();
    assert_eq!(capture.network_waterfall()[0].url, "https://a.test");
}

#[test]
fn test_websocket_connection_tracking() {
    let capture = capture();
    capture.add_websocket_events(vec![ws("c1", "open"), ws("c1", "message"), ws("c1", "message")]);
    capture.add_websocket_events(vec![ws("c2", "open")]);

    let mut close: WebSocketEvent = ws("c2", "close");
    close.code = Some(1000);
    close.reason = Some("normal".into());
    capture.add_websocket_events(vec![close]);

    let conns = capture.websocket_connections();
    assert_eq!(conns.len(), 2);
    assert_eq!(conns[0].id, "c1");
    assert_eq!(conns[0].state, ConnectionStatus::Open);
    assert_eq!(conns[0].message_count, 2);
    assert_eq!(conns[1].state, ConnectionStatus::Closed);
    assert_eq!(conns[1].close_code, Some(1000));
    assert_eq!(capture.counts().websocket_connections, 1);
    assert_eq!(capture.counts().websocket_events, 5);
}

#[test]
fn test_tracking_url_change_clears_a11y_cache() {
    let capture = capture();
    capture.set_tracking(Some(7), Some("https://a.test".into()), Some("A".into()));
    capture.cache_a11y("https://a.test", json!({"violations": []}));
    assert!(capture.cached_a11y("https://a.test").is_some());

    capture.set_tracking(Some(7), Some("https://a.test".into()), Some("A again".into()));
    assert!(capture.cached_a11y("https://a.test").is_some());

    capture.set_tracking(Some(7), Some("https://b.test".into()), None);
    assert!(capture.cached_a11y("https://a.test").is_none());

    let (active, tab, url) = capture.tracking_status();
    assert!(active);
    assert_eq!(tab, Some(7));
    assert_eq!(url.as_deref(), Some("https://b.test"));
}

#[test]
fn test_untracked_status() {
    let (active, tab, url) = capture().tracking_status();
    assert!(!active);
    assert!(tab.is_none());
    assert!(url.is_none());
}

#[test]
fn test_pilot_toggle_stamps_settings_channel() {
    let capture = capture();
    assert_eq!(capture.pilot_verdict(Utc::now()), PilotVerdict::Off);

    capture.set_pilot_enabled(false);
    assert_eq!(capture.pilot_verdict(Utc::now()), PilotVerdict::OnPilotDisabled);

    capture.set_pilot_enabled(true);
    capture.record_poll(None);
    assert_eq!(
        capture.pilot_verdict(Utc::now()),
        PilotVerdict::OnPilotEnabled { warning: None }
    );
    assert!(capture.is_pilot_enabled());
}

#[test]
fn test_perf_stash_is_taken_once() {
    let capture = capture();
    assert!(!capture.stash_perf_before("nav_1"));

    capture.add_performance_snapshots(vec![perf("https://a.test")]);
    assert!(capture.stash_perf_before("nav_1"));
    assert_eq!(capture.take_perf_before("nav_1").unwrap().url, "https://a.test");
    assert!(capture.take_perf_before("nav_1").is_none());
}

#[test]
fn test_perf_stash_is_bounded() {
    let capture = capture();
    capture.add_performance_snapshots(vec![perf("https://a.test")]);
    for i in 0..(MAX_PERF_STASH + 5) {
        capture.stash_perf_before(&format!("nav_{}", i));
    }
    assert!(capture.take_perf_before("nav_0").is_none());
    assert!(capture.take_perf_before(&format!("nav_{}", MAX_PERF_STASH + 4)).is_some());
}

#[test]
fn test_version_mismatch_compares_major_minor() {
    let capture = capture();
    assert!(capture.version_mismatch().is_none());

    capture.record_poll(Some("0.7.2"));
    assert!(capture.version_mismatch().is_none());

    capture.set_extension_version("0.8.0");
    assert_eq!(
        capture.version_mismatch(),
        Some(("0.8.0".to_string(), "0.7.8".to_string()))
    );

    capture.set_extension_version("garbage");
    assert!(capture.version_mismatch().is_none());
}

#[test]
fn test_clear_keeps_sequence_counters() {
    let capture = capture();
    capture.add_actions(vec![EnhancedAction::now("click"), EnhancedAction::now("input")]);
    capture.clear(Stream::Actions);
    assert!(capture.actions().is_empty());

    capture.add_actions(vec![EnhancedAction::now("scroll")]);
    assert_eq!(capture.sequenced_actions()[0].sequence, 3);
    assert_eq!(capture.actions_total_added(), 3);
}

#[test]
fn test_clear_all() {
    let capture = capture();
    capture.add_network_waterfall(vec![waterfall("https://a.test")]);
    capture.add_websocket_events(vec![ws("c1", "open")]);
    capture.add_extension_logs(vec![ExtensionLog {
        level: "info".into(),
        message: "hello".into(),
        source: None,
        category: None,
        data: None,
        timestamp: String::new(),
    }]);
    capture.clear(Stream::All);
    assert_eq!(capture.counts(), BufferCounts::default());
}

#[test]
fn test_stream_names_parse() {
    for name in Stream::NAMES {
        assert!(Stream::parse(name).is_some(), "{} should parse", name);
    }
    assert!(Stream::parse("bogus").is_none());
}

#[test]
fn test_extension_connected_follows_polls() {
    let capture = capture();
    let now = Utc::now();
    assert!(!capture.is_extension_connected(now));

    capture.record_poll(Some("0.7.8"));
    assert!(capture.is_extension_connected(Utc::now()));
    assert!(!capture.is_extension_connected(Utc::now() + chrono::Duration::seconds(11)));
    assert_eq!(capture.extension_version().as_deref(), Some("0.7.8"));
}
