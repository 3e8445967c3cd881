//! Capture store: bounded telemetry streams plus tracking state
//!
//! Every telemetry stream posted by the extension lands in its own
//! [`RingBuffer`]. The store also owns the tracked tab, the pilot toggle
//! with its two liveness timestamps, the accessibility-audit cache, the
//! "before" performance snapshots stashed for perf-diff, and the reported
//! extension version. Everything sits behind one `RwLock`; reads return
//! owned copies.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::buffers::RingBuffer;
use crate::pagination::Sequenced;
use crate::readiness::{self, PilotStatus, PilotVerdict, ReadinessInput};
use crate::telemetry::{
    ConnectionState, ConnectionStatus, EnhancedAction, ExtensionLog, NetworkBody,
    NetworkWaterfallEntry, PerformanceSnapshot, WebSocketEvent,
};

/// Maximum number of stashed "before" performance snapshots
const MAX_PERF_STASH: usize = 50;
/// No poll for this long means the extension is disconnected
pub const EXTENSION_DISCONNECT_THRESHOLD: chrono::Duration = chrono::Duration::seconds(10);

/// Per-stream ring buffer capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferCapacities {
    /// Console logs (held by the log store)
    pub logs: usize,
    /// Extension-internal logs
    pub extension_logs: usize,
    /// Resource timing entries
    pub network_waterfall: usize,
    /// Request/response bodies
    pub network_bodies: usize,
    /// WebSocket events
    pub websocket_events: usize,
    /// User and AI actions
    pub actions: usize,
    /// Performance snapshots
    pub performance: usize,
}

impl Default for BufferCapacities {
    fn default() -> Self {
        Self {
            logs: 1000,
            extension_logs: 500,
            network_waterfall: 1000,
            network_bodies: 100,
            websocket_events: 500,
            actions: 200,
            performance: 20,
        }
    }
}

/// Streams that can be cleared individually
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Network waterfall and bodies
    Network,
    /// WebSocket events and connection table
    WebSocket,
    /// Actions
    Actions,
    /// Extension logs
    ExtensionLogs,
    /// Performance snapshots
    Performance,
    /// Every capture stream
    All,
}

impl Stream {
    /// Valid names accepted by [`Stream::parse`]
    pub const NAMES: &'static [&'static str] = &[
        "actions",
        "all",
        "extension_logs",
        "network",
        "performance",
        "websocket",
    ];

    /// Parse a stream name
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "network" => Some(Self::Network),
            "websocket" => Some(Self::WebSocket),
            "actions" => Some(Self::Actions),
            "extension_logs" => Some(Self::ExtensionLogs),
            "performance" => Some(Self::Performance),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

/// Tracked-tab state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackingState {
    /// Tab the extension is tracking
    pub tracked_tab_id: Option<i64>,
    /// URL of the tracked tab
    pub tracked_url: Option<String>,
    /// Title of the tracked tab
    pub tracked_title: Option<String>,
    /// Most recent URL seen; changes invalidate the a11y cache
    pub last_known_url: Option<String>,
}

/// Live item counts per stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferCounts {
    /// Extension logs
    pub extension_logs: usize,
    /// Network waterfall
    pub network_waterfall: usize,
    /// Network bodies
    pub network_bodies: usize,
    /// WebSocket events
    pub websocket_events: usize,
    /// Open WebSocket connections
    pub websocket_connections: usize,
    /// Actions
    pub actions: usize,
    /// Performance snapshots
    pub performance: usize,
}

#[derive(Debug)]
struct CaptureState {
    extension_logs: RingBuffer<ExtensionLog>,
    network_waterfall: RingBuffer<NetworkWaterfallEntry>,
    network_bodies: RingBuffer<NetworkBody>,
    websocket_events: RingBuffer<WebSocketEvent>,
    actions: RingBuffer<EnhancedAction>,
    performance: RingBuffer<PerformanceSnapshot>,

    connections: HashMap<String, ConnectionState>,
    tracking: TrackingState,

    pilot_enabled: bool,
    pilot_updated_at: Option<DateTime<Utc>>,
    last_poll_at: Option<DateTime<Utc>>,

    a11y_cache: HashMap<String, Value>,
    perf_stash: HashMap<String, PerformanceSnapshot>,
    perf_stash_order: VecDeque<String>,

    extension_version: Option<String>,
}

/// Thread-safe capture store
#[derive(Debug)]
pub struct Capture {
    state: RwLock<CaptureState>,
    server_version: String,
}

impl Capture {
    /// Create an empty store
    #[must_use]
    pub fn new(capacities: BufferCapacities, server_version: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(CaptureState {
                extension_logs: RingBuffer::new(capacities.extension_logs),
                network_waterfall: RingBuffer::new(capacities.network_waterfall),
                network_bodies: RingBuffer::new(capacities.network_bodies),
                websocket_events: RingBuffer::new(capacities.websocket_events),
                actions: RingBuffer::new(capacities.actions),
                performance: RingBuffer::new(capacities.performance),
                connections: HashMap::new(),
                tracking: TrackingState::default(),
                pilot_enabled: false,
                pilot_updated_at: None,
                last_poll_at: None,
                a11y_cache: HashMap::new(),
                perf_stash: HashMap::new(),
                perf_stash_order: VecDeque::new(),
                extension_version: None,
            }),
            server_version: server_version.into(),
        }
    }

    // ---- ingestion --------------------------------------------------------

    /// Append extension-internal logs
    pub fn add_extension_logs(&self, logs: Vec<ExtensionLog>) {
        self.state.write().extension_logs.push_batch(logs);
    }

    /// Append resource timing entries
    pub fn add_network_waterfall(&self, entries: Vec<NetworkWaterfallEntry>) {
        self.state.write().network_waterfall.push_batch(entries);
    }

    /// Append request/response bodies
    pub fn add_network_bodies(&self, bodies: Vec<NetworkBody>) {
        self.state.write().network_bodies.push_batch(bodies);
    }

    /// Append WebSocket events and update the connection table
    pub fn add_websocket_events(&self, events: Vec<WebSocketEvent>) {
        let mut state = self.state.write();
        for event in &events {
            if event.id.is_empty() {
                continue;
            }
            let conn = state
                .connections
                .entry(event.id.clone())
                .or_insert_with(|| ConnectionState {
                    id: event.id.clone(),
                    url: event.url.clone(),
                    state: ConnectionStatus::Open,
                    close_code: None,
                    close_reason: None,
                    message_count: 0,
                    last_activity: event.timestamp.clone(),
                });
            conn.last_activity = event.timestamp.clone();
            if conn.url.is_none() {
                conn.url = event.url.clone();
            }
            match event.event.as_str() {
                "open" => conn.state = ConnectionStatus::Open,
                "close" | "error" => {
                    conn.state = ConnectionStatus::Closed;
                    conn.close_code = event.code;
                    conn.close_reason = event.reason.clone();
                }
                "message" => conn.message_count += 1,
                _ => {}
            }
        }
        state.websocket_events.push_batch(events);
    }

    /// Append user/AI actions
    pub fn add_actions(&self, actions: Vec<EnhancedAction>) {
        self.state.write().actions.push_batch(actions);
    }

    /// Append performance snapshots
    pub fn add_performance_snapshots(&self, snapshots: Vec<PerformanceSnapshot>) {
        self.state.write().performance.push_batch(snapshots);
    }

    // ---- reads --------------------------------------------------------------

    /// Copy of the extension logs
    #[must_use]
    pub fn extension_logs(&self) -> Vec<ExtensionLog> {
        self.state.read().extension_logs.snapshot()
    }

    /// Copy of the network waterfall
    #[must_use]
    pub fn network_waterfall(&self) -> Vec<NetworkWaterfallEntry> {
        self.state.read().network_waterfall.snapshot()
    }

    /// Copy of the network bodies
    #[must_use]
    pub fn network_bodies(&self) -> Vec<NetworkBody> {
        self.state.read().network_bodies.snapshot()
    }

    /// Copy of the WebSocket events
    #[must_use]
    pub fn websocket_events(&self) -> Vec<WebSocketEvent> {
        self.state.read().websocket_events.snapshot()
    }

    /// Copy of the actions
    #[must_use]
    pub fn actions(&self) -> Vec<EnhancedAction> {
        self.state.read().actions.snapshot()
    }

    /// Copy of the performance snapshots
    #[must_use]
    pub fn performance_snapshots(&self) -> Vec<PerformanceSnapshot> {
        self.state.read().performance.snapshot()
    }

    /// Newest performance snapshot
    #[must_use]
    pub fn latest_performance(&self) -> Option<PerformanceSnapshot> {
        self.state.read().performance.last().cloned()
    }

    /// Connection table, sorted by id
    #[must_use]
    pub fn websocket_connections(&self) -> Vec<ConnectionState> {
        let state = self.state.read();
        let mut conns: Vec<_> = state.connections.values().cloned().collect();
        conns.sort_by(|a, b| a.id.cmp(&b.id));
        conns
    }

    /// Extension logs with sequence numbers
    #[must_use]
    pub fn sequenced_extension_logs(&self) -> Vec<Sequenced<ExtensionLog>> {
        self.state
            .read()
            .extension_logs
            .sequenced(|l| l.timestamp.clone())
    }

    /// Network waterfall with sequence numbers
    #[must_use]
    pub fn sequenced_network_waterfall(&self) -> Vec<Sequenced<NetworkWaterfallEntry>> {
        self.state
            .read()
            .network_waterfall
            .sequenced(|e| e.timestamp.clone())
    }

    /// Network bodies with sequence numbers
    #[must_use]
    pub fn sequenced_network_bodies(&self) -> Vec<Sequenced<NetworkBody>> {
        self.state
            .read()
            .network_bodies
            .sequenced(|b| b.timestamp.clone())
    }

    /// WebSocket events with sequence numbers
    #[must_use]
    pub fn sequenced_websocket_events(&self) -> Vec<Sequenced<WebSocketEvent>> {
        self.state
            .read()
            .websocket_events
            .sequenced(|e| e.timestamp.clone())
    }

    /// Actions with sequence numbers
    #[must_use]
    pub fn sequenced_actions(&self) -> Vec<Sequenced<EnhancedAction>> {
        self.state
            .read()
            .actions
            .sequenced(EnhancedAction::timestamp_rfc3339)
    }

    /// Live item counts
    #[must_use]
    pub fn counts(&self) -> BufferCounts {
        let state = self.state.read();
        BufferCounts {
            extension_logs: state.extension_logs.len(),
            network_waterfall: state.network_waterfall.len(),
            network_bodies: state.network_bodies.len(),
            websocket_events: state.websocket_events.len(),
            websocket_connections: state
                .connections
                .values()
                .filter(|c| c.state == ConnectionStatus::Open)
                .count(),
            actions: state.actions.len(),
            performance: state.performance.len(),
        }
    }

    /// Total items ever added to the actions stream
    #[must_use]
    pub fn actions_total_added(&self) -> u64 {
        self.state.read().actions.total_added()
    }

    /// Drop the live items of a stream. Sequence counters keep counting.
    pub fn clear(&self, stream: Stream) {
        let mut state = self.state.write();
        let all = stream == Stream::All;
        if all || stream == Stream::Network {
            state.network_waterfall.clear();
            state.network_bodies.clear();
        }
        if all || stream == Stream::WebSocket {
            state.websocket_events.clear();
            state.connections.clear();
        }
        if all || stream == Stream::Actions {
            state.actions.clear();
        }
        if all || stream == Stream::ExtensionLogs {
            state.extension_logs.clear();
        }
        if all || stream == Stream::Performance {
            state.performance.clear();
            state.perf_stash.clear();
            state.perf_stash_order.clear();
        }
    }

    // ---- tracking -----------------------------------------------------------

    /// Record the tracked tab. A URL change clears the a11y cache.
    pub fn set_tracking(&self, tab_id: Option<i64>, url: Option<String>, title: Option<String>) {
        let mut state = self.state.write();
        if url.is_some() && url != state.tracking.last_known_url {
            if !state.a11y_cache.is_empty() {
                debug!(url = ?url, "page URL changed, clearing a11y cache");
            }
            state.a11y_cache.clear();
            state.tracking.last_known_url = url.clone();
        }
        state.tracking.tracked_tab_id = tab_id;
        state.tracking.tracked_url = url;
        state.tracking.tracked_title = title;
    }

    /// `(active, tab_id, url)` of the tracked tab
    #[must_use]
    pub fn tracking_status(&self) -> (bool, Option<i64>, Option<String>) {
        let state = self.state.read();
        (
            state.tracking.tracked_tab_id.is_some(),
            state.tracking.tracked_tab_id,
            state.tracking.tracked_url.clone(),
        )
    }

    /// Full tracking state
    #[must_use]
    pub fn tracking(&self) -> TrackingState {
        self.state.read().tracking.clone()
    }

    /// Cached accessibility audit for `url`
    #[must_use]
    pub fn cached_a11y(&self, url: &str) -> Option<Value> {
        self.state.read().a11y_cache.get(url).cloned()
    }

    /// Cache an accessibility audit for `url`
    pub fn cache_a11y(&self, url: impl Into<String>, audit: Value) {
        self.state.write().a11y_cache.insert(url.into(), audit);
    }

    // ---- pilot / liveness ---------------------------------------------------

    /// Set the pilot toggle and stamp `pilot_updated_at`
    pub fn set_pilot_enabled(&self, enabled: bool) {
        let mut state = self.state.write();
        state.pilot_enabled = enabled;
        state.pilot_updated_at = Some(Utc::now());
    }

    /// Current pilot toggle
    #[must_use]
    pub fn is_pilot_enabled(&self) -> bool {
        self.state.read().pilot_enabled
    }

    /// Stamp `last_poll_at`; records the extension version when supplied
    pub fn record_poll(&self, extension_version: Option<&str>) {
        let mut state = self.state.write();
        state.last_poll_at = Some(Utc::now());
        if let Some(version) = extension_version.filter(|v| !v.is_empty()) {
            state.extension_version = Some(version.to_string());
        }
    }

    /// Time of the last extension poll
    #[must_use]
    pub fn last_poll_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_poll_at
    }

    /// Whether the extension polled within [`EXTENSION_DISCONNECT_THRESHOLD`] of `now`
    #[must_use]
    pub fn is_extension_connected(&self, now: DateTime<Utc>) -> bool {
        self.last_poll_at()
            .is_some_and(|at| now - at < EXTENSION_DISCONNECT_THRESHOLD)
    }

    /// Readiness inputs read under one lock acquisition
    #[must_use]
    pub fn readiness_input(&self) -> ReadinessInput {
        let state = self.state.read();
        ReadinessInput {
            pilot_enabled: state.pilot_enabled,
            last_poll_at: state.last_poll_at,
            pilot_updated_at: state.pilot_updated_at,
        }
    }

    /// Readiness verdict at `now`
    #[must_use]
    pub fn pilot_verdict(&self, now: DateTime<Utc>) -> PilotVerdict {
        readiness::classify(&self.readiness_input(), now)
    }

    /// Pilot status at `now`
    #[must_use]
    pub fn pilot_status(&self, now: DateTime<Utc>) -> PilotStatus {
        readiness::pilot_status(&self.readiness_input(), now)
    }

    // ---- perf stash ---------------------------------------------------------

    /// Stash the newest performance snapshot under `correlation_id`.
    /// Returns `false` when there is no snapshot to stash.
    pub fn stash_perf_before(&self, correlation_id: &str) -> bool {
        let mut state = self.state.write();
        let Some(snapshot) = state.performance.last().cloned() else {
            return false;
        };
        if state.perf_stash.len() >= MAX_PERF_STASH {
            if let Some(oldest) = state.perf_stash_order.pop_front() {
                state.perf_stash.remove(&oldest);
            }
        }
        state.perf_stash.insert(correlation_id.to_string(), snapshot);
        state.perf_stash_order.push_back(correlation_id.to_string());
        true
    }

    /// Take the stashed snapshot for `correlation_id` (at most once)
    pub fn take_perf_before(&self, correlation_id: &str) -> Option<PerformanceSnapshot> {
        let mut state = self.state.write();
        let snapshot = state.perf_stash.remove(correlation_id)?;
        state.perf_stash_order.retain(|id| id != correlation_id);
        Some(snapshot)
    }

    // ---- versions -----------------------------------------------------------

    /// Server version string
    #[must_use]
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Last reported extension version
    #[must_use]
    pub fn extension_version(&self) -> Option<String> {
        self.state.read().extension_version.clone()
    }

    /// Record the extension version
    pub fn set_extension_version(&self, version: impl Into<String>) {
        self.state.write().extension_version = Some(version.into());
    }

    /// `(extension, server)` versions when their major.minor differ
    #[must_use]
    pub fn version_mismatch(&self) -> Option<(String, String)> {
        let ext = self.extension_version()?;
        let ext_mm = major_minor(&ext)?;
        let srv_mm = major_minor(&self.server_version)?;
        (ext_mm != srv_mm).then(|| (ext.clone(), self.server_version.clone()))
    }
}

/// `X.Y` prefix of a version string
fn major_minor(version: &str) -> Option<&str> {
    let mut dots = version.match_indices('.').map(|(i, _)| i);
    let _first = dots.next()?;
    match dots.next() {
        Some(second) => Some(&version[..second]),
        None => Some(version),
    }
}

#[cfg(test)]
mod tests;
