//! Typed telemetry records, one per captured stream
//!
//! Each record keeps the fields the server reasons about as typed members
//! and carries everything else the extension sends in a flattened `extra`
//! map so records round-trip without loss.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Console log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// `console.error` and uncaught exceptions
    Error,
    /// `console.warn`
    Warn,
    /// `console.info`
    Info,
    /// `console.debug`
    Debug,
    /// `console.log`
    Log,
}

impl LogLevel {
    /// Wire name of the level
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Log => "log",
        }
    }
}

/// Console log entry posted by the extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Severity
    pub level: LogLevel,
    /// Rendered message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Capture time (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    /// Origin (`console`, `exception`, `network`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Browser tab
    #[serde(default, rename = "tabId", skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    /// Page URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogEntry {
    /// Minimal entry with a level and message
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: Some(message.into()),
            ts: Some(now_rfc3339()),
            source: None,
            tab_id: None,
            url: None,
            extra: Map::new(),
        }
    }

    /// Timestamp used for cursor ordering
    #[must_use]
    pub fn timestamp(&self) -> String {
        self.ts.clone().unwrap_or_default()
    }
}

/// Resource timing entry (network waterfall)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkWaterfallEntry {
    /// Request URL
    pub url: String,
    /// Resource initiator (`fetch`, `script`, `img`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_type: Option<String>,
    /// Start offset in ms
    #[serde(default)]
    pub start_time: f64,
    /// Duration in ms
    #[serde(default)]
    pub duration: f64,
    /// Transfer size in bytes
    #[serde(default)]
    pub transfer_size: u64,
    /// Page the resource was loaded by
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    /// Capture time (RFC 3339)
    #[serde(default)]
    pub timestamp: String,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Captured request/response body pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkBody {
    /// Request URL
    pub url: String,
    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,
    /// HTTP status
    #[serde(default)]
    pub status: u16,
    /// Request body (possibly truncated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    /// Response body (possibly truncated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// Response content type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Round-trip time in ms
    #[serde(default)]
    pub duration: f64,
    /// Browser tab
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    /// Capture time (RFC 3339)
    #[serde(default)]
    pub timestamp: String,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// WebSocket lifecycle or frame event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketEvent {
    /// Connection id assigned by the extension
    #[serde(default)]
    pub id: String,
    /// `open`, `close`, `error` or `message`
    pub event: String,
    /// Socket URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// `incoming` or `outgoing` for frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    /// Frame payload (possibly truncated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Frame size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Close code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Close reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Browser tab
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    /// Capture time (RFC 3339)
    #[serde(default, rename = "ts")]
    pub timestamp: String,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Open/closed state of a tracked WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Socket is open
    Open,
    /// Socket closed or errored
    Closed,
}

/// Per-connection state derived from WebSocket events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    /// Connection id
    pub id: String,
    /// Socket URL
    pub url: Option<String>,
    /// Current state
    pub state: ConnectionStatus,
    /// Close code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_code: Option<u16>,
    /// Close reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    /// Frames seen in either direction
    pub message_count: u64,
    /// Timestamp of the latest event
    pub last_activity: String,
}

/// User (or AI) action recorded in the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedAction {
    /// Action kind (`click`, `input`, `navigate`, ...)
    #[serde(rename = "type")]
    pub action_type: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Page URL at the time of the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Selector candidates for the target element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Value>,
    /// Typed or selected value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// `human` (default) or `ai`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Browser tab
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnhancedAction {
    /// Action stamped now
    #[must_use]
    pub fn now(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            timestamp: Utc::now().timestamp_millis(),
            url: None,
            selectors: None,
            value: None,
            source: None,
            tab_id: None,
            extra: Map::new(),
        }
    }

    /// RFC 3339 rendering of the epoch-ms timestamp
    #[must_use]
    pub fn timestamp_rfc3339(&self) -> String {
        millis_to_rfc3339(self.timestamp)
    }
}

/// Log line emitted by the extension itself (background/content scripts)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionLog {
    /// Severity as reported by the extension
    #[serde(default = "default_ext_level")]
    pub level: String,
    /// Message
    #[serde(default)]
    pub message: String,
    /// Script context (`background`, `content`, `inject`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Subsystem tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Capture time (RFC 3339)
    #[serde(default)]
    pub timestamp: String,
}

fn default_ext_level() -> String {
    "info".to_string()
}

/// Page performance snapshot (navigation timing + web vitals)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Page URL
    #[serde(default)]
    pub url: String,
    /// Capture time (RFC 3339)
    #[serde(default)]
    pub timestamp: String,
    /// Navigation timing values in ms
    #[serde(default)]
    pub timing: Map<String, Value>,
    /// Core web vitals (`lcp`, `cls`, `inp`, `fcp`, ...)
    #[serde(default)]
    pub vitals: Map<String, Value>,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Current UTC time in RFC 3339 with millisecond precision
#[must_use]
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render epoch milliseconds as RFC 3339
#[must_use]
pub fn millis_to_rfc3339(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}
