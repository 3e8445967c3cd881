//! Tool catalog: the five MCP tools and their argument schemas

use serde_json::{json, Value};

use crate::protocol::McpToolDef;

/// Tool names, alphabetical
pub const TOOL_NAMES: &[&str] = &["analyze", "configure", "generate", "interact", "observe"];

/// `observe.what` values
pub const OBSERVE_MODES: &[&str] = &[
    "actions",
    "annotations",
    "command_result",
    "errors",
    "extension_logs",
    "failed_commands",
    "logs",
    "network_bodies",
    "network_waterfall",
    "page",
    "pending_commands",
    "pilot",
    "tabs",
    "vitals",
    "websocket_events",
    "websocket_status",
];

/// `analyze.what` values
pub const ANALYZE_MODES: &[&str] = &["accessibility", "dom", "errors", "performance"];

/// `generate.format` values
pub const GENERATE_FORMATS: &[&str] = &["csp", "har", "reproduction", "sarif", "test"];

/// `configure.action` values
pub const CONFIGURE_ACTIONS: &[&str] = &[
    "clear",
    "health",
    "noise_rule",
    "store",
    "streaming",
    "telemetry",
];

/// DOM primitives routed to the extension as `dom_action` queries
pub const DOM_PRIMITIVES: &[&str] = &[
    "check",
    "click",
    "focus",
    "get_attribute",
    "get_text",
    "get_value",
    "key_press",
    "paste",
    "scroll_to",
    "select",
    "set_attribute",
    "type",
    "wait_for",
];

/// Non-DOM `interact.action` values
pub const INTERACT_NAMED_ACTIONS: &[&str] = &[
    "back",
    "delete_state",
    "draw_mode_start",
    "execute_js",
    "forward",
    "highlight",
    "list_interactive",
    "list_states",
    "load_state",
    "navigate",
    "new_tab",
    "refresh",
    "save_state",
    "subtitle",
    "upload",
];

/// Every `interact.action` value, alphabetical
#[must_use]
pub fn interact_actions() -> Vec<&'static str> {
    let mut all: Vec<&str> = DOM_PRIMITIVES
        .iter()
        .chain(INTERACT_NAMED_ACTIONS)
        .copied()
        .collect();
    all.sort_unstable();
    all
}

fn pagination_properties() -> Value {
    json!({
        "limit": {"type": "integer", "description": "Maximum entries to return"},
        "after_cursor": {"type": "string", "description": "Return entries older than this cursor"},
        "before_cursor": {"type": "string", "description": "Return entries newer than this cursor"},
        "since_cursor": {"type": "string", "description": "Return entries at or newer than this cursor"},
        "restart_on_eviction": {"type": "boolean", "description": "Restart from the oldest entry if the cursor was evicted"}
    })
}

fn sync_properties() -> Value {
    json!({
        "sync": {"type": "boolean", "description": "Wait for the browser to finish (default depends on tool)"},
        "wait": {"type": "boolean", "description": "Alias of sync"},
        "background": {"type": "boolean", "description": "Return a correlation_id immediately"},
        "tab_id": {"type": "integer", "description": "Target tab (default: tracked tab)"}
    })
}

fn merge(base: Value, extra: Value) -> Value {
    let mut base = base;
    if let (Some(b), Value::Object(e)) = (base.as_object_mut(), extra) {
        b.extend(e);
    }
    base
}

fn observe_def() -> McpToolDef {
    let props = merge(
        json!({
            "what": {"type": "string", "enum": OBSERVE_MODES},
            "level": {"type": "string", "description": "Log level filter (logs)"},
            "url": {"type": "string", "description": "URL substring filter"},
            "correlation_id": {"type": "string", "description": "Command to look up (command_result)"},
            "annotation_session": {"type": "string", "description": "Named annotation session (annotations)"}
        }),
        pagination_properties(),
    );
    McpToolDef {
        name: "observe".to_string(),
        description: "Read captured browser telemetry: console errors and logs, network, WebSocket \
traffic, user actions, vitals, tracked page, pilot status and async command results."
            .to_string(),
        input_schema: json!({"type": "object", "properties": props, "required": ["what"]}),
    }
}

fn analyze_def() -> McpToolDef {
    let props = merge(
        json!({
            "what": {"type": "string", "enum": ANALYZE_MODES},
            "selector": {"type": "string", "description": "CSS selector (dom, accessibility scope)"},
            "force_refresh": {"type": "boolean", "description": "Ignore the cached accessibility audit"}
        }),
        sync_properties(),
    );
    McpToolDef {
        name: "analyze".to_string(),
        description: "Analyze the page: DOM queries and accessibility audits run in the browser; \
performance and error summaries are computed from captured data."
            .to_string(),
        input_schema: json!({"type": "object", "properties": props, "required": ["what"]}),
    }
}

fn generate_def() -> McpToolDef {
    McpToolDef {
        name: "generate".to_string(),
        description: "Generate artifacts from captured data: reproduction scripts, HAR archives, \
test, CSP and SARIF inputs."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "format": {"type": "string", "enum": GENERATE_FORMATS},
                "what": {"type": "string", "description": "Alias of format"},
                "last_n": {"type": "integer", "description": "Only use the newest N actions"},
                "test_name": {"type": "string", "description": "Name for the generated test"},
                "url": {"type": "string", "description": "URL substring filter (har)"}
            },
            "required": ["format"]
        }),
    }
}

fn configure_def() -> McpToolDef {
    McpToolDef {
        name: "configure".to_string(),
        description: "Configure the server: health, clearing buffers, noise rules, streaming and \
telemetry modes."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": CONFIGURE_ACTIONS},
                "buffer": {"type": "string", "description": "Buffer to clear (logs, network, websocket, actions, extension_logs, performance, all)"},
                "store_action": {"type": "string"},
                "namespace": {"type": "string"},
                "key": {"type": "string"},
                "noise_action": {"type": "string"},
                "pattern": {"type": "string"},
                "streaming_action": {"type": "string"},
                "telemetry_mode": {"type": "string", "enum": ["auto", "full", "off"]}
            },
            "required": ["action"]
        }),
    }
}

fn interact_def() -> McpToolDef {
    let props = merge(
        json!({
            "action": {"type": "string", "enum": interact_actions()},
            "what": {"type": "string", "description": "Alias of action"},
            "selector": {"type": "string", "description": "CSS or semantic selector (text=, role=, label=, aria-label=, placeholder=)"},
            "index": {"type": "integer", "description": "Element index from list_interactive"},
            "text": {"type": "string"},
            "value": {"type": "string"},
            "name": {"type": "string", "description": "Attribute name"},
            "clear": {"type": "boolean"},
            "checked": {"type": "boolean"},
            "url": {"type": "string"},
            "script": {"type": "string"},
            "world": {"type": "string", "enum": ["auto", "main", "isolated"]},
            "timeout_ms": {"type": "integer"},
            "duration_ms": {"type": "integer"},
            "snapshot_name": {"type": "string"},
            "include_url": {"type": "boolean"},
            "file_path": {"type": "string", "description": "Absolute path of the file to upload"},
            "subtitle": {"type": "string", "description": "Narration shown in the page while the action runs"},
            "session": {"type": "string", "description": "Named annotation session (draw_mode_start)"}
        }),
        sync_properties(),
    );
    McpToolDef {
        name: "interact".to_string(),
        description: "Drive the browser: navigate, click, type, execute JavaScript, highlight, \
save and restore page state, upload files and annotate."
            .to_string(),
        input_schema: json!({"type": "object", "properties": props, "required": ["action"]}),
    }
}

/// All tool definitions, alphabetical
#[must_use]
pub fn tool_definitions() -> Vec<McpToolDef> {
    vec![
        analyze_def(),
        configure_def(),
        generate_def(),
        interact_def(),
        observe_def(),
    ]
}

/// Argument names a tool's schema declares
#[must_use]
pub fn allowed_argument_keys(tool: &str) -> Option<Vec<String>> {
    tool_definitions()
        .into_iter()
        .find(|d| d.name == tool)
        .and_then(|d| {
            d.input_schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| props.keys().cloned().collect())
        })
}
