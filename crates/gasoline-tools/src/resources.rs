//! Static `gasoline://` guides served by `resources/list` and `resources/read`

use serde::Serialize;

/// Listing entry for `resources/list`
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDef {
    /// Resource URI
    pub uri: &'static str,
    /// Short name
    pub name: &'static str,
    /// What the guide covers
    pub description: &'static str,
    /// Always `text/markdown`
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
}

const CAPABILITIES: &str = r#"# Gasoline capabilities

| Need | Tool call |
|------|-----------|
| Console errors | `observe({what:"errors"})` |
| All console output | `observe({what:"logs", level:"warn"})` |
| Failed or slow requests | `observe({what:"network_waterfall"})`, `observe({what:"network_bodies"})` |
| WebSocket traffic | `observe({what:"websocket_events"})`, `observe({what:"websocket_status"})` |
| What the user did | `observe({what:"actions"})` |
| Web vitals | `observe({what:"vitals"})`, `analyze({what:"performance"})` |
| Accessibility audit | `analyze({what:"accessibility"})` |
| Reproduction script | `generate({format:"reproduction"})` |
| HAR export | `generate({format:"har"})` |
| Drive the browser | `interact({action:"navigate", url:"..."})` (needs AI Web Pilot) |
| Server status | `configure({action:"health"})` |
"#;

const GUIDE: &str = r#"# Gasoline guide

Gasoline keeps bounded buffers of what the browser extension captured and
exposes them through five tools.

## Reading buffers

`observe` is read-only. Buffer modes return newest entries first with a
`metadata` block carrying `total`, `has_more`, `cursor`, `oldest_timestamp`
and `newest_timestamp`. Pass `after_cursor` back to page towards older
entries, `before_cursor` or `since_cursor` for newer ones. When a cursor
has fallen off the buffer the call fails with `cursor_expired`; retry with
`restart_on_eviction: true` to resume from the oldest retained entry.

## Browser commands

`interact` and the browser-backed `analyze` modes queue a command for the
extension and return a `correlation_id`. `interact` waits for the result
by default; pass `sync: false` to return immediately, then poll
`observe({what:"command_result", correlation_id})` until `final` is true.

Commands need the extension connected and AI Web Pilot enabled. Check
`observe({what:"pilot"})` when commands fail with `pilot_disabled` or
`ext_timeout`.

## Element targeting

DOM actions take a CSS `selector` or a semantic one (`text=Submit`,
`role=button`, `label=Email`, `aria-label=Close`, `placeholder=Search`).
`interact({action:"list_interactive"})` returns indexed elements; later
actions may pass `index` instead of `selector`.
"#;

const QUICKSTART: &str = r#"# Gasoline quickstart

1. `configure({action:"health"})` to confirm the extension is connected.
2. Reproduce the bug in the browser.
3. `observe({what:"errors"})` and `observe({what:"network_bodies"})`.
4. `generate({format:"reproduction"})` for a Playwright script of the steps.
5. With AI Web Pilot on: `interact({action:"refresh"})` and check `perf_diff`.
"#;

/// Guides advertised by `resources/list`
#[must_use]
pub fn resource_list() -> Vec<ResourceDef> {
    vec![
        ResourceDef {
            uri: "gasoline://capabilities",
            name: "capabilities",
            description: "Which tool call answers which question",
            mime_type: "text/markdown",
        },
        ResourceDef {
            uri: "gasoline://guide",
            name: "guide",
            description: "Pagination, browser commands and element targeting",
            mime_type: "text/markdown",
        },
        ResourceDef {
            uri: "gasoline://quickstart",
            name: "quickstart",
            description: "A five-step debugging session",
            mime_type: "text/markdown",
        },
    ]
}

/// Markdown body of a guide
#[must_use]
pub fn resource_text(uri: &str) -> Option<&'static str> {
    match uri.trim_end_matches('/') {
        "gasoline://capabilities" => Some(CAPABILITIES),
        "gasoline://guide" => Some(GUIDE),
        "gasoline://quickstart" => Some(QUICKSTART),
        _ => None,
    }
}
