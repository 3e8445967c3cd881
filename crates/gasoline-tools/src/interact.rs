//! `interact`: browser commands dispatched to the extension
//!
//! Every browser-targeting action passes the pilot readiness gate, is
//! queued as a pending query under a fresh correlation id and recorded in
//! the actions stream with `source: "ai"`. `interact` waits for the result
//! by default; `sync: false` or `background: true` returns `queued`.

mod state;

use std::fs::File;
use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use gasoline_core::{CommandStatus, EnhancedAction, PendingQuery};

use crate::commands::{new_correlation_id, wants_sync, Dispatched};
use crate::handler::{parse_args, require_mode, ToolHandler};
use crate::protocol::ToolResult;
use crate::response::{truncate, ErrorCode, ToolError, ToolOutcome};
use crate::schema::{interact_actions, DOM_PRIMITIVES};

const DEFAULT_JS_TIMEOUT_MS: u64 = 5000;
const DEFAULT_HIGHLIGHT_MS: u64 = 5000;
const SCRIPT_PREVIEW_LEN: usize = 100;
const JS_WORLDS: &[&str] = &["auto", "isolated", "main"];

/// Semantic selector prefixes understood by the extension
const SEMANTIC_PREFIXES: &[&str] = &["text", "role", "label", "aria-label", "placeholder"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InteractArgs {
    selector: Option<String>,
    index: Option<i64>,
    text: Option<String>,
    value: Option<String>,
    name: Option<String>,
    url: Option<String>,
    script: Option<String>,
    world: Option<String>,
    timeout_ms: Option<u64>,
    duration_ms: Option<u64>,
    file_path: Option<String>,
    session: Option<String>,
    subtitle: Option<String>,
    tab_id: Option<i64>,
}

/// Required field per DOM primitive: (field, message, retry)
fn required_dom_field(action: &str) -> Option<(&'static str, &'static str, &'static str)> {
    match action {
        "type" => Some((
            "text",
            "Required parameter 'text' is missing for type action",
            "Add the 'text' parameter with the text to type",
        )),
        "paste" => Some((
            "text",
            "Required parameter 'text' is missing for paste action",
            "Add the 'text' parameter with the text to paste",
        )),
        "select" => Some((
            "value",
            "Required parameter 'value' is missing for select action",
            "Add the 'value' parameter with the option value to select",
        )),
        "get_attribute" => Some((
            "name",
            "Required parameter 'name' is missing for get_attribute action",
            "Add the 'name' parameter with the attribute name",
        )),
        "set_attribute" => Some((
            "name",
            "Required parameter 'name' is missing for set_attribute action",
            "Add the 'name' parameter with the attribute name",
        )),
        _ => None,
    }
}

/// Action type recorded for replay, when the primitive has one
fn repro_type(action: &str) -> Option<&'static str> {
    match action {
        "click" | "check" => Some("click"),
        "type" | "paste" => Some("input"),
        "select" => Some("select"),
        "key_press" => Some("keypress"),
        "focus" => Some("focus"),
        "scroll_to" => Some("scroll_element"),
        _ => None,
    }
}

/// Turn a selector string into the selector map replay scripts consume
pub(crate) fn reproduction_selectors(selector: &str) -> Value {
    if let Some((prefix, value)) = selector.split_once('=') {
        if SEMANTIC_PREFIXES.contains(&prefix) {
            return match prefix {
                "text" => json!({"text": value}),
                "role" => json!({"role": {"role": value}}),
                _ => json!({"ariaLabel": value}),
            };
        }
        return json!({"cssPath": selector});
    }
    match selector.strip_prefix('#') {
        Some(id) if !id.is_empty() && !id.contains([' ', '>', '.', '+', '~', '[', ']', ':', '#']) => {
            json!({"id": id})
        }
        _ => json!({"cssPath": selector}),
    }
}

/// Copy of the arguments object with extra fields merged in
fn merged(args: &Value, extra: Value) -> Value {
    let mut params = args.as_object().cloned().unwrap_or_default();
    if let Value::Object(extra) = extra {
        params.extend(extra);
    }
    Value::Object(params)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn path_not_allowed(message: String, retry: &str) -> ToolError {
    ToolError::new(ErrorCode::PathNotAllowed, message, retry).with_param("file_path")
}

/// Check an upload source: absolute, an existing regular file, readable
fn validate_upload_path(raw: &str) -> Result<(String, u64), ToolError> {
    let path = Path::new(raw);
    if !path.is_absolute() {
        return Err(path_not_allowed(
            format!("Upload path must be absolute: {}", raw),
            "Pass the absolute path of the file to upload",
        ));
    }
    let meta = std::fs::metadata(path).map_err(|e| {
        path_not_allowed(
            format!("Upload file not accessible: {} ({})", raw, e),
            "Check that the file exists",
        )
    })?;
    if meta.is_dir() {
        return Err(path_not_allowed(
            format!("Upload path is a directory: {}", raw),
            "Pass a file, not a directory",
        ));
    }
    File::open(path).map_err(|e| {
        path_not_allowed(
            format!("Upload file is not readable: {} ({})", raw, e),
            "Check the file permissions",
        )
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((file_name, meta.len()))
}

impl ToolHandler {
    pub(crate) fn interact(&self, args: &Value, client_id: &str) -> ToolOutcome {
        let valid = interact_actions();
        let action = require_mode(args, &["action", "what"], &valid)?;
        if !valid.contains(&action.as_str()) {
            return Err(ToolError::unknown_mode("interact", &action, "action", &valid));
        }
        let params: InteractArgs = parse_args(args)?;

        let result = match action.as_str() {
            a if DOM_PRIMITIVES.contains(&a) => self.dom_primitive(a, args, &params, client_id)?,
            "list_interactive" => self.list_interactive(args, &params, client_id)?,
            "execute_js" => self.execute_js(args, &params, client_id)?,
            "highlight" => self.highlight(args, &params, client_id)?,
            "navigate" => self.navigate(args, &params, client_id)?,
            "refresh" | "back" | "forward" => self.history_action(&action, args, &params, client_id)?,
            "new_tab" => self.new_tab(args, &params, client_id)?,
            "subtitle" => self.subtitle(args, client_id)?,
            "upload" => self.upload(args, &params, client_id)?,
            "draw_mode_start" => self.draw_mode_start(args, &params, client_id)?,
            "save_state" => self.save_state(args, client_id)?,
            "load_state" => self.load_state(args, client_id)?,
            "list_states" => self.list_states()?,
            "delete_state" => self.delete_state(args)?,
            other => return Err(ToolError::unknown_mode("interact", other, "action", &valid)),
        };

        if action != "subtitle" && !result.is_error {
            if let Some(text) = params.subtitle.as_deref() {
                self.queue_subtitle(text, client_id);
            }
        }
        Ok(result)
    }

    fn dom_primitive(
        &self,
        action: &str,
        args: &Value,
        params: &InteractArgs,
        client_id: &str,
    ) -> ToolOutcome {
        let selector = match (non_empty(params.selector.as_deref()), params.index) {
            (Some(selector), _) => selector.to_string(),
            (None, Some(index)) => usize::try_from(index)
                .ok()
                .and_then(|i| self.broker.resolve_element_index(client_id, i))
                .ok_or_else(|| {
                    ToolError::new(
                        ErrorCode::InvalidParam,
                        format!(
                            "Element index {} not found. Call list_interactive first to refresh the element index.",
                            index
                        ),
                        "Call interact with action='list_interactive' first, then use the index from the results.",
                    )
                    .with_param("index")
                })?,
            (None, None) => {
                return Err(ToolError::new(
                    ErrorCode::MissingParam,
                    "Required parameter 'selector' (or 'index') is missing",
                    "Add the 'selector' parameter. Supports CSS selectors or semantic: text=Submit, role=button, placeholder=Email, label=Name, aria-label=Close. Or use 'index' from list_interactive results.",
                )
                .with_param("selector"))
            }
        };

        if let Some((field, message, retry)) = required_dom_field(action) {
            let present = match field {
                "text" => non_empty(params.text.as_deref()),
                "value" => non_empty(params.value.as_deref()),
                _ => non_empty(params.name.as_deref()),
            };
            if present.is_none() {
                return Err(ToolError::new(ErrorCode::MissingParam, message, retry).with_param(field));
            }
        }

        let warning = self.check_pilot_ready()?;
        let query = PendingQuery::new(
            "dom_action",
            merged(args, json!({"action": action, "selector": selector})),
        )
        .with_tab(params.tab_id);
        let dispatched = self.enqueue_command(query, &format!("dom_{}", action), None, client_id);

        match repro_type(action) {
            Some(kind) => {
                let mut recorded = EnhancedAction::now(kind);
                recorded.selectors = Some(reproduction_selectors(&selector));
                recorded.value = match action {
                    "type" | "paste" | "key_press" => params.text.clone(),
                    "select" => params.value.clone(),
                    _ => None,
                };
                self.record_ai_enhanced_action(recorded);
            }
            None => self.record_ai_action(
                &format!("dom_{}", action),
                None,
                Some(json!({"selector": selector})),
            ),
        }

        let result =
            self.maybe_wait_for_command(&dispatched, args, true, &format!("{} queued", action), client_id);
        Ok(Self::with_warning(result, warning.as_deref()))
    }

    fn list_interactive(&self, args: &Value, params: &InteractArgs, client_id: &str) -> ToolOutcome {
        let warning = self.check_pilot_ready()?;
        let query = PendingQuery::new("dom_action", merged(args, json!({"action": "list_interactive"})))
            .with_tab(params.tab_id);
        let dispatched = self.enqueue_command(query, "dom_list", None, client_id);
        self.record_ai_action("dom_list_interactive", None, None);

        let summary = "list_interactive queued";
        if !wants_sync(args, true) {
            return Ok(Self::with_warning(
                self.queued_response(&dispatched, summary),
                warning.as_deref(),
            ));
        }

        if let Some(disconnected) = self.disconnected_response(&dispatched) {
            return Ok(Self::with_warning(disconnected, warning.as_deref()));
        }
        let result = match self.await_command(&dispatched, client_id) {
            Some(cmd) if cmd.status.is_terminal() => {
                if cmd.status == CommandStatus::Complete {
                    let selectors: Vec<String> = cmd
                        .result
                        .as_ref()
                        .and_then(|r| r.get("elements"))
                        .and_then(Value::as_array)
                        .map(|elements| {
                            elements
                                .iter()
                                .filter_map(|e| e.get("selector").and_then(Value::as_str))
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    debug!(client_id = %client_id, elements = selectors.len(), "element index refreshed");
                    self.broker.set_element_index(client_id, selectors);
                }
                self.format_command_result(&cmd)
            }
            cmd => self.still_pending_response(&dispatched, cmd.as_ref(), summary),
        };
        Ok(Self::with_warning(result, warning.as_deref()))
    }

    fn execute_js(&self, args: &Value, params: &InteractArgs, client_id: &str) -> ToolOutcome {
        let script = non_empty(params.script.as_deref()).ok_or_else(|| {
            ToolError::new(
                ErrorCode::MissingParam,
                "Required parameter 'script' is missing",
                "Add the 'script' parameter and call again",
            )
            .with_param("script")
        })?;
        let world = non_empty(params.world.as_deref()).unwrap_or("auto");
        if !JS_WORLDS.contains(&world) {
            return Err(ToolError::new(
                ErrorCode::InvalidParam,
                format!("Invalid 'world' value: {}", world),
                "Use 'auto' (default, tries main then isolated), 'main' (page JS access), or 'isolated' (bypasses CSP, DOM only)",
            )
            .with_param("world"));
        }

        let warning = self.check_pilot_ready()?;
        let query = PendingQuery::new(
            "execute",
            merged(
                args,
                json!({
                    "world": world,
                    "timeout_ms": params.timeout_ms.unwrap_or(DEFAULT_JS_TIMEOUT_MS),
                }),
            ),
        )
        .with_tab(params.tab_id);
        let dispatched = self.enqueue_command(query, "exec", None, client_id);

        let mut recorded = EnhancedAction::now("execute_js");
        recorded
            .extra
            .insert("script_preview".into(), json!(truncate(script, SCRIPT_PREVIEW_LEN)));
        self.record_ai_enhanced_action(recorded);

        let result = self.maybe_wait_for_command(&dispatched, args, true, "Command queued", client_id);
        Ok(Self::with_warning(result, warning.as_deref()))
    }

    fn highlight(&self, args: &Value, params: &InteractArgs, client_id: &str) -> ToolOutcome {
        let selector = non_empty(params.selector.as_deref()).ok_or_else(|| {
            ToolError::new(
                ErrorCode::MissingParam,
                "Required parameter 'selector' is missing",
                "Add the 'selector' parameter and call again",
            )
            .with_param("selector")
        })?;

        let warning = self.check_pilot_ready()?;
        let query = PendingQuery::new(
            "highlight",
            merged(
                args,
                json!({"duration_ms": params.duration_ms.unwrap_or(DEFAULT_HIGHLIGHT_MS)}),
            ),
        )
        .with_tab(params.tab_id);
        let dispatched = self.enqueue_command(query, "highlight", None, client_id);
        self.record_ai_action("highlight", None, Some(json!({"selector": selector})));

        let result = self.maybe_wait_for_command(&dispatched, args, true, "Highlight queued", client_id);
        Ok(Self::with_warning(result, warning.as_deref()))
    }

    fn navigate(&self, args: &Value, params: &InteractArgs, client_id: &str) -> ToolOutcome {
        let url = non_empty(params.url.as_deref()).ok_or_else(|| {
            ToolError::new(
                ErrorCode::MissingParam,
                "Required parameter 'url' is missing",
                "Add the 'url' parameter and call again",
            )
            .with_param("url")
        })?;
        let warning = self.check_pilot_ready()?;
        let dispatched = self.dispatch_navigation(url, params.tab_id, client_id);
        let result = self.maybe_wait_for_command(&dispatched, args, true, "Navigate queued", client_id);
        Ok(Self::with_warning(result, warning.as_deref()))
    }

    /// Queue a `navigate` browser action, stashing the perf baseline first
    pub(crate) fn dispatch_navigation(
        &self,
        url: &str,
        tab_id: Option<i64>,
        client_id: &str,
    ) -> Dispatched {
        let correlation_id = new_correlation_id("nav");
        self.capture.stash_perf_before(&correlation_id);
        let query = PendingQuery::new("browser_action", json!({"action": "navigate", "url": url}))
            .with_tab(tab_id);
        let dispatched = self.enqueue_with_correlation(query, &correlation_id, None, client_id);
        self.record_ai_action("navigate", Some(url), None);
        dispatched
    }

    fn history_action(
        &self,
        action: &str,
        args: &Value,
        params: &InteractArgs,
        client_id: &str,
    ) -> ToolOutcome {
        let warning = self.check_pilot_ready()?;
        let correlation_id = new_correlation_id(action);
        if action == "refresh" {
            self.capture.stash_perf_before(&correlation_id);
        }
        let query =
            PendingQuery::new("browser_action", json!({"action": action})).with_tab(params.tab_id);
        let dispatched = self.enqueue_with_correlation(query, &correlation_id, None, client_id);
        self.record_ai_action(action, None, None);

        let summary = match action {
            "refresh" => "Refresh queued",
            "back" => "Back queued",
            _ => "Forward queued",
        };
        let result = self.maybe_wait_for_command(&dispatched, args, true, summary, client_id);
        Ok(Self::with_warning(result, warning.as_deref()))
    }

    fn new_tab(&self, args: &Value, params: &InteractArgs, client_id: &str) -> ToolOutcome {
        let warning = self.check_pilot_ready()?;
        let url = non_empty(params.url.as_deref());
        let mut query_params = json!({"action": "new_tab"});
        if let Some(url) = url {
            query_params["url"] = json!(url);
        }
        let query = PendingQuery::new("browser_action", query_params);
        let dispatched = self.enqueue_command(query, "newtab", None, client_id);
        self.record_ai_action("new_tab", url, None);

        let result = self.maybe_wait_for_command(&dispatched, args, true, "New tab queued", client_id);
        Ok(Self::with_warning(result, warning.as_deref()))
    }

    fn subtitle(&self, args: &Value, client_id: &str) -> ToolOutcome {
        let text = args.get("text").and_then(Value::as_str).ok_or_else(|| {
            ToolError::new(
                ErrorCode::MissingParam,
                "Required parameter 'text' is missing for subtitle action",
                "Add the 'text' parameter with subtitle text, or empty string to clear",
            )
            .with_param("text")
        })?;
        let dispatched = self.enqueue_command(
            PendingQuery::new("subtitle", json!({"text": text})),
            "subtitle",
            None,
            client_id,
        );
        let summary = if text.is_empty() { "Subtitle cleared" } else { "Subtitle set" };
        Ok(self.maybe_wait_for_command(&dispatched, args, true, summary, client_id))
    }

    /// Fire-and-forget subtitle riding along another action
    fn queue_subtitle(&self, text: &str, client_id: &str) {
        let dispatched = self.enqueue_command(
            PendingQuery::new("subtitle", json!({"text": text})),
            "subtitle",
            None,
            client_id,
        );
        debug!(correlation_id = %dispatched.correlation_id, "composable subtitle queued");
    }

    fn upload(&self, args: &Value, params: &InteractArgs, client_id: &str) -> ToolOutcome {
        let raw = non_empty(params.file_path.as_deref()).ok_or_else(|| {
            ToolError::new(
                ErrorCode::MissingParam,
                "Required parameter 'file_path' is missing",
                "Add the absolute 'file_path' of the file to upload",
            )
            .with_param("file_path")
        })?;
        let (file_name, file_size) = validate_upload_path(raw)?;

        let warning = self.check_pilot_ready()?;
        let mut query_params = Map::new();
        query_params.insert("file_path".into(), json!(raw));
        query_params.insert("file_name".into(), json!(file_name));
        query_params.insert("file_size".into(), json!(file_size));
        query_params.insert(
            "os_upload_automation".into(),
            json!(self.config.os_upload_automation),
        );
        if let Some(selector) = non_empty(params.selector.as_deref()) {
            query_params.insert("selector".into(), json!(selector));
        }
        let query = PendingQuery::new("upload", Value::Object(query_params)).with_tab(params.tab_id);
        let dispatched =
            self.enqueue_command(query, "upload", Some(self.config.upload_timeout), client_id);
        info!(file = %raw, size = file_size, "upload queued");

        let mut recorded = EnhancedAction::now("upload");
        recorded.extra.insert("file_name".into(), json!(file_name));
        if let Some(selector) = non_empty(params.selector.as_deref()) {
            recorded.selectors = Some(reproduction_selectors(selector));
        }
        self.record_ai_enhanced_action(recorded);

        let result = self.maybe_wait_for_command(
            &dispatched,
            args,
            true,
            &format!("Upload of {} queued", file_name),
            client_id,
        );
        Ok(Self::with_warning(result, warning.as_deref()))
    }

    fn draw_mode_start(&self, args: &Value, params: &InteractArgs, client_id: &str) -> ToolOutcome {
        let warning = self.check_pilot_ready()?;
        let mut query_params = json!({"action": "start"});
        if let Some(session) = non_empty(params.session.as_deref()) {
            query_params["session"] = json!(session);
        }
        let query = PendingQuery::new("draw_mode", query_params).with_tab(params.tab_id);
        let dispatched = self.enqueue_command(query, "draw", None, client_id);
        self.annotations.mark_draw_started();
        self.record_ai_action("draw_mode_start", None, None);

        let result: ToolResult = self.maybe_wait_for_command(
            &dispatched,
            args,
            false,
            "Draw mode started; annotate the page, then call observe({what:'annotations'})",
            client_id,
        );
        Ok(Self::with_warning(result, warning.as_deref()))
    }
}
