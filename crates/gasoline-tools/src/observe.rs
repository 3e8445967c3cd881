//! `observe`: read captured telemetry
//!
//! Buffer-backed modes page through ring buffers with cursors and attach
//! freshness metadata. The remaining modes report tracked-page, pilot and
//! async-command state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use gasoline_core::telemetry::now_rfc3339;
use gasoline_core::{paginate_filtered, CursorParams, Error as CoreError, LogLevel, PageMetadata, Sequenced};

use crate::handler::{parse_args, require_mode, ToolHandler};
use crate::response::{json_response, ErrorCode, ToolError, ToolOutcome};
use crate::schema::OBSERVE_MODES;

const LOG_LEVELS: &[&str] = &["debug", "error", "info", "log", "warn"];
/// Page size when the caller passes no `limit`
const DEFAULT_PAGE_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ObserveArgs {
    level: Option<String>,
    url: Option<String>,
    correlation_id: Option<String>,
    annotation_session: Option<String>,
    limit: Option<usize>,
    after_cursor: Option<String>,
    before_cursor: Option<String>,
    since_cursor: Option<String>,
    restart_on_eviction: bool,
}

impl ObserveArgs {
    fn cursor_params(&self) -> CursorParams {
        CursorParams {
            after: self.after_cursor.clone(),
            before: self.before_cursor.clone(),
            since: self.since_cursor.clone(),
            limit: self.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            restart_on_eviction: self.restart_on_eviction,
        }
    }

    fn url_matches(&self, url: Option<&str>) -> bool {
        match self.url.as_deref().filter(|u| !u.is_empty()) {
            Some(filter) => url.is_some_and(|u| u.contains(filter)),
            None => true,
        }
    }
}

fn cursor_error(err: CoreError) -> ToolError {
    match err {
        CoreError::CursorExpired { requested, oldest } => ToolError::new(
            ErrorCode::CursorExpired,
            format!(
                "Cursor expired: entries {} to {} were evicted from the buffer",
                requested,
                oldest - 1
            ),
            "Call again with restart_on_eviction:true, or drop the cursor to read the newest entries",
        )
        .with_param("after_cursor"),
        CoreError::InvalidCursor(msg) => ToolError::new(
            ErrorCode::InvalidParam,
            format!("Invalid cursor: {}", msg),
            "Pass a cursor returned in a previous response's metadata",
        )
        .with_param("after_cursor"),
        other => ToolError::internal(other.to_string()),
    }
}

/// Age of the newest entry, `X.Xs`, or `no_data`
fn data_age(newest: Option<&str>, now: DateTime<Utc>) -> String {
    newest
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| {
            let age = now - ts.with_timezone(&Utc);
            format!("{:.1}s", age.num_milliseconds().max(0) as f64 / 1000.0)
        })
        .unwrap_or_else(|| "no_data".to_string())
}

impl ToolHandler {
    pub(crate) fn observe(&self, args: &Value, _client_id: &str) -> ToolOutcome {
        let mode = require_mode(args, &["what"], OBSERVE_MODES)?;
        let params: ObserveArgs = parse_args(args)?;

        match mode.as_str() {
            "errors" => self.observe_console(&params, true),
            "logs" => self.observe_console(&params, false),
            "extension_logs" => {
                let level = params.level.clone().filter(|l| !l.is_empty());
                self.paged(
                    "extension_logs",
                    self.capture.sequenced_extension_logs(),
                    &params,
                    |log| level.as_deref().map_or(true, |l| log.level.eq_ignore_ascii_case(l)),
                )
            }
            "network_waterfall" => self.paged(
                "entries",
                self.capture.sequenced_network_waterfall(),
                &params,
                |e| params.url_matches(Some(e.url.as_str())),
            ),
            "network_bodies" => self.paged(
                "bodies",
                self.capture.sequenced_network_bodies(),
                &params,
                |b| params.url_matches(Some(b.url.as_str())),
            ),
            "websocket_events" => self.paged(
                "events",
                self.capture.sequenced_websocket_events(),
                &params,
                |e| params.url_matches(e.url.as_deref()),
            ),
            "actions" => self.paged(
                "actions",
                self.capture.sequenced_actions(),
                &params,
                |a| params.url_matches(a.url.as_deref()),
            ),
            "websocket_status" => self.observe_websocket_status(),
            "vitals" => self.observe_vitals(),
            "page" => self.observe_page(),
            "tabs" => self.observe_tabs(),
            "pilot" => self.observe_pilot(),
            "command_result" => self.observe_command_result(&params),
            "pending_commands" => self.observe_pending_commands(),
            "failed_commands" => self.observe_failed_commands(),
            "annotations" => self.observe_annotations(&params),
            other => Err(ToolError::unknown_mode("observe", other, "what", OBSERVE_MODES)),
        }
    }

    fn observe_console(&self, params: &ObserveArgs, errors_only: bool) -> ToolOutcome {
        let level = if errors_only {
            Some(LogLevel::Error)
        } else {
            match params.level.as_deref().filter(|l| !l.is_empty()) {
                None => None,
                Some(raw) => Some(
                    serde_json::from_value::<LogLevel>(json!(raw.to_ascii_lowercase())).map_err(|_| {
                        ToolError::new(
                            ErrorCode::InvalidParam,
                            format!("Invalid log level: {}", raw),
                            "Use one of the listed levels",
                        )
                        .with_param("level")
                        .with_hint(format!("Valid values: {}", LOG_LEVELS.join(", ")))
                    })?,
                ),
            }
        };
        let key = if errors_only { "errors" } else { "logs" };
        self.paged(key, self.logs.sequenced(), params, |entry| {
            level.map_or(true, |l| entry.level == l) && params.url_matches(entry.url.as_deref())
        })
    }

    /// Filter, paginate and render a stream snapshot
    fn paged<T: Serialize>(
        &self,
        key: &str,
        entries: Vec<Sequenced<T>>,
        params: &ObserveArgs,
        keep: impl Fn(&T) -> bool,
    ) -> ToolOutcome {
        let (page, meta) =
            paginate_filtered(entries, &params.cursor_params(), keep).map_err(cursor_error)?;
        let items: Vec<&T> = page.iter().map(|e| &e.item).collect();

        let mut summary = format!("{} {}", meta.count, key.replace('_', " "));
        if meta.has_more {
            summary.push_str(" (more available)");
        }
        if let Some(warning) = &meta.warning {
            summary = format!("{}; {}", summary, warning);
        }

        Ok(json_response(
            &summary,
            &json!({
                key: items,
                "count": meta.count,
                "metadata": self.response_metadata(&meta),
            }),
        ))
    }

    fn response_metadata(&self, meta: &PageMetadata) -> Value {
        let now = Utc::now();
        let mut value = serde_json::to_value(meta).unwrap_or_else(|_| json!({}));
        if let Some(obj) = value.as_object_mut() {
            obj.insert("retrieved_at".into(), json!(now_rfc3339()));
            obj.insert("is_stale".into(), json!(!self.capture.is_extension_connected(now)));
            obj.insert(
                "data_age".into(),
                json!(data_age(meta.newest_timestamp.as_deref(), now)),
            );
        }
        value
    }

    fn observe_websocket_status(&self) -> ToolOutcome {
        let connections = self.capture.websocket_connections();
        let open = connections
            .iter()
            .filter(|c| c.state == gasoline_core::telemetry::ConnectionStatus::Open)
            .count();
        Ok(json_response(
            &format!("{} WebSocket connections ({} open)", connections.len(), open),
            &json!({
                "connections": connections,
                "count": connections.len(),
                "open": open,
            }),
        ))
    }

    fn observe_vitals(&self) -> ToolOutcome {
        match self.capture.latest_performance() {
            Some(snapshot) => Ok(json_response(
                &format!("Vitals for {}", snapshot.url),
                &json!({
                    "has_data": true,
                    "url": snapshot.url,
                    "timestamp": snapshot.timestamp,
                    "vitals": snapshot.vitals,
                    "timing": snapshot.timing,
                }),
            )),
            None => Ok(json_response(
                "No performance data captured yet",
                &json!({
                    "has_data": false,
                    "message": "Load a page with the extension connected to capture vitals",
                }),
            )),
        }
    }

    fn observe_page(&self) -> ToolOutcome {
        let tracking = self.capture.tracking();
        let connected = self.capture.is_extension_connected(Utc::now());
        let summary = match &tracking.tracked_url {
            Some(url) => format!("Tracked page: {}", url),
            None => "No page is being tracked".to_string(),
        };
        Ok(json_response(
            &summary,
            &json!({
                "url": tracking.tracked_url,
                "title": tracking.tracked_title,
                "tab_id": tracking.tracked_tab_id,
                "tracked": tracking.tracked_tab_id.is_some(),
                "extension_connected": connected,
            }),
        ))
    }

    fn observe_tabs(&self) -> ToolOutcome {
        let tracking = self.capture.tracking();
        let tabs: Vec<Value> = tracking
            .tracked_tab_id
            .map(|id| {
                json!({
                    "id": id,
                    "url": tracking.tracked_url,
                    "title": tracking.tracked_title,
                    "tracked": true,
                })
            })
            .into_iter()
            .collect();
        Ok(json_response(
            &format!("{} tracked tab(s)", tabs.len()),
            &json!({
                "tabs": tabs,
                "tracking_active": tracking.tracked_tab_id.is_some(),
            }),
        ))
    }

    fn observe_pilot(&self) -> ToolOutcome {
        let now = Utc::now();
        let status = self.capture.pilot_status(now);
        let verdict = self.capture.pilot_verdict(now);
        let summary = if status.enabled {
            "AI Web Pilot enabled"
        } else {
            "AI Web Pilot disabled"
        };
        let mut data = serde_json::to_value(&status).unwrap_or_else(|_| json!({}));
        if let Some(obj) = data.as_object_mut() {
            obj.insert("accepting_commands".into(), json!(verdict.should_accept()));
            if let Some(warning) = verdict.warning() {
                obj.insert("warning".into(), json!(warning));
            }
            if let Some(version) = self.capture.extension_version() {
                obj.insert("extension_version".into(), json!(version));
            }
            obj.insert("server_version".into(), json!(self.capture.server_version()));
        }
        Ok(json_response(summary, &data))
    }

    fn observe_command_result(&self, params: &ObserveArgs) -> ToolOutcome {
        let correlation_id = params
            .correlation_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ToolError::missing_param("correlation_id"))?;
        match self.broker.command_result(correlation_id) {
            Some(cmd) => Ok(self.format_command_result(&cmd)),
            None => Err(ToolError::new(
                ErrorCode::NoData,
                format!("Command not found: {}", correlation_id),
                "The command may have expired. Re-run it to get a new correlation_id",
            )
            .with_param("correlation_id")
            .with_final(true)),
        }
    }

    fn observe_pending_commands(&self) -> ToolOutcome {
        let pending = self.broker.pending_commands();
        let completed = self.broker.completed_commands();
        let failed = self.broker.failed_commands();
        Ok(json_response(
            &format!(
                "Pending: {}, Completed: {}, Failed: {}",
                pending.len(),
                completed.len(),
                failed.len()
            ),
            &json!({
                "pending": pending,
                "completed": completed,
                "failed": failed,
            }),
        ))
    }

    fn observe_failed_commands(&self) -> ToolOutcome {
        let failed = self.broker.failed_commands();
        Ok(json_response(
            &format!("{} failed commands", failed.len()),
            &json!({
                "status": "ok",
                "commands": failed,
                "count": failed.len(),
            }),
        ))
    }

    fn observe_annotations(&self, params: &ObserveArgs) -> ToolOutcome {
        if let Some(name) = params.annotation_session.as_deref().filter(|n| !n.is_empty()) {
            return Ok(match self.annotations.named_session_since_draw(name) {
                Some(session) => json_response(
                    &format!("Annotation session '{}': {} page(s)", name, session.pages.len()),
                    &session,
                ),
                None => json_response(
                    &format!("No annotations for session '{}' since the last draw start", name),
                    &json!({
                        "name": name,
                        "pages": [],
                        "sessions": self.annotations.list_named_sessions(),
                    }),
                ),
            });
        }

        Ok(match self.annotations.latest_session_since_draw() {
            Some(session) => json_response(
                &format!("{} annotation(s) on {}", session.annotations.len(), session.page_url),
                &session,
            ),
            None => json_response(
                "No annotations since the last draw start",
                &json!({
                    "annotations": [],
                    "message": "Call interact({action:'draw_mode_start'}) and ask the user to draw",
                }),
            ),
        })
    }
}
