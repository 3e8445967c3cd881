//! `analyze`: DOM and accessibility queries run in the browser;
//! performance and error summaries computed from captured buffers.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value};

use gasoline_core::{CommandStatus, LogLevel, PendingQuery};

use crate::commands::wants_sync;
use crate::handler::{parse_args, require_mode, ToolHandler};
use crate::response::{json_response, ToolError, ToolOutcome};
use crate::schema::ANALYZE_MODES;

const SLOWEST_RESOURCES: usize = 5;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalyzeArgs {
    selector: Option<String>,
    force_refresh: bool,
    tab_id: Option<i64>,
}

#[derive(Debug, Default)]
struct ErrorGroup {
    count: usize,
    first_seen: String,
    last_seen: String,
    source: Option<String>,
}

impl ToolHandler {
    pub(crate) fn analyze(&self, args: &Value, client_id: &str) -> ToolOutcome {
        let mode = require_mode(args, &["what"], ANALYZE_MODES)?;
        let params: AnalyzeArgs = parse_args(args)?;

        match mode.as_str() {
            "dom" => self.analyze_dom(args, &params, client_id),
            "accessibility" => self.analyze_accessibility(args, &params, client_id),
            "performance" => self.analyze_performance(),
            "errors" => self.analyze_errors(),
            other => Err(ToolError::unknown_mode("analyze", other, "what", ANALYZE_MODES)),
        }
    }

    fn analyze_dom(&self, args: &Value, params: &AnalyzeArgs, client_id: &str) -> ToolOutcome {
        let selector = params
            .selector
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::missing_param("selector"))?;
        let warning = self.check_pilot_ready()?;

        let query = PendingQuery::new("dom", json!({"selector": selector})).with_tab(params.tab_id);
        let dispatched = self.enqueue_command(query, "dom_query", None, client_id);
        let result = self.maybe_wait_for_command(
            &dispatched,
            args,
            false,
            &format!("DOM query {}", selector),
            client_id,
        );
        Ok(Self::with_warning(result, warning.as_deref()))
    }

    fn analyze_accessibility(&self, args: &Value, params: &AnalyzeArgs, client_id: &str) -> ToolOutcome {
        let page_url = self.capture.tracking().tracked_url.unwrap_or_default();
        let cache_key = format!("{}|{}", page_url, params.selector.as_deref().unwrap_or(""));

        if !params.force_refresh && !page_url.is_empty() {
            if let Some(audit) = self.capture.cached_a11y(&cache_key) {
                return Ok(json_response(
                    &format!("Accessibility audit for {} (cached)", page_url),
                    &json!({"status": "complete", "cached": true, "url": page_url, "result": audit}),
                ));
            }
        }

        let warning = self.check_pilot_ready()?;
        let mut query_params = json!({});
        if let Some(scope) = params.selector.as_deref().filter(|s| !s.is_empty()) {
            query_params["scope"] = json!(scope);
        }
        let query = PendingQuery::new("a11y", query_params).with_tab(params.tab_id);
        let dispatched = self.enqueue_command(query, "a11y", None, client_id);
        let summary = "Accessibility audit";

        if !wants_sync(args, false) {
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
                if cmd.status == CommandStatus::Complete && !page_url.is_empty() {
                    if let Some(audit) = cmd.result.clone().filter(|r| r.get("error").is_none()) {
                        self.capture.cache_a11y(cache_key, audit);
                    }
                }
                self.format_command_result(&cmd)
            }
            cmd => self.still_pending_response(&dispatched, cmd.as_ref(), summary),
        };
        Ok(Self::with_warning(result, warning.as_deref()))
    }

    fn analyze_performance(&self) -> ToolOutcome {
        let snapshot = self.capture.latest_performance();
        let waterfall = self.capture.network_waterfall();

        let total_transfer: u64 = waterfall.iter().map(|e| e.transfer_size).sum();
        let mut slowest: Vec<_> = waterfall.iter().collect();
        slowest.sort_by(|a, b| b.duration.total_cmp(&a.duration));
        let slowest: Vec<Value> = slowest
            .into_iter()
            .take(SLOWEST_RESOURCES)
            .map(|e| {
                json!({
                    "url": e.url,
                    "duration_ms": e.duration,
                    "transfer_size": e.transfer_size,
                    "initiator_type": e.initiator_type,
                })
            })
            .collect();

        let mut by_type: BTreeMap<String, (usize, u64)> = BTreeMap::new();
        for entry in &waterfall {
            let kind = entry.initiator_type.clone().unwrap_or_else(|| "other".to_string());
            let slot = by_type.entry(kind).or_default();
            slot.0 += 1;
            slot.1 += entry.transfer_size;
        }
        let by_type: BTreeMap<String, Value> = by_type
            .into_iter()
            .map(|(k, (count, bytes))| (k, json!({"count": count, "transfer_size": bytes})))
            .collect();

        let summary = match &snapshot {
            Some(s) => format!("Performance of {}: {} resources", s.url, waterfall.len()),
            None => format!("No page snapshot yet; {} resources captured", waterfall.len()),
        };
        Ok(json_response(
            &summary,
            &json!({
                "has_snapshot": snapshot.is_some(),
                "url": snapshot.as_ref().map(|s| s.url.clone()),
                "timing": snapshot.as_ref().map(|s| s.timing.clone()),
                "vitals": snapshot.as_ref().map(|s| s.vitals.clone()),
                "resources": {
                    "count": waterfall.len(),
                    "total_transfer_size": total_transfer,
                    "by_type": by_type,
                    "slowest": slowest,
                },
            }),
        ))
    }

    fn analyze_errors(&self) -> ToolOutcome {
        let mut groups: BTreeMap<String, ErrorGroup> = BTreeMap::new();
        for entry in self.logs.entries().into_iter().filter(|e| e.level == LogLevel::Error) {
            let message = entry.message.clone().unwrap_or_default();
            let ts = entry.timestamp();
            let group = groups.entry(message).or_default();
            if group.count == 0 {
                group.first_seen = ts.clone();
                group.source = entry.source.clone();
            }
            group.count += 1;
            group.last_seen = ts;
        }

        let mut console: Vec<Value> = groups
            .into_iter()
            .map(|(message, g)| {
                json!({
                    "message": message,
                    "count": g.count,
                    "first_seen": g.first_seen,
                    "last_seen": g.last_seen,
                    "source": g.source,
                })
            })
            .collect();
        console.sort_by(|a, b| b["count"].as_u64().cmp(&a["count"].as_u64()));

        let network: Vec<Value> = self
            .capture
            .network_bodies()
            .into_iter()
            .filter(|b| b.status >= 400)
            .map(|b| json!({"url": b.url, "method": b.method, "status": b.status, "timestamp": b.timestamp}))
            .collect();

        Ok(json_response(
            &format!(
                "{} distinct console errors, {} failed requests",
                console.len(),
                network.len()
            ),
            &json!({
                "console_errors": console,
                "network_failures": network,
                "total_errors_seen": self.logs.error_total_added(),
            }),
        ))
    }
}
