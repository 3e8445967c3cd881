//! `generate`: artifacts built from captured data
//!
//! Reproduction and test scripts target Playwright. HAR output follows
//! HAR 1.2, SARIF output follows SARIF 2.1.0.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::{json, Value};

use gasoline_core::{EnhancedAction, LogLevel, NetworkBody};

use crate::handler::{parse_args, require_mode, ToolHandler};
use crate::response::{json_response, ToolOutcome, ToolError};
use crate::schema::GENERATE_FORMATS;

const SARIF_SCHEMA: &str = "https://json.schemastore.org/sarif-2.1.0.json";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateArgs {
    last_n: Option<usize>,
    test_name: Option<String>,
    url: Option<String>,
}

/// `scheme://host[:port]` of an absolute URL
fn origin(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let host_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let host = &rest[..host_end];
    (!host.is_empty()).then(|| format!("{}://{}", scheme, host))
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Playwright locator for a recorded selector set
fn locator(selectors: Option<&Value>) -> Option<String> {
    let s = selectors?;
    if let Some(id) = s.get("id").and_then(Value::as_str) {
        return Some(format!("page.locator({})", js_string(&format!("#{}", id))));
    }
    if let Some(label) = s.get("ariaLabel").and_then(Value::as_str) {
        return Some(format!("page.getByLabel({})", js_string(label)));
    }
    if let Some(role) = s.get("role").and_then(|r| r.get("role")).and_then(Value::as_str) {
        return Some(format!("page.getByRole({})", js_string(role)));
    }
    if let Some(text) = s.get("text").and_then(Value::as_str) {
        return Some(format!("page.getByText({})", js_string(text)));
    }
    s.get("cssPath")
        .and_then(Value::as_str)
        .map(|css| format!("page.locator({})", js_string(css)))
}

fn step(action: &EnhancedAction) -> String {
    let target = locator(action.selectors.as_ref());
    let value = action.value.as_deref().unwrap_or("");
    match (action.action_type.as_str(), target) {
        ("navigate", _) => match action.url.as_deref() {
            Some(url) => format!("  await page.goto({});", js_string(url)),
            None => "  // navigate (no URL recorded)".to_string(),
        },
        ("click", Some(t)) => format!("  await {}.click();", t),
        ("input", Some(t)) => format!("  await {}.fill({});", t, js_string(value)),
        ("select", Some(t)) => format!("  await {}.selectOption({});", t, js_string(value)),
        ("keypress", _) => format!("  await page.keyboard.press({});", js_string(value)),
        ("scroll_element", Some(t)) => format!("  await {}.scrollIntoViewIfNeeded();", t),
        ("focus", Some(t)) => format!("  await {}.focus();", t),
        ("refresh", _) => "  await page.reload();".to_string(),
        ("back", _) => "  await page.goBack();".to_string(),
        ("forward", _) => "  await page.goForward();".to_string(),
        (other, _) => format!("  // {} (not replayable)", other),
    }
}

fn network_body_for<'a>(bodies: &'a [NetworkBody], url: &str) -> Option<&'a NetworkBody> {
    bodies.iter().rev().find(|b| b.url == url)
}

fn csp_directive(initiator: Option<&str>) -> &'static str {
    match initiator.unwrap_or("") {
        "script" => "script-src",
        "css" | "link" => "style-src",
        "img" | "image" => "img-src",
        "font" => "font-src",
        "fetch" | "xmlhttprequest" | "beacon" | "websocket" => "connect-src",
        "iframe" | "frame" => "frame-src",
        "video" | "audio" => "media-src",
        _ => "default-src",
    }
}

impl ToolHandler {
    pub(crate) fn generate(&self, args: &Value) -> ToolOutcome {
        let format = require_mode(args, &["format", "what"], GENERATE_FORMATS)?;
        let params: GenerateArgs = parse_args(args)?;

        match format.as_str() {
            "reproduction" => Ok(self.generate_reproduction(&params)),
            "test" => Ok(self.generate_test(&params)),
            "har" => Ok(self.generate_har(&params)),
            "csp" => Ok(self.generate_csp()),
            "sarif" => Ok(self.generate_sarif()),
            other => Err(ToolError::unknown_mode("generate", other, "format", GENERATE_FORMATS)),
        }
    }

    fn recent_actions(&self, last_n: Option<usize>) -> Vec<EnhancedAction> {
        let mut actions = self.capture.actions();
        if let Some(n) = last_n.filter(|n| *n > 0 && *n < actions.len()) {
            actions = actions.split_off(actions.len() - n);
        }
        actions
    }

    fn script_body(&self, actions: &[EnhancedAction]) -> Vec<String> {
        let mut lines = Vec::new();
        let starts_with_nav = actions.first().is_some_and(|a| a.action_type == "navigate");
        if !starts_with_nav {
            if let Some(url) = actions
                .iter()
                .find_map(|a| a.url.clone())
                .or_else(|| self.capture.tracking().tracked_url)
            {
                lines.push(format!("  await page.goto({});", js_string(&url)));
            }
        }
        lines.extend(actions.iter().map(step));
        lines
    }

    fn generate_reproduction(&self, params: &GenerateArgs) -> crate::protocol::ToolResult {
        let actions = self.recent_actions(params.last_n);
        let name = params.test_name.clone().unwrap_or_else(|| "reproduction".to_string());
        let mut script = vec![
            "import { test } from '@playwright/test';".to_string(),
            String::new(),
            format!("test({}, async ({{ page }}) => {{", js_string(&name)),
        ];
        script.extend(self.script_body(&actions));
        script.push("});".to_string());

        json_response(
            &format!("Reproduction script from {} actions", actions.len()),
            &json!({
                "format": "reproduction",
                "framework": "playwright",
                "action_count": actions.len(),
                "script": script.join("\n"),
            }),
        )
    }

    fn generate_test(&self, params: &GenerateArgs) -> crate::protocol::ToolResult {
        let actions = self.recent_actions(params.last_n);
        let name = params.test_name.clone().unwrap_or_else(|| "generated test".to_string());
        let error_count = self
            .logs
            .entries()
            .iter()
            .filter(|e| e.level == LogLevel::Error)
            .count();
        let failed_requests = self
            .capture
            .network_bodies()
            .iter()
            .filter(|b| b.status >= 400)
            .count();

        let mut script = vec![
            "import { test, expect } from '@playwright/test';".to_string(),
            String::new(),
            format!("test({}, async ({{ page }}) => {{", js_string(&name)),
            "  const consoleErrors = [];".to_string(),
            "  page.on('console', (msg) => { if (msg.type() === 'error') consoleErrors.push(msg.text()); });"
                .to_string(),
        ];
        script.extend(self.script_body(&actions));
        script.push("  expect(consoleErrors).toEqual([]);".to_string());
        script.push("});".to_string());

        json_response(
            &format!("Playwright test from {} actions", actions.len()),
            &json!({
                "format": "test",
                "framework": "playwright",
                "test_name": name,
                "inputs": {
                    "actions": actions.len(),
                    "console_errors": error_count,
                    "network_failures": failed_requests,
                    "page_url": self.capture.tracking().tracked_url,
                },
                "script": script.join("\n"),
            }),
        )
    }

    fn generate_har(&self, params: &GenerateArgs) -> crate::protocol::ToolResult {
        let filter = params.url.as_deref().filter(|u| !u.is_empty());
        let keep = |url: &str| filter.map_or(true, |f| url.contains(f));
        let bodies = self.capture.network_bodies();
        let waterfall = self.capture.network_waterfall();

        let mut seen = BTreeSet::new();
        let mut entries: Vec<Value> = Vec::new();
        for timing in waterfall.iter().filter(|e| keep(&e.url)) {
            seen.insert(timing.url.clone());
            let body = network_body_for(&bodies, &timing.url);
            entries.push(har_entry(
                &timing.url,
                &timing.timestamp,
                timing.duration,
                timing.transfer_size,
                body,
            ));
        }
        for body in bodies.iter().filter(|b| keep(&b.url) && !seen.contains(&b.url)) {
            let size = body.response_body.as_ref().map_or(0, |b| b.len() as u64);
            entries.push(har_entry(&body.url, &body.timestamp, body.duration, size, Some(body)));
        }

        let har = json!({
            "log": {
                "version": "1.2",
                "creator": {"name": "gasoline", "version": self.capture.server_version()},
                "pages": [],
                "entries": entries,
            }
        });
        json_response(&format!("HAR with {} entries", entries.len()), &har)
    }

    fn generate_csp(&self) -> crate::protocol::ToolResult {
        let page_origin = self.capture.tracking().tracked_url.as_deref().and_then(origin);
        let mut directives: BTreeMap<&'static str, BTreeSet<String>> = BTreeMap::new();
        directives.entry("default-src").or_default().insert("'self'".to_string());

        let waterfall = self.capture.network_waterfall();
        for entry in &waterfall {
            let Some(o) = origin(&entry.url) else { continue };
            let source = if Some(&o) == page_origin.as_ref() {
                "'self'".to_string()
            } else {
                o
            };
            directives
                .entry(csp_directive(entry.initiator_type.as_deref()))
                .or_default()
                .insert(source);
        }

        let policy = directives
            .iter()
            .map(|(d, sources)| {
                let list: Vec<&str> = sources.iter().map(String::as_str).collect();
                format!("{} {}", d, list.join(" "))
            })
            .collect::<Vec<_>>()
            .join("; ");
        let origins: BTreeSet<&String> = directives.values().flatten().collect();

        json_response(
            &format!("CSP suggestion from {} resources", waterfall.len()),
            &json!({
                "format": "csp",
                "policy": policy,
                "directives": directives,
                "origins_observed": origins.len(),
                "resources_analyzed": waterfall.len(),
            }),
        )
    }

    fn generate_sarif(&self) -> crate::protocol::ToolResult {
        let mut results: Vec<Value> = self
            .logs
            .entries()
            .into_iter()
            .filter(|e| e.level == LogLevel::Error)
            .map(|e| {
                let uri = e.url.clone().or_else(|| e.source.clone()).unwrap_or_default();
                json!({
                    "ruleId": "console-error",
                    "level": "error",
                    "message": {"text": e.message.unwrap_or_default()},
                    "locations": [{"physicalLocation": {"artifactLocation": {"uri": uri}}}],
                })
            })
            .collect();
        results.extend(
            self.capture
                .network_bodies()
                .into_iter()
                .filter(|b| b.status >= 400)
                .map(|b| {
                    json!({
                        "ruleId": "network-failure",
                        "level": "warning",
                        "message": {"text": format!("{} {} returned {}", b.method, b.url, b.status)},
                        "locations": [{"physicalLocation": {"artifactLocation": {"uri": b.url}}}],
                    })
                }),
        );

        let sarif = json!({
            "$schema": SARIF_SCHEMA,
            "version": "2.1.0",
            "runs": [{
                "tool": {"driver": {
                    "name": "gasoline",
                    "version": self.capture.server_version(),
                    "rules": [
                        {"id": "console-error", "shortDescription": {"text": "Console error captured in the browser"}},
                        {"id": "network-failure", "shortDescription": {"text": "HTTP request failed (status >= 400)"}},
                    ],
                }},
                "results": results,
            }],
        });
        json_response(&format!("SARIF report with {} results", results.len()), &sarif)
    }
}

fn har_entry(url: &str, started: &str, duration: f64, size: u64, body: Option<&NetworkBody>) -> Value {
    let method = body.map_or("GET", |b| b.method.as_str());
    let status = body.map_or(0, |b| b.status);
    let mut content = json!({
        "size": size,
        "mimeType": body.and_then(|b| b.content_type.clone()).unwrap_or_default(),
    });
    if let Some(text) = body.and_then(|b| b.response_body.clone()) {
        content["text"] = json!(text);
    }
    let mut request = json!({
        "method": method,
        "url": url,
        "httpVersion": "HTTP/1.1",
        "cookies": [],
        "headers": [],
        "queryString": [],
        "headersSize": -1,
        "bodySize": body.and_then(|b| b.request_body.as_ref()).map_or(0, |b| b.len()),
    });
    if let Some(post) = body.and_then(|b| b.request_body.clone()) {
        request["postData"] = json!({"mimeType": "", "text": post});
    }
    json!({
        "startedDateTime": started,
        "time": duration,
        "request": request,
        "response": {
            "status": status,
            "statusText": "",
            "httpVersion": "HTTP/1.1",
            "cookies": [],
            "headers": [],
            "content": content,
            "redirectURL": "",
            "headersSize": -1,
            "bodySize": size,
        },
        "cache": {},
        "timings": {"send": 0, "wait": duration, "receive": 0},
    })
}
