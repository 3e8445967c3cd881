//! Saved page-state snapshots: `save_state`, `load_state`, `list_states`,
//! `delete_state`

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use gasoline_core::{CommandStatus, Error, PendingQuery, SnapshotStore, StateSnapshot};

use crate::handler::{parse_args, ToolHandler};
use crate::response::{json_response, ErrorCode, ToolError, ToolOutcome};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct StateArgs {
    snapshot_name: Option<String>,
    include_url: bool,
    tab_id: Option<i64>,
}

impl Default for StateArgs {
    fn default() -> Self {
        Self {
            snapshot_name: None,
            include_url: true,
            tab_id: None,
        }
    }
}

impl StateArgs {
    fn name(&self) -> Result<&str, ToolError> {
        self.snapshot_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ToolError::missing_param("snapshot_name"))
    }
}

fn store_error(err: Error, name: &str) -> ToolError {
    match err {
        Error::NotFound(_) => ToolError::new(
            ErrorCode::NoData,
            format!("No saved state named '{}'", name),
            "Call interact with action='list_states' to see saved snapshots",
        )
        .with_param("snapshot_name"),
        Error::InvalidInput(msg) => {
            ToolError::new(ErrorCode::InvalidParam, msg, "Use a non-empty snapshot name")
                .with_param("snapshot_name")
        }
        other => ToolError::internal(other.to_string()),
    }
}

impl ToolHandler {
    fn snapshot_store(&self) -> Result<&Arc<dyn SnapshotStore>, ToolError> {
        self.snapshots.as_ref().ok_or_else(|| {
            ToolError::new(
                ErrorCode::NotInitialized,
                "State snapshot store is not initialized",
                "Restart the server with a writable state directory",
            )
        })
    }

    /// Whether browser commands would currently be accepted
    fn browser_reachable(&self) -> bool {
        let now = Utc::now();
        self.capture.pilot_verdict(now).should_accept() && self.capture.is_extension_connected(now)
    }

    pub(super) fn save_state(&self, args: &Value, client_id: &str) -> ToolOutcome {
        let params: StateArgs = parse_args(args)?;
        let name = params.name()?;
        let store = self.snapshot_store()?;

        let tracking = self.capture.tracking();
        let mut snapshot = StateSnapshot {
            url: tracking.tracked_url.unwrap_or_default(),
            title: tracking.tracked_title.unwrap_or_default(),
            tab_id: params.tab_id.or(tracking.tracked_tab_id),
            saved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ..StateSnapshot::default()
        };

        let mut captured = false;
        if self.browser_reachable() {
            let query = PendingQuery::new("state_save", json!({"snapshot_name": name}))
                .with_tab(snapshot.tab_id);
            let dispatched = self.enqueue_command(
                query,
                "state",
                Some(self.config.state_capture_timeout),
                client_id,
            );
            match self.await_command_for(&dispatched, self.config.state_capture_timeout, client_id) {
                Some(cmd) if cmd.status == CommandStatus::Complete => {
                    if let Some(payload) = cmd.result.as_ref().and_then(Value::as_object) {
                        snapshot.absorb_capture(payload);
                        captured = true;
                    }
                }
                _ => warn!(snapshot = %name, "state capture unavailable, saving page location only"),
            }
        }

        let url = snapshot.url.clone();
        let title = snapshot.title.clone();
        store.save(name, snapshot).map_err(|e| store_error(e, name))?;
        info!(snapshot = %name, url = %url, captured, "page state saved");
        self.record_ai_action("save_state", (!url.is_empty()).then_some(url.as_str()), None);

        Ok(json_response(
            &format!("Saved state '{}'", name),
            &json!({
                "status": "saved",
                "snapshot_name": name,
                "url": url,
                "title": title,
                "state_captured": captured,
            }),
        ))
    }

    pub(super) fn load_state(&self, args: &Value, client_id: &str) -> ToolOutcome {
        let params: StateArgs = parse_args(args)?;
        let name = params.name()?;
        let snapshot = self
            .snapshot_store()?
            .load(name)
            .map_err(|e| store_error(e, name))?;

        let mut data = json!({
            "status": "loaded",
            "snapshot_name": name,
            "snapshot": snapshot,
        });

        if self.browser_reachable() {
            let tab_id = params.tab_id.or(snapshot.tab_id);
            if params.include_url && !snapshot.url.is_empty() {
                let nav = self.dispatch_navigation(&snapshot.url, tab_id, client_id);
                data["correlation_id"] = json!(nav.correlation_id);
                data["navigating_to"] = json!(snapshot.url);
            }
            if snapshot.has_restorable_state() {
                let query = PendingQuery::new(
                    "state_restore",
                    json!({"snapshot_name": name, "state": snapshot.captured}),
                )
                .with_tab(tab_id);
                let restore = self.enqueue_command(query, "state", None, client_id);
                data["restore_correlation_id"] = json!(restore.correlation_id);
            }
        }
        self.record_ai_action("load_state", None, None);

        Ok(json_response(&format!("Loaded state '{}'", name), &data))
    }

    pub(super) fn list_states(&self) -> ToolOutcome {
        let snapshots = self
            .snapshot_store()?
            .list()
            .map_err(|e| ToolError::internal(e.to_string()))?;
        Ok(json_response(
            &format!("{} saved states", snapshots.len()),
            &json!({"snapshots": snapshots, "count": snapshots.len()}),
        ))
    }

    pub(super) fn delete_state(&self, args: &Value) -> ToolOutcome {
        let params: StateArgs = parse_args(args)?;
        let name = params.name()?;
        self.snapshot_store()?
            .delete(name)
            .map_err(|e| store_error(e, name))?;
        info!(snapshot = %name, "page state deleted");
        Ok(json_response(
            &format!("Deleted state '{}'", name),
            &json!({"status": "deleted", "snapshot_name": name}),
        ))
    }
}
