//! Saved page-state snapshots
//!
//! `interact(save_state)` records the tracked page and whatever form and
//! storage state the extension captured; `load_state` reads it back. The
//! store is a trait so a persistent backend can replace the in-memory one.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Fields the extension's state capture may return
pub const CAPTURED_FIELDS: &[&str] = &[
    "form_values",
    "scroll_position",
    "local_storage",
    "session_storage",
    "cookies",
];

/// Snapshot of a page's state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Page URL at save time
    #[serde(default)]
    pub url: String,
    /// Page title at save time
    #[serde(default)]
    pub title: String,
    /// Tracked tab at save time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    /// RFC 3339 save time
    #[serde(default)]
    pub saved_at: String,
    /// Captured page state (see [`CAPTURED_FIELDS`])
    #[serde(flatten)]
    pub captured: Map<String, Value>,
}

impl StateSnapshot {
    /// Copy the known captured fields out of an extension payload
    pub fn absorb_capture(&mut self, payload: &Map<String, Value>) {
        for field in CAPTURED_FIELDS {
            if let Some(v) = payload.get(*field) {
                self.captured.insert((*field).to_string(), v.clone());
            }
        }
    }

    /// Whether any restorable state was captured
    #[must_use]
    pub fn has_restorable_state(&self) -> bool {
        ["form_values", "local_storage", "session_storage", "cookies"]
            .iter()
            .any(|field| {
                self.captured
                    .get(*field)
                    .and_then(Value::as_object)
                    .is_some_and(|m| !m.is_empty())
            })
    }
}

/// Listing entry for `list_states`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSummary {
    /// Snapshot name
    pub name: String,
    /// Page URL
    pub url: String,
    /// Page title
    pub title: String,
    /// Save time
    pub saved_at: String,
}

/// Snapshot storage backend
pub trait SnapshotStore: Send + Sync {
    /// Save (or overwrite) a snapshot
    fn save(&self, name: &str, snapshot: StateSnapshot) -> Result<()>;

    /// Load a snapshot; `Error::NotFound` when absent
    fn load(&self, name: &str) -> Result<StateSnapshot>;

    /// All snapshots sorted by name
    fn list(&self) -> Result<Vec<SnapshotSummary>>;

    /// Delete a snapshot; `Error::NotFound` when absent
    fn delete(&self, name: &str) -> Result<()>;
}

/// In-memory snapshot store
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<BTreeMap<String, StateSnapshot>>,
}

impl MemorySnapshotStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, name: &str, snapshot: StateSnapshot) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("snapshot name is empty".to_string()));
        }
        self.snapshots.write().insert(name.to_string(), snapshot);
        Ok(())
    }

    fn load(&self, name: &str) -> Result<StateSnapshot> {
        self.snapshots
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("state snapshot {}", name)))
    }

    fn list(&self) -> Result<Vec<SnapshotSummary>> {
        Ok(self
            .snapshots
            .read()
            .iter()
            .map(|(name, s)| SnapshotSummary {
                name: name.clone(),
                url: s.url.clone(),
                title: s.title.clone(),
                saved_at: s.saved_at.clone(),
            })
            .collect())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.snapshots
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("state snapshot {}", name)))
    }
}
